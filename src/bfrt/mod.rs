//! Generation of the BFRT runtime schema: one JSON document describing every
//! table's key, data, and operations to the control plane. Only the pieces
//! tied to action profiles and selectors live here; they are the ones whose
//! shape depends on invariants the inliner maintains (stable external names,
//! unique ids).
//!
//! The document must come out byte-identical for a fixed input, so every
//! object is built in a fixed insertion order and maps preserve it.

pub use self::p4info::*;
use crate::{
    bug,
    error::{BfrtError, ErrorSink},
    position::Span,
};
use serde_json::{json, Map, Value};

mod p4info;

/// Object-kind prefixes baked into the top byte of schema ids.
pub mod p4ids {
    pub const TABLE: u32 = 0x02;
    pub const ACTION_PROFILE: u32 = 0x11;
    pub const ACTION_SELECTOR: u32 = 0x81;
    pub const ACTION_SELECTOR_GET_MEMBER: u32 = 0x82;
}

/// Well-known ids of the synthesized key and data fields.
mod data_ids {
    pub const MATCH_PRIORITY: u32 = 0xffff_ff01;
    pub const ACTION_MEMBER_ID: u32 = 0xffff_ff02;
    pub const SELECTOR_GROUP_ID: u32 = 0xffff_ff03;
    pub const ACTION_MEMBER_STATUS: u32 = 0xffff_ff04;
    pub const MAX_GROUP_SIZE: u32 = 0xffff_ff05;
    pub const HASH_VALUE: u32 = 0xffff_ff06;
}

#[must_use]
pub fn make_bfrt_id(id: P4Id, prefix: u32) -> P4Id {
    (prefix << 24) | (id & 0x00ff_ffff)
}

fn is_of_type(id: P4Id, prefix: u32) -> bool {
    id >> 24 == prefix
}

pub struct BfRtSchemaGenerator<'a> {
    p4info: &'a P4Info,
}

struct ActionProf {
    name: String,
    id: P4Id,
    table_ids: Vec<P4Id>,
    size: i64,
    annotations: Value,
}

impl ActionProf {
    fn from(profile: &ActionProfile) -> Self {
        let pre = &profile.preamble;
        Self {
            name: pre.name.clone(),
            id: make_bfrt_id(pre.id, p4ids::ACTION_PROFILE),
            table_ids: profile.table_ids.clone(),
            size: profile.size,
            annotations: transform_annotations(pre),
        }
    }
}

struct ActionSelector {
    name: String,
    get_mem_name: String,
    id: P4Id,
    get_mem_id: P4Id,
    max_group_size: i64,
    /// Also the size of the selector table.
    num_groups: i64,
    table_ids: Vec<P4Id>,
    annotations: Value,
}

impl ActionSelector {
    fn from(profile: &ActionProfile) -> Option<Self> {
        if !profile.with_selector {
            return None;
        }
        let pre = &profile.preamble;
        Some(Self {
            name: pre.name.clone(),
            get_mem_name: format!("{}_get_member", pre.name),
            id: make_bfrt_id(pre.id, p4ids::ACTION_SELECTOR),
            get_mem_id: make_bfrt_id(pre.id, p4ids::ACTION_SELECTOR_GET_MEMBER),
            max_group_size: profile.max_group_size,
            num_groups: profile.size,
            table_ids: profile.table_ids.clone(),
            annotations: transform_annotations(pre),
        })
    }

    fn from_dpdk(instance: &ExternInstance, sink: &mut ErrorSink) -> Option<Self> {
        let pre = &instance.preamble;
        let ExternPayload::ActionSelector(selector) = &instance.info else {
            sink.error(
                Span::default(),
                BfrtError::MismatchedExternPayload {
                    instance: pre.name.clone(),
                },
            );
            return None;
        };
        Some(Self {
            name: pre.name.clone(),
            get_mem_name: format!("{}_get_member", pre.name),
            id: make_bfrt_id(pre.id, p4ids::ACTION_SELECTOR),
            get_mem_id: make_bfrt_id(pre.id, p4ids::ACTION_SELECTOR_GET_MEMBER),
            max_group_size: selector.max_group_size,
            num_groups: selector.num_groups,
            table_ids: selector.table_ids.clone(),
            annotations: transform_annotations(pre),
        })
    }
}

impl<'a> BfRtSchemaGenerator<'a> {
    #[must_use]
    pub fn new(p4info: &'a P4Info) -> Self {
        Self { p4info }
    }

    /// The whole schema document. For a fixed P4Info this is deterministic
    /// down to the byte.
    pub fn gen_schema(&self, sink: &mut ErrorSink) -> Value {
        let mut schema = Map::new();
        schema.insert("schema_version".to_string(), json!("1.0.0"));

        let mut tables = Vec::new();
        self.add_match_tables(&mut tables, sink);
        self.add_action_profs(&mut tables);
        self.add_dpdk_externs(&mut tables, sink);
        schema.insert("tables".to_string(), Value::Array(tables));

        schema.insert("learn_filters".to_string(), json!([]));
        Value::Object(schema)
    }

    fn add_match_tables(&self, tables: &mut Vec<Value>, sink: &mut ErrorSink) {
        for table in &self.p4info.tables {
            let pre = &table.preamble;
            let mut table_json = init_table_json(
                &pre.name,
                pre.id,
                "MatchAction_Direct",
                table.size,
                &transform_annotations(pre),
            );
            if !self.add_action_prof_ids(table, &mut table_json, sink) {
                continue;
            }

            let mut key = Vec::new();
            if table
                .match_fields
                .iter()
                .any(|field| field.match_type.needs_priority())
            {
                add_key_field(
                    &mut key,
                    data_ids::MATCH_PRIORITY,
                    "$MATCH_PRIORITY",
                    true,
                    "Exact",
                    make_type_int("uint32"),
                );
            }
            for field in &table.match_fields {
                add_key_field(
                    &mut key,
                    field.id,
                    &field.name,
                    true,
                    &field.match_type.to_string(),
                    make_type_bytes(field.bitwidth),
                );
            }
            table_json.insert("key".to_string(), Value::Array(key));

            let mut data = Vec::new();
            self.add_match_action_data(table, &mut table_json, &mut data);
            table_json.insert("data".to_string(), Value::Array(data));

            table_json.insert("supported_operations".to_string(), json!([]));
            table_json.insert("attributes".to_string(), json!([]));
            tables.push(Value::Object(table_json));
        }
    }

    /// Rewrites the table type of a table backed by an action profile or
    /// selector and records the dependency edges. Returns false when the
    /// implementation id does not resolve; the table is skipped then.
    fn add_action_prof_ids(
        &self,
        table: &Table,
        table_json: &mut Map<String, Value>,
        sink: &mut ErrorSink,
    ) -> bool {
        let implementation_id = table.implementation_id;
        if implementation_id == 0 {
            return true;
        }
        let Some(has_selector) = self.act_prof_has_selector(implementation_id) else {
            sink.error(
                Span::default(),
                BfrtError::InvalidImplementationId {
                    id: implementation_id,
                },
            );
            return false;
        };
        let table_type = if has_selector {
            "MatchAction_Indirect_Selector"
        } else {
            "MatchAction_Indirect"
        };
        // Re-inserting under the same key keeps its position in the object.
        table_json.insert("table_type".to_string(), json!(table_type));

        add_to_depends_on(
            table_json,
            make_bfrt_id(implementation_id, p4ids::ACTION_PROFILE),
        );
        if has_selector {
            add_to_depends_on(
                table_json,
                make_bfrt_id(implementation_id, p4ids::ACTION_SELECTOR),
            );
        }
        true
    }

    fn act_prof_has_selector(&self, id: P4Id) -> Option<bool> {
        if is_of_type(id, p4ids::ACTION_PROFILE) {
            self.p4info
                .action_profile(id)
                .map(|profile| profile.with_selector)
        } else if is_of_type(id, p4ids::ACTION_SELECTOR) {
            Some(true)
        } else {
            None
        }
    }

    fn add_match_action_data(
        &self,
        table: &Table,
        table_json: &mut Map<String, Value>,
        data: &mut Vec<Value>,
    ) {
        let table_type = table_json["table_type"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();
        match table_type.as_str() {
            "MatchAction_Direct" => {
                table_json.insert("action_specs".to_string(), self.make_action_specs(table));
            }
            "MatchAction_Indirect" => {
                let field = make_common_data_field(
                    data_ids::ACTION_MEMBER_ID,
                    "$ACTION_MEMBER_ID",
                    make_type_int("uint32"),
                    false,
                );
                add_singleton(data, field, true, false);
            }
            "MatchAction_Indirect_Selector" => {
                // The action member id and selector group id are mutually
                // exclusive, hence a oneof.
                let choices = vec![
                    make_common_data_field(
                        data_ids::ACTION_MEMBER_ID,
                        "$ACTION_MEMBER_ID",
                        make_type_int("uint32"),
                        false,
                    ),
                    make_common_data_field(
                        data_ids::SELECTOR_GROUP_ID,
                        "$SELECTOR_GROUP_ID",
                        make_type_int("uint32"),
                        false,
                    ),
                ];
                add_oneof(data, choices, true, false);
            }
            other => bug!("invalid table type '{other}'"),
        }
    }

    fn add_action_profs(&self, tables: &mut Vec<Value>) {
        for profile in &self.p4info.action_profiles {
            let prof = ActionProf::from(profile);
            self.add_action_prof_common(tables, &prof);
            if let Some(selector) = ActionSelector::from(profile) {
                self.add_action_selector_common(tables, &selector);
            }
        }
    }

    fn add_action_prof_common(&self, tables: &mut Vec<Value>, prof: &ActionProf) {
        let mut table_json =
            init_table_json(&prof.name, prof.id, "Action", prof.size, &prof.annotations);

        let mut key = Vec::new();
        add_key_field(
            &mut key,
            data_ids::ACTION_MEMBER_ID,
            "$ACTION_MEMBER_ID",
            true,
            "Exact",
            make_type_int("uint32"),
        );
        table_json.insert("key".to_string(), Value::Array(key));
        table_json.insert("data".to_string(), json!([]));
        // Members run the actions of the tables bound to this profile.
        let action_specs = prof
            .table_ids
            .iter()
            .find_map(|&id| self.p4info.table(id))
            .map(|table| self.make_action_specs(table))
            .unwrap_or_else(|| json!([]));
        table_json.insert("action_specs".to_string(), action_specs);

        table_json.insert("supported_operations".to_string(), json!([]));
        table_json.insert("attributes".to_string(), json!([]));
        tables.push(Value::Object(table_json));
    }

    fn add_action_selector_common(&self, tables: &mut Vec<Value>, selector: &ActionSelector) {
        // The maximum number of groups is the table size for the selector.
        let mut table_json = init_table_json(
            &selector.name,
            selector.id,
            "Selector",
            selector.num_groups,
            &selector.annotations,
        );

        let mut key = Vec::new();
        add_key_field(
            &mut key,
            data_ids::SELECTOR_GROUP_ID,
            "$SELECTOR_GROUP_ID",
            true,
            "Exact",
            make_type_int("uint32"),
        );
        table_json.insert("key".to_string(), Value::Array(key));

        let mut data = Vec::new();
        add_singleton(
            &mut data,
            make_common_data_field(
                data_ids::ACTION_MEMBER_ID,
                "$ACTION_MEMBER_ID",
                make_type_int("uint32"),
                true,
            ),
            false,
            false,
        );
        add_singleton(
            &mut data,
            make_common_data_field(
                data_ids::ACTION_MEMBER_STATUS,
                "$ACTION_MEMBER_STATUS",
                make_type_bool(),
                true,
            ),
            false,
            false,
        );
        add_singleton(
            &mut data,
            make_common_data_field(
                data_ids::MAX_GROUP_SIZE,
                "$MAX_GROUP_SIZE",
                make_type_int_with_default("uint32", selector.max_group_size),
                false,
            ),
            false,
            false,
        );
        table_json.insert("data".to_string(), Value::Array(data));

        table_json.insert("supported_operations".to_string(), json!([]));
        table_json.insert("attributes".to_string(), json!([]));
        tables.push(Value::Object(table_json));
    }

    fn add_action_selector_get_member_common(
        &self,
        tables: &mut Vec<Value>,
        selector: &ActionSelector,
    ) {
        let mut table_json = init_table_json(
            &selector.get_mem_name,
            selector.get_mem_id,
            "SelectorGetMember",
            1,
            &selector.annotations,
        );

        let mut key = Vec::new();
        add_key_field(
            &mut key,
            data_ids::SELECTOR_GROUP_ID,
            "$SELECTOR_GROUP_ID",
            true,
            "Exact",
            make_type_int("uint64"),
        );
        add_key_field(
            &mut key,
            data_ids::HASH_VALUE,
            "hash_value",
            true,
            "Exact",
            make_type_int("uint64"),
        );
        table_json.insert("key".to_string(), Value::Array(key));

        let mut data = Vec::new();
        add_singleton(
            &mut data,
            make_common_data_field(
                data_ids::ACTION_MEMBER_ID,
                "$ACTION_MEMBER_ID",
                make_type_int("uint64"),
                false,
            ),
            false,
            false,
        );
        table_json.insert("data".to_string(), Value::Array(data));

        table_json.insert("supported_operations".to_string(), json!([]));
        table_json.insert("attributes".to_string(), json!([]));
        add_to_depends_on(&mut table_json, selector.id);
        tables.push(Value::Object(table_json));
    }

    fn add_dpdk_externs(&self, tables: &mut Vec<Value>, sink: &mut ErrorSink) {
        for extern_type in &self.p4info.externs {
            if extern_type.extern_type_id != p4ids::ACTION_SELECTOR {
                continue;
            }
            for instance in &extern_type.instances {
                if let Some(selector) = ActionSelector::from_dpdk(instance, sink) {
                    self.add_action_selector_common(tables, &selector);
                    self.add_action_selector_get_member_common(tables, &selector);
                }
            }
        }
    }

    fn make_action_specs(&self, table: &Table) -> Value {
        let mut specs = Vec::new();
        for &action_id in &table.action_refs {
            let Some(action) = self.p4info.action(action_id) else {
                bug!("table `{}` references unknown action {action_id}", table.preamble.name);
            };
            let data: Vec<Value> = action
                .params
                .iter()
                .map(|param| {
                    json!({
                        "id": param.id,
                        "name": param.name,
                        "repeated": false,
                        "mandatory": true,
                        "read_only": false,
                        "type": make_type_bytes(param.bitwidth),
                    })
                })
                .collect();
            specs.push(json!({
                "id": action.preamble.id,
                "name": action.preamble.name,
                "action_scope": "TableAndDefault",
                "annotations": transform_annotations(&action.preamble),
                "data": data,
            }));
        }
        Value::Array(specs)
    }
}

fn init_table_json(
    name: &str,
    id: P4Id,
    table_type: &str,
    size: i64,
    annotations: &Value,
) -> Map<String, Value> {
    let mut table = Map::new();
    table.insert("name".to_string(), json!(name));
    table.insert("id".to_string(), json!(id));
    table.insert("table_type".to_string(), json!(table_type));
    table.insert("size".to_string(), json!(size));
    table.insert("annotations".to_string(), annotations.clone());
    table
}

fn add_to_depends_on(table_json: &mut Map<String, Value>, id: P4Id) {
    let depends_on = table_json
        .entry("depends_on")
        .or_insert_with(|| json!([]));
    match depends_on.as_array_mut() {
        Some(ids) => ids.push(json!(id)),
        None => bug!("depends_on is not an array"),
    }
}

fn add_key_field(
    key: &mut Vec<Value>,
    id: u32,
    name: &str,
    mandatory: bool,
    match_type: &str,
    type_json: Value,
) {
    key.push(json!({
        "id": id,
        "name": name,
        "repeated": false,
        "annotations": [],
        "mandatory": mandatory,
        "match_type": match_type,
        "type": type_json,
    }));
}

fn make_common_data_field(id: u32, name: &str, type_json: Value, repeated: bool) -> Value {
    json!({
        "id": id,
        "name": name,
        "repeated": repeated,
        "annotations": [],
        "type": type_json,
    })
}

fn add_singleton(data: &mut Vec<Value>, field: Value, mandatory: bool, read_only: bool) {
    data.push(json!({
        "mandatory": mandatory,
        "read_only": read_only,
        "singleton": field,
    }));
}

fn add_oneof(data: &mut Vec<Value>, choices: Vec<Value>, mandatory: bool, read_only: bool) {
    data.push(json!({
        "mandatory": mandatory,
        "read_only": read_only,
        "oneof": choices,
    }));
}

fn make_type_int(ty: &str) -> Value {
    json!({ "type": ty })
}

fn make_type_int_with_default(ty: &str, default_value: i64) -> Value {
    json!({ "type": ty, "default_value": default_value })
}

fn make_type_bool() -> Value {
    json!({ "type": "bool" })
}

fn make_type_bytes(width: u32) -> Value {
    json!({ "type": "bytes", "width": width })
}

fn transform_annotations(preamble: &Preamble) -> Value {
    Value::Array(
        preamble
            .annotations
            .iter()
            .map(|annotation| json!(annotation))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticPayload;

    fn selector_p4info() -> P4Info {
        let profile_id = make_bfrt_id(7, p4ids::ACTION_PROFILE);
        let table_id = make_bfrt_id(1, p4ids::TABLE);
        P4Info {
            tables: vec![Table {
                preamble: Preamble {
                    id: table_id,
                    name: "t".to_string(),
                    annotations: Vec::new(),
                },
                match_fields: vec![MatchField {
                    id: 1,
                    name: "hdr.ethernet.dst".to_string(),
                    bitwidth: 48,
                    match_type: MatchType::Exact,
                }],
                action_refs: vec![20],
                implementation_id: profile_id,
                size: 1024,
            }],
            actions: vec![Action {
                preamble: Preamble {
                    id: 20,
                    name: "set_port".to_string(),
                    annotations: Vec::new(),
                },
                params: vec![ActionParam {
                    id: 1,
                    name: "port".to_string(),
                    bitwidth: 9,
                }],
            }],
            action_profiles: vec![ActionProfile {
                preamble: Preamble {
                    id: profile_id,
                    name: "p".to_string(),
                    annotations: Vec::new(),
                },
                table_ids: vec![table_id],
                with_selector: true,
                size: 128,
                max_group_size: 64,
            }],
            externs: Vec::new(),
        }
    }

    fn tables_of(schema: &Value) -> &Vec<Value> {
        schema["tables"].as_array().unwrap()
    }

    fn find_table<'v>(schema: &'v Value, name: &str, table_type: &str) -> &'v Value {
        tables_of(schema)
            .iter()
            .find(|table| table["name"] == name && table["table_type"] == table_type)
            .unwrap_or_else(|| panic!("no {table_type} table named {name}"))
    }

    #[test]
    fn test_selector_profile_produces_profile_and_selector_tables() {
        let p4info = selector_p4info();
        let mut sink = ErrorSink::default();
        let schema = BfRtSchemaGenerator::new(&p4info).gen_schema(&mut sink);
        assert!(!sink.has_errors());

        assert_eq!(schema["schema_version"], "1.0.0");
        assert_eq!(tables_of(&schema).len(), 3);

        let profile = find_table(&schema, "p", "Action");
        assert_eq!(profile["size"], 128);
        assert_eq!(
            profile["action_specs"][0]["name"],
            "set_port",
        );

        let selector = find_table(&schema, "p", "Selector");
        assert_eq!(selector["size"], 128);
        assert_eq!(selector["id"], make_bfrt_id(7, p4ids::ACTION_SELECTOR));
        let data = selector["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[2]["singleton"]["name"], "$MAX_GROUP_SIZE");
        assert_eq!(data[2]["singleton"]["type"]["default_value"], 64);
    }

    #[test]
    fn test_client_table_becomes_indirect_selector_with_a_oneof() {
        let p4info = selector_p4info();
        let mut sink = ErrorSink::default();
        let schema = BfRtSchemaGenerator::new(&p4info).gen_schema(&mut sink);

        let table = find_table(&schema, "t", "MatchAction_Indirect_Selector");
        let depends_on = table["depends_on"].as_array().unwrap();
        assert_eq!(
            depends_on,
            &vec![
                json!(make_bfrt_id(7, p4ids::ACTION_PROFILE)),
                json!(make_bfrt_id(7, p4ids::ACTION_SELECTOR)),
            ],
        );
        let oneof = table["data"][0]["oneof"].as_array().unwrap();
        assert_eq!(oneof[0]["name"], "$ACTION_MEMBER_ID");
        assert_eq!(oneof[1]["name"], "$SELECTOR_GROUP_ID");
        // The direct-table action specs are gone for indirect tables.
        assert!(table.get("action_specs").is_none());
    }

    #[test]
    fn test_dpdk_extern_emits_the_get_member_companion() {
        let p4info = P4Info {
            externs: vec![ExternType {
                extern_type_id: p4ids::ACTION_SELECTOR,
                instances: vec![ExternInstance {
                    preamble: Preamble {
                        id: make_bfrt_id(3, p4ids::ACTION_SELECTOR),
                        name: "sel".to_string(),
                        annotations: Vec::new(),
                    },
                    info: ExternPayload::ActionSelector(DpdkActionSelector {
                        table_ids: Vec::new(),
                        num_groups: 16,
                        max_group_size: 8,
                    }),
                }],
            }],
            ..Default::default()
        };
        let mut sink = ErrorSink::default();
        let schema = BfRtSchemaGenerator::new(&p4info).gen_schema(&mut sink);
        assert!(!sink.has_errors());

        let selector = find_table(&schema, "sel", "Selector");
        assert_eq!(selector["size"], 16);

        let get_member = find_table(&schema, "sel_get_member", "SelectorGetMember");
        assert_eq!(get_member["size"], 1);
        let key = get_member["key"].as_array().unwrap();
        assert_eq!(key[0]["name"], "$SELECTOR_GROUP_ID");
        assert_eq!(key[0]["type"]["type"], "uint64");
        assert_eq!(key[1]["name"], "hash_value");
        assert_eq!(
            get_member["depends_on"][0],
            json!(make_bfrt_id(3, p4ids::ACTION_SELECTOR)),
        );
        assert_eq!(get_member["data"][0]["mandatory"], false);
    }

    #[test]
    fn test_mismatched_extern_payload_is_reported() {
        let p4info = P4Info {
            externs: vec![ExternType {
                extern_type_id: p4ids::ACTION_SELECTOR,
                instances: vec![ExternInstance {
                    preamble: Preamble {
                        id: make_bfrt_id(4, p4ids::ACTION_SELECTOR),
                        name: "broken".to_string(),
                        annotations: Vec::new(),
                    },
                    info: ExternPayload::Opaque,
                }],
            }],
            ..Default::default()
        };
        let mut sink = ErrorSink::default();
        let schema = BfRtSchemaGenerator::new(&p4info).gen_schema(&mut sink);

        assert_eq!(sink.error_count(), 1);
        assert!(matches!(
            &sink.diagnostics()[0].payload,
            DiagnosticPayload::Bfrt(BfrtError::MismatchedExternPayload { instance })
                if instance == "broken"
        ));
        assert!(tables_of(&schema).is_empty());
    }

    #[test]
    fn test_invalid_implementation_id_skips_the_table() {
        let mut p4info = selector_p4info();
        p4info.tables[0].implementation_id = 12345;
        let mut sink = ErrorSink::default();
        let schema = BfRtSchemaGenerator::new(&p4info).gen_schema(&mut sink);

        assert_eq!(sink.error_count(), 1);
        assert!(matches!(
            &sink.diagnostics()[0].payload,
            DiagnosticPayload::Bfrt(BfrtError::InvalidImplementationId { id: 12345 }),
        ));
        // The profile and selector are still emitted; only the broken match
        // table is skipped.
        assert_eq!(tables_of(&schema).len(), 2);
    }

    #[test]
    fn test_schema_generation_is_deterministic() {
        let p4info = selector_p4info();
        let mut sink = ErrorSink::default();
        let first = BfRtSchemaGenerator::new(&p4info).gen_schema(&mut sink);
        let second = BfRtSchemaGenerator::new(&p4info).gen_schema(&mut sink);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap(),
        );
    }
}
