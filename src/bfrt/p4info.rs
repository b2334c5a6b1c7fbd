//! The slice of P4Info the schema generator consumes. Ids follow the
//! P4Runtime convention: the top byte of an object id encodes its kind.

pub type P4Id = u32;

#[derive(Clone, Debug, Default)]
pub struct P4Info {
    pub tables: Vec<Table>,
    pub actions: Vec<Action>,
    pub action_profiles: Vec<ActionProfile>,
    pub externs: Vec<ExternType>,
}

impl P4Info {
    #[must_use]
    pub fn action(&self, id: P4Id) -> Option<&Action> {
        self.actions.iter().find(|action| action.preamble.id == id)
    }

    #[must_use]
    pub fn table(&self, id: P4Id) -> Option<&Table> {
        self.tables.iter().find(|table| table.preamble.id == id)
    }

    #[must_use]
    pub fn action_profile(&self, id: P4Id) -> Option<&ActionProfile> {
        self.action_profiles
            .iter()
            .find(|profile| profile.preamble.id == id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Preamble {
    pub id: P4Id,
    pub name: String,
    pub annotations: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Table {
    pub preamble: Preamble,
    pub match_fields: Vec<MatchField>,
    pub action_refs: Vec<P4Id>,
    /// Id of the action profile or selector implementing this table, zero
    /// when the table binds its actions directly.
    pub implementation_id: P4Id,
    pub size: i64,
}

#[derive(Clone, Debug)]
pub struct MatchField {
    pub id: u32,
    pub name: String,
    pub bitwidth: u32,
    pub match_type: MatchType,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum MatchType {
    Exact,
    #[strum(serialize = "LPM")]
    Lpm,
    Ternary,
    Range,
    Optional,
}

impl MatchType {
    /// Whether entries with this match kind need a `$MATCH_PRIORITY` key to
    /// disambiguate overlaps.
    #[must_use]
    pub fn needs_priority(self) -> bool {
        matches!(self, Self::Ternary | Self::Range | Self::Optional)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Action {
    pub preamble: Preamble,
    pub params: Vec<ActionParam>,
}

#[derive(Clone, Debug)]
pub struct ActionParam {
    pub id: u32,
    pub name: String,
    pub bitwidth: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ActionProfile {
    pub preamble: Preamble,
    pub table_ids: Vec<P4Id>,
    pub with_selector: bool,
    pub size: i64,
    pub max_group_size: i64,
}

/// All instances of one extern type.
#[derive(Clone, Debug, Default)]
pub struct ExternType {
    pub extern_type_id: P4Id,
    pub instances: Vec<ExternInstance>,
}

#[derive(Clone, Debug)]
pub struct ExternInstance {
    pub preamble: Preamble,
    pub info: ExternPayload,
}

/// Stand-in for the packed `Any` payload an extern instance carries.
#[derive(Clone, Debug)]
pub enum ExternPayload {
    ActionSelector(DpdkActionSelector),
    Opaque,
}

#[derive(Clone, Debug, Default)]
pub struct DpdkActionSelector {
    pub table_ids: Vec<P4Id>,
    pub num_groups: i64,
    pub max_group_size: i64,
}
