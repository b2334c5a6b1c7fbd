use crate::{
    bug,
    ir::{DeclId, ExprId},
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Resolution results for path expressions, plus the program-wide fresh-name
/// generator.
///
/// Upstream reference resolution populates the map; every transformation that
/// rebuilds a path expression must re-register it here so that resolution
/// stays valid without a full re-resolve inside a batch. Name generation is
/// monotonic: a name handed out once is remembered forever, so no later call
/// can collide with it.
#[derive(Debug, Default)]
pub struct ReferenceMap {
    declarations: FxHashMap<ExprId, DeclId>,
    used_names: FxHashSet<String>,
    name_counters: FxHashMap<String, usize>,
}

impl ReferenceMap {
    #[must_use]
    pub fn get_declaration(&self, path: ExprId) -> Option<DeclId> {
        self.declarations.get(&path).copied()
    }

    /// Resolves a path that is required to have a declaration.
    #[must_use]
    pub fn declaration(&self, path: ExprId) -> DeclId {
        match self.get_declaration(path) {
            Some(decl) => decl,
            None => bug!("no declaration recorded for path {path:?}"),
        }
    }

    pub fn set_declaration(&mut self, path: ExprId, decl: DeclId) {
        self.declarations.insert(path, decl);
    }

    /// Records a name that already occurs in the program so that
    /// [`Self::new_name`] never hands it out again.
    pub fn mark_name_used(&mut self, name: &str) {
        self.used_names.insert(name.to_string());
    }

    /// Returns a name that has never been used anywhere in the program.
    ///
    /// A trailing `_<digits>` suffix on the base is discarded first, so
    /// renaming an already-renamed object keeps a single counter suffix
    /// instead of stacking them.
    pub fn new_name(&mut self, base: &str) -> String {
        let base = trim_counter_suffix(base);
        let mut count = self.name_counters.get(base).copied().unwrap_or(0);
        loop {
            count += 1;
            let candidate = format!("{base}_{count}");
            if !self.used_names.contains(&candidate) {
                self.name_counters.insert(base.to_string(), count);
                self.used_names.insert(candidate.clone());
                return candidate;
            }
        }
    }
}

fn trim_counter_suffix(base: &str) -> &str {
    let digits = base
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 || digits == base.len() {
        return base;
    }
    match base[..base.len() - digits].strip_suffix('_') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => base,
    }
}
