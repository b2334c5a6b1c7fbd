//! New names for the objects a callee declares.
//!
//! An object's external name is prefixed with the name of the instance that
//! carries it into the caller. Given
//!
//! ```p4
//! control c() {
//!   table t { ... }  apply { t.apply(); }
//! }
//! control d() {
//!   c() cinst;
//!   apply { cinst.apply(); }
//! }
//! ```
//!
//! inlining produces
//!
//! ```p4
//! control d() {
//!   @name("cinst.t") table cinst_t_1 { ... }
//!   apply { cinst_t_1.apply(); }
//! }
//! ```
//!
//! so external tooling keeps seeing the table as `cinst.t` regardless of the
//! internal name picked to keep the caller's scope collision-free.

use crate::{
    bug,
    ir::{Annotation, Container, DeclId, Declaration, NAME_ANNOTATION},
    refs::ReferenceMap,
};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Per-instance mapping from a callee declaration to its new internal name
/// (unique in the whole program) and external name (the dotted path kept in
/// the `@name` annotation).
#[derive(Debug, Default)]
pub struct SymRenameMap {
    names: FxHashMap<DeclId, (String, String)>,
}

impl SymRenameMap {
    pub fn set_new_name(&mut self, decl: DeclId, internal: String, external: String) {
        if self.names.insert(decl, (internal, external)).is_some() {
            bug!("{decl:?} was renamed twice");
        }
    }

    #[must_use]
    pub fn is_renamed(&self, decl: DeclId) -> bool {
        self.names.contains_key(&decl)
    }

    #[must_use]
    pub fn get_name(&self, decl: DeclId) -> &str {
        match self.names.get(&decl) {
            Some((internal, _)) => internal,
            None => bug!("no new name recorded for {decl:?}"),
        }
    }

    #[must_use]
    pub fn get_ext_name(&self, decl: DeclId) -> &str {
        match self.names.get(&decl) {
            Some((_, external)) => external,
            None => bug!("no external name recorded for {decl:?}"),
        }
    }
}

/// Picks new names for every renameable local of `callee`, qualified by
/// `prefix` (the inlined instance's external name in the enclosing scope).
#[must_use]
pub fn compute_new_names(
    prefix: &str,
    callee: &Container,
    refs: &mut ReferenceMap,
) -> SymRenameMap {
    if prefix.is_empty() {
        bug!("empty rename prefix for callee `{}`", callee.name());
    }
    let mut map = SymRenameMap::default();
    for local in callee.locals() {
        rename(prefix, local, refs, &mut map);
    }
    map
}

fn rename(prefix: &str, decl: &Declaration, refs: &mut ReferenceMap, map: &mut SymRenameMap) {
    let original = decl.external_name();
    // A leading dot anchors the name globally; it must survive unchanged.
    let external = if original.starts_with('.') {
        original
    } else {
        format!("{prefix}.{original}")
    };
    let base = external.replace('.', "_");
    let internal = refs.new_name(&base);
    debug!("renaming {:?} to {internal} ({external})", decl.id());
    map.set_new_name(decl.id(), internal, external);
}

/// Rebuilds an annotation list so it carries `@name(external)`, replacing any
/// existing `@name` and leaving every other annotation untouched.
#[must_use]
pub fn set_name_annotation(
    mut annotations: Vec<Annotation>,
    external: &str,
) -> Vec<Annotation> {
    annotations.retain(|annotation| annotation.name != NAME_ANNOTATION);
    annotations.push(Annotation::external_name(external));
    annotations
}
