//! Name resolution results and fresh-name generation.
//!
//! The front end resolves every path expression to its declaration and
//! records which declarations are referenced at all. The back end also uses
//! the map to mint fresh names for synthesized objects (scalars header,
//! temporaries, calculations, field lists).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::id::{DeclId, ExprId};

/// Resolution map: path expression -> declaration, plus usage information
/// and a fresh-name generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefMap {
    decls: HashMap<ExprId, DeclId>,
    used: HashSet<DeclId>,
    names_in_use: HashSet<String>,
}

impl RefMap {
    pub fn new() -> Self {
        RefMap::default()
    }

    /// Records that `path` resolves to `decl`. Also reserves the path's name
    /// so fresh names cannot collide with it.
    pub fn bind(&mut self, path: ExprId, decl: DeclId) {
        self.decls.insert(path, decl);
    }

    /// The declaration a path expression resolves to. `None` for unresolved
    /// names, which the back end treats as extern functions.
    pub fn get_declaration(&self, path: ExprId) -> Option<DeclId> {
        self.decls.get(&path).copied()
    }

    pub fn mark_used(&mut self, decl: DeclId) {
        self.used.insert(decl);
    }

    pub fn is_used(&self, decl: DeclId) -> bool {
        self.used.contains(&decl)
    }

    /// Reserves a declared name so [`new_name`](Self::new_name) avoids it.
    pub fn reserve_name(&mut self, name: &str) {
        self.names_in_use.insert(name.to_string());
    }

    /// Returns a name based on `hint` that has not been handed out before:
    /// the hint itself if free, otherwise `hint_0`, `hint_1`, ...
    pub fn new_name(&mut self, hint: &str) -> String {
        if self.names_in_use.insert(hint.to_string()) {
            return hint.to_string();
        }
        let mut n = 0u32;
        loop {
            let candidate = format!("{hint}_{n}");
            if self.names_in_use.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_resolve() {
        let mut refs = RefMap::new();
        refs.bind(ExprId(0), DeclId(5));
        assert_eq!(refs.get_declaration(ExprId(0)), Some(DeclId(5)));
        assert_eq!(refs.get_declaration(ExprId(1)), None);
    }

    #[test]
    fn usage_tracking() {
        let mut refs = RefMap::new();
        assert!(!refs.is_used(DeclId(0)));
        refs.mark_used(DeclId(0));
        assert!(refs.is_used(DeclId(0)));
    }

    #[test]
    fn fresh_names_do_not_repeat() {
        let mut refs = RefMap::new();
        assert_eq!(refs.new_name("tmp"), "tmp");
        assert_eq!(refs.new_name("tmp"), "tmp_0");
        assert_eq!(refs.new_name("tmp"), "tmp_1");
    }

    #[test]
    fn fresh_names_avoid_reserved() {
        let mut refs = RefMap::new();
        refs.reserve_name("scalars");
        assert_eq!(refs.new_name("scalars"), "scalars_0");
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fresh_names_never_collide(
            hints in proptest::collection::vec("[a-z]{1,4}", 1..20),
        ) {
            let mut refs = RefMap::new();
            let mut seen = std::collections::HashSet::new();
            for hint in hints {
                let name = refs.new_name(&hint);
                prop_assert!(seen.insert(name));
            }
        }
    }
}
