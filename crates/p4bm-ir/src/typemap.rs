//! Expression-to-type side table.
//!
//! The front end records a type for every expression it produces; the
//! rewrite passes register types for every node they mint. An expression
//! without a type reaching the converters is a bug, so [`TypeMap::get`]
//! asserts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::id::ExprId;
use crate::types::Type;

/// Side table mapping every expression occurrence to its type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeMap {
    map: HashMap<ExprId, Type>,
}

impl TypeMap {
    pub fn new() -> Self {
        TypeMap::default()
    }

    /// The type of an expression. Panics if no type was registered: a
    /// well-typed input guarantees every node has one.
    pub fn get(&self, id: ExprId) -> &Type {
        self.map
            .get(&id)
            .unwrap_or_else(|| panic!("no type registered for expression {id}"))
    }

    pub fn try_get(&self, id: ExprId) -> Option<&Type> {
        self.map.get(&id)
    }

    pub fn set(&mut self, id: ExprId, ty: Type) {
        self.map.insert(id, ty);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let mut tm = TypeMap::new();
        tm.set(ExprId(3), Type::bits(16));
        assert_eq!(*tm.get(ExprId(3)), Type::bits(16));
        assert!(tm.try_get(ExprId(4)).is_none());
    }

    #[test]
    #[should_panic(expected = "no type registered")]
    fn get_missing_panics() {
        let tm = TypeMap::new();
        let _ = tm.get(ExprId(0));
    }
}
