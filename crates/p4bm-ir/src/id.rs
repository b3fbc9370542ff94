//! Stable ID newtypes for IR entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that an `ExprId` cannot be accidentally used where a `DeclId` is
//! expected. Each ID is an index into the corresponding arena.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable expression identifier. Indexes into an [`ExprArena`](crate::expr::ExprArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExprId(pub u32);

/// Stable statement identifier. Indexes into a [`StmtArena`](crate::stmt::StmtArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// Stable declaration identifier. Indexes into a [`DeclArena`](crate::decl::DeclArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclId(pub u32);

/// Identity of a struct-like type definition in the [`TypeRegistry`](crate::types::TypeRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructId(pub u32);

// Display implementations -- just print the inner value.

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display() {
        assert_eq!(format!("{}", ExprId(7)), "7");
        assert_eq!(format!("{}", StmtId(0)), "0");
        assert_eq!(format!("{}", DeclId(12)), "12");
        assert_eq!(format!("{}", StructId(3)), "3");
    }

    #[test]
    fn serde_roundtrip() {
        let id = ExprId(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: ExprId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
