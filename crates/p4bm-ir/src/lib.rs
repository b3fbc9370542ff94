//! Typed intermediate representation consumed by the JSON back end.
//!
//! The front end hands over a [`Program`] (arenas of expressions,
//! statements, and declarations plus the package blocks), a [`RefMap`]
//! resolving paths to declarations, a [`TypeMap`] typing every expression
//! occurrence, and a [`SwitchModel`] naming the architecture's externs and
//! conventions.

pub mod arch;
pub mod builder;
pub mod decl;
pub mod error;
pub mod expr;
pub mod id;
pub mod refmap;
pub mod stmt;
pub mod typemap;
pub mod types;

// Re-export commonly used types
pub use arch::SwitchModel;
pub use builder::IrBuilder;
pub use decl::{
    ActionDecl, ActionRef, ControlDecl, Decl, DeclArena, DefaultAction, InstanceDecl, KeyElement,
    Package, ParamDecl, ParserDecl, ParserState, Program, SelectCase, TableDecl, TableEntry,
    Transition, VarDecl,
};
pub use error::IrError;
pub use expr::{BinOp, Expr, ExprArena, UnOp};
pub use id::{DeclId, ExprId, StmtId, StructId};
pub use refmap::RefMap;
pub use stmt::{Stmt, StmtArena, SwitchCase, SwitchLabel};
pub use typemap::TypeMap;
pub use types::{StructDef, StructField, StructKind, Type, TypeRegistry, BOOL_WIDTH, ERROR_WIDTH};
