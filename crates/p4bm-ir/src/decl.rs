//! Declarations, pipeline blocks, and the top-level [`Program`].
//!
//! Table properties arrive already resolved by the front end: keys carry
//! their match-kind name, entries their action reference, and the
//! implementation / size / counter / meter properties are typed fields
//! instead of a generic property bag.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::expr::ExprArena;
use crate::id::{DeclId, ExprId, StmtId};
use crate::stmt::StmtArena;
use crate::types::{Type, TypeRegistry};

/// A parameter of a parser, control, or action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Type,
}

/// A local variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    pub init: Option<ExprId>,
}

/// An action: parameters plus a flat body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecl {
    pub name: String,
    /// Parameter declarations, in declaration order ([`Decl::Param`]).
    pub params: Vec<DeclId>,
    pub body: Vec<StmtId>,
}

/// One element of a table key, with its resolved match-kind name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyElement {
    pub expr: ExprId,
    pub match_kind: String,
}

/// A reference to an action in a table's action list. Arguments are only
/// legal for default actions; a bound argument here is a user error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    pub action: DeclId,
    pub args: Vec<ExprId>,
}

/// A constant table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    /// One keyset expression per key element.
    pub keys: Vec<ExprId>,
    pub action: DeclId,
    pub args: Vec<ExprId>,
    /// Explicit `@priority` annotation value.
    pub priority: Option<i64>,
}

/// The `default_action` property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultAction {
    pub action: DeclId,
    pub args: Vec<ExprId>,
    pub is_const: bool,
}

/// A match-action table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDecl {
    pub name: String,
    pub key: Vec<KeyElement>,
    pub actions: Vec<ActionRef>,
    pub entries: Vec<TableEntry>,
    pub default_action: Option<DefaultAction>,
    /// `size` property; must evaluate to a constant.
    pub size: Option<ExprId>,
    /// `implementation` property: a path to a declared action profile or
    /// selector, or a direct constructor call.
    pub implementation: Option<ExprId>,
    /// `support_timeout` property; must be a boolean literal.
    pub support_timeout: Option<ExprId>,
    /// `counters` property: a path to a `direct_counter` instance or a
    /// constructor call.
    pub direct_counter: Option<ExprId>,
    /// `meters` property: a path to a `direct_meter` instance.
    pub direct_meter: Option<ExprId>,
}

/// An extern instance declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDecl {
    pub name: String,
    /// Extern type name, e.g. `counter`, `action_selector`.
    pub extern_type: String,
    /// Type arguments, e.g. the value type of a `register<T>`.
    pub type_args: Vec<Type>,
    /// Constructor arguments.
    pub args: Vec<ExprId>,
}

/// A declaration in the arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decl {
    Param(ParamDecl),
    Variable(VarDecl),
    Action(ActionDecl),
    Table(TableDecl),
    Instance(InstanceDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Param(p) => &p.name,
            Decl::Variable(v) => &v.name,
            Decl::Action(a) => &a.name,
            Decl::Table(t) => &t.name,
            Decl::Instance(i) => &i.name,
        }
    }
}

/// Append-only arena owning every declaration of a program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclArena {
    nodes: Vec<Decl>,
}

impl DeclArena {
    pub fn new() -> Self {
        DeclArena::default()
    }

    pub fn alloc(&mut self, decl: Decl) -> DeclId {
        let id = DeclId(self.nodes.len() as u32);
        self.nodes.push(decl);
        id
    }

    /// Looks up a declaration. A dangling [`DeclId`] is a bug in the producer.
    pub fn get(&self, id: DeclId) -> &Decl {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// One case of a parser select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectCase {
    pub keyset: ExprId,
    pub next_state: String,
}

/// How a parser state transfers control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// No transition statement; treated as an unconditional default.
    #[default]
    None,
    /// `transition state;`
    Direct(String),
    /// `transition select(...) { ... }`
    Select {
        select: Vec<ExprId>,
        cases: Vec<SelectCase>,
    },
}

/// A parser state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserState {
    pub name: String,
    pub components: Vec<StmtId>,
    pub transition: Transition,
}

/// A parser block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserDecl {
    pub name: String,
    pub params: Vec<DeclId>,
    pub locals: Vec<DeclId>,
    pub states: Vec<ParserState>,
}

/// A control block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDecl {
    pub name: String,
    pub params: Vec<DeclId>,
    pub locals: Vec<DeclId>,
    pub body: Vec<StmtId>,
}

/// The six blocks of the switch package, in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub parser: ParserDecl,
    pub verify: ControlDecl,
    pub ingress: ControlDecl,
    pub egress: ControlDecl,
    /// The checksum-update control.
    pub compute: ControlDecl,
    pub deparser: ControlDecl,
}

/// A complete program as handed over by the front end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub types: TypeRegistry,
    pub exprs: ExprArena,
    pub stmts: StmtArena,
    pub decls: DeclArena,
    /// Declared error members, in declaration order.
    pub errors: Vec<String>,
    /// The front end's enum-value mapping: enum name -> member -> value.
    pub enums: IndexMap<String, IndexMap<String, i64>>,
    pub package: Package,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decl_names() {
        let mut decls = DeclArena::new();
        let p = decls.alloc(Decl::Param(ParamDecl {
            name: "hdr".into(),
            ty: Type::Boolean,
        }));
        let v = decls.alloc(Decl::Variable(VarDecl {
            name: "tmp".into(),
            ty: Type::bits(8),
            init: None,
        }));
        assert_eq!(decls.get(p).name(), "hdr");
        assert_eq!(decls.get(v).name(), "tmp");
        assert_eq!(decls.len(), 2);
    }

    #[test]
    fn default_transition_is_none() {
        let state = ParserState::default();
        assert_eq!(state.transition, Transition::None);
    }
}
