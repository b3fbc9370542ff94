//! Expression nodes and the arena that owns them.
//!
//! Expressions form a tree, not a DAG: every syntactic occurrence has its
//! own [`ExprId`]. The type map and the rewrite passes key off per-occurrence
//! identity, so producers must not share ids between occurrences.
//!
//! The arena is append-only. Rewrite passes allocate replacement nodes and
//! re-point their consumers; existing nodes are never mutated.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::id::ExprId;
use crate::types::Type;

/// Binary operators, covering arithmetic, shifts, bitwise, logical, and
/// comparison forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BAnd,
    BOr,
    BXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// The operator's textual form, as the runtime expects it in expression
    /// nodes. Logical and/or are renamed by the expression converter.
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BAnd => "&",
            BinOp::BOr => "|",
            BinOp::BXor => "^",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    /// Bitwise and/or/xor need no width clamping; everything else producing
    /// a `bit<W>` result does.
    pub fn is_width_safe(self) -> bool {
        matches!(self, BinOp::BAnd | BinOp::BOr | BinOp::BXor)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Logical negation.
    Not,
    /// Bitwise complement.
    Cmpl,
    /// Arithmetic negation. Eliminated by expression lowering.
    Neg,
}

impl UnOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnOp::Not => "not",
            UnOp::Cmpl => "~",
            UnOp::Neg => "-",
        }
    }
}

/// An expression node. Children are [`ExprId`]s into the owning arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal. The type records the declared width (or `InfInt`).
    Constant { ty: Type, value: BigInt },

    /// Boolean literal.
    Bool(bool),

    /// A name, resolved through the reference map.
    Path(String),

    /// Field access or architecture member (`.next`, `.last`, `$valid$`).
    Member { base: ExprId, member: String },

    /// Header-stack element access.
    ArrayIndex { base: ExprId, index: ExprId },

    /// Bit slice `base[hi:lo]`. Eliminated by expression lowering.
    Slice { base: ExprId, hi: u32, lo: u32 },

    /// Bit concatenation. Eliminated by expression lowering.
    Concat { left: ExprId, right: ExprId },

    /// Explicit cast. Bool<->bit casts are eliminated by expression lowering.
    Cast { target: Type, expr: ExprId },

    Unary { op: UnOp, expr: ExprId },

    Binary { op: BinOp, left: ExprId, right: ExprId },

    /// Conditional expression `cond ? if_true : if_false`.
    Mux {
        cond: ExprId,
        if_true: ExprId,
        if_false: ExprId,
    },

    /// Two's-complement modulus, minted by the arithmetic fixup for signed
    /// results. Never produced by a front end.
    IntMod { expr: ExprId, width: u32 },

    /// `value &&& mask` keyset expression.
    Mask { value: ExprId, mask: ExprId },

    /// `lo .. hi` keyset expression.
    Range { lo: ExprId, hi: ExprId },

    /// Method call; `method` is a path or member expression.
    MethodCall {
        method: ExprId,
        type_args: Vec<Type>,
        args: Vec<ExprId>,
    },

    /// Direct constructor invocation, e.g. `action_profile(128)` as a table
    /// implementation property.
    ConstructorCall { ty_name: String, args: Vec<ExprId> },

    /// Tuple/list expression (select keys, field lists).
    List(Vec<ExprId>),

    /// `default` keyset.
    Default,

    /// A type name in expression position (`error`, enum names). Only ever
    /// the base of a `Member`.
    TypeName(String),
}

/// Append-only arena owning every expression of a program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        ExprArena::default()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(expr);
        id
    }

    /// Looks up a node. A dangling [`ExprId`] is a bug in the producer.
    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_sequential_ids() {
        let mut arena = ExprArena::new();
        let a = arena.alloc(Expr::Bool(true));
        let b = arena.alloc(Expr::Path("x".into()));
        assert_eq!(a, ExprId(0));
        assert_eq!(b, ExprId(1));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn get_returns_allocated_node() {
        let mut arena = ExprArena::new();
        let id = arena.alloc(Expr::Constant {
            ty: Type::bits(8),
            value: BigInt::from(0xff),
        });
        match arena.get(id) {
            Expr::Constant { ty, value } => {
                assert_eq!(*ty, Type::bits(8));
                assert_eq!(*value, BigInt::from(255));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn binop_textual_forms() {
        assert_eq!(BinOp::Add.as_str(), "+");
        assert_eq!(BinOp::And.as_str(), "&&");
        assert_eq!(BinOp::Shr.as_str(), ">>");
        assert!(BinOp::BAnd.is_width_safe());
        assert!(!BinOp::Add.is_width_safe());
    }
}
