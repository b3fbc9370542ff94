//! Construction layer for assembling programs.
//!
//! A front end (or a test) produces three coupled artifacts: the program
//! arenas, the reference map, and the type map. [`IrBuilder`] keeps them
//! consistent -- every expression is allocated together with its type, and
//! every path is bound to its declaration and marked used.

use num_bigint::BigInt;

use crate::decl::{ActionDecl, Decl, InstanceDecl, ParamDecl, Program, TableDecl, VarDecl};
use crate::expr::{BinOp, Expr, UnOp};
use crate::id::{DeclId, ExprId, StmtId, StructId};
use crate::refmap::RefMap;
use crate::stmt::Stmt;
use crate::typemap::TypeMap;
use crate::types::{StructDef, StructField, StructKind, Type};

/// Builder keeping the program, reference map, and type map consistent.
#[derive(Debug, Default)]
pub struct IrBuilder {
    pub program: Program,
    pub refs: RefMap,
    pub types: TypeMap,
}

impl IrBuilder {
    pub fn new() -> Self {
        IrBuilder::default()
    }

    // -----------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------

    /// Registers a struct-like type. Panics on duplicate names; builders are
    /// expected to pick distinct names.
    pub fn struct_type(
        &mut self,
        kind: StructKind,
        name: &str,
        fields: &[(&str, Type)],
    ) -> StructId {
        let def = StructDef {
            name: name.to_string(),
            kind,
            fields: fields
                .iter()
                .map(|(n, t)| StructField {
                    name: n.to_string(),
                    ty: t.clone(),
                })
                .collect(),
        };
        self.refs.reserve_name(name);
        self.program.types.register(def).expect("duplicate type name")
    }

    pub fn header_type(&mut self, name: &str, fields: &[(&str, Type)]) -> StructId {
        self.struct_type(StructKind::Header, name, fields)
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    /// Allocates an expression with its type.
    pub fn expr(&mut self, e: Expr, ty: Type) -> ExprId {
        let id = self.program.exprs.alloc(e);
        self.types.set(id, ty);
        id
    }

    pub fn constant(&mut self, ty: Type, value: impl Into<BigInt>) -> ExprId {
        let value = value.into();
        self.expr(
            Expr::Constant {
                ty: ty.clone(),
                value,
            },
            ty,
        )
    }

    pub fn bool_lit(&mut self, value: bool) -> ExprId {
        self.expr(Expr::Bool(value), Type::Boolean)
    }

    /// A path expression resolving to `decl`. Marks the declaration used.
    pub fn path(&mut self, decl: DeclId, ty: Type) -> ExprId {
        let name = self.program.decls.get(decl).name().to_string();
        let id = self.expr(Expr::Path(name), ty);
        self.refs.bind(id, decl);
        self.refs.mark_used(decl);
        id
    }

    /// An unresolved path, used for extern functions (`clone3`, `verify`, ...).
    pub fn free_path(&mut self, name: &str, ty: Type) -> ExprId {
        self.expr(Expr::Path(name.to_string()), ty)
    }

    pub fn member(&mut self, base: ExprId, member: &str, ty: Type) -> ExprId {
        self.expr(
            Expr::Member {
                base,
                member: member.to_string(),
            },
            ty,
        )
    }

    pub fn binary(&mut self, op: BinOp, left: ExprId, right: ExprId, ty: Type) -> ExprId {
        self.expr(Expr::Binary { op, left, right }, ty)
    }

    pub fn unary(&mut self, op: UnOp, expr: ExprId, ty: Type) -> ExprId {
        self.expr(Expr::Unary { op, expr }, ty)
    }

    pub fn cast(&mut self, target: Type, expr: ExprId) -> ExprId {
        self.expr(
            Expr::Cast {
                target: target.clone(),
                expr,
            },
            target,
        )
    }

    pub fn method_call(
        &mut self,
        method: ExprId,
        type_args: Vec<Type>,
        args: Vec<ExprId>,
        ty: Type,
    ) -> ExprId {
        self.expr(
            Expr::MethodCall {
                method,
                type_args,
                args,
            },
            ty,
        )
    }

    pub fn list(&mut self, components: Vec<ExprId>) -> ExprId {
        self.expr(Expr::List(components), Type::Void)
    }

    // -----------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------

    pub fn param(&mut self, name: &str, ty: Type) -> DeclId {
        self.refs.reserve_name(name);
        self.program.decls.alloc(Decl::Param(ParamDecl {
            name: name.to_string(),
            ty,
        }))
    }

    pub fn variable(&mut self, name: &str, ty: Type) -> DeclId {
        self.refs.reserve_name(name);
        self.program.decls.alloc(Decl::Variable(VarDecl {
            name: name.to_string(),
            ty,
            init: None,
        }))
    }

    pub fn action(&mut self, name: &str, params: Vec<DeclId>, body: Vec<StmtId>) -> DeclId {
        self.refs.reserve_name(name);
        self.program.decls.alloc(Decl::Action(ActionDecl {
            name: name.to_string(),
            params,
            body,
        }))
    }

    pub fn instance(
        &mut self,
        name: &str,
        extern_type: &str,
        type_args: Vec<Type>,
        args: Vec<ExprId>,
    ) -> DeclId {
        self.refs.reserve_name(name);
        self.program.decls.alloc(Decl::Instance(InstanceDecl {
            name: name.to_string(),
            extern_type: extern_type.to_string(),
            type_args,
            args,
        }))
    }

    pub fn table(&mut self, table: TableDecl) -> DeclId {
        self.refs.reserve_name(&table.name);
        self.program.decls.alloc(Decl::Table(table))
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    pub fn stmt(&mut self, s: Stmt) -> StmtId {
        self.program.stmts.alloc(s)
    }

    pub fn assign(&mut self, left: ExprId, right: ExprId) -> StmtId {
        self.stmt(Stmt::Assign { left, right })
    }

    pub fn call_stmt(&mut self, call: ExprId) -> StmtId {
        self.stmt(Stmt::MethodCall(call))
    }

    pub fn block(&mut self, stmts: Vec<StmtId>) -> StmtId {
        self.stmt(Stmt::Block(stmts))
    }

    pub fn if_stmt(
        &mut self,
        cond: ExprId,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    ) -> StmtId {
        self.stmt(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_binds_and_marks_used() {
        let mut b = IrBuilder::new();
        let v = b.variable("x", Type::bits(8));
        let p = b.path(v, Type::bits(8));
        assert_eq!(b.refs.get_declaration(p), Some(v));
        assert!(b.refs.is_used(v));
        assert_eq!(*b.types.get(p), Type::bits(8));
    }

    #[test]
    fn declared_names_are_reserved() {
        let mut b = IrBuilder::new();
        b.variable("tmp", Type::Boolean);
        assert_eq!(b.refs.new_name("tmp"), "tmp_0");
    }
}
