//! Copy propagation restricted to the checksum-update control.
//!
//! The runtime expresses a checksum as a single calculation plus a
//! destination, so multi-statement temporaries in the update block must be
//! folded away. This is a simpler variant of copy propagation: it finds
//! `tmp = X; ... out = tmp;` patterns and substitutes the definition into
//! the use, then deletes assignments that are never used. The only method
//! call permitted in the block is the checksum unit's `get`, which has no
//! side effects, so reordering is safe.
//!
//! Reaching definitions are tracked per variable with a
//! `{no writer, one writer, many writers}` lattice; if-statement merges
//! join pointwise.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use p4bm_ir::{
    Decl, DeclArena, Expr, ExprArena, ExprId, Program, RefMap, Stmt, StmtArena, StmtId, TypeMap,
};

use crate::diag::{Diagnostic, Diagnostics};

/// Folds temporaries inside the checksum-update control of `program`.
pub fn fixup_checksum(
    program: &mut Program,
    refs: &RefMap,
    types: &mut TypeMap,
    diags: &mut Diagnostics,
) {
    let Program {
        exprs,
        stmts,
        decls,
        package,
        ..
    } = program;

    let mut accesses = Accesses {
        exprs,
        stmts,
        decls,
        refs,
        defs: IndexMap::new(),
        substitutions: HashMap::new(),
        have_uses: HashSet::new(),
        diags,
    };
    for decl in &package.compute.locals {
        if let Decl::Variable(var) = accesses.decls.get(*decl) {
            accesses.defs.insert(var.name.clone(), HashSet::new());
        }
    }
    for &s in &package.compute.body {
        accesses.visit_stmt(s);
    }

    let Accesses {
        substitutions,
        have_uses,
        ..
    } = accesses;

    let mut replace = Replace {
        exprs,
        stmts,
        types,
        substitutions,
        have_uses,
    };
    for &s in &package.compute.body {
        replace.rewrite_stmt(s);
    }
}

/// Reaching writers of one variable: empty = no writer yet, one element =
/// unique writer, more = merge of distinct writers.
type Writers = HashSet<StmtId>;

struct Accesses<'a> {
    exprs: &'a ExprArena,
    stmts: &'a StmtArena,
    decls: &'a DeclArena,
    refs: &'a RefMap,
    defs: IndexMap<String, Writers>,
    /// Read occurrence -> unique reaching definition's right-hand side.
    substitutions: HashMap<ExprId, ExprId>,
    /// Assignments whose value is observed and which must survive.
    have_uses: HashSet<StmtId>,
    diags: &'a mut Diagnostics,
}

impl<'a> Accesses<'a> {
    fn visit_stmt(&mut self, s: StmtId) {
        match self.stmts.get(s).clone() {
            Stmt::Variable(decl) => {
                if let Decl::Variable(var) = self.decls.get(decl) {
                    self.defs.insert(var.name.clone(), HashSet::new());
                }
            }
            Stmt::Assign { left, right } => {
                self.visit_expr(right);
                match self.variable_name(left) {
                    Some(name) => {
                        self.defs.insert(name, HashSet::from([s]));
                    }
                    None => {
                        // Writing through a field; the assignment itself is a use.
                        self.have_uses.insert(s);
                    }
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit_expr(cond);
                let before = self.defs.clone();
                self.visit_stmt(then_branch);
                let after_true = std::mem::replace(&mut self.defs, before.clone());
                match else_branch {
                    Some(e) => {
                        self.defs = before;
                        self.visit_stmt(e);
                        let after_false = std::mem::take(&mut self.defs);
                        self.defs = join(after_true, after_false);
                    }
                    None => {
                        self.defs = join(before, after_true);
                    }
                }
            }
            Stmt::MethodCall(call) => self.visit_expr(call),
            Stmt::Block(body) => {
                for inner in body {
                    self.visit_stmt(inner);
                }
            }
            Stmt::Empty => {}
            Stmt::Switch { .. } | Stmt::Exit | Stmt::Return => {
                self.diags.error(Diagnostic::ChecksumStatementUnsupported {
                    what: "this statement".into(),
                });
            }
        }
    }

    fn visit_expr(&mut self, e: ExprId) {
        match self.exprs.get(e) {
            Expr::Path(name) => {
                let Some(writers) = self.defs.get(name) else {
                    return; // not a block-local variable
                };
                if writers.len() == 1 {
                    let writer = *writers.iter().next().expect("one writer");
                    if let Stmt::Assign { right, .. } = self.stmts.get(writer) {
                        self.substitutions.insert(e, *right);
                    }
                } else {
                    self.have_uses.extend(writers.iter().copied());
                }
            }
            Expr::Constant { .. }
            | Expr::Bool(_)
            | Expr::Default
            | Expr::TypeName(_) => {}
            Expr::Member { base, .. } => self.visit_expr(*base),
            Expr::ArrayIndex { base, index } => {
                self.visit_expr(*base);
                self.visit_expr(*index);
            }
            Expr::Slice { base, .. } => self.visit_expr(*base),
            Expr::Concat { left, right }
            | Expr::Binary { left, right, .. } => {
                self.visit_expr(*left);
                self.visit_expr(*right);
            }
            Expr::Cast { expr, .. }
            | Expr::Unary { expr, .. }
            | Expr::IntMod { expr, .. } => self.visit_expr(*expr),
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                self.visit_expr(*cond);
                self.visit_expr(*if_true);
                self.visit_expr(*if_false);
            }
            Expr::Mask { value, mask } => {
                self.visit_expr(*value);
                self.visit_expr(*mask);
            }
            Expr::Range { lo, hi } => {
                self.visit_expr(*lo);
                self.visit_expr(*hi);
            }
            Expr::MethodCall { args, .. } => {
                for a in args.clone() {
                    self.visit_expr(a);
                }
            }
            Expr::ConstructorCall { args, .. } => {
                for a in args.clone() {
                    self.visit_expr(a);
                }
            }
            Expr::List(components) => {
                for c in components.clone() {
                    self.visit_expr(c);
                }
            }
        }
    }

    /// The declared-variable name a plain path lvalue writes, if any.
    fn variable_name(&self, left: ExprId) -> Option<String> {
        match self.exprs.get(left) {
            Expr::Path(name) if self.defs.contains_key(name) => {
                // Confirm the path resolves to a variable, not a parameter.
                let decl = self.refs.get_declaration(left)?;
                matches!(self.decls.get(decl), Decl::Variable(_)).then(|| name.clone())
            }
            _ => None,
        }
    }
}

/// Pointwise join of two definition maps.
fn join(mut a: IndexMap<String, Writers>, b: IndexMap<String, Writers>) -> IndexMap<String, Writers> {
    for (name, writers) in b {
        a.entry(name).or_default().extend(writers);
    }
    a
}

struct Replace<'a> {
    exprs: &'a mut ExprArena,
    stmts: &'a mut StmtArena,
    types: &'a mut TypeMap,
    substitutions: HashMap<ExprId, ExprId>,
    have_uses: HashSet<StmtId>,
}

impl<'a> Replace<'a> {
    fn rewrite_stmt(&mut self, s: StmtId) {
        match self.stmts.get(s).clone() {
            Stmt::Assign { left, right } => {
                if !self.have_uses.contains(&s) && self.substituted_away(left) {
                    *self.stmts.get_mut(s) = Stmt::Empty;
                    return;
                }
                let right = self.subst_expr(right);
                *self.stmts.get_mut(s) = Stmt::Assign { left, right };
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let rewritten = self.subst_expr(cond);
                if let Stmt::If { cond, .. } = self.stmts.get_mut(s) {
                    *cond = rewritten;
                }
                self.rewrite_stmt(then_branch);
                if let Some(e) = else_branch {
                    self.rewrite_stmt(e);
                }
            }
            Stmt::MethodCall(call) => {
                let call = self.subst_expr(call);
                *self.stmts.get_mut(s) = Stmt::MethodCall(call);
            }
            Stmt::Block(body) => {
                for inner in body {
                    self.rewrite_stmt(inner);
                }
            }
            _ => {}
        }
    }

    /// An assignment can be dropped only when its target is a plain
    /// variable path (field writes were marked as uses during analysis).
    fn substituted_away(&self, left: ExprId) -> bool {
        matches!(self.exprs.get(left), Expr::Path(_))
    }

    fn subst_expr(&mut self, e: ExprId) -> ExprId {
        if let Some(replacement) = self.substitutions.get(&e).copied() {
            return self.subst_expr(replacement);
        }
        let node = self.exprs.get(e).clone();
        let rebuilt = match node {
            Expr::Constant { .. }
            | Expr::Bool(_)
            | Expr::Path(_)
            | Expr::Default
            | Expr::TypeName(_) => return e,
            Expr::Member { base, member } => {
                let b = self.subst_expr(base);
                if b == base {
                    return e;
                }
                Expr::Member { base: b, member }
            }
            Expr::ArrayIndex { base, index } => {
                let (b, i) = (self.subst_expr(base), self.subst_expr(index));
                if b == base && i == index {
                    return e;
                }
                Expr::ArrayIndex { base: b, index: i }
            }
            Expr::Slice { base, hi, lo } => {
                let b = self.subst_expr(base);
                if b == base {
                    return e;
                }
                Expr::Slice { base: b, hi, lo }
            }
            Expr::Concat { left, right } => {
                let (l, r) = (self.subst_expr(left), self.subst_expr(right));
                if l == left && r == right {
                    return e;
                }
                Expr::Concat { left: l, right: r }
            }
            Expr::Cast { target, expr } => {
                let x = self.subst_expr(expr);
                if x == expr {
                    return e;
                }
                Expr::Cast { target, expr: x }
            }
            Expr::Unary { op, expr } => {
                let x = self.subst_expr(expr);
                if x == expr {
                    return e;
                }
                Expr::Unary { op, expr: x }
            }
            Expr::Binary { op, left, right } => {
                let (l, r) = (self.subst_expr(left), self.subst_expr(right));
                if l == left && r == right {
                    return e;
                }
                Expr::Binary {
                    op,
                    left: l,
                    right: r,
                }
            }
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                let (c, t, f) = (
                    self.subst_expr(cond),
                    self.subst_expr(if_true),
                    self.subst_expr(if_false),
                );
                if c == cond && t == if_true && f == if_false {
                    return e;
                }
                Expr::Mux {
                    cond: c,
                    if_true: t,
                    if_false: f,
                }
            }
            Expr::IntMod { expr, width } => {
                let x = self.subst_expr(expr);
                if x == expr {
                    return e;
                }
                Expr::IntMod { expr: x, width }
            }
            Expr::Mask { value, mask } => {
                let (v, m) = (self.subst_expr(value), self.subst_expr(mask));
                if v == value && m == mask {
                    return e;
                }
                Expr::Mask { value: v, mask: m }
            }
            Expr::Range { lo, hi } => {
                let (l, h) = (self.subst_expr(lo), self.subst_expr(hi));
                if l == lo && h == hi {
                    return e;
                }
                Expr::Range { lo: l, hi: h }
            }
            Expr::MethodCall {
                method,
                type_args,
                args,
            } => {
                let new_args: Vec<ExprId> = args.iter().map(|a| self.subst_expr(*a)).collect();
                if new_args == args {
                    return e;
                }
                Expr::MethodCall {
                    method,
                    type_args,
                    args: new_args,
                }
            }
            Expr::ConstructorCall { ty_name, args } => {
                let new_args: Vec<ExprId> = args.iter().map(|a| self.subst_expr(*a)).collect();
                if new_args == args {
                    return e;
                }
                Expr::ConstructorCall {
                    ty_name,
                    args: new_args,
                }
            }
            Expr::List(components) => {
                let new: Vec<ExprId> = components.iter().map(|c| self.subst_expr(*c)).collect();
                if new == components {
                    return e;
                }
                Expr::List(new)
            }
        };
        let id = self.exprs.alloc(rebuilt);
        let ty = self.types.get(e).clone();
        self.types.set(id, ty);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4bm_ir::{IrBuilder, Type};

    /// `tmp = f; out = tmp;` -- the definition is inlined and the temporary
    /// assignment removed.
    #[test]
    fn single_writer_is_substituted_and_deleted() {
        let mut b = IrBuilder::new();
        let tmp = b.variable("tmp", Type::bits(16));
        let out_field = b.free_path("dst", Type::bits(16));

        let src = b.free_path("src", Type::bits(16));
        let tmp_lhs = b.path(tmp, Type::bits(16));
        let write = b.assign(tmp_lhs, src);

        let tmp_read = b.path(tmp, Type::bits(16));
        // dst is a Member so the final write survives
        let dst = b.member(out_field, "f", Type::bits(16));
        let out = b.assign(dst, tmp_read);

        b.program.package.compute.locals.push(tmp);
        b.program.package.compute.body = vec![write, out];

        let mut diags = Diagnostics::new();
        fixup_checksum(&mut b.program, &b.refs, &mut b.types, &mut diags);
        assert_eq!(diags.error_count(), 0);

        assert_eq!(*b.program.stmts.get(write), Stmt::Empty);
        match b.program.stmts.get(out) {
            Stmt::Assign { right, .. } => assert_eq!(*right, src),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    /// Two writers reaching a read through an if/else: nothing can be
    /// substituted, and both writers survive.
    #[test]
    fn merged_writers_are_kept() {
        let mut b = IrBuilder::new();
        let tmp = b.variable("t", Type::bits(8));

        let c1 = b.constant(Type::bits(8), 1);
        let l1 = b.path(tmp, Type::bits(8));
        let w1 = b.assign(l1, c1);

        let c2 = b.constant(Type::bits(8), 2);
        let l2 = b.path(tmp, Type::bits(8));
        let w2 = b.assign(l2, c2);

        let cond_var = b.variable("c", Type::Boolean);
        let cond = b.path(cond_var, Type::Boolean);
        let branch = b.if_stmt(cond, w1, Some(w2));

        let read = b.path(tmp, Type::bits(8));
        let hdr = b.free_path("hdr", Type::bits(8));
        let dst = b.member(hdr, "f", Type::bits(8));
        let out = b.assign(dst, read);

        b.program.package.compute.locals.push(tmp);
        b.program.package.compute.body = vec![branch, out];

        let mut diags = Diagnostics::new();
        fixup_checksum(&mut b.program, &b.refs, &mut b.types, &mut diags);

        assert!(matches!(b.program.stmts.get(w1), Stmt::Assign { .. }));
        assert!(matches!(b.program.stmts.get(w2), Stmt::Assign { .. }));
        match b.program.stmts.get(out) {
            Stmt::Assign { right, .. } => assert_eq!(*right, read),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    /// A chain of temporaries collapses to the original definition.
    #[test]
    fn substitution_chains() {
        let mut b = IrBuilder::new();
        let t1 = b.variable("t1", Type::bits(8));
        let t2 = b.variable("t2", Type::bits(8));

        let src = b.constant(Type::bits(8), 7);
        let l1 = b.path(t1, Type::bits(8));
        let w1 = b.assign(l1, src);

        let r1 = b.path(t1, Type::bits(8));
        let l2 = b.path(t2, Type::bits(8));
        let w2 = b.assign(l2, r1);

        let r2 = b.path(t2, Type::bits(8));
        let hdr = b.free_path("hdr", Type::bits(8));
        let dst = b.member(hdr, "f", Type::bits(8));
        let out = b.assign(dst, r2);

        b.program.package.compute.locals.extend([t1, t2]);
        b.program.package.compute.body = vec![w1, w2, out];

        let mut diags = Diagnostics::new();
        fixup_checksum(&mut b.program, &b.refs, &mut b.types, &mut diags);

        assert_eq!(*b.program.stmts.get(w1), Stmt::Empty);
        assert_eq!(*b.program.stmts.get(w2), Stmt::Empty);
        match b.program.stmts.get(out) {
            Stmt::Assign { right, .. } => assert_eq!(*right, src),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_statement_is_reported() {
        let mut b = IrBuilder::new();
        let exit = b.stmt(Stmt::Exit);
        b.program.package.compute.body = vec![exit];

        let mut diags = Diagnostics::new();
        fixup_checksum(&mut b.program, &b.refs, &mut b.types, &mut diags);
        assert_eq!(diags.error_count(), 1);
    }
}
