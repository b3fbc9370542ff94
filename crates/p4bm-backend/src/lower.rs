//! Lowering of constructs the runtime cannot express directly.
//!
//! Slices become shift-and-cast, concatenations become shift/or/mask,
//! unary negation becomes subtraction from zero, and bool<->bit casts
//! become comparison and conditional forms. Shift amounts are limited to
//! 8 bits on this target.
//!
//! The pass runs over every statement body and parser transition in the
//! program; table declarations are deliberately not entered -- their key
//! expressions are handled specially by the table converter.
//!
//! The type map is updated as nodes are replaced, since parent rewrites
//! need the information when processing bottom-up.

use num_bigint::BigInt;
use num_traits::One;

use p4bm_ir::{
    BinOp, Decl, DeclId, Expr, ExprArena, ExprId, Program, RefMap, Stmt, StmtArena, StmtId,
    SwitchModel, Transition, Type, TypeMap, UnOp, VarDecl,
};

use crate::diag::{Diagnostic, Diagnostics};
use crate::json::mask;

/// Lowers every statement body and parser transition of the program.
pub fn lower_program(
    program: &mut Program,
    refs: &mut RefMap,
    types: &mut TypeMap,
    model: &SwitchModel,
    diags: &mut Diagnostics,
) {
    let Program {
        exprs,
        stmts,
        decls,
        package,
        ..
    } = program;

    let mut pass = LowerExpressions {
        exprs,
        stmts,
        types,
        model,
        diags,
    };

    // Action bodies. Tables are skipped: keys and entries stay as written.
    for i in 0..decls.len() {
        if let Decl::Action(action) = decls.get(DeclId(i as u32)) {
            for s in action.body.clone() {
                pass.lower_stmt(s);
            }
        }
    }

    for control in [
        &package.verify,
        &package.ingress,
        &package.egress,
        &package.compute,
        &package.deparser,
    ] {
        for &s in &control.body {
            pass.lower_stmt(s);
        }
    }

    for state in &mut package.parser.states {
        for &s in &state.components {
            pass.lower_stmt(s);
        }
        if let Transition::Select { select, .. } = &mut state.transition {
            for component in select.iter_mut() {
                *component = pass.lower_expr(*component);
            }
        }
    }

    // Hoist select components the runtime cannot evaluate in a transition
    // key into fresh parser locals, assigned just before the transition.
    for state in &mut package.parser.states {
        if let Transition::Select { select, .. } = &mut state.transition {
            for component in select.iter_mut() {
                if is_simple_select_component(pass.exprs, *component) {
                    continue;
                }
                let ty = pass.types.get(*component).clone();
                let name = refs.new_name("tmp");
                tracing::debug!(%name, "hoisting complex select component");
                let var = decls.alloc(Decl::Variable(VarDecl {
                    name: name.clone(),
                    ty: ty.clone(),
                    init: None,
                }));
                package.parser.locals.push(var);
                let read = pass.exprs.alloc(Expr::Path(name));
                pass.types.set(read, ty);
                refs.bind(read, var);
                refs.mark_used(var);
                let assign = pass.stmts.alloc(Stmt::Assign {
                    left: read,
                    right: *component,
                });
                state.components.push(assign);
                *component = read;
            }
        }
    }
}

/// True for the forms a transition key may contain directly: paths, member
/// chains, and literals.
fn is_simple_select_component(exprs: &ExprArena, e: ExprId) -> bool {
    match exprs.get(e) {
        Expr::Path(_) | Expr::Constant { .. } | Expr::Bool(_) => true,
        Expr::Member { base, .. } => is_simple_select_component(exprs, *base),
        // lookahead calls are resolved by the expression converter
        Expr::MethodCall { .. } => true,
        _ => false,
    }
}

struct LowerExpressions<'a> {
    exprs: &'a mut ExprArena,
    stmts: &'a mut StmtArena,
    types: &'a mut TypeMap,
    model: &'a SwitchModel,
    diags: &'a mut Diagnostics,
}

impl<'a> LowerExpressions<'a> {
    fn lower_stmt(&mut self, s: StmtId) {
        match self.stmts.get(s).clone() {
            Stmt::Assign { left, right } => {
                let left = self.lower_expr(left);
                let right = self.lower_expr(right);
                *self.stmts.get_mut(s) = Stmt::Assign { left, right };
            }
            Stmt::MethodCall(call) => {
                let call = self.lower_expr(call);
                *self.stmts.get_mut(s) = Stmt::MethodCall(call);
            }
            Stmt::Block(body) => {
                for inner in body {
                    self.lower_stmt(inner);
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let lowered = self.lower_expr(cond);
                if let Stmt::If { cond, .. } = self.stmts.get_mut(s) {
                    *cond = lowered;
                }
                self.lower_stmt(then_branch);
                if let Some(e) = else_branch {
                    self.lower_stmt(e);
                }
            }
            Stmt::Switch { expr, cases } => {
                let lowered = self.lower_expr(expr);
                if let Stmt::Switch { expr, .. } = self.stmts.get_mut(s) {
                    *expr = lowered;
                }
                for case in cases {
                    if let Some(body) = case.body {
                        self.lower_stmt(body);
                    }
                }
            }
            Stmt::Variable(_) | Stmt::Exit | Stmt::Return | Stmt::Empty => {}
        }
    }

    fn lower_expr(&mut self, e: ExprId) -> ExprId {
        let node = self.exprs.get(e).clone();
        match node {
            Expr::Constant { .. }
            | Expr::Bool(_)
            | Expr::Path(_)
            | Expr::Default
            | Expr::TypeName(_) => e,

            // base[hi:lo] -> (bit<hi-lo+1>)(base >> lo)
            Expr::Slice { base, hi, lo } => {
                let base = self.lower_expr(base);
                let base_ty = self.types.get(base).clone();
                let amount = self.typed(
                    Expr::Constant {
                        ty: Type::InfInt,
                        value: BigInt::from(lo),
                    },
                    Type::InfInt,
                );
                let shifted = self.typed(
                    Expr::Binary {
                        op: BinOp::Shr,
                        left: base,
                        right: amount,
                    },
                    base_ty,
                );
                let target = Type::bits(hi - lo + 1);
                let result = self.typed(
                    Expr::Cast {
                        target: target.clone(),
                        expr: shifted,
                    },
                    target,
                );
                tracing::trace!(original = %e, replacement = %result, "lowered slice");
                result
            }

            // l ++ r -> ((cast)l << sizeof(r)) | ((cast)r & mask)
            Expr::Concat { left, right } => {
                let left = self.lower_expr(left);
                let right = self.lower_expr(right);
                let result_ty = self.types.get(e).clone();
                let right_width = match self.types.get(right) {
                    Type::Bits { width, .. } => *width,
                    other => panic!("concat operand with non-bit type {other:?}"),
                };
                let result_width = match &result_ty {
                    Type::Bits { width, .. } => *width,
                    other => panic!("concat result with non-bit type {other:?}"),
                };
                let cast_left = self.typed(
                    Expr::Cast {
                        target: result_ty.clone(),
                        expr: left,
                    },
                    result_ty.clone(),
                );
                let cast_right = self.typed(
                    Expr::Cast {
                        target: result_ty.clone(),
                        expr: right,
                    },
                    result_ty.clone(),
                );
                let amount = self.typed(
                    Expr::Constant {
                        ty: Type::InfInt,
                        value: BigInt::from(right_width),
                    },
                    Type::InfInt,
                );
                let shifted = self.typed(
                    Expr::Binary {
                        op: BinOp::Shl,
                        left: cast_left,
                        right: amount,
                    },
                    result_ty.clone(),
                );
                let mask_cst = self.typed(
                    Expr::Constant {
                        ty: Type::bits(result_width),
                        value: mask(right_width),
                    },
                    Type::bits(result_width),
                );
                let masked = self.typed(
                    Expr::Binary {
                        op: BinOp::BAnd,
                        left: cast_right,
                        right: mask_cst,
                    },
                    result_ty.clone(),
                );
                let result = self.typed(
                    Expr::Binary {
                        op: BinOp::BOr,
                        left: shifted,
                        right: masked,
                    },
                    result_ty,
                );
                tracing::trace!(original = %e, replacement = %result, "lowered concat");
                result
            }

            // -x -> 0 - x
            Expr::Unary {
                op: UnOp::Neg,
                expr,
            } => {
                let expr = self.lower_expr(expr);
                let ty = self.types.get(e).clone();
                let zero = self.typed(
                    Expr::Constant {
                        ty: ty.clone(),
                        value: BigInt::from(0),
                    },
                    ty.clone(),
                );
                self.typed(
                    Expr::Binary {
                        op: BinOp::Sub,
                        left: zero,
                        right: expr,
                    },
                    ty,
                )
            }

            Expr::Cast { target, expr } => {
                let inner = self.lower_expr(expr);
                let src = self.types.get(inner).clone();
                let dest = self.types.get(e).clone();
                match (&dest, &src) {
                    (Type::Boolean, Type::Bits { .. }) => {
                        let zero = self.typed(
                            Expr::Constant {
                                ty: src.clone(),
                                value: BigInt::from(0),
                            },
                            src,
                        );
                        self.typed(
                            Expr::Binary {
                                op: BinOp::Eq,
                                left: inner,
                                right: zero,
                            },
                            Type::Boolean,
                        )
                    }
                    (Type::Bits { .. }, Type::Boolean) => {
                        let one = self.typed(
                            Expr::Constant {
                                ty: dest.clone(),
                                value: BigInt::one(),
                            },
                            dest.clone(),
                        );
                        let zero = self.typed(
                            Expr::Constant {
                                ty: dest.clone(),
                                value: BigInt::from(0),
                            },
                            dest.clone(),
                        );
                        self.typed(
                            Expr::Mux {
                                cond: inner,
                                if_true: one,
                                if_false: zero,
                            },
                            dest,
                        )
                    }
                    _ => {
                        if inner == expr {
                            e
                        } else {
                            self.rebuild(e, Expr::Cast {
                                target,
                                expr: inner,
                            })
                        }
                    }
                }
            }

            Expr::Binary { op, left, right } if matches!(op, BinOp::Shl | BinOp::Shr) => {
                let l = self.lower_expr(left);
                let r = self.lower_expr(right);
                self.check_shift_amount(r);
                if l == left && r == right {
                    e
                } else {
                    self.rebuild(e, Expr::Binary {
                        op,
                        left: l,
                        right: r,
                    })
                }
            }

            Expr::Unary { op, expr } => {
                let x = self.lower_expr(expr);
                if x == expr {
                    e
                } else {
                    self.rebuild(e, Expr::Unary { op, expr: x })
                }
            }
            Expr::Binary { op, left, right } => {
                let (l, r) = (self.lower_expr(left), self.lower_expr(right));
                if l == left && r == right {
                    e
                } else {
                    self.rebuild(e, Expr::Binary {
                        op,
                        left: l,
                        right: r,
                    })
                }
            }
            Expr::Member { base, member } => {
                let b = self.lower_expr(base);
                if b == base {
                    e
                } else {
                    self.rebuild(e, Expr::Member { base: b, member })
                }
            }
            Expr::ArrayIndex { base, index } => {
                let (b, i) = (self.lower_expr(base), self.lower_expr(index));
                if b == base && i == index {
                    e
                } else {
                    self.rebuild(e, Expr::ArrayIndex { base: b, index: i })
                }
            }
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                let (c, t, f) = (
                    self.lower_expr(cond),
                    self.lower_expr(if_true),
                    self.lower_expr(if_false),
                );
                if c == cond && t == if_true && f == if_false {
                    e
                } else {
                    self.rebuild(e, Expr::Mux {
                        cond: c,
                        if_true: t,
                        if_false: f,
                    })
                }
            }
            Expr::IntMod { expr, width } => {
                let x = self.lower_expr(expr);
                if x == expr {
                    e
                } else {
                    self.rebuild(e, Expr::IntMod { expr: x, width })
                }
            }
            Expr::Mask { value, mask } => {
                let (v, m) = (self.lower_expr(value), self.lower_expr(mask));
                if v == value && m == mask {
                    e
                } else {
                    self.rebuild(e, Expr::Mask { value: v, mask: m })
                }
            }
            Expr::Range { lo, hi } => {
                let (l, h) = (self.lower_expr(lo), self.lower_expr(hi));
                if l == lo && h == hi {
                    e
                } else {
                    self.rebuild(e, Expr::Range { lo: l, hi: h })
                }
            }
            Expr::MethodCall {
                method,
                type_args,
                args,
            } => {
                let new_args: Vec<ExprId> = args.iter().map(|a| self.lower_expr(*a)).collect();
                if new_args == args {
                    e
                } else {
                    self.rebuild(e, Expr::MethodCall {
                        method,
                        type_args,
                        args: new_args,
                    })
                }
            }
            Expr::ConstructorCall { ty_name, args } => {
                let new_args: Vec<ExprId> = args.iter().map(|a| self.lower_expr(*a)).collect();
                if new_args == args {
                    e
                } else {
                    self.rebuild(e, Expr::ConstructorCall {
                        ty_name,
                        args: new_args,
                    })
                }
            }
            Expr::List(components) => {
                let new: Vec<ExprId> = components.iter().map(|c| self.lower_expr(*c)).collect();
                if new == components {
                    e
                } else {
                    self.rebuild(e, Expr::List(new))
                }
            }
        }
    }

    /// The runtime cannot shift by more than [`SwitchModel::max_shift_width`]
    /// bits' worth of amount.
    fn check_shift_amount(&mut self, amount: ExprId) {
        let max = self.model.max_shift_width;
        match self.types.get(amount).clone() {
            Type::InfInt => {
                if let Expr::Constant { value, .. } = self.exprs.get(amount) {
                    if *value > (BigInt::one() << max) {
                        self.diags.error(Diagnostic::ShiftTooWide { max });
                    }
                }
            }
            Type::Bits { width, .. } => {
                if width > max {
                    self.diags.error(Diagnostic::ShiftTooWide { max });
                }
            }
            other => panic!("shift amount with unexpected type {other:?}"),
        }
    }

    /// Allocates a node with an explicit type.
    fn typed(&mut self, node: Expr, ty: Type) -> ExprId {
        let id = self.exprs.alloc(node);
        self.types.set(id, ty);
        id
    }

    /// Allocates a replacement for `original`, carrying its type over.
    fn rebuild(&mut self, original: ExprId, node: Expr) -> ExprId {
        let ty = self.types.get(original).clone();
        self.typed(node, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4bm_ir::IrBuilder;

    fn lower_one(b: &mut IrBuilder, e: ExprId) -> (ExprId, usize) {
        let mut diags = Diagnostics::new();
        let model = SwitchModel::default();
        let mut pass = LowerExpressions {
            exprs: &mut b.program.exprs,
            stmts: &mut b.program.stmts,
            types: &mut b.types,
            model: &model,
            diags: &mut diags,
        };
        let out = pass.lower_expr(e);
        (out, diags.error_count())
    }

    #[test]
    fn slice_becomes_cast_of_shift() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(16));
        let px = b.path(x, Type::bits(16));
        let slice = b.expr(
            Expr::Slice {
                base: px,
                hi: 7,
                lo: 4,
            },
            Type::bits(4),
        );

        let (out, errs) = lower_one(&mut b, slice);
        assert_eq!(errs, 0);
        match b.program.exprs.get(out) {
            Expr::Cast { target, expr } => {
                assert_eq!(*target, Type::bits(4));
                match b.program.exprs.get(*expr) {
                    Expr::Binary {
                        op: BinOp::Shr,
                        left,
                        right,
                    } => {
                        assert_eq!(*left, px);
                        assert!(matches!(
                            b.program.exprs.get(*right),
                            Expr::Constant { .. }
                        ));
                    }
                    other => panic!("expected shift, got {other:?}"),
                }
            }
            other => panic!("expected cast, got {other:?}"),
        }
    }

    #[test]
    fn concat_becomes_shift_or_mask() {
        let mut b = IrBuilder::new();
        let l = b.variable("l", Type::bits(8));
        let r = b.variable("r", Type::bits(4));
        let pl = b.path(l, Type::bits(8));
        let pr = b.path(r, Type::bits(4));
        let concat = b.expr(
            Expr::Concat {
                left: pl,
                right: pr,
            },
            Type::bits(12),
        );

        let (out, errs) = lower_one(&mut b, concat);
        assert_eq!(errs, 0);
        match b.program.exprs.get(out) {
            Expr::Binary {
                op: BinOp::BOr,
                left,
                right,
            } => {
                assert!(matches!(
                    b.program.exprs.get(*left),
                    Expr::Binary {
                        op: BinOp::Shl,
                        ..
                    }
                ));
                match b.program.exprs.get(*right) {
                    Expr::Binary {
                        op: BinOp::BAnd,
                        right: mask_id,
                        ..
                    } => match b.program.exprs.get(*mask_id) {
                        Expr::Constant { value, .. } => {
                            assert_eq!(*value, BigInt::from(0x0f))
                        }
                        other => panic!("expected mask constant, got {other:?}"),
                    },
                    other => panic!("expected masked right operand, got {other:?}"),
                }
            }
            other => panic!("expected or, got {other:?}"),
        }
        assert_eq!(*b.types.get(out), Type::bits(12));
    }

    #[test]
    fn negation_becomes_subtraction_from_zero() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(8));
        let px = b.path(x, Type::bits(8));
        let neg = b.unary(UnOp::Neg, px, Type::bits(8));

        let (out, _) = lower_one(&mut b, neg);
        match b.program.exprs.get(out) {
            Expr::Binary {
                op: BinOp::Sub,
                left,
                right,
            } => {
                assert!(matches!(
                    b.program.exprs.get(*left),
                    Expr::Constant { .. }
                ));
                assert_eq!(*right, px);
            }
            other => panic!("expected subtraction, got {other:?}"),
        }
    }

    #[test]
    fn bit_to_bool_cast_becomes_comparison() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(8));
        let px = b.path(x, Type::bits(8));
        let cast = b.expr(
            Expr::Cast {
                target: Type::Boolean,
                expr: px,
            },
            Type::Boolean,
        );

        let (out, _) = lower_one(&mut b, cast);
        assert!(matches!(
            b.program.exprs.get(out),
            Expr::Binary { op: BinOp::Eq, .. }
        ));
        assert_eq!(*b.types.get(out), Type::Boolean);
    }

    #[test]
    fn bool_to_bit_cast_becomes_mux() {
        let mut b = IrBuilder::new();
        let f = b.variable("f", Type::Boolean);
        let pf = b.path(f, Type::Boolean);
        let cast = b.expr(
            Expr::Cast {
                target: Type::bits(8),
                expr: pf,
            },
            Type::bits(8),
        );

        let (out, _) = lower_one(&mut b, cast);
        match b.program.exprs.get(out) {
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                assert_eq!(*cond, pf);
                assert!(matches!(
                    b.program.exprs.get(*if_true),
                    Expr::Constant { value, .. } if *value == BigInt::one()
                ));
                assert!(matches!(
                    b.program.exprs.get(*if_false),
                    Expr::Constant { value, .. } if *value == BigInt::from(0)
                ));
            }
            other => panic!("expected mux, got {other:?}"),
        }
    }

    #[test]
    fn wide_shift_amount_is_an_error() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(32));
        let n = b.variable("n", Type::bits(16));
        let px = b.path(x, Type::bits(32));
        let pn = b.path(n, Type::bits(16));
        let shl = b.binary(BinOp::Shl, px, pn, Type::bits(32));

        let (_, errs) = lower_one(&mut b, shl);
        assert_eq!(errs, 1);
    }

    #[test]
    fn huge_constant_shift_is_an_error() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(32));
        let px = b.path(x, Type::bits(32));
        let amount = b.constant(Type::InfInt, 512);
        let shl = b.binary(BinOp::Shl, px, amount, Type::bits(32));

        let (_, errs) = lower_one(&mut b, shl);
        assert_eq!(errs, 1);
    }

    #[test]
    fn small_shift_is_fine() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(16));
        let px = b.path(x, Type::bits(16));
        let amount = b.constant(Type::InfInt, 3);
        let shl = b.binary(BinOp::Shl, px, amount, Type::bits(16));

        let (out, errs) = lower_one(&mut b, shl);
        assert_eq!(errs, 0);
        assert_eq!(out, shl);
    }

    #[test]
    fn no_target_forms_remain_after_lowering() {
        // Build a nest of every lowered form and check the result is clean.
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(16));
        let px = b.path(x, Type::bits(16));
        let slice = b.expr(
            Expr::Slice {
                base: px,
                hi: 11,
                lo: 4,
            },
            Type::bits(8),
        );
        let neg = b.unary(UnOp::Neg, slice, Type::bits(8));
        let y = b.variable("y", Type::bits(4));
        let py = b.path(y, Type::bits(4));
        let concat = b.expr(
            Expr::Concat {
                left: neg,
                right: py,
            },
            Type::bits(12),
        );

        let (out, errs) = lower_one(&mut b, concat);
        assert_eq!(errs, 0);
        assert_clean(&b.program.exprs, out);
    }

    use proptest::prelude::*;

    proptest! {
        /// No slice, concatenation, or negation survives lowering, whatever
        /// the nesting.
        #[test]
        fn lowering_eliminates_target_forms(shape in proptest::collection::vec(0u8..3, 1..6)) {
            let mut b = IrBuilder::new();
            let mut width = 16u32;
            let x = b.variable("x", Type::bits(width));
            let mut cur = b.path(x, Type::bits(width));
            for step in shape {
                match step {
                    0 => {
                        cur = b.unary(UnOp::Neg, cur, Type::bits(width));
                    }
                    1 => {
                        let c = b.constant(Type::bits(4), 5);
                        width += 4;
                        cur = b.expr(Expr::Concat { left: cur, right: c }, Type::bits(width));
                    }
                    _ => {
                        if width < 2 {
                            continue;
                        }
                        let lo = width / 2;
                        let hi = width - 1;
                        width = hi - lo + 1;
                        cur = b.expr(Expr::Slice { base: cur, hi, lo }, Type::bits(width));
                    }
                }
            }
            let (out, errs) = lower_one(&mut b, cur);
            prop_assert_eq!(errs, 0);
            assert_clean(&b.program.exprs, out);
        }
    }

    fn assert_clean(exprs: &ExprArena, e: ExprId) {
        match exprs.get(e) {
            Expr::Slice { .. } | Expr::Concat { .. } => panic!("target form survived lowering"),
            Expr::Unary {
                op: UnOp::Neg, ..
            } => panic!("negation survived lowering"),
            Expr::Cast { expr, .. } => assert_clean(exprs, *expr),
            Expr::Binary { left, right, .. } => {
                assert_clean(exprs, *left);
                assert_clean(exprs, *right);
            }
            Expr::Unary { expr, .. } => assert_clean(exprs, *expr),
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                assert_clean(exprs, *cond);
                assert_clean(exprs, *if_true);
                assert_clean(exprs, *if_false);
            }
            _ => {}
        }
    }
}
