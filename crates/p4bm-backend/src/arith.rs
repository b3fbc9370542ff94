//! Width clamping for arithmetic results.
//!
//! The runtime evaluates arithmetic with wrap-around semantics and performs
//! no width normalization, so every operation producing a `bit<W>` result
//! must be clamped by the compiler: unsigned results are masked with the
//! all-ones mask of their width, signed results go through a
//! two's-complement modulus node.
//!
//! The pass is bottom-up and total. Clamp shapes it minted itself are
//! recognized and descended into without re-wrapping, so applying the pass
//! twice yields the same tree.

use p4bm_ir::{BinOp, Expr, ExprArena, ExprId, Type, TypeMap, UnOp};

use crate::json::mask;

pub struct ArithmeticFixup<'a> {
    exprs: &'a mut ExprArena,
    types: &'a mut TypeMap,
}

impl<'a> ArithmeticFixup<'a> {
    pub fn new(exprs: &'a mut ExprArena, types: &'a mut TypeMap) -> Self {
        ArithmeticFixup { exprs, types }
    }

    /// Rewrites `e` so that its evaluation under wrap-around semantics
    /// matches the typed semantics. Returns the (possibly new) root.
    pub fn fix(&mut self, e: ExprId) -> ExprId {
        if let Some(inner) = self.clamp_inner(e) {
            let fixed = self.fix_operands(inner);
            if fixed == inner {
                return e;
            }
            let rebuilt = match self.exprs.get(e).clone() {
                Expr::Binary { op, right, .. } => Expr::Binary {
                    op,
                    left: fixed,
                    right,
                },
                Expr::IntMod { width, .. } => Expr::IntMod { expr: fixed, width },
                _ => unreachable!("clamp_inner only matches BAnd and IntMod"),
            };
            return self.rebuild(e, rebuilt);
        }

        let rebuilt = self.fix_operands(e);
        let needs_clamp = match self.exprs.get(rebuilt) {
            Expr::Binary { op, .. } => !op.is_width_safe(),
            Expr::Unary { op: UnOp::Neg, .. } | Expr::Cast { .. } => true,
            _ => false,
        };
        if !needs_clamp {
            return rebuilt;
        }
        match self.types.get(rebuilt).clone() {
            Type::Bits { width, signed } => {
                assert!(width > 0, "arithmetic result with unknown width");
                self.clamp(rebuilt, width, signed)
            }
            _ => rebuilt,
        }
    }

    /// Rebuilds `e` with fixed children, or returns `e` itself when nothing
    /// below it changed. The new node inherits the original's type.
    fn fix_operands(&mut self, e: ExprId) -> ExprId {
        let node = self.exprs.get(e).clone();
        let rebuilt = match node {
            Expr::Constant { .. }
            | Expr::Bool(_)
            | Expr::Path(_)
            | Expr::Default
            | Expr::TypeName(_) => return e,

            Expr::Member { base, member } => {
                let b = self.fix(base);
                if b == base {
                    return e;
                }
                Expr::Member { base: b, member }
            }
            Expr::ArrayIndex { base, index } => {
                let (b, i) = (self.fix(base), self.fix(index));
                if b == base && i == index {
                    return e;
                }
                Expr::ArrayIndex { base: b, index: i }
            }
            Expr::Slice { base, hi, lo } => {
                let b = self.fix(base);
                if b == base {
                    return e;
                }
                Expr::Slice { base: b, hi, lo }
            }
            Expr::Concat { left, right } => {
                let (l, r) = (self.fix(left), self.fix(right));
                if l == left && r == right {
                    return e;
                }
                Expr::Concat { left: l, right: r }
            }
            Expr::Cast { target, expr } => {
                let x = self.fix(expr);
                if x == expr {
                    return e;
                }
                Expr::Cast { target, expr: x }
            }
            Expr::Unary { op, expr } => {
                let x = self.fix(expr);
                if x == expr {
                    return e;
                }
                Expr::Unary { op, expr: x }
            }
            Expr::Binary { op, left, right } => {
                let (l, r) = (self.fix(left), self.fix(right));
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
                let (c, t, f) = (self.fix(cond), self.fix(if_true), self.fix(if_false));
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
                let x = self.fix(expr);
                if x == expr {
                    return e;
                }
                Expr::IntMod { expr: x, width }
            }
            Expr::Mask { value, mask } => {
                let (v, m) = (self.fix(value), self.fix(mask));
                if v == value && m == mask {
                    return e;
                }
                Expr::Mask { value: v, mask: m }
            }
            Expr::Range { lo, hi } => {
                let (l, h) = (self.fix(lo), self.fix(hi));
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
                let new_args: Vec<ExprId> = args.iter().map(|a| self.fix(*a)).collect();
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
                let new_args: Vec<ExprId> = args.iter().map(|a| self.fix(*a)).collect();
                if new_args == args {
                    return e;
                }
                Expr::ConstructorCall {
                    ty_name,
                    args: new_args,
                }
            }
            Expr::List(components) => {
                let new: Vec<ExprId> = components.iter().map(|c| self.fix(*c)).collect();
                if new == components {
                    return e;
                }
                Expr::List(new)
            }
        };
        self.rebuild(e, rebuilt)
    }

    /// Allocates a replacement for `original`, carrying its type over.
    fn rebuild(&mut self, original: ExprId, node: Expr) -> ExprId {
        let id = self.exprs.alloc(node);
        let ty = self.types.get(original).clone();
        self.types.set(id, ty);
        id
    }

    /// Wraps `e` in the clamp appropriate for its signedness.
    fn clamp(&mut self, e: ExprId, width: u32, signed: bool) -> ExprId {
        let ty = Type::Bits { width, signed };
        let result = if signed {
            let clamped = self.exprs.alloc(Expr::IntMod { expr: e, width });
            self.types.set(clamped, ty);
            clamped
        } else {
            let cst = self.exprs.alloc(Expr::Constant {
                ty: ty.clone(),
                value: mask(width),
            });
            self.types.set(cst, ty.clone());
            let clamped = self.exprs.alloc(Expr::Binary {
                op: BinOp::BAnd,
                left: e,
                right: cst,
            });
            self.types.set(clamped, ty);
            clamped
        };
        tracing::trace!(original = %e, clamped = %result, width, signed, "clamped arithmetic");
        result
    }

    /// If `e` is a clamp this pass could have minted -- a bit-and with the
    /// all-ones mask of its own width, or a two's-complement modulus --
    /// returns the clamped operand.
    fn clamp_inner(&self, e: ExprId) -> Option<ExprId> {
        match self.exprs.get(e) {
            Expr::IntMod { expr, .. } => Some(*expr),
            Expr::Binary {
                op: BinOp::BAnd,
                left,
                right,
            } => {
                let width = match self.types.try_get(e) {
                    Some(Type::Bits {
                        width,
                        signed: false,
                    }) => *width,
                    _ => return None,
                };
                match self.exprs.get(*right) {
                    Expr::Constant { value, .. } if *value == mask(width) => Some(*left),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use p4bm_ir::IrBuilder;

    fn add_of_vars(b: &mut IrBuilder, ty: Type) -> ExprId {
        let x = b.variable("x", ty.clone());
        let y = b.variable("y", ty.clone());
        let px = b.path(x, ty.clone());
        let py = b.path(y, ty.clone());
        b.binary(BinOp::Add, px, py, ty)
    }

    #[test]
    fn unsigned_add_is_masked() {
        let mut b = IrBuilder::new();
        let add = add_of_vars(&mut b, Type::bits(16));
        let fixed =
            ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(add);

        match b.program.exprs.get(fixed) {
            Expr::Binary {
                op: BinOp::BAnd,
                left,
                right,
            } => {
                assert_eq!(*left, add);
                match b.program.exprs.get(*right) {
                    Expr::Constant { value, .. } => assert_eq!(*value, BigInt::from(0xffff)),
                    other => panic!("expected mask constant, got {other:?}"),
                }
            }
            other => panic!("expected masked add, got {other:?}"),
        }
        assert_eq!(*b.types.get(fixed), Type::bits(16));
    }

    #[test]
    fn signed_add_uses_two_comp_mod() {
        let mut b = IrBuilder::new();
        let add = add_of_vars(&mut b, Type::signed_bits(8));
        let fixed =
            ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(add);

        assert!(matches!(
            b.program.exprs.get(fixed),
            Expr::IntMod { width: 8, .. }
        ));
    }

    #[test]
    fn bitwise_ops_are_not_clamped() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(8));
        let px = b.path(x, Type::bits(8));
        let c = b.constant(Type::bits(8), 3);
        let xor = b.binary(BinOp::BXor, px, c, Type::bits(8));
        let fixed = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(xor);
        assert_eq!(fixed, xor);
    }

    #[test]
    fn comparison_results_are_not_clamped() {
        let mut b = IrBuilder::new();
        let x = b.variable("x", Type::bits(8));
        let px = b.path(x, Type::bits(8));
        let c = b.constant(Type::bits(8), 1);
        let eq = b.binary(BinOp::Eq, px, c, Type::Boolean);
        let fixed = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(eq);
        assert_eq!(fixed, eq);
    }

    #[test]
    fn fixup_is_idempotent() {
        let mut b = IrBuilder::new();
        let add = add_of_vars(&mut b, Type::bits(32));
        let once = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(add);
        let twice = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(once);
        assert_eq!(once, twice);
    }

    #[test]
    fn fixup_is_idempotent_on_signed() {
        let mut b = IrBuilder::new();
        let add = add_of_vars(&mut b, Type::signed_bits(16));
        let once = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(add);
        let twice = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(once);
        assert_eq!(once, twice);
    }

    use proptest::prelude::*;

    proptest! {
        /// Applying the fixup twice yields the tree of a single application.
        #[test]
        fn fixup_is_idempotent_on_random_trees(
            ops in proptest::collection::vec(0u8..5, 1..8),
            width in 1u32..64,
            signed in proptest::bool::ANY,
        ) {
            let mut b = IrBuilder::new();
            let ty = Type::Bits { width, signed };
            let x = b.variable("x", ty.clone());
            let mut cur = b.path(x, ty.clone());
            for op in ops {
                let c = b.constant(ty.clone(), 3);
                let binop = match op {
                    0 => BinOp::Add,
                    1 => BinOp::Sub,
                    2 => BinOp::Mul,
                    3 => BinOp::BAnd,
                    _ => BinOp::BXor,
                };
                cur = b.binary(binop, cur, c, ty.clone());
            }
            let once = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(cur);
            let twice = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(once);
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn nested_arithmetic_is_clamped_bottom_up() {
        let mut b = IrBuilder::new();
        let ty = Type::bits(8);
        let x = b.variable("x", ty.clone());
        let px = b.path(x, ty.clone());
        let one = b.constant(ty.clone(), 1);
        let two = b.constant(ty.clone(), 2);
        let inner = b.binary(BinOp::Add, px, one, ty.clone());
        let outer = b.binary(BinOp::Mul, inner, two, ty.clone());

        let fixed = ArithmeticFixup::new(&mut b.program.exprs, &mut b.types).fix(outer);
        // Outer mask, around a multiply whose left operand is the masked add.
        match b.program.exprs.get(fixed) {
            Expr::Binary {
                op: BinOp::BAnd,
                left,
                ..
            } => match b.program.exprs.get(*left) {
                Expr::Binary {
                    op: BinOp::Mul,
                    left: mul_left,
                    ..
                } => {
                    assert!(matches!(
                        b.program.exprs.get(*mul_left),
                        Expr::Binary {
                            op: BinOp::BAnd,
                            ..
                        }
                    ));
                }
                other => panic!("expected multiply under mask, got {other:?}"),
            },
            other => panic!("expected mask, got {other:?}"),
        }
    }
}
