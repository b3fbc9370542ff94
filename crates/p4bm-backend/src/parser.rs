//! Parser conversion.
//!
//! Emits parser states with their operation lists (set, extract,
//! extract_VL, verify, validity writes) and transition tables. Select-case
//! values and masks are packed per the runtime's convention: the
//! concatenation of all byte-padded fields, high to low. The `accept` and
//! `reject` states are implicit; transitions to them serialize as null.

use num_bigint::BigInt;
use num_traits::Zero;
use serde_json::{json, Map, Value};

use p4bm_ir::{Expr, ExprId, ParserDecl, ParserState, Stmt, StmtId, Transition, Type};

use crate::diag::{Diagnostic, Warning};
use crate::json::{ext_name, inner_value, mask, round_up_bytes, string_repr};
use crate::method::{resolve_method, MethodKind};
use crate::program::ProgramConverter;

const STATE_START: &str = "start";
const STATE_ACCEPT: &str = "accept";
const STATE_REJECT: &str = "reject";

/// A packed select case.
enum PackedCase {
    /// Matches everything (default keyset, zero mask, or an error).
    Default,
    Packed {
        value: BigInt,
        /// `None` means every component carried a full mask.
        mask: Option<BigInt>,
        bytes: usize,
    },
}

impl ProgramConverter<'_> {
    pub(crate) fn convert_parser(&mut self, parser: &ParserDecl) -> Value {
        let mut states = Vec::new();
        for state in &parser.states {
            if state.name == STATE_ACCEPT || state.name == STATE_REJECT {
                continue;
            }
            states.push(self.convert_parser_state(state));
        }
        json!({
            "name": self.model.parser_json_name,
            "id": self.ids.next("parser"),
            "init_state": STATE_START,
            "parse_states": states,
        })
    }

    fn convert_parser_state(&mut self, state: &ParserState) -> Value {
        let mut result = Map::new();
        result.insert("name".into(), json!(ext_name(&state.name)));
        result.insert("id".into(), json!(self.ids.next("parse_states")));

        let mut ops = Vec::new();
        for &s in &state.components {
            if let Some(op) = self.convert_parser_statement(s) {
                ops.push(op);
            }
        }
        result.insert("parser_ops".into(), ops.into());

        let mut transitions = Vec::new();
        let key: Value;
        match &state.transition {
            Transition::None => {
                key = json!([]);
                transitions.push(json!({
                    "value": "default",
                    "mask": null,
                    "next_state": null,
                }));
            }
            Transition::Direct(next) => {
                key = json!([]);
                transitions.push(json!({
                    "value": "default",
                    "mask": null,
                    "next_state": self.state_name(next),
                }));
            }
            Transition::Select { select, cases } => {
                let components: Vec<Value> = select
                    .iter()
                    .map(|&c| self.conv().convert_full(c, false, true, false))
                    .collect();
                key = Value::Array(components);
                for case in cases.clone() {
                    let next_state = self.state_name(&case.next_state);
                    match self.combine(case.keyset, select) {
                        PackedCase::Default => transitions.push(json!({
                            "value": "default",
                            "mask": null,
                            "next_state": next_state,
                        })),
                        PackedCase::Packed { value, mask, bytes } => {
                            let mask_json = match mask {
                                None => Value::Null,
                                Some(m) => json!(string_repr(&m, bytes)),
                            };
                            transitions.push(json!({
                                "value": string_repr(&value, bytes),
                                "mask": mask_json,
                                "next_state": next_state,
                            }));
                        }
                    }
                }
            }
        }
        result.insert("transitions".into(), transitions.into());
        result.insert("transition_key".into(), key);
        Value::Object(result)
    }

    /// One parser operation. `None` for statements with no runtime effect.
    fn convert_parser_statement(&mut self, s: StmtId) -> Option<Value> {
        match self.program.stmts.get(s).clone() {
            Stmt::Empty | Stmt::Variable(_) => None,
            Stmt::Assign { left, right } => {
                let ty = self.types.get(left).clone();
                let mut conv = self.conv();
                let l = conv.convert_left_value(left);
                let r = conv.convert_full(right, true, true, ty == Type::Boolean);
                Some(json!({ "op": "set", "parameters": [l, r] }))
            }
            Stmt::MethodCall(call) => self.convert_parser_call(call),
            _ => {
                self.diags.error(Diagnostic::ParserOpUnsupported {
                    what: "this statement".into(),
                });
                None
            }
        }
    }

    fn convert_parser_call(&mut self, call: ExprId) -> Option<Value> {
        let Expr::MethodCall { args, .. } = self.program.exprs.get(call).clone() else {
            panic!("method-call statement without a call expression");
        };
        let kind = resolve_method(&self.program.exprs, &self.program.decls, &self.refs, call);
        match kind {
            Some(MethodKind::ExternMethod {
                extern_type,
                method,
                ..
            }) if extern_type == self.model.packet_in && method == self.model.extract => {
                self.convert_extract(&args)
            }
            Some(MethodKind::ExternFunction { name }) if name == self.model.verify_fn => {
                assert!(args.len() == 2, "expected 2 arguments for verify");
                // Neither parameter takes the outer expression wrapping.
                let cond = self.conv().convert_full(args[0], true, false, false);
                let err = self.conv().convert_full(args[1], true, false, false);
                Some(json!({ "op": "verify", "parameters": [cond, err] }))
            }
            Some(MethodKind::Builtin { target, name })
                if name == self.model.set_valid || name == self.model.set_invalid =>
            {
                // Validity writes become sets of the synthetic field.
                let valid = self.program.exprs.alloc(Expr::Member {
                    base: target,
                    member: self.model.valid_field.to_string(),
                });
                self.types.set(valid, Type::Void);
                let field = self.conv().convert_full(valid, true, false, false);
                let flag = self.program.exprs.alloc(Expr::Bool(name == self.model.set_valid));
                self.types.set(flag, Type::Boolean);
                let value = self.conv().convert_full(flag, true, true, true);
                Some(json!({ "op": "set", "parameters": [field, value] }))
            }
            _ => {
                self.diags.error(Diagnostic::ParserOpUnsupported {
                    what: "this call".into(),
                });
                None
            }
        }
    }

    fn convert_extract(&mut self, args: &[ExprId]) -> Option<Value> {
        assert!(
            args.len() == 1 || args.len() == 2,
            "expected 1 or 2 arguments for extract"
        );
        let arg = args[0];
        let arg_ty = self.types.get(arg).clone();
        let is_header = matches!(
            &arg_ty,
            Type::Struct(sid)
                if self.program.types.get(*sid).kind == p4bm_ir::StructKind::Header
        );
        if !is_header {
            self.diags.error(Diagnostic::ParserOpUnsupported {
                what: "extract of a non-header argument".into(),
            });
            return None;
        }

        // stack.next extracts into the stack's next free element.
        let mut param: Option<Value> = None;
        if let Expr::Member { base, member } = self.program.exprs.get(arg).clone() {
            if member == self.model.stack_next
                && matches!(self.types.get(base), Type::Stack { .. })
            {
                let stack = self.conv().convert(base);
                param = Some(json!({ "type": "stack", "value": inner_value(&stack) }));
            }
        }
        let param = param.unwrap_or_else(|| {
            let header = self.conv().convert(arg);
            json!({ "type": "regular", "value": inner_value(&header) })
        });

        let op = if args.len() == 1 { "extract" } else { "extract_VL" };
        let mut parameters = vec![param];
        if args.len() == 2 {
            // The length is always wrapped in an expression object.
            let length = self.conv().convert_full(args[1], true, false, false);
            parameters.push(json!({ "type": "expression", "value": length }));
        }
        Some(json!({ "op": op, "parameters": parameters }))
    }

    fn state_name(&mut self, name: &str) -> Value {
        if name == STATE_ACCEPT {
            Value::Null
        } else if name == STATE_REJECT {
            self.diags.warn(Warning::ExplicitRejectTransition);
            Value::Null
        } else {
            json!(name)
        }
    }

    /// Packs a select-case keyset against the select components. Values and
    /// masks are the concatenation, high to low, of all byte-padded fields;
    /// a 12-bit field and a 2-bit field yield three bytes in total.
    fn combine(&mut self, keyset: ExprId, select: &[ExprId]) -> PackedCase {
        match self.program.exprs.get(keyset).clone() {
            Expr::Default => PackedCase::Default,
            Expr::List(components) => {
                assert!(
                    components.len() == select.len(),
                    "select and keyset arity mismatch"
                );
                let mut value = BigInt::zero();
                let mut packed_mask = BigInt::zero();
                let mut all_full = true;
                let mut bytes = 0usize;
                for (&component, &sel) in components.iter().zip(select) {
                    let width = self.types.get(sel).width_bits(&self.program.types);
                    assert!(width > 0, "select component with unknown width");
                    let Some((kv, km)) = self.convert_simple_key(component) else {
                        return PackedCase::Default;
                    };
                    let shift = 8 * round_up_bytes(width);
                    bytes += round_up_bytes(width);
                    value = (value << shift) + kv;
                    let component_mask = km.clone().unwrap_or_else(|| mask(width));
                    packed_mask = (packed_mask << shift) + component_mask;
                    if km.is_some() {
                        all_full = false;
                    }
                    tracing::trace!(%value, %packed_mask, "packed select component");
                }
                if !all_full && packed_mask.is_zero() {
                    return PackedCase::Default;
                }
                PackedCase::Packed {
                    value,
                    mask: if all_full { None } else { Some(packed_mask) },
                    bytes,
                }
            }
            _ => {
                assert!(select.len() == 1, "select and keyset arity mismatch");
                let Some((value, km)) = self.convert_simple_key(keyset) else {
                    return PackedCase::Default;
                };
                if let Some(m) = &km {
                    if m.is_zero() {
                        return PackedCase::Default;
                    }
                }
                let width = self.types.get(select[0]).width_bits(&self.program.types);
                PackedCase::Packed {
                    value,
                    mask: km,
                    bytes: round_up_bytes(width),
                }
            }
        }
    }

    /// A single keyset component: its value and explicit mask (`None` for a
    /// full match). `None` overall after reporting an error.
    fn convert_simple_key(&mut self, keyset: ExprId) -> Option<(BigInt, Option<BigInt>)> {
        match self.program.exprs.get(keyset).clone() {
            Expr::Mask { value, mask } => {
                let v = self.const_value(value);
                let m = self.const_value(mask);
                match (v, m) {
                    (Some(v), Some(m)) => Some((v, Some(m))),
                    _ => {
                        self.diags.error(Diagnostic::NotConstant {
                            what: "a select keyset".into(),
                        });
                        None
                    }
                }
            }
            Expr::Constant { value, .. } => Some((value, None)),
            Expr::Bool(b) => Some((BigInt::from(i32::from(b)), None)),
            _ => {
                self.diags.error(Diagnostic::NotConstant {
                    what: "a select keyset".into(),
                });
                None
            }
        }
    }
}
