//! Expression-to-JSON conversion.
//!
//! Renders an IR expression as the structured JSON node the runtime
//! expects: field and header references, runtime-data references for
//! action parameters, literals, and operator trees. The caller chooses
//! whether the arithmetic fixup runs first, whether the result is wrapped
//! in the runtime's outer `expression` object, and whether a
//! boolean-to-data bridge is inserted.
//!
//! Boolean locals are stored as scalar fields; reading one inserts a `d2b`
//! conversion, while writing one (the converter's left-value mode) does
//! not.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::{json, Value};

use p4bm_ir::{
    Decl, DeclArena, DeclId, Expr, ExprArena, ExprId, RefMap, StructId, SwitchModel, Type,
    TypeMap, TypeRegistry,
};

use crate::arith::ArithmeticFixup;
use crate::diag::{Diagnostic, Diagnostics};
use crate::json::{ext_name, round_up_bytes, string_repr};
use crate::method::{resolve_method, MethodKind};

/// Conversion environment assembled by the program converter: the names and
/// maps expression rendering depends on.
#[derive(Debug, Default)]
pub struct ConvEnv {
    /// Name of the synthesized scalars header instance.
    pub scalars_name: String,
    /// Packed scalar fields of struct parameters: (parent, field) -> name.
    pub scalar_metadata_fields: HashMap<(StructId, String), String>,
    /// Error member -> assigned code.
    pub error_codes: IndexMap<String, u32>,
    /// Action parameter -> position in the parameter list.
    pub param_index: HashMap<DeclId, u32>,
    /// Parameters of parser/control blocks (not action parameters).
    pub non_action_params: HashSet<DeclId>,
    /// The standard-metadata parameters among them.
    pub std_meta_params: HashSet<DeclId>,
}

pub struct ExpressionConverter<'a> {
    pub exprs: &'a mut ExprArena,
    pub types: &'a mut TypeMap,
    pub decls: &'a DeclArena,
    pub registry: &'a TypeRegistry,
    pub refs: &'a RefMap,
    pub model: &'a SwitchModel,
    pub env: &'a ConvEnv,
    pub diags: &'a mut Diagnostics,
    /// When set, operator trees are rejected: table keys, deparser emits,
    /// and checksum targets take simple references only.
    pub simple_expressions_only: bool,
    left_value: bool,
    /// Context string used in complexity diagnostics.
    pub context: &'static str,
}

impl<'a> ExpressionConverter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exprs: &'a mut ExprArena,
        types: &'a mut TypeMap,
        decls: &'a DeclArena,
        registry: &'a TypeRegistry,
        refs: &'a RefMap,
        model: &'a SwitchModel,
        env: &'a ConvEnv,
        diags: &'a mut Diagnostics,
    ) -> Self {
        ExpressionConverter {
            exprs,
            types,
            decls,
            registry,
            refs,
            model,
            env,
            diags,
            simple_expressions_only: false,
            left_value: false,
            context: "an expression",
        }
    }

    /// Converts with arithmetic fixup and outer wrapping.
    pub fn convert(&mut self, e: ExprId) -> Value {
        self.convert_full(e, true, true, false)
    }

    /// Full-control conversion.
    ///
    /// * `do_fixup` -- insert masking for proper arithmetic first.
    /// * `wrap` -- apply the runtime's outer-object convention: a result of
    ///   type `expression` or `stack_field` is wrapped once more.
    /// * `convert_bool` -- bridge the boolean result to data with `b2d`
    ///   (used on the right-hand side of assignments to boolean fields).
    pub fn convert_full(
        &mut self,
        e: ExprId,
        do_fixup: bool,
        wrap: bool,
        convert_bool: bool,
    ) -> Value {
        let expr = if do_fixup {
            ArithmeticFixup::new(self.exprs, self.types).fix(e)
        } else {
            e
        };
        let mut result = self.convert_inner(expr);

        if convert_bool {
            result = json!({
                "type": "expression",
                "value": { "op": "b2d", "left": null, "right": result },
            });
        }

        if wrap {
            if let Some(ty) = result.get("type").and_then(Value::as_str) {
                if ty == "expression" || ty == "stack_field" {
                    result = json!({ "type": "expression", "value": result });
                }
            }
        }
        result
    }

    /// Converts the left-hand side of an assignment. Boolean targets are
    /// rendered as their backing scalar field, without a `d2b` read bridge.
    pub fn convert_left_value(&mut self, e: ExprId) -> Value {
        let expr = ArithmeticFixup::new(self.exprs, self.types).fix(e);
        self.left_value = true;
        let result = self.convert_inner(expr);
        self.left_value = false;
        result
    }

    /// A `runtime_data` reference used as an operand inside an operator
    /// tree must be rendered as a `local` node instead.
    fn fix_local(value: Value) -> Value {
        match value.get("type").and_then(Value::as_str) {
            Some("runtime_data") => json!({
                "type": "local",
                "value": value.get("value").cloned().unwrap_or(Value::Null),
            }),
            _ => value,
        }
    }

    fn too_complex(&mut self) -> Value {
        self.diags.error(Diagnostic::ExpressionTooComplex {
            context: self.context.to_string(),
        });
        json!({})
    }

    fn convert_inner(&mut self, e: ExprId) -> Value {
        match self.exprs.get(e).clone() {
            Expr::Bool(value) => json!({ "type": "bool", "value": value }),

            Expr::Constant { ty, value } => {
                let bytes = match ty {
                    Type::Bits { width, .. } => round_up_bytes(width),
                    _ => 0,
                };
                json!({ "type": "hexstr", "value": string_repr(&value, bytes) })
            }

            Expr::Path(_) => self.convert_path(e),

            Expr::Member { base, member } => self.convert_member(e, base, &member),

            Expr::ArrayIndex { base, index } => self.convert_array_index(base, index),

            // The arithmetic fixup has clamped the operand already; the cast
            // itself has no runtime representation.
            Expr::Cast { expr, .. } => self.convert_inner(expr),

            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                if self.simple_expressions_only {
                    return self.too_complex();
                }
                let c = Self::fix_local(self.convert_inner(cond));
                let t = Self::fix_local(self.convert_inner(if_true));
                let f = Self::fix_local(self.convert_inner(if_false));
                json!({
                    "type": "expression",
                    "value": { "op": "?", "left": t, "right": f, "cond": c },
                })
            }

            Expr::IntMod { expr, width } => {
                let l = Self::fix_local(self.convert_inner(expr));
                json!({
                    "type": "expression",
                    "value": {
                        "op": "two_comp_mod",
                        "left": l,
                        "right": {
                            "type": "hexstr",
                            "value": string_repr(&width.into(), 0),
                        },
                    },
                })
            }

            Expr::Binary { op, left, right } => {
                if self.simple_expressions_only {
                    return self.too_complex();
                }
                let op = match op.as_str() {
                    "&&" => "and",
                    "||" => "or",
                    other => other,
                };
                let l = Self::fix_local(self.convert_inner(left));
                let r = Self::fix_local(self.convert_inner(right));
                json!({
                    "type": "expression",
                    "value": { "op": op, "left": l, "right": r },
                })
            }

            Expr::Unary { op, expr } => {
                if self.simple_expressions_only {
                    return self.too_complex();
                }
                let r = Self::fix_local(self.convert_inner(expr));
                json!({
                    "type": "expression",
                    "value": { "op": op.as_str(), "left": null, "right": r },
                })
            }

            Expr::List(components) => {
                if self.simple_expressions_only {
                    return self.too_complex();
                }
                Value::Array(components.iter().map(|c| self.convert_inner(*c)).collect())
            }

            Expr::MethodCall { ref type_args, .. } => {
                match resolve_method(self.exprs, self.decls, self.refs, e) {
                    Some(MethodKind::Builtin { target, name }) if name == self.model.is_valid => {
                        let header = self.convert_inner(target);
                        json!({
                            "type": "expression",
                            "value": { "op": "valid", "left": null, "right": header },
                        })
                    }
                    Some(MethodKind::ExternMethod {
                        extern_type,
                        method,
                        ..
                    }) if extern_type == self.model.packet_in
                        && method == self.model.lookahead =>
                    {
                        let targ = type_args
                            .first()
                            .unwrap_or_else(|| panic!("lookahead without a type argument"));
                        let width = targ.width_bits(self.registry);
                        assert!(width > 0, "lookahead of a type with unknown width");
                        json!({ "type": "lookahead", "value": [0, width] })
                    }
                    other => panic!("unhandled method call in expression position: {other:?}"),
                }
            }

            node @ (Expr::Slice { .. }
            | Expr::Concat { .. }
            | Expr::Mask { .. }
            | Expr::Range { .. }
            | Expr::ConstructorCall { .. }
            | Expr::Default
            | Expr::TypeName(_)) => {
                panic!("expression form not handled by the converter: {node:?}")
            }
        }
    }

    fn convert_path(&mut self, e: ExprId) -> Value {
        let decl = self
            .refs
            .get_declaration(e)
            .unwrap_or_else(|| panic!("unresolved path expression {e}"));
        match self.decls.get(decl) {
            Decl::Param(param) => {
                if self.env.std_meta_params.contains(&decl) {
                    // Standard metadata is a flat struct known to the runtime.
                    json!({ "type": "header", "value": self.model.std_meta_json_name })
                } else if self.env.non_action_params.contains(&decl) {
                    Value::String(param.name.clone())
                } else {
                    let index = *self
                        .env
                        .param_index
                        .get(&decl)
                        .unwrap_or_else(|| panic!("no index for action parameter {}", param.name));
                    json!({ "type": "runtime_data", "value": index })
                }
            }
            Decl::Variable(var) => {
                let scalars = &self.env.scalars_name;
                match &var.ty {
                    Type::Struct(_) => json!({ "type": "header", "value": var.name }),
                    Type::Bits { .. } => {
                        json!({ "type": "field", "value": [scalars, var.name] })
                    }
                    Type::Boolean if self.left_value => {
                        json!({ "type": "field", "value": [scalars, var.name] })
                    }
                    // Boolean variables are stored as ints; reads convert.
                    Type::Boolean => json!({
                        "type": "expression",
                        "value": {
                            "op": "d2b",
                            "left": null,
                            "right": { "type": "field", "value": [scalars, var.name] },
                        },
                    }),
                    Type::Stack { .. } => {
                        json!({ "type": "header_stack", "value": var.name })
                    }
                    Type::Error => json!({ "type": "field", "value": [scalars, var.name] }),
                    other => panic!("variable type not handled: {other:?}"),
                }
            }
            other => panic!("path to {} not convertible as a value", other.name()),
        }
    }

    fn convert_member(&mut self, e: ExprId, base: ExprId, member: &str) -> Value {
        // Error constants render as their assigned code.
        if *self.types.get(e) == Type::Error {
            if let Expr::TypeName(_) = self.exprs.get(base) {
                let code = *self
                    .env
                    .error_codes
                    .get(member)
                    .unwrap_or_else(|| panic!("unknown error member '{member}'"));
                return json!({ "type": "hexstr", "value": code.to_string() });
            }
        }

        let parent_ty = self.types.get(base).clone();
        let field_name = match &parent_ty {
            Type::Struct(sid) => {
                let def = self.registry.get(*sid);
                match def.field(member) {
                    Some(f) => ext_name(&f.name).to_string(),
                    None => member.to_string(),
                }
            }
            _ => member.to_string(),
        };

        if let Some(param) = self.enclosing_param_reference(base) {
            let ty = self.types.get(e).clone();
            if self.env.std_meta_params.contains(&param) {
                return json!({
                    "type": "field",
                    "value": [self.model.std_meta_json_name, field_name],
                });
            }
            return match (&parent_ty, &ty) {
                (_, Type::Stack { .. }) => {
                    json!({ "type": "header_stack", "value": field_name })
                }
                (Type::Struct(sid), Type::Bits { .. } | Type::Boolean) => {
                    // A scalar field of a struct parameter lives in the
                    // packed scalars instance under a synthesized name.
                    let key = (*sid, member.to_string());
                    let name = self
                        .env
                        .scalar_metadata_fields
                        .get(&key)
                        .unwrap_or_else(|| panic!("no scalar field for {field_name}"));
                    json!({ "type": "field", "value": [self.env.scalars_name, name] })
                }
                _ => json!({ "type": "header", "value": field_name }),
            };
        }

        // stack.last.field => stack_field reference
        if let Expr::Member {
            base: stack,
            member: stack_member,
        } = self.exprs.get(base).clone()
        {
            if stack_member == self.model.stack_last
                && matches!(self.types.get(stack), Type::Stack { .. })
            {
                let l = self.convert_inner(stack);
                let stack_value = match &l {
                    Value::Object(o) => o.get("value").cloned().unwrap_or(l.clone()),
                    other => other.clone(),
                };
                return json!({ "type": "stack_field", "value": [stack_value, field_name] });
            }
        }

        let l = self.convert_inner(base);
        let value = match &l {
            Value::Object(o) => {
                let lv = o
                    .get("value")
                    .unwrap_or_else(|| panic!("converted base without a value: {l}"));
                match lv {
                    // nested struct reference [["m","f"], "x"] => ["m", "f.x"]
                    Value::Array(elements) => {
                        assert!(elements.len() == 2, "expected a two-element reference");
                        let first = elements[0].clone();
                        let nested = elements[1]
                            .as_str()
                            .unwrap_or_else(|| panic!("expected a field name: {l}"));
                        json!([first, format!("{nested}.{field_name}")])
                    }
                    other => json!([other, field_name]),
                }
            }
            other => json!([other, field_name]),
        };
        json!({ "type": "field", "value": value })
    }

    fn convert_array_index(&mut self, base: ExprId, index: ExprId) -> Value {
        // Either a header that is part of the headers parameter, or a
        // local variable of stack type.
        let mut access = match self.exprs.get(base) {
            Expr::Member { member, .. } => member.clone(),
            Expr::Path(name) => name.clone(),
            other => panic!("unexpected header-stack base: {other:?}"),
        };
        match self.exprs.get(index) {
            Expr::Constant { value, .. } => {
                access = format!("{access}[{value}]");
            }
            _ => self.diags.error(Diagnostic::NonConstantArrayIndex),
        }
        json!({ "type": "header", "value": access })
    }

    /// Non-`None` if the expression is a reference to a parameter of the
    /// enclosing parser or control block.
    fn enclosing_param_reference(&self, e: ExprId) -> Option<DeclId> {
        if !matches!(self.exprs.get(e), Expr::Path(_)) {
            return None;
        }
        let decl = self.refs.get_declaration(e)?;
        if matches!(self.decls.get(decl), Decl::Param(_))
            && self.env.non_action_params.contains(&decl)
        {
            Some(decl)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4bm_ir::{BinOp, IrBuilder, StructKind};

    struct Fixture {
        b: IrBuilder,
        env: ConvEnv,
        model: SwitchModel,
    }

    impl Fixture {
        fn new() -> Self {
            let mut env = ConvEnv::default();
            env.scalars_name = "scalars".to_string();
            Fixture {
                b: IrBuilder::new(),
                env,
                model: SwitchModel::default(),
            }
        }

        fn convert(&mut self, e: ExprId) -> Value {
            self.convert_full(e, true, true, false)
        }

        fn convert_full(&mut self, e: ExprId, fixup: bool, wrap: bool, b2d: bool) -> Value {
            let mut diags = Diagnostics::new();
            let mut conv = ExpressionConverter::new(
                &mut self.b.program.exprs,
                &mut self.b.types,
                &self.b.program.decls,
                &self.b.program.types,
                &self.b.refs,
                &self.model,
                &self.env,
                &mut diags,
            );
            let v = conv.convert_full(e, fixup, wrap, b2d);
            assert_eq!(diags.error_count(), 0, "unexpected diagnostics");
            v
        }
    }

    #[test]
    fn literals() {
        let mut f = Fixture::new();
        let t = f.b.bool_lit(true);
        assert_eq!(f.convert(t), json!({ "type": "bool", "value": true }));

        let c = f.b.constant(Type::bits(16), 0xab);
        assert_eq!(
            f.convert(c),
            json!({ "type": "hexstr", "value": "0x00ab" })
        );
    }

    #[test]
    fn scalar_variable_reads_and_writes() {
        let mut f = Fixture::new();
        let x = f.b.variable("x", Type::bits(8));
        let p = f.b.path(x, Type::bits(8));
        assert_eq!(
            f.convert(p),
            json!({ "type": "field", "value": ["scalars", "x"] })
        );
    }

    #[test]
    fn boolean_variable_read_bridges_d2b() {
        let mut f = Fixture::new();
        let x = f.b.variable("flag", Type::Boolean);
        let p = f.b.path(x, Type::Boolean);
        let v = f.convert(p);
        // d2b produces an inner expression node, so the wrap rule applies.
        assert_eq!(
            v,
            json!({
                "type": "expression",
                "value": {
                    "type": "expression",
                    "value": {
                        "op": "d2b",
                        "left": null,
                        "right": { "type": "field", "value": ["scalars", "flag"] },
                    },
                },
            })
        );
    }

    #[test]
    fn boolean_variable_write_does_not_bridge() {
        let mut f = Fixture::new();
        let x = f.b.variable("flag", Type::Boolean);
        let p = f.b.path(x, Type::Boolean);

        let mut diags = Diagnostics::new();
        let mut conv = ExpressionConverter::new(
            &mut f.b.program.exprs,
            &mut f.b.types,
            &f.b.program.decls,
            &f.b.program.types,
            &f.b.refs,
            &f.model,
            &f.env,
            &mut diags,
        );
        assert_eq!(
            conv.convert_left_value(p),
            json!({ "type": "field", "value": ["scalars", "flag"] })
        );
    }

    #[test]
    fn action_parameter_is_runtime_data() {
        let mut f = Fixture::new();
        let p = f.b.param("port", Type::bits(9));
        f.env.param_index.insert(p, 0);
        let r = f.b.path(p, Type::bits(9));
        assert_eq!(
            f.convert(r),
            json!({ "type": "runtime_data", "value": 0 })
        );
    }

    #[test]
    fn runtime_data_inside_operators_becomes_local() {
        let mut f = Fixture::new();
        let p = f.b.param("port", Type::bits(8));
        f.env.param_index.insert(p, 2);
        let r = f.b.path(p, Type::bits(8));
        let c = f.b.constant(Type::bits(8), 1);
        let sum = f.b.binary(BinOp::BOr, r, c, Type::bits(8));
        let v = f.convert(sum);
        assert_eq!(
            v,
            json!({
                "type": "expression",
                "value": {
                    "type": "expression",
                    "value": {
                        "op": "|",
                        "left": { "type": "local", "value": 2 },
                        "right": { "type": "hexstr", "value": "0x01" },
                    },
                },
            })
        );
    }

    #[test]
    fn header_field_member() {
        let mut f = Fixture::new();
        let h = f.b.header_type("ethernet_t", &[("etherType", Type::bits(16))]);
        let hdrs = f
            .b
            .struct_type(StructKind::Struct, "headers", &[("ethernet", Type::Struct(h))]);
        let hdr_param = f.b.param("hdr", Type::Struct(hdrs));
        f.env.non_action_params.insert(hdr_param);

        let hp = f.b.path(hdr_param, Type::Struct(hdrs));
        let eth = f.b.member(hp, "ethernet", Type::Struct(h));
        let et = f.b.member(eth, "etherType", Type::bits(16));
        assert_eq!(
            f.convert(et),
            json!({ "type": "field", "value": ["ethernet", "etherType"] })
        );
        // The header itself renders as a header reference.
        let eth2 = f.b.member(hp, "ethernet", Type::Struct(h));
        assert_eq!(
            f.convert(eth2),
            json!({ "type": "header", "value": "ethernet" })
        );
    }

    #[test]
    fn standard_metadata_member() {
        let mut f = Fixture::new();
        let std_ty = f.b.struct_type(
            StructKind::Struct,
            "standard_metadata_t",
            &[("egress_spec", Type::bits(9))],
        );
        let sm = f.b.param("standard_metadata", Type::Struct(std_ty));
        f.env.non_action_params.insert(sm);
        f.env.std_meta_params.insert(sm);

        let p = f.b.path(sm, Type::Struct(std_ty));
        let fld = f.b.member(p, "egress_spec", Type::bits(9));
        assert_eq!(
            f.convert(fld),
            json!({ "type": "field", "value": ["standard_metadata", "egress_spec"] })
        );
        let p2 = f.b.path(sm, Type::Struct(std_ty));
        assert_eq!(
            f.convert(p2),
            json!({ "type": "header", "value": "standard_metadata" })
        );
    }

    #[test]
    fn stack_index_and_last_field() {
        let mut f = Fixture::new();
        let h = f.b.header_type("label_t", &[("tag", Type::bits(20))]);
        let hdrs = f.b.struct_type(
            StructKind::Struct,
            "headers",
            &[("labels", Type::Stack { element: h, size: 4 })],
        );
        let hdr_param = f.b.param("hdr", Type::Struct(hdrs));
        f.env.non_action_params.insert(hdr_param);

        let hp = f.b.path(hdr_param, Type::Struct(hdrs));
        let stack = f
            .b
            .member(hp, "labels", Type::Stack { element: h, size: 4 });
        let idx = f.b.constant(Type::InfInt, 2);
        let elem = f
            .b
            .expr(Expr::ArrayIndex { base: stack, index: idx }, Type::Struct(h));
        assert_eq!(
            f.convert(elem),
            json!({ "type": "header", "value": "labels[2]" })
        );

        let hp2 = f.b.path(hdr_param, Type::Struct(hdrs));
        let stack2 = f
            .b
            .member(hp2, "labels", Type::Stack { element: h, size: 4 });
        let last = f.b.member(stack2, "last", Type::Struct(h));
        let tag = f.b.member(last, "tag", Type::bits(20));
        assert_eq!(
            f.convert(tag),
            json!({
                "type": "expression",
                "value": { "type": "stack_field", "value": ["labels", "tag"] },
            })
        );
    }

    #[test]
    fn error_member_uses_assigned_code() {
        let mut f = Fixture::new();
        f.env.error_codes.insert("NoMatch".to_string(), 2);
        let base = f.b.expr(Expr::TypeName("error".into()), Type::Void);
        let err = f.b.member(base, "NoMatch", Type::Error);
        assert_eq!(
            f.convert(err),
            json!({ "type": "hexstr", "value": "2" })
        );
    }

    #[test]
    fn is_valid_renders_as_valid_op() {
        let mut f = Fixture::new();
        let h = f.b.header_type("ipv4_t", &[("ttl", Type::bits(8))]);
        let hdrs = f
            .b
            .struct_type(StructKind::Struct, "headers", &[("ipv4", Type::Struct(h))]);
        let hdr_param = f.b.param("hdr", Type::Struct(hdrs));
        f.env.non_action_params.insert(hdr_param);

        let hp = f.b.path(hdr_param, Type::Struct(hdrs));
        let ipv4 = f.b.member(hp, "ipv4", Type::Struct(h));
        let m = f.b.member(ipv4, "isValid", Type::Boolean);
        let call = f.b.method_call(m, vec![], vec![], Type::Boolean);
        assert_eq!(
            f.convert(call),
            json!({
                "type": "expression",
                "value": {
                    "type": "expression",
                    "value": {
                        "op": "valid",
                        "left": null,
                        "right": { "type": "header", "value": "ipv4" },
                    },
                },
            })
        );
    }

    #[test]
    fn b2d_bridging_wraps() {
        let mut f = Fixture::new();
        let t = f.b.bool_lit(true);
        let v = f.convert_full(t, true, true, true);
        assert_eq!(
            v,
            json!({
                "type": "expression",
                "value": {
                    "type": "expression",
                    "value": {
                        "op": "b2d",
                        "left": null,
                        "right": { "type": "bool", "value": true },
                    },
                },
            })
        );
    }

    #[test]
    fn signed_arithmetic_gets_two_comp_mod() {
        let mut f = Fixture::new();
        let ty = Type::signed_bits(8);
        let x = f.b.variable("x", ty.clone());
        let y = f.b.variable("y", ty.clone());
        let px = f.b.path(x, ty.clone());
        let py = f.b.path(y, ty.clone());
        let add = f.b.binary(BinOp::Add, px, py, ty);

        let v = f.convert(add);
        let inner = &v["value"]["value"];
        assert_eq!(inner["op"], "two_comp_mod");
        assert_eq!(inner["right"], json!({ "type": "hexstr", "value": "0x8" }));
        assert_eq!(inner["left"]["value"]["op"], "+");
    }

    #[test]
    fn complex_expression_rejected_in_simple_mode() {
        let mut f = Fixture::new();
        let x = f.b.variable("x", Type::bits(8));
        let px = f.b.path(x, Type::bits(8));
        let c = f.b.constant(Type::bits(8), 1);
        let sum = f.b.binary(BinOp::BOr, px, c, Type::bits(8));

        let mut diags = Diagnostics::new();
        let mut conv = ExpressionConverter::new(
            &mut f.b.program.exprs,
            &mut f.b.types,
            &f.b.program.decls,
            &f.b.program.types,
            &f.b.refs,
            &f.model,
            &f.env,
            &mut diags,
        );
        conv.simple_expressions_only = true;
        let _ = conv.convert(sum);
        assert_eq!(diags.error_count(), 1);
    }
}
