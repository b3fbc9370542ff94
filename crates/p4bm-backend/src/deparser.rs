//! Deparser conversion: the ordered emit sequence.
//!
//! Walks the deparser body and appends one entry per emitted header; a
//! header stack contributes each of its elements in index order. Anything
//! other than emits (and trivial control flow) is a user error.

use serde_json::{json, Value};

use p4bm_ir::{ControlDecl, Expr, ExprId, Stmt, StmtId, Type};

use crate::diag::Diagnostic;
use crate::json::inner_value;
use crate::method::{resolve_method, MethodKind};
use crate::program::ProgramConverter;

impl ProgramConverter<'_> {
    pub(crate) fn convert_deparser(&mut self, ctrl: &ControlDecl) -> Value {
        let mut order = Vec::new();
        self.convert_deparser_body(&ctrl.body, &mut order);
        json!({
            "name": self.model.deparser_json_name,
            "id": self.ids.next("deparser"),
            "order": order,
        })
    }

    fn convert_deparser_body(&mut self, body: &[StmtId], order: &mut Vec<Value>) {
        for &s in body {
            match self.program.stmts.get(s).clone() {
                Stmt::Block(inner) => self.convert_deparser_body(&inner, order),
                Stmt::Return | Stmt::Exit => break,
                Stmt::Empty | Stmt::Variable(_) => {}
                Stmt::MethodCall(call) => self.convert_emit(call, order),
                _ => self.diags.error(Diagnostic::NotSupported {
                    what: "this statement in a deparser".into(),
                }),
            }
        }
    }

    fn convert_emit(&mut self, call: ExprId, order: &mut Vec<Value>) {
        let kind = resolve_method(&self.program.exprs, &self.program.decls, &self.refs, call);
        let is_emit = matches!(
            &kind,
            Some(MethodKind::ExternMethod {
                extern_type,
                method,
                ..
            }) if extern_type == self.model.packet_out && method == self.model.emit
        );
        if !is_emit {
            self.diags.error(Diagnostic::NotSupported {
                what: "a non-emit call in a deparser".into(),
            });
            return;
        }
        let Expr::MethodCall { args, .. } = self.program.exprs.get(call).clone() else {
            panic!("method-call statement without a call expression");
        };
        assert!(args.len() == 1, "expected exactly 1 argument for emit");
        let arg = args[0];

        match self.types.get(arg).clone() {
            Type::Stack { size, .. } => {
                for i in 0..size {
                    let converted = self.convert_emit_arg(arg);
                    let name = converted
                        .as_str()
                        .unwrap_or_else(|| panic!("expected a stack name, got {converted}"));
                    order.push(json!(format!("{name}[{i}]")));
                }
            }
            Type::Struct(sid)
                if self.program.types.get(sid).kind == p4bm_ir::StructKind::Header =>
            {
                let converted = self.convert_emit_arg(arg);
                order.push(converted);
            }
            _ => self.diags.error(Diagnostic::EmitUnsupported),
        }
    }

    fn convert_emit_arg(&mut self, arg: ExprId) -> Value {
        let mut conv = self.conv();
        conv.simple_expressions_only = true;
        conv.context = "a deparser emit";
        let converted = conv.convert(arg);
        inner_value(&converted)
    }
}
