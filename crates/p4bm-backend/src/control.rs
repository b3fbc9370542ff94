//! Control (pipeline) conversion.
//!
//! Builds the control's CFG, emits table and conditional nodes, and then
//! declares the control's local externs into the global arrays: counters,
//! meters, registers, action profiles and selectors, and anything unknown
//! as a generic extern instance.
//!
//! Tables sharing an action selector must agree on the selector's input:
//! the selection key belongs to the selector object here, while the source
//! language attaches it to each table's match key.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use p4bm_ir::{ControlDecl, Decl, DeclId, Expr, ExprArena, ExprId};

use crate::cfg::{build_cfg, Cfg, CfgEdge, CfgNode};
use crate::diag::{Diagnostic, Warning};
use crate::json::{ext_name, inner_value};
use crate::program::ProgramConverter;

impl ProgramConverter<'_> {
    /// Converts one pipeline control block.
    pub(crate) fn convert_control(&mut self, control: &ControlDecl, json_name: &str) -> Value {
        tracing::debug!(control = %control.name, "processing control");
        let mut result = Map::new();
        result.insert("name".into(), json!(json_name));
        result.insert("id".into(), json!(self.ids.next("control")));

        let cfg = {
            let p = &*self.program;
            build_cfg(
                control,
                &p.exprs,
                &p.stmts,
                &p.decls,
                self.refs,
                self.model,
                &mut self.diags,
            )
        };
        result.insert(
            "init_table".into(),
            match cfg.init_table() {
                Some(name) => json!(name),
                None => Value::Null,
            },
        );

        let selector_inputs = self.check_shared_selectors(control);

        self.action_profiles = Vec::new();
        let mut tables = Vec::new();
        let mut conditionals = Vec::new();
        for node in cfg.nodes().collect::<Vec<_>>() {
            match cfg.graph[node].clone() {
                CfgNode::Table { .. } => {
                    tables.push(self.convert_table(node, &cfg));
                }
                CfgNode::If { cond, name } => {
                    conditionals.push(self.convert_if(cond, &name, node, &cfg));
                }
                CfgNode::Exit => {}
            }
        }

        self.emit_control_locals(control, &selector_inputs);

        result.insert("tables".into(), tables.into());
        result.insert(
            "action_profiles".into(),
            std::mem::take(&mut self.action_profiles).into(),
        );
        result.insert("conditionals".into(), conditionals.into());
        Value::Object(result)
    }

    /// A conditional node: the converted condition (no outer wrap) plus its
    /// true/false successors.
    fn convert_if(
        &mut self,
        cond: ExprId,
        name: &str,
        node: petgraph::graph::NodeIndex,
        cfg: &Cfg,
    ) -> Value {
        let mut result = Map::new();
        result.insert("name".into(), json!(name));
        result.insert("id".into(), json!(self.ids.next("conditionals")));
        let expression = self.conv().convert_full(cond, true, false, false);
        result.insert("expression".into(), expression);
        for (edge, target) in cfg.successors(node) {
            if let CfgEdge::Bool(b) = edge {
                let label = format!("{b}_next");
                let value = match target {
                    Some(n) => json!(n),
                    None => Value::Null,
                };
                result.insert(label, value);
            }
        }
        Value::Object(result)
    }

    /// Every table using a declared action selector must present the same
    /// selector input sequence. Returns the per-selector inputs for the
    /// profile emission below.
    fn check_shared_selectors(&mut self, control: &ControlDecl) -> IndexMap<DeclId, Vec<ExprId>> {
        let mut inputs: IndexMap<DeclId, Vec<ExprId>> = IndexMap::new();
        for &local in &control.locals {
            let Decl::Table(table) = self.program.decls.get(local) else {
                continue;
            };
            let Some(impl_expr) = table.implementation else {
                continue;
            };
            if !matches!(self.program.exprs.get(impl_expr), Expr::Path(_)) {
                continue;
            }
            let Some(decl) = self.refs.get_declaration(impl_expr) else {
                continue;
            };
            let Decl::Instance(inst) = self.program.decls.get(decl) else {
                continue;
            };
            if inst.extern_type != self.model.action_selector {
                continue;
            }
            let input: Vec<ExprId> = table
                .key
                .iter()
                .filter(|ke| ke.match_kind == self.model.selector_match)
                .map(|ke| ke.expr)
                .collect();
            match inputs.get(&decl) {
                None => {
                    inputs.insert(decl, input);
                }
                Some(existing) => {
                    let same = existing.len() == input.len()
                        && existing
                            .iter()
                            .zip(&input)
                            .all(|(&a, &b)| structural_eq(&self.program.exprs, a, b));
                    if !same {
                        self.diags.error(Diagnostic::InconsistentSelectorInput {
                            selector: ext_name(inst.name.as_str()).to_string(),
                        });
                    }
                }
            }
        }
        inputs
    }

    /// Emits the control's local extern instances into the global arrays.
    fn emit_control_locals(
        &mut self,
        control: &ControlDecl,
        selector_inputs: &IndexMap<DeclId, Vec<ExprId>>,
    ) {
        for &local in &control.locals {
            let Decl::Instance(inst) = self.program.decls.get(local).clone() else {
                continue;
            };
            let name = ext_name(&inst.name).to_string();
            let model = self.model;

            if inst.extern_type == model.counter {
                let size = self.instance_size(&inst.args, 0, &name);
                let id = self.ids.next("counter_arrays");
                self.counters.push(json!({
                    "name": name,
                    "id": id,
                    "size": size,
                    "is_direct": false,
                }));
            } else if inst.extern_type == model.meter {
                let size = self.instance_size(&inst.args, 0, &name);
                let kind = self.meter_kind_of(&inst.args, 1, &name);
                let id = self.ids.next("meter_arrays");
                self.meters.push(json!({
                    "name": name,
                    "id": id,
                    "is_direct": false,
                    "size": size,
                    "rate_count": 2,
                    "type": kind,
                }));
            } else if inst.extern_type == model.register {
                let size = self.instance_size(&inst.args, 0, &name);
                let width = inst
                    .type_args
                    .first()
                    .map(|t| t.width_bits(&self.program.types))
                    .unwrap_or(0);
                if width == 0 {
                    self.diags.error(Diagnostic::UnknownRegisterWidth {
                        register: name.clone(),
                    });
                }
                let id = self.ids.next("register_arrays");
                self.registers.push(json!({
                    "name": name,
                    "id": id,
                    "size": size,
                    "bitwidth": width,
                }));
            } else if inst.extern_type == model.direct_counter {
                match self.direct_counters.get(&name) {
                    None => self.diags.warn(Warning::UnusedDirectCounter {
                        counter: name.clone(),
                    }),
                    Some(table) => {
                        let table = table.clone();
                        tracing::debug!(counter = %name, "created direct counter");
                        let id = self.ids.next("counter_arrays");
                        self.counters.push(json!({
                            "name": name,
                            "id": id,
                            "is_direct": true,
                            "binding": table,
                        }));
                    }
                }
            } else if inst.extern_type == model.direct_meter {
                let info = self.meter_map.get(&local);
                let bound = info.and_then(|i| {
                    Some((i.table.clone()?, i.destination?, i.table_size))
                });
                let Some((table, destination, table_size)) = bound else {
                    self.diags.warn(Warning::UnusedDirectMeter {
                        meter: name.clone(),
                    });
                    continue;
                };
                let kind = self.meter_kind_of(&inst.args, 0, &name);
                let id = self.ids.next("meter_arrays");
                let target = inner_value(&self.conv().convert(destination));
                self.meters.push(json!({
                    "name": name,
                    "id": id,
                    "is_direct": true,
                    "rate_count": 2,
                    "type": kind,
                    "size": table_size,
                    "binding": table,
                    "result_target": target,
                }));
            } else if inst.extern_type == model.action_profile
                || inst.extern_type == model.action_selector
            {
                let mut profile = Map::new();
                profile.insert("name".into(), json!(name));
                profile.insert("id".into(), json!(self.ids.next("action_profiles")));
                if inst.extern_type == model.action_profile {
                    let size = self.instance_size(&inst.args, 0, &name);
                    profile.insert("max_size".into(), json!(size));
                } else {
                    let size = self.instance_size(&inst.args, 1, &name);
                    profile.insert("max_size".into(), json!(size));
                    let algo = match inst.args.first() {
                        Some(&a) => self.resolve_algorithm(a),
                        None => String::new(),
                    };
                    let input: Vec<Value> = selector_inputs
                        .get(&local)
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .map(|e| self.conv().convert(e))
                        .collect();
                    profile.insert(
                        "selector".into(),
                        json!({ "algo": algo, "input": input }),
                    );
                }
                self.action_profiles.push(Value::Object(profile));
            } else {
                self.diags.warn(Warning::UnknownExternInstance {
                    name: name.clone(),
                    extern_type: inst.extern_type.clone(),
                });
                let mut attribute_values = Vec::new();
                for &arg in &inst.args {
                    match self.program.exprs.get(arg) {
                        Expr::Constant { value, .. } => attribute_values.push(json!({
                            "type": "hexstr",
                            "value": crate::json::string_repr(value, 0),
                        })),
                        Expr::Bool(b) => attribute_values.push(json!({
                            "type": "hexstr",
                            "value": i32::from(*b),
                        })),
                        _ => self.diags.error(Diagnostic::NotConstant {
                            what: format!("a constructor argument of '{name}'"),
                        }),
                    }
                }
                let id = self.ids.next("extern_instances");
                self.extern_instances.push(json!({
                    "name": name,
                    "id": id,
                    "type": inst.extern_type,
                    "attribute_values": attribute_values,
                }));
            }
        }
    }

    /// A constructor argument that must be a constant size.
    fn instance_size(&mut self, args: &[ExprId], index: usize, name: &str) -> u64 {
        match args.get(index).and_then(|&a| self.const_u64(a)) {
            Some(v) => v,
            None => {
                self.diags.error(Diagnostic::NotConstant {
                    what: format!("the size of '{name}'"),
                });
                0
            }
        }
    }

    /// A constructor argument that must be a meter-kind member.
    fn meter_kind_of(&mut self, args: &[ExprId], index: usize, name: &str) -> String {
        let member = args
            .get(index)
            .and_then(|&a| self.as_enum_member(a))
            .map(|(_, member)| member);
        match member.as_deref().and_then(|m| self.model.meter_kind(m)) {
            Some(kind) => kind.to_string(),
            None => {
                self.diags.error(Diagnostic::UnexpectedMeterKind {
                    meter: name.to_string(),
                });
                "?".to_string()
            }
        }
    }
}

/// Restricted structural equality over key expressions: alpha-equivalence
/// for paths, members, literals, and array indexes; everything else
/// compares unequal.
pub(crate) fn structural_eq(exprs: &ExprArena, a: ExprId, b: ExprId) -> bool {
    match (exprs.get(a), exprs.get(b)) {
        (Expr::Path(na), Expr::Path(nb)) => na == nb,
        (
            Expr::Member {
                base: ba,
                member: ma,
            },
            Expr::Member {
                base: bb,
                member: mb,
            },
        ) => ma == mb && structural_eq(exprs, *ba, *bb),
        (
            Expr::Constant {
                value: va, ty: ta, ..
            },
            Expr::Constant {
                value: vb, ty: tb, ..
            },
        ) => va == vb && ta == tb,
        (Expr::Bool(a), Expr::Bool(b)) => a == b,
        (
            Expr::ArrayIndex {
                base: ba,
                index: ia,
            },
            Expr::ArrayIndex {
                base: bb,
                index: ib,
            },
        ) => structural_eq(exprs, *ba, *bb) && structural_eq(exprs, *ia, *ib),
        _ => false,
    }
}
