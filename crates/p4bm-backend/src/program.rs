//! Top-level program conversion.
//!
//! Owns the per-conversion state (id counters, dedup caches, the scalars
//! header under construction, direct counter/meter bindings) and drives the
//! parser, control, and deparser converters in the fixed emission order the
//! runtime's cross-references rely on: header types and instances first,
//! then errors and enums, parser and deparser, actions, pipelines, the
//! standard-metadata instance, checksums, and finally the force-arith hints.

use std::collections::HashMap;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde_json::{json, Map, Value};

use p4bm_ir::{
    Decl, DeclId, Expr, ExprId, Program, RefMap, Stmt, StmtId, StructId, StructKind, SwitchModel,
    Type, TypeMap, BOOL_WIDTH, ERROR_WIDTH,
};

use crate::diag::{ConvertError, Diagnostic, Diagnostics, Warning};
use crate::expression::{ConvEnv, ExpressionConverter};
use crate::json::{ext_name, inner_value, mk_primitive, round_up_bytes, string_repr};
use crate::method::{resolve_method, MethodKind};
use crate::BackendOptions;

/// Target JSON format version.
const JSON_VERSION: [u32; 2] = [2, 7];

/// Per-group monotonically increasing identifiers, scoped to one conversion.
#[derive(Debug, Default)]
pub(crate) struct IdGen {
    counters: HashMap<&'static str, u32>,
}

impl IdGen {
    pub(crate) fn next(&mut self, group: &'static str) -> u32 {
        let counter = self.counters.entry(group).or_default();
        let id = *counter;
        *counter += 1;
        id
    }
}

/// Program-wide facts gathered before emission.
#[derive(Debug, Default)]
pub(crate) struct Structure {
    /// Actions of the ingress and egress controls, in declaration order.
    pub actions: Vec<DeclId>,
    /// Local variables of the parser and every control, in block order.
    pub variables: Vec<DeclId>,
}

/// Binding state of one direct meter.
#[derive(Debug, Default)]
pub(crate) struct DirectMeterInfo {
    pub table: Option<String>,
    pub table_size: u64,
    pub destination: Option<ExprId>,
}

pub struct ProgramConverter<'a> {
    pub(crate) program: &'a mut Program,
    pub(crate) refs: &'a mut RefMap,
    pub(crate) types: &'a mut TypeMap,
    pub(crate) model: &'a SwitchModel,
    pub(crate) options: &'a BackendOptions,
    pub(crate) diags: Diagnostics,
    pub(crate) ids: IdGen,
    pub(crate) env: ConvEnv,
    pub(crate) structure: Structure,

    // Output under construction.
    pub(crate) header_types_created: IndexMap<String, String>,
    pub(crate) header_types: Vec<Value>,
    pub(crate) header_instances: Vec<Value>,
    pub(crate) header_stacks: Vec<Value>,
    pub(crate) scalars_fields: Vec<Value>,
    pub(crate) scalars_width: u32,
    pub(crate) field_lists: Vec<Value>,
    pub(crate) learn_lists: Vec<Value>,
    pub(crate) calculations: Vec<Value>,
    pub(crate) counters: Vec<Value>,
    pub(crate) meters: Vec<Value>,
    pub(crate) registers: Vec<Value>,
    pub(crate) extern_instances: Vec<Value>,
    pub(crate) checksums: Vec<Value>,
    /// Action profiles of the pipeline currently being converted.
    pub(crate) action_profiles: Vec<Value>,

    // Cross-reference state.
    pub(crate) action_ids: HashMap<DeclId, u32>,
    pub(crate) direct_counters: IndexMap<String, String>,
    pub(crate) meter_map: IndexMap<DeclId, DirectMeterInfo>,
}

impl<'a> ProgramConverter<'a> {
    pub fn new(
        program: &'a mut Program,
        refs: &'a mut RefMap,
        types: &'a mut TypeMap,
        model: &'a SwitchModel,
        options: &'a BackendOptions,
        diags: Diagnostics,
    ) -> Self {
        ProgramConverter {
            program,
            refs,
            types,
            model,
            options,
            diags,
            ids: IdGen::default(),
            env: ConvEnv::default(),
            structure: Structure::default(),
            header_types_created: IndexMap::new(),
            header_types: Vec::new(),
            header_instances: Vec::new(),
            header_stacks: Vec::new(),
            scalars_fields: Vec::new(),
            scalars_width: 0,
            field_lists: Vec::new(),
            learn_lists: Vec::new(),
            calculations: Vec::new(),
            counters: Vec::new(),
            meters: Vec::new(),
            registers: Vec::new(),
            extern_instances: Vec::new(),
            checksums: Vec::new(),
            action_profiles: Vec::new(),
            action_ids: HashMap::new(),
            direct_counters: IndexMap::new(),
            meter_map: IndexMap::new(),
        }
    }

    /// Borrows the expression converter over the current state.
    pub(crate) fn conv(&mut self) -> ExpressionConverter<'_> {
        let p = &mut *self.program;
        ExpressionConverter::new(
            &mut p.exprs,
            self.types,
            &p.decls,
            &p.types,
            self.refs,
            self.model,
            &self.env,
            &mut self.diags,
        )
    }

    fn checkpoint(&mut self) -> Result<(), ConvertError> {
        if self.diags.error_count() > 0 {
            let diags = std::mem::take(&mut self.diags);
            let (errors, warnings) = diags.into_parts();
            Err(ConvertError::Failed { errors, warnings })
        } else {
            Ok(())
        }
    }

    /// Runs the whole conversion and assembles the output document.
    pub fn convert(mut self) -> Result<Value, ConvertError> {
        self.analyze();
        self.checkpoint()?;

        // Field-list and learn-list ids must start at 1; 0 is reserved.
        self.ids.next("field_lists");
        self.ids.next("learn_lists");

        self.env.scalars_name = self.refs.new_name("scalars");
        let scalars_type_id = self.ids.next("header_types");

        let headers_struct =
            self.block_param_struct(&self.program.package.parser.params, self.model.parser_headers_param);
        let meta_struct =
            self.block_param_struct(&self.program.package.parser.params, self.model.parser_meta_param);
        let (Some(headers_struct), Some(meta_struct)) = (headers_struct, meta_struct) else {
            self.diags.error(Diagnostic::NotSupported {
                what: "a parser without headers and metadata struct parameters".into(),
            });
            self.checkpoint()?;
            unreachable!("checkpoint fails with a pending diagnostic");
        };

        self.add_types_and_instances(headers_struct, false);
        self.add_header_stacks(headers_struct);
        self.checkpoint()?;

        self.add_locals();
        let scalars_position = self.header_types.len();
        self.add_types_and_instances(meta_struct, true);
        self.pad_scalars();

        let scalars_type = json!({
            "name": self.env.scalars_name,
            "id": scalars_type_id,
            "fields": self.scalars_fields.clone(),
        });
        self.header_types.insert(scalars_position, scalars_type);

        self.collect_error_codes();
        let errors: Vec<Value> = self
            .env
            .error_codes
            .iter()
            .map(|(name, value)| json!([name, value]))
            .collect();
        let enums: Vec<Value> = self
            .program
            .enums
            .iter()
            .map(|(name, members)| {
                let entries: Vec<Value> =
                    members.iter().map(|(m, v)| json!([m, v])).collect();
                json!({ "name": name, "entries": entries })
            })
            .collect();

        let parser = self.program.package.parser.clone();
        let parser_json = self.convert_parser(&parser);
        self.checkpoint()?;

        let deparser = self.program.package.deparser.clone();
        let deparser_json = self.convert_deparser(&deparser);
        self.checkpoint()?;

        let actions = self.create_actions();
        self.checkpoint()?;

        let mut pipelines = Vec::new();
        let ingress = self.program.package.ingress.clone();
        let ingress_json = self.convert_control(&ingress, self.model.ingress_json_name);
        self.checkpoint()?;
        pipelines.push(ingress_json);

        let egress = self.program.package.egress.clone();
        let egress_json = self.convert_control(&egress, self.model.egress_json_name);
        self.checkpoint()?;
        pipelines.push(egress_json);

        // Standard metadata gets its own header type and instance.
        let std_meta_struct =
            self.block_param_struct(&ingress.params, self.model.control_std_meta_param);
        if let Some(sid) = std_meta_struct {
            let type_name = self.create_json_type(sid);
            let id = self.ids.next("headers");
            self.header_instances.push(json!({
                "name": self.model.std_meta_json_name,
                "id": id,
                "header_type": type_name,
                "metadata": true,
            }));
        }

        let compute = self.program.package.compute.clone();
        for &s in &compute.body {
            self.generate_update(s);
        }
        self.checkpoint()?;

        let mut force_arith = Vec::new();
        if let Some(sid) = std_meta_struct {
            self.create_force_arith(sid, self.model.std_meta_json_name, &mut force_arith);
        }
        for &meta_field in self.model.force_arith_fields {
            let def = self.program.types.get(meta_struct).clone();
            if let Some(field) = def.field(meta_field) {
                if let Type::Struct(fsid) = field.ty {
                    self.create_force_arith(fsid, meta_field, &mut force_arith);
                }
            }
        }

        self.checkpoint()?;

        let mut toplevel = Map::new();
        toplevel.insert(
            "program".into(),
            Value::String(self.options.source.clone().unwrap_or_default()),
        );
        toplevel.insert(
            "__meta__".into(),
            json!({
                "version": JSON_VERSION,
                "compiler": concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")),
            }),
        );
        toplevel.insert("header_types".into(), self.header_types.into());
        toplevel.insert("headers".into(), self.header_instances.into());
        toplevel.insert("header_stacks".into(), self.header_stacks.into());
        toplevel.insert("field_lists".into(), self.field_lists.into());
        toplevel.insert("learn_lists".into(), self.learn_lists.into());
        toplevel.insert("errors".into(), errors.into());
        toplevel.insert("enums".into(), enums.into());
        toplevel.insert("parsers".into(), vec![parser_json].into());
        toplevel.insert("deparsers".into(), vec![deparser_json].into());
        toplevel.insert("meter_arrays".into(), self.meters.into());
        toplevel.insert("counter_arrays".into(), self.counters.into());
        toplevel.insert("register_arrays".into(), self.registers.into());
        toplevel.insert("calculations".into(), self.calculations.into());
        toplevel.insert("checksums".into(), self.checksums.into());
        toplevel.insert("extern_instances".into(), self.extern_instances.into());
        toplevel.insert("actions".into(), actions.into());
        toplevel.insert("pipelines".into(), pipelines.into());
        toplevel.insert("force_arith".into(), force_arith.into());

        if self.diags.error_count() > 0 {
            let (errors, warnings) = self.diags.into_parts();
            return Err(ConvertError::Failed { errors, warnings });
        }
        Ok(Value::Object(toplevel))
    }

    // -----------------------------------------------------------------
    // Structure analysis
    // -----------------------------------------------------------------

    /// Collects block parameters, action parameter indices, and the local
    /// variables the scalars header will pack.
    fn analyze(&mut self) {
        let package = &self.program.package;

        for &p in package
            .parser
            .params
            .iter()
            .chain(&package.verify.params)
            .chain(&package.ingress.params)
            .chain(&package.egress.params)
            .chain(&package.compute.params)
            .chain(&package.deparser.params)
        {
            self.env.non_action_params.insert(p);
        }
        if let Some(&p) = package.parser.params.get(self.model.parser_std_meta_param) {
            self.env.std_meta_params.insert(p);
        }
        for control in [&package.ingress, &package.egress] {
            if let Some(&p) = control.params.get(self.model.control_std_meta_param) {
                self.env.std_meta_params.insert(p);
            }
        }

        let block_locals = [
            &package.parser.locals,
            &package.verify.locals,
            &package.ingress.locals,
            &package.egress.locals,
            &package.compute.locals,
            &package.deparser.locals,
        ]
        .map(Clone::clone);

        for locals in &block_locals {
            for &decl in locals {
                if matches!(self.program.decls.get(decl), Decl::Variable(_)) {
                    self.structure.variables.push(decl);
                }
            }
        }

        for control in [&package.ingress, &package.egress] {
            for &decl in &control.locals {
                if let Decl::Action(action) = self.program.decls.get(decl) {
                    self.structure.actions.push(decl);
                    for (index, &param) in action.params.iter().enumerate() {
                        self.env.param_index.insert(param, index as u32);
                    }
                }
            }
        }
    }

    /// The struct behind the block parameter at `index`, if any.
    fn block_param_struct(&self, params: &[DeclId], index: usize) -> Option<StructId> {
        let &decl = params.get(index)?;
        match self.program.decls.get(decl) {
            Decl::Param(p) => match p.ty {
                Type::Struct(sid) => Some(sid),
                _ => None,
            },
            _ => None,
        }
    }

    // -----------------------------------------------------------------
    // Header types, instances, stacks, scalars
    // -----------------------------------------------------------------

    /// Synthesizes (once) the JSON header type for a struct-like definition
    /// and returns its emitted name.
    pub(crate) fn create_json_type(&mut self, sid: StructId) -> String {
        let def = self.program.types.get(sid).clone();
        if let Some(name) = self.header_types_created.get(&def.name) {
            return name.clone();
        }
        let name = ext_name(&def.name).to_string();
        self.header_types_created
            .insert(def.name.clone(), name.clone());
        let id = self.ids.next("header_types");

        let mut fields: Vec<Value> = Vec::new();
        for f in &def.fields {
            match &f.ty {
                Type::Bits { width, signed } => fields.push(json!([f.name, width, signed])),
                Type::Boolean => fields.push(json!([f.name, BOOL_WIDTH, 0])),
                Type::Varbits { width } => fields.push(json!([f.name, width])),
                Type::Struct(_) => panic!("nested structure in header type '{}'", def.name),
                Type::Stack { .. } => panic!("nested stack in header type '{}'", def.name),
                other => panic!("unexpected field type {other:?} in '{}'", def.name),
            }
        }
        let width = def.width_bits(&self.program.types);
        let padding = width % 8;
        if padding != 0 {
            let pad_name = self.refs.new_name("_padding");
            fields.push(json!([pad_name, 8 - padding, false]));
        }

        self.header_types.push(json!({
            "name": name,
            "id": id,
            "fields": fields,
        }));
        name
    }

    /// Emits header types and instances for the fields of a block-parameter
    /// struct. Scalar fields are packed into the scalars header instead.
    fn add_types_and_instances(&mut self, sid: StructId, meta: bool) {
        let def = self.program.types.get(sid).clone();

        for f in &def.fields {
            if let Type::Struct(fsid) = f.ty {
                let kind = self.program.types.get(fsid).kind;
                if !meta && kind != StructKind::Header {
                    self.diags.error(Diagnostic::NonHeaderInHeadersStruct);
                    return;
                }
                self.create_json_type(fsid);
            }
        }

        for f in &def.fields {
            match &f.ty {
                Type::Struct(fsid) => {
                    let type_name = self.create_json_type(*fsid);
                    let id = self.ids.next("headers");
                    self.header_instances.push(json!({
                        "name": ext_name(&f.name),
                        "id": id,
                        "header_type": type_name,
                        "metadata": meta,
                    }));
                }
                Type::Stack { .. } => {} // handled by add_header_stacks
                Type::Bits { width, signed } => {
                    let name = self.refs.new_name(&format!("{}.{}", def.name, f.name));
                    self.scalars_fields.push(json!([name, width, signed]));
                    self.scalars_width += width;
                    self.env
                        .scalar_metadata_fields
                        .insert((sid, f.name.clone()), name);
                }
                Type::Boolean => {
                    let name = self.refs.new_name(&format!("{}.{}", def.name, f.name));
                    self.scalars_fields.push(json!([name, BOOL_WIDTH, 0]));
                    self.scalars_width += BOOL_WIDTH;
                    self.env
                        .scalar_metadata_fields
                        .insert((sid, f.name.clone()), name);
                }
                other => panic!("unhandled type {other:?} for field '{}'", f.name),
            }
        }
    }

    /// Emits the header stacks declared in the headers struct, including the
    /// per-element header instances.
    fn add_header_stacks(&mut self, sid: StructId) {
        let def = self.program.types.get(sid).clone();
        for f in &def.fields {
            let Type::Stack { element, size } = f.ty else {
                continue;
            };
            tracing::debug!(stack = %f.name, size, "creating header stack");
            assert!(
                self.program.types.get(element).kind == StructKind::Header,
                "stack of a non-header type"
            );
            let header_type = self.create_json_type(element);
            let stack_id = self.ids.next("stack");
            let mut header_ids = Vec::new();
            for i in 0..size {
                let id = self.ids.next("headers");
                header_ids.push(id);
                self.header_instances.push(json!({
                    "name": format!("{}[{}]", ext_name(&f.name), i),
                    "id": id,
                    "header_type": header_type,
                    "metadata": false,
                }));
            }
            self.header_stacks.push(json!({
                "name": ext_name(&f.name),
                "id": stack_id,
                "size": size,
                "header_type": header_type,
                "header_ids": header_ids,
            }));
        }
    }

    /// Packs scalar-typed locals into the scalars header; struct- and
    /// stack-typed locals get synthesized instances of their own.
    fn add_locals(&mut self) {
        for decl in self.structure.variables.clone() {
            let Decl::Variable(var) = self.program.decls.get(decl).clone() else {
                continue;
            };
            tracing::debug!(local = %var.name, "creating local");
            match &var.ty {
                Type::Struct(sid) => {
                    let type_name = self.create_json_type(*sid);
                    let id = self.ids.next("headers");
                    self.header_instances.push(json!({
                        "name": var.name,
                        "id": id,
                        "header_type": type_name,
                        "metadata": true,
                        "pi_omit": true,
                    }));
                }
                Type::Stack { element, size } => {
                    let header_type = self.create_json_type(*element);
                    let stack_id = self.ids.next("stack");
                    let mut header_ids = Vec::new();
                    for i in 0..*size {
                        let id = self.ids.next("headers");
                        header_ids.push(id);
                        self.header_instances.push(json!({
                            "name": format!("{}[{}]", var.name, i),
                            "id": id,
                            "header_type": header_type,
                            "metadata": false,
                            "pi_omit": true,
                        }));
                    }
                    self.header_stacks.push(json!({
                        "name": var.name,
                        "id": stack_id,
                        "size": size,
                        "header_type": header_type,
                        "header_ids": header_ids,
                    }));
                }
                Type::Bits { width, signed } => {
                    self.scalars_fields.push(json!([var.name, width, signed]));
                    self.scalars_width += width;
                }
                Type::Boolean => {
                    self.scalars_fields.push(json!([var.name, BOOL_WIDTH, 0]));
                    self.scalars_width += BOOL_WIDTH;
                }
                Type::Error => {
                    self.scalars_fields.push(json!([var.name, ERROR_WIDTH, 0]));
                    self.scalars_width += ERROR_WIDTH;
                }
                other => panic!("local type not handled: {other:?}"),
            }
        }

        // The scalars instance itself.
        let scalars_name = self.env.scalars_name.clone();
        self.header_types_created
            .insert(scalars_name.clone(), scalars_name.clone());
        let id = self.ids.next("headers");
        self.header_instances.push(json!({
            "name": scalars_name,
            "id": id,
            "header_type": scalars_name,
            "metadata": true,
            "pi_omit": true,
        }));
    }

    /// Appends zero padding so the scalars header is byte-aligned.
    fn pad_scalars(&mut self) {
        let padding = self.scalars_width % 8;
        if padding != 0 {
            let name = self.refs.new_name("_padding");
            self.scalars_fields.push(json!([name, 8 - padding, false]));
            self.scalars_width += 8 - padding;
        }
    }

    fn collect_error_codes(&mut self) {
        for (index, name) in self.program.errors.iter().enumerate() {
            self.env.error_codes.insert(name.clone(), index as u32);
        }
    }

    fn create_force_arith(&self, sid: StructId, instance: &str, out: &mut Vec<Value>) {
        let def = self.program.types.get(sid);
        for f in &def.fields {
            out.push(json!([instance, f.name]));
        }
    }

    // -----------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------

    /// Emits every action: runtime-data parameters plus the flattened
    /// primitive list.
    fn create_actions(&mut self) -> Vec<Value> {
        let mut result = Vec::new();
        for action_decl in self.structure.actions.clone() {
            let Decl::Action(action) = self.program.decls.get(action_decl).clone() else {
                continue;
            };
            let name = ext_name(&action.name).to_string();
            let id = self.ids.next("actions");
            self.action_ids.insert(action_decl, id);

            let mut runtime_data = Vec::new();
            for &p in &action.params {
                let Decl::Param(param) = self.program.decls.get(p).clone() else {
                    continue;
                };
                if !self.refs.is_used(p) {
                    self.diags.warn(Warning::UnusedActionParameter {
                        action: name.clone(),
                        param: param.name.clone(),
                    });
                }
                let bitwidth = match param.ty {
                    Type::Bits { width, .. } => width,
                    _ => {
                        self.diags.error(Diagnostic::ActionParamType {
                            action: name.clone(),
                            param: param.name.clone(),
                        });
                        0
                    }
                };
                runtime_data.push(json!({ "name": param.name, "bitwidth": bitwidth }));
            }

            let mut primitives = Vec::new();
            self.convert_action_body(&action.body, &mut primitives);
            result.push(json!({
                "name": name,
                "id": id,
                "runtime_data": runtime_data,
                "primitives": primitives,
            }));
        }
        result
    }

    fn convert_action_body(&mut self, body: &[StmtId], result: &mut Vec<Value>) {
        for &s in body {
            match self.program.stmts.get(s).clone() {
                Stmt::Block(inner) => {
                    self.convert_action_body(&inner, result);
                }
                Stmt::Return => break,
                Stmt::Exit => {
                    result.push(mk_primitive("exit", vec![]));
                    break;
                }
                Stmt::Empty | Stmt::Variable(_) => {}
                Stmt::Assign { left, right } => {
                    let ty = self.types.get(left).clone();
                    let op = if ty.is_struct_like() {
                        "copy_header"
                    } else {
                        "modify_field"
                    };
                    let mut conv = self.conv();
                    let l = conv.convert_left_value(left);
                    let r = conv.convert_full(right, true, true, ty == Type::Boolean);
                    result.push(mk_primitive(op, vec![l, r]));
                }
                Stmt::MethodCall(call) => self.convert_action_call(call, result),
                Stmt::If { .. } | Stmt::Switch { .. } => {
                    self.diags.error(Diagnostic::NotSupported {
                        what: "control flow inside an action".into(),
                    });
                }
            }
        }
    }

    fn convert_action_call(&mut self, call: ExprId, result: &mut Vec<Value>) {
        let Expr::MethodCall {
            type_args, args, ..
        } = self.program.exprs.get(call).clone()
        else {
            panic!("method-call statement without a call expression");
        };
        let Some(kind) = resolve_method(&self.program.exprs, &self.program.decls, &self.refs, call)
        else {
            self.diags.error(Diagnostic::NotSupported {
                what: "this call in an action body".into(),
            });
            return;
        };

        match kind {
            MethodKind::Builtin { target, name } => {
                let obj = self.conv().convert(target);
                if name == self.model.set_valid {
                    result.push(mk_primitive("add_header", vec![obj]));
                } else if name == self.model.set_invalid {
                    result.push(mk_primitive("remove_header", vec![obj]));
                } else if name == self.model.push_front {
                    assert!(args.len() == 1, "expected 1 argument for push_front");
                    let count = self.conv().convert(args[0]);
                    result.push(mk_primitive("push", vec![obj, count]));
                } else if name == self.model.pop_front {
                    assert!(args.len() == 1, "expected 1 argument for pop_front");
                    let count = self.conv().convert(args[0]);
                    result.push(mk_primitive("pop", vec![obj, count]));
                } else {
                    panic!("unexpected built-in method '{name}' in an action");
                }
            }

            MethodKind::ExternMethod {
                instance,
                extern_type,
                method,
            } => {
                let instance_name = ext_name(self.program.decls.get(instance).name()).to_string();
                if extern_type == self.model.counter && method == self.model.counter_count {
                    assert!(args.len() == 1, "expected 1 argument for count");
                    let index = self.conv().convert(args[0]);
                    result.push(mk_primitive(
                        "count",
                        vec![
                            json!({ "type": "counter_array", "value": instance_name }),
                            index,
                        ],
                    ));
                } else if extern_type == self.model.meter && method == self.model.meter_execute {
                    assert!(args.len() == 2, "expected 2 arguments for execute_meter");
                    let index = self.conv().convert(args[0]);
                    let dest = self.conv().convert(args[1]);
                    result.push(mk_primitive(
                        "execute_meter",
                        vec![
                            json!({ "type": "meter_array", "value": instance_name }),
                            index,
                            dest,
                        ],
                    ));
                } else if extern_type == self.model.register {
                    let reg = json!({ "type": "register_array", "value": instance_name });
                    if method == self.model.register_read {
                        assert!(args.len() == 2, "expected 2 arguments for read");
                        let dest = self.conv().convert(args[0]);
                        let index = self.conv().convert(args[1]);
                        result.push(mk_primitive("register_read", vec![dest, reg, index]));
                    } else if method == self.model.register_write {
                        assert!(args.len() == 2, "expected 2 arguments for write");
                        let index = self.conv().convert(args[0]);
                        let value = self.conv().convert(args[1]);
                        result.push(mk_primitive("register_write", vec![reg, index, value]));
                    } else {
                        self.unknown_extern_method(&instance_name, &extern_type, &method, &args, result);
                    }
                } else if extern_type == self.model.direct_meter
                    && method == self.model.direct_meter_read
                {
                    assert!(args.len() == 1, "expected 1 argument for read");
                    // No code is generated; the destination binds the meter.
                    self.set_meter_destination(instance, args[0]);
                } else if extern_type == self.model.direct_counter
                    && method == self.model.direct_counter_count
                {
                    // No code is generated for direct counters.
                } else {
                    self.unknown_extern_method(&instance_name, &extern_type, &method, &args, result);
                }
            }

            MethodKind::ExternFunction { name } => {
                self.convert_extern_function(&name, &type_args, &args, result);
            }

            MethodKind::Apply { .. } => {
                self.diags.error(Diagnostic::NotSupported {
                    what: "a table apply inside an action".into(),
                });
            }
        }
    }

    fn unknown_extern_method(
        &mut self,
        instance_name: &str,
        extern_type: &str,
        method: &str,
        args: &[ExprId],
        result: &mut Vec<Value>,
    ) {
        self.diags.warn(Warning::UnknownExternMethod {
            method: method.to_string(),
        });
        let mut params = vec![json!({ "type": "extern", "value": instance_name })];
        for &a in args {
            params.push(self.conv().convert(a));
        }
        result.push(mk_primitive(&format!("_{extern_type}_{method}"), params));
    }

    fn convert_extern_function(
        &mut self,
        name: &str,
        type_args: &[Type],
        args: &[ExprId],
        result: &mut Vec<Value>,
    ) {
        let model = self.model;
        if name == model.clone_fn || name == model.clone3_fn {
            let list_id = if name == model.clone_fn {
                assert!(args.len() == 2, "expected 2 arguments for clone");
                let fl_name = self.refs.new_name("fl");
                self.create_field_list(None, FieldListKind::Field, &fl_name)
            } else {
                assert!(args.len() == 3, "expected 3 arguments for clone3");
                let fl_name = self.refs.new_name("fl");
                self.create_field_list(Some(args[2]), FieldListKind::Field, &fl_name)
            };
            let Some((_, member)) = self.as_enum_member(args[0]) else {
                self.diags.error(Diagnostic::NotConstant {
                    what: "the clone type".into(),
                });
                return;
            };
            let op = if member == model.clone_i2e {
                "clone_ingress_pkt_to_egress"
            } else {
                "clone_egress_pkt_to_egress"
            };
            let session = self.conv().convert(args[1]);
            result.push(mk_primitive(
                op,
                vec![session, field_list_ref(list_id)],
            ));
        } else if name == model.hash_fn {
            assert!(args.len() == 5, "expected 5 arguments for hash");
            let dest = self.conv().convert(args[0]);
            let base = self.conv().convert(args[2]);
            let algo = self.resolve_algorithm(args[1]);
            let calc_name = self.create_calculation(&algo, args[3]);
            let max = self.conv().convert(args[4]);
            result.push(mk_primitive(
                "modify_field_with_hash_based_offset",
                vec![
                    dest,
                    base,
                    json!({ "type": "calculation", "value": calc_name }),
                    max,
                ],
            ));
        } else if name == model.digest_fn {
            assert!(args.len() == 2, "expected 2 arguments for digest");
            let dest = self.conv().convert(args[0]);
            let list_name = self.list_name_from_type_args(type_args, "digest");
            let id = self.create_field_list(Some(args[1]), FieldListKind::Learn, &list_name);
            result.push(mk_primitive("generate_digest", vec![dest, field_list_ref(id)]));
        } else if name == model.resubmit_fn || name == model.recirculate_fn {
            assert!(args.len() == 1, "expected 1 argument");
            let op = if name == model.resubmit_fn {
                "resubmit"
            } else {
                "recirculate"
            };
            let list_name = self.list_name_from_type_args(type_args, op);
            let id = self.create_field_list(Some(args[0]), FieldListKind::Field, &list_name);
            result.push(mk_primitive(op, vec![field_list_ref(id)]));
        } else if name == model.drop_fn {
            assert!(args.is_empty(), "expected no arguments for drop");
            result.push(mk_primitive("drop", vec![]));
        } else if name == model.random_fn {
            assert!(args.len() == 3, "expected 3 arguments for random");
            let dest = self.conv().convert(args[0]);
            let lo = self.conv().convert(args[1]);
            let hi = self.conv().convert(args[2]);
            result.push(mk_primitive(
                "modify_field_rng_uniform",
                vec![dest, lo, hi],
            ));
        } else if name == model.truncate_fn {
            assert!(args.len() == 1, "expected 1 argument for truncate");
            let len = self.conv().convert(args[0]);
            result.push(mk_primitive("truncate", vec![len]));
        } else {
            self.diags.error(Diagnostic::NotSupported {
                what: format!("the extern function '{name}'"),
            });
        }
    }

    /// The struct name of the single type argument, if there is one.
    fn list_name_from_type_args(&self, type_args: &[Type], default: &str) -> String {
        match type_args {
            [Type::Struct(sid)] => ext_name(&self.program.types.get(*sid).name).to_string(),
            _ => default.to_string(),
        }
    }

    /// Resolves `Enum.member` shapes (clone types, algorithms, meter kinds).
    pub(crate) fn as_enum_member(&self, e: ExprId) -> Option<(String, String)> {
        match self.program.exprs.get(e) {
            Expr::Member { base, member } => match self.program.exprs.get(*base) {
                Expr::TypeName(name) => Some((name.clone(), member.clone())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Maps a declared algorithm member to the runtime string, reporting
    /// unknown algorithms.
    pub(crate) fn resolve_algorithm(&mut self, e: ExprId) -> String {
        let member = match self.as_enum_member(e) {
            Some((_, member)) => member,
            None => {
                self.diags.error(Diagnostic::NotConstant {
                    what: "the hash algorithm".into(),
                });
                return String::new();
            }
        };
        match self.model.hash_algorithm(&member) {
            Some(algo) => algo.to_string(),
            None => {
                self.diags.error(Diagnostic::UnexpectedAlgorithm {
                    algorithm: member.clone(),
                });
                member
            }
        }
    }

    // -----------------------------------------------------------------
    // Field lists and calculations
    // -----------------------------------------------------------------

    /// Creates a field (or learn) list from `expr` and returns its id.
    /// `None` creates an empty list.
    pub(crate) fn create_field_list(
        &mut self,
        expr: Option<ExprId>,
        kind: FieldListKind,
        name: &str,
    ) -> u32 {
        let id = self.ids.next(kind.group());
        let mut elements = Vec::new();
        if let Some(e) = expr {
            self.add_to_field_list(e, &mut elements);
        }
        let list = json!({ "id": id, "name": name, "elements": elements });
        match kind {
            FieldListKind::Field => self.field_lists.push(list),
            FieldListKind::Learn => self.learn_lists.push(list),
        }
        id
    }

    fn add_to_field_list(&mut self, e: ExprId, elements: &mut Vec<Value>) {
        if let Expr::List(components) = self.program.exprs.get(e).clone() {
            for c in components {
                self.add_to_field_list(c, elements);
            }
            return;
        }
        let ty = self.types.get(e).clone();
        if let Type::Struct(sid) = ty {
            // Recursively add all fields.
            let def = self.program.types.get(sid).clone();
            for f in &def.fields {
                let member = self.program.exprs.alloc(Expr::Member {
                    base: e,
                    member: f.name.clone(),
                });
                self.types.set(member, f.ty.clone());
                self.add_to_field_list(member, elements);
            }
            return;
        }
        let value = self.conv().convert(e);
        elements.push(value);
    }

    /// Emits a calculation over `fields` and returns its name. A struct
    /// argument is expanded into the list of its fields.
    pub(crate) fn create_calculation(&mut self, algo: &str, fields: ExprId) -> String {
        let name = self.refs.new_name("calc_");
        let id = self.ids.next("calculations");

        let mut fields = fields;
        if !matches!(self.program.exprs.get(fields), Expr::List(_)) {
            let ty = self.types.get(fields).clone();
            let Type::Struct(sid) = ty else {
                panic!("calculation input is neither a list nor a struct");
            };
            let def = self.program.types.get(sid).clone();
            let mut components = Vec::new();
            for f in &def.fields {
                let member = self.program.exprs.alloc(Expr::Member {
                    base: fields,
                    member: f.name.clone(),
                });
                self.types.set(member, f.ty.clone());
                components.push(member);
            }
            let list = self.program.exprs.alloc(Expr::List(components));
            self.types.set(list, Type::Struct(sid));
            fields = list;
        }

        let input = self.conv().convert(fields);
        self.calculations.push(json!({
            "name": name,
            "id": id,
            "algo": algo,
            "input": input,
        }));
        name
    }

    // -----------------------------------------------------------------
    // Checksums
    // -----------------------------------------------------------------

    /// Walks one statement of the checksum-update block. Conditions on if
    /// statements are ignored by the runtime, so only then-branches are
    /// entered.
    fn generate_update(&mut self, s: StmtId) {
        let stmt = match self.program.stmts.get(s).clone() {
            Stmt::If { then_branch, .. } => self.program.stmts.get(then_branch).clone(),
            other => other,
        };
        match stmt {
            Stmt::Block(body) => {
                for inner in body {
                    self.generate_update(inner);
                }
            }
            Stmt::Empty | Stmt::Variable(_) => {}
            Stmt::Assign { left, right } => {
                let get_call = match resolve_method(
                    &self.program.exprs,
                    &self.program.decls,
                    &self.refs,
                    right,
                ) {
                    Some(MethodKind::ExternMethod {
                        extern_type,
                        method,
                        ..
                    }) if extern_type == self.model.checksum_unit
                        && method == self.model.checksum_get =>
                    {
                        match self.program.exprs.get(right) {
                            Expr::MethodCall { args, .. } => {
                                assert!(args.len() == 1, "expected 1 argument for get");
                                Some(args[0])
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };
                let Some(fields) = get_call else {
                    self.diags.error(Diagnostic::ChecksumStatementUnsupported {
                        what: "an assignment that is not a checksum read".into(),
                    });
                    return;
                };
                let calc_name = self.create_calculation("csum16", fields);
                let name = self.refs.new_name("cksum_");
                let id = self.ids.next("checksums");
                let target = inner_value(&self.conv().convert(left));
                self.checksums.push(json!({
                    "name": name,
                    "id": id,
                    "target": target,
                    "type": "generic",
                    "calculation": calc_name,
                }));
            }
            Stmt::MethodCall(call) => {
                match resolve_method(&self.program.exprs, &self.program.decls, &self.refs, call) {
                    Some(MethodKind::Apply { .. }) => {} // ignored
                    _ => {
                        self.diags.error(Diagnostic::ChecksumStatementUnsupported {
                            what: "this call".into(),
                        });
                    }
                }
            }
            _ => {
                self.diags.error(Diagnostic::ChecksumStatementUnsupported {
                    what: "this statement".into(),
                });
            }
        }
    }

    // -----------------------------------------------------------------
    // Direct meters
    // -----------------------------------------------------------------

    /// Records the read destination of a direct meter; every read must
    /// target the same expression.
    fn set_meter_destination(&mut self, meter: DeclId, destination: ExprId) {
        let existing = self
            .meter_map
            .entry(meter)
            .or_default()
            .destination;
        match existing {
            None => {
                self.meter_map.get_mut(&meter).expect("just inserted").destination =
                    Some(destination);
            }
            Some(prev) => {
                if !crate::control::structural_eq(&self.program.exprs, prev, destination) {
                    let name = self.program.decls.get(meter).name().to_string();
                    self.diags
                        .error(Diagnostic::DirectMeterDestinationsDiffer { meter: name });
                }
            }
        }
    }

    /// Reads a constant expression as an unsigned integer.
    pub(crate) fn const_u64(&self, e: ExprId) -> Option<u64> {
        match self.program.exprs.get(e) {
            Expr::Constant { value, .. } => value.to_u64(),
            _ => None,
        }
    }

    /// Reads a constant expression's value, if it is one.
    pub(crate) fn const_value(&self, e: ExprId) -> Option<BigInt> {
        match self.program.exprs.get(e) {
            Expr::Constant { value, .. } => Some(value.clone()),
            _ => None,
        }
    }
}

/// Which list array a field list lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldListKind {
    Field,
    Learn,
}

impl FieldListKind {
    fn group(self) -> &'static str {
        match self {
            FieldListKind::Field => "field_lists",
            FieldListKind::Learn => "learn_lists",
        }
    }
}

/// A field-list id rendered as a 32-bit constant parameter.
fn field_list_ref(id: u32) -> Value {
    json!({ "type": "hexstr", "value": string_repr(&BigInt::from(id), round_up_bytes(32)) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_groups_are_independent() {
        let mut ids = IdGen::default();
        assert_eq!(ids.next("tables"), 0);
        assert_eq!(ids.next("tables"), 1);
        assert_eq!(ids.next("actions"), 0);
        assert_eq!(ids.next("tables"), 2);
    }

    #[test]
    fn field_list_ids_render_as_32_bit_constants() {
        assert_eq!(
            field_list_ref(1),
            json!({ "type": "hexstr", "value": "0x00000001" })
        );
    }
}
