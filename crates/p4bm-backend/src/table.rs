//! Table conversion.
//!
//! Turns a table declaration plus its CFG node into the runtime's table
//! object: key list with match-type inference, implementation (simple,
//! indirect, or indirect with selector), size and timeout, direct counter
//! and meter bindings, the action list, `next_tables`, the default entry,
//! and any constant entries.

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::Zero;
use petgraph::graph::NodeIndex;
use serde_json::{json, Map, Value};

use p4bm_ir::{BinOp, Decl, Expr, ExprId, KeyElement, TableDecl, Type};

use crate::cfg::{Cfg, CfgEdge, CfgNode};
use crate::diag::{Diagnostic, Warning};
use crate::json::{ext_name, inner_value, mask, mask_from_slice, round_up_bytes, string_repr};
use crate::method::as_is_valid_call;
use crate::program::ProgramConverter;

impl ProgramConverter<'_> {
    /// Converts the table behind a CFG table node.
    pub(crate) fn convert_table(&mut self, node: NodeIndex, cfg: &Cfg) -> Value {
        let CfgNode::Table {
            table: table_decl, ..
        } = cfg.graph[node].clone()
        else {
            panic!("convert_table on a non-table node");
        };
        let Decl::Table(table) = self.program.decls.get(table_decl).clone() else {
            panic!("table node referring to a non-table declaration");
        };
        tracing::debug!(table = %table.name, "processing table");

        let name = ext_name(&table.name).to_string();
        let mut result = Map::new();
        result.insert("name".into(), json!(name));
        result.insert("id".into(), json!(self.ids.next("tables")));

        // Keys, with table-wide match type inference. In decreasing order of
        // precedence: more than one LPM field is an error; one RANGE field
        // makes the table RANGE; one TERNARY field makes it TERNARY; an LPM
        // field makes it LPM; otherwise the table is EXACT.
        let mut table_match_type = self.model.exact_match.to_string();
        let mut keys = Vec::new();
        for ke in &table.key {
            let mut match_type = self.key_match_type(&table, ke);
            if match_type == self.model.selector_match {
                continue;
            }
            if match_type != table_match_type {
                if match_type == self.model.range_match {
                    table_match_type = self.model.range_match.to_string();
                }
                if match_type == self.model.ternary_match
                    && table_match_type != self.model.range_match
                {
                    table_match_type = self.model.ternary_match.to_string();
                }
                if match_type == self.model.lpm_match
                    && table_match_type == self.model.exact_match
                {
                    table_match_type = self.model.lpm_match.to_string();
                }
            } else if match_type == self.model.lpm_match {
                self.diags.error(Diagnostic::MultipleLpmKeys {
                    table: name.clone(),
                });
            }

            let mut expr = ke.expr;
            let mut key_mask = BigInt::zero();
            match self.program.exprs.get(expr).clone() {
                Expr::Binary {
                    op: BinOp::BAnd,
                    left,
                    right,
                } => {
                    if let Some(m) = self.const_value(right) {
                        key_mask = m;
                        expr = left;
                    } else if let Some(m) = self.const_value(left) {
                        key_mask = m;
                        expr = right;
                    } else {
                        self.diags.error(Diagnostic::NotConstant {
                            what: "a key mask".into(),
                        });
                    }
                }
                Expr::Slice { base, hi, lo } => {
                    expr = base;
                    key_mask = mask_from_slice(hi, lo);
                }
                _ => {}
            }

            if match_type == "valid" {
                if let Some(header) = as_is_valid_call(
                    &self.program.exprs,
                    &self.program.decls,
                    self.refs,
                    self.model.is_valid,
                    expr,
                ) {
                    if ke.match_kind == self.model.ternary_match {
                        // Ternary matches need a real field; expose validity
                        // through the synthetic one.
                        let valid = self.program.exprs.alloc(Expr::Member {
                            base: header,
                            member: self.model.valid_field.to_string(),
                        });
                        self.types.set(valid, Type::Boolean);
                        expr = valid;
                        match_type = self.model.ternary_match.to_string();
                        if table_match_type != self.model.range_match {
                            table_match_type = self.model.ternary_match.to_string();
                        }
                    } else {
                        expr = header;
                    }
                }
            }

            let width = self.types.get(expr).width_bits(&self.program.types);
            let mut conv = self.conv();
            conv.simple_expressions_only = true;
            conv.context = "a table key";
            let converted = conv.convert(expr);
            let target = inner_value(&converted);
            let mask_json = if key_mask.is_zero() {
                Value::Null
            } else {
                json!(string_repr(&key_mask, round_up_bytes(width)))
            };
            keys.push(json!({
                "match_type": match_type,
                "target": target,
                "mask": mask_json,
            }));
        }
        result.insert("key".into(), keys.into());
        result.insert("match_type".into(), json!(table_match_type));

        let simple = self.handle_table_implementation(&table, &name, &mut result);

        let mut size: u64 = 0;
        if let Some(sz) = table.size {
            match self.const_u64(sz) {
                Some(v) => size = v,
                None => self.diags.error(Diagnostic::NonConstantTableProperty {
                    table: name.clone(),
                    what: "the size property".into(),
                }),
            }
        }
        if size == 0 {
            size = self.model.default_table_size;
        }
        result.insert("max_size".into(), json!(size));

        self.handle_direct_counter(&table, &name, &mut result);

        let mut support_timeout = false;
        if let Some(to) = table.support_timeout {
            match self.program.exprs.get(to) {
                Expr::Bool(b) => support_timeout = *b,
                _ => self.diags.error(Diagnostic::BadTableProperty {
                    table: name.clone(),
                    property: "support_timeout".into(),
                }),
            }
        }
        result.insert("support_timeout".into(), json!(support_timeout));

        self.handle_direct_meter(&table, &name, size, &mut result);

        // Action list. Runtime-side binding means list entries are bare
        // action names.
        let mut action_ids = Vec::new();
        let mut action_names = Vec::new();
        let mut use_action_name: IndexMap<String, String> = IndexMap::new();
        for aref in &table.actions {
            if !aref.args.is_empty() {
                self.diags.error(Diagnostic::ActionListArguments {
                    table: name.clone(),
                });
            }
            let decl = self.program.decls.get(aref.action);
            let Decl::Action(action) = decl else {
                panic!("action list entry is not an action");
            };
            let id = *self
                .action_ids
                .get(&aref.action)
                .unwrap_or_else(|| panic!("action '{}' has no id", action.name));
            let ext = ext_name(&action.name).to_string();
            action_ids.push(id);
            action_names.push(ext.clone());
            use_action_name.insert(action.name.clone(), ext);
        }
        result.insert("action_ids".into(), json!(action_ids));
        result.insert("actions".into(), json!(action_names));

        // Next-table computation from the CFG edges.
        let successors = cfg.successors(node);
        let mut unconditional: Option<Option<String>> = None;
        let mut default_label: Option<Option<String>> = None;
        let mut hit_miss = false;
        for (edge, target) in &successors {
            match edge {
                CfgEdge::Unconditional => unconditional = Some(target.clone()),
                CfgEdge::Bool(_) => hit_miss = true,
                CfgEdge::Label(l) if l == "default" => default_label = Some(target.clone()),
                CfgEdge::Label(_) => {}
            }
        }

        let mut next_label: Option<String> = None;
        if hit_miss {
            result.insert("base_default_next".into(), Value::Null);
        } else {
            let base = unconditional
                .clone()
                .unwrap_or_else(|| panic!("no default destination for table '{name}'"));
            result.insert("base_default_next".into(), json_name(&base));
            // A "default:" switch case redirects the default destination.
            next_label = match default_label {
                Some(dest) => dest,
                None => base,
            };
        }

        let mut next_tables: Map<String, Value> = Map::new();
        for (edge, target) in &successors {
            match edge {
                CfgEdge::Bool(b) => {
                    let label = if *b { "__HIT__" } else { "__MISS__" };
                    next_tables.insert(label.into(), json_name(target));
                }
                CfgEdge::Unconditional => {}
                CfgEdge::Label(l) => {
                    if l == "default" {
                        continue;
                    }
                    match use_action_name.get(l) {
                        Some(ext) => {
                            next_tables.insert(ext.clone(), json_name(target));
                        }
                        None => self.diags.error(Diagnostic::NotSupported {
                            what: format!("switch label '{l}' outside the action list"),
                        }),
                    }
                }
            }
        }
        if !hit_miss {
            // Actions without an explicit label go to the default next.
            for ext in use_action_name.values() {
                if !next_tables.contains_key(ext) {
                    next_tables.insert(ext.clone(), json_name(&next_label));
                }
            }
        }
        result.insert("next_tables".into(), next_tables.into());

        if let Some(da) = &table.default_action {
            if !simple {
                self.diags.warn(Warning::DefaultActionOnIndirect {
                    table: name.clone(),
                });
                return Value::Object(result);
            }
            let action_id = *self
                .action_ids
                .get(&da.action)
                .unwrap_or_else(|| panic!("default action has no id"));
            let mut action_data = Vec::new();
            for &arg in &da.args {
                match self.const_value(arg) {
                    Some(v) => action_data.push(json!(string_repr(&v, 0))),
                    None => {
                        self.diags.error(Diagnostic::NonConstantEntryArgument {
                            table: name.clone(),
                        });
                        return Value::Object(result);
                    }
                }
            }
            result.insert(
                "default_entry".into(),
                json!({
                    "action_id": action_id,
                    "action_const": false,
                    "action_data": action_data,
                    "action_entry_const": da.is_const,
                }),
            );
        }

        self.convert_table_entries(&table, &name, &mut result);
        Value::Object(result)
    }

    /// The effective match type of one key element: the declared kind,
    /// except that `isValid()` under exact or ternary becomes "valid".
    fn key_match_type(&mut self, table: &TableDecl, ke: &KeyElement) -> String {
        let kind = &ke.match_kind;
        if kind == self.model.exact_match || kind == self.model.ternary_match {
            if as_is_valid_call(
                &self.program.exprs,
                &self.program.decls,
                self.refs,
                self.model.is_valid,
                ke.expr,
            )
            .is_some()
            {
                return "valid".to_string();
            }
        } else if kind != self.model.lpm_match
            && kind != self.model.range_match
            && kind != self.model.selector_match
        {
            self.diags.error(Diagnostic::UnsupportedMatchType {
                table: table.name.clone(),
                match_kind: kind.clone(),
            });
        }
        kind.clone()
    }

    /// Resolves the `implementation` property. Returns whether the table is
    /// simple (directly programmable).
    fn handle_table_implementation(
        &mut self,
        table: &TableDecl,
        name: &str,
        result: &mut Map<String, Value>,
    ) -> bool {
        let Some(impl_expr) = table.implementation else {
            result.insert("type".into(), json!("simple"));
            return true;
        };

        let apname;
        match self.program.exprs.get(impl_expr).clone() {
            // A direct constructor call creates a fresh, anonymous profile.
            Expr::ConstructorCall { ty_name, args } => {
                apname = self.refs.new_name("action_profile");
                let mut profile = Map::new();
                profile.insert("name".into(), json!(apname));
                profile.insert("id".into(), json!(self.ids.next("action_profiles")));

                if ty_name == self.model.action_selector {
                    assert!(args.len() == 3, "expected 3 arguments for action_selector");
                    result.insert("type".into(), json!("indirect_ws"));
                    self.add_profile_size(&mut profile, args[1], name);
                    let algo = self.resolve_algorithm(args[0]);
                    let input = self.selector_input_of(table);
                    profile.insert(
                        "selector".into(),
                        json!({ "algo": algo, "input": input }),
                    );
                } else if ty_name == self.model.action_profile {
                    assert!(args.len() == 1, "expected 1 argument for action_profile");
                    result.insert("type".into(), json!("indirect"));
                    self.add_profile_size(&mut profile, args[0], name);
                } else {
                    self.diags.error(Diagnostic::BadTableProperty {
                        table: name.to_string(),
                        property: "implementation".into(),
                    });
                }
                self.action_profiles.push(Value::Object(profile));
            }

            // A reference to a declared instance; the profile object itself
            // is emitted with the control's locals.
            Expr::Path(_) => {
                let Some(decl) = self.refs.get_declaration(impl_expr) else {
                    self.diags.error(Diagnostic::BadTableProperty {
                        table: name.to_string(),
                        property: "implementation".into(),
                    });
                    return false;
                };
                let Decl::Instance(inst) = self.program.decls.get(decl) else {
                    self.diags.error(Diagnostic::BadTableProperty {
                        table: name.to_string(),
                        property: "implementation".into(),
                    });
                    return false;
                };
                apname = ext_name(&inst.name).to_string();
                if inst.extern_type == self.model.action_profile {
                    result.insert("type".into(), json!("indirect"));
                } else if inst.extern_type == self.model.action_selector {
                    result.insert("type".into(), json!("indirect_ws"));
                } else {
                    self.diags.error(Diagnostic::BadTableProperty {
                        table: name.to_string(),
                        property: "implementation".into(),
                    });
                    return false;
                }
            }

            _ => {
                self.diags.error(Diagnostic::BadTableProperty {
                    table: name.to_string(),
                    property: "implementation".into(),
                });
                return false;
            }
        }

        result.insert("action_profile".into(), json!(apname));
        false
    }

    fn add_profile_size(&mut self, profile: &mut Map<String, Value>, size: ExprId, table: &str) {
        let value = match self.const_u64(size) {
            Some(v) => v,
            None => {
                self.diags.error(Diagnostic::NonConstantTableProperty {
                    table: table.to_string(),
                    what: "the implementation size".into(),
                });
                0
            }
        };
        profile.insert("max_size".into(), json!(value));
    }

    /// Converted selector-kind key expressions of a table.
    pub(crate) fn selector_input_of(&mut self, table: &TableDecl) -> Vec<Value> {
        let selector_keys: Vec<ExprId> = table
            .key
            .iter()
            .filter(|ke| ke.match_kind == self.model.selector_match)
            .map(|ke| ke.expr)
            .collect();
        selector_keys
            .into_iter()
            .map(|e| self.conv().convert(e))
            .collect()
    }

    fn handle_direct_counter(
        &mut self,
        table: &TableDecl,
        name: &str,
        result: &mut Map<String, Value>,
    ) {
        let Some(ctr) = table.direct_counter else {
            result.insert("with_counters".into(), json!(false));
            return;
        };
        match self.program.exprs.get(ctr).clone() {
            Expr::ConstructorCall { ty_name, .. } => {
                if ty_name != self.model.direct_counter && ty_name != self.model.counter {
                    self.diags.error(Diagnostic::BadTableProperty {
                        table: name.to_string(),
                        property: "counters".into(),
                    });
                    return;
                }
                result.insert("with_counters".into(), json!(true));
                let ctrname = self.refs.new_name("counter");
                let id = self.ids.next("counter_arrays");
                self.counters.push(json!({
                    "name": ctrname,
                    "id": id,
                    "is_direct": ty_name == self.model.direct_counter,
                    "binding": name,
                }));
            }
            Expr::Path(_) => {
                let decl = self
                    .refs
                    .get_declaration(ctr)
                    .filter(|d| matches!(self.program.decls.get(*d), Decl::Instance(_)));
                let Some(decl) = decl else {
                    self.diags.error(Diagnostic::BadTableProperty {
                        table: name.to_string(),
                        property: "counters".into(),
                    });
                    return;
                };
                let ctrname = ext_name(self.program.decls.get(decl).name()).to_string();
                tracing::debug!(counter = %ctrname, "binding direct counter");
                if let Some(first) = self.direct_counters.get(&ctrname) {
                    self.diags.error(Diagnostic::DirectCounterMultipleTables {
                        counter: ctrname.clone(),
                        first: first.clone(),
                        second: name.to_string(),
                    });
                    return;
                }
                self.direct_counters.insert(ctrname, name.to_string());
                result.insert("with_counters".into(), json!(true));
            }
            _ => {
                self.diags.error(Diagnostic::BadTableProperty {
                    table: name.to_string(),
                    property: "counters".into(),
                });
            }
        }
    }

    fn handle_direct_meter(
        &mut self,
        table: &TableDecl,
        name: &str,
        size: u64,
        result: &mut Map<String, Value>,
    ) {
        let Some(dm) = table.direct_meter else {
            result.insert("direct_meters".into(), Value::Null);
            return;
        };
        let decl = match self.program.exprs.get(dm) {
            Expr::Path(_) => self.refs.get_declaration(dm),
            _ => None,
        };
        let valid = decl.filter(|d| {
            matches!(
                self.program.decls.get(*d),
                Decl::Instance(inst) if inst.extern_type == self.model.direct_meter
            )
        });
        let Some(decl) = valid else {
            self.diags.error(Diagnostic::BadTableProperty {
                table: name.to_string(),
                property: "meters".into(),
            });
            return;
        };
        let meter_name = ext_name(self.program.decls.get(decl).name()).to_string();
        let info = self.meter_map.entry(decl).or_default();
        if let Some(first) = &info.table {
            if first != name {
                let first = first.clone();
                self.diags.error(Diagnostic::DirectMeterMultipleTables {
                    meter: meter_name,
                    first,
                    second: name.to_string(),
                });
                return;
            }
        }
        let info = self.meter_map.entry(decl).or_default();
        info.table = Some(name.to_string());
        info.table_size = size;
        result.insert("direct_meters".into(), json!(meter_name));
    }

    /// Serializes the table's constant entries. Key representations depend
    /// on the match type; priorities default to the entry position.
    fn convert_table_entries(
        &mut self,
        table: &TableDecl,
        name: &str,
        result: &mut Map<String, Value>,
    ) {
        if table.entries.is_empty() {
            return;
        }
        let mut entries = Vec::new();
        let mut entry_priority: i64 = 1;
        for entry in &table.entries {
            let mut match_key = Vec::new();
            for (index, &k) in entry.keys.iter().enumerate() {
                let Some(ke) = table.key.get(index) else {
                    self.diags.error(Diagnostic::InvalidEntryKey {
                        table: name.to_string(),
                        match_kind: "any".into(),
                    });
                    continue;
                };
                let key_width = self.types.get(ke.expr).width_bits(&self.program.types);
                let k8 = round_up_bytes(key_width);
                let match_type = self.key_match_type(table, ke);
                let mut key = Map::new();
                key.insert("match_type".into(), json!(match_type));

                if match_type == "valid" {
                    match self.program.exprs.get(k) {
                        Expr::Bool(b) => {
                            key.insert("key".into(), json!(b));
                        }
                        _ => self.diags.error(Diagnostic::InvalidEntryKey {
                            table: name.to_string(),
                            match_kind: "valid".into(),
                        }),
                    }
                } else if match_type == self.model.exact_match {
                    match self.const_value(k) {
                        Some(v) => {
                            key.insert("key".into(), json!(string_repr(&v, k8)));
                        }
                        None => self.diags.error(Diagnostic::InvalidEntryKey {
                            table: name.to_string(),
                            match_kind: "exact".into(),
                        }),
                    }
                } else if match_type == self.model.ternary_match {
                    match self.program.exprs.get(k).clone() {
                        Expr::Mask { value, mask } => {
                            match (self.const_value(value), self.const_value(mask)) {
                                (Some(v), Some(m)) => {
                                    key.insert("key".into(), json!(string_repr(&v, k8)));
                                    key.insert("mask".into(), json!(string_repr(&m, k8)));
                                }
                                _ => self.diags.error(Diagnostic::InvalidEntryKey {
                                    table: name.to_string(),
                                    match_kind: "ternary".into(),
                                }),
                            }
                        }
                        Expr::Constant { value, .. } => {
                            key.insert("key".into(), json!(string_repr(&value, k8)));
                            key.insert(
                                "mask".into(),
                                json!(string_repr(&mask(key_width), k8)),
                            );
                        }
                        Expr::Default => {
                            key.insert("key".into(), json!(string_repr(&BigInt::zero(), k8)));
                            key.insert("mask".into(), json!(string_repr(&BigInt::zero(), k8)));
                        }
                        _ => self.diags.error(Diagnostic::InvalidEntryKey {
                            table: name.to_string(),
                            match_kind: "ternary".into(),
                        }),
                    }
                } else if match_type == self.model.lpm_match {
                    match self.program.exprs.get(k).clone() {
                        Expr::Mask { value, mask } => {
                            match (self.const_value(value), self.const_value(mask)) {
                                (Some(v), Some(m)) => {
                                    key.insert("key".into(), json!(string_repr(&v, k8)));
                                    let (_, magnitude) = m.clone().into_parts();
                                    let len = magnitude.trailing_zeros().unwrap_or(0) as u32;
                                    let ones = magnitude.count_ones() as u32;
                                    // Any remaining zeros inside the prefix?
                                    if len + ones != key_width {
                                        self.diags.error(Diagnostic::NonContiguousLpmMask {
                                            table: name.to_string(),
                                        });
                                    } else {
                                        key.insert(
                                            "prefix_length".into(),
                                            json!(key_width - len),
                                        );
                                    }
                                }
                                _ => self.diags.error(Diagnostic::InvalidEntryKey {
                                    table: name.to_string(),
                                    match_kind: "lpm".into(),
                                }),
                            }
                        }
                        Expr::Constant { value, .. } => {
                            key.insert("key".into(), json!(string_repr(&value, k8)));
                            key.insert("prefix_length".into(), json!(key_width));
                        }
                        Expr::Default => {
                            key.insert("key".into(), json!(string_repr(&BigInt::zero(), k8)));
                            key.insert("prefix_length".into(), json!(0));
                        }
                        _ => self.diags.error(Diagnostic::InvalidEntryKey {
                            table: name.to_string(),
                            match_kind: "lpm".into(),
                        }),
                    }
                } else if match_type == self.model.range_match {
                    match self.program.exprs.get(k).clone() {
                        Expr::Range { lo, hi } => {
                            match (self.const_value(lo), self.const_value(hi)) {
                                (Some(l), Some(h)) => {
                                    key.insert("start".into(), json!(string_repr(&l, k8)));
                                    key.insert("end".into(), json!(string_repr(&h, k8)));
                                }
                                _ => self.diags.error(Diagnostic::InvalidEntryKey {
                                    table: name.to_string(),
                                    match_kind: "range".into(),
                                }),
                            }
                        }
                        Expr::Default => {
                            key.insert("start".into(), json!(string_repr(&BigInt::zero(), k8)));
                            key.insert("end".into(), json!(string_repr(&mask(key_width), k8)));
                        }
                        _ => self.diags.error(Diagnostic::InvalidEntryKey {
                            table: name.to_string(),
                            match_kind: "range".into(),
                        }),
                    }
                } else {
                    self.diags.error(Diagnostic::InvalidEntryKey {
                        table: name.to_string(),
                        match_kind: match_type.clone(),
                    });
                }
                match_key.push(Value::Object(key));
            }

            let action_id = *self
                .action_ids
                .get(&entry.action)
                .unwrap_or_else(|| panic!("entry action has no id"));
            let mut action_data = Vec::new();
            for &arg in &entry.args {
                match self.const_value(arg) {
                    Some(v) => action_data.push(json!(string_repr(&v, 0))),
                    None => self.diags.error(Diagnostic::NonConstantEntryArgument {
                        table: name.to_string(),
                    }),
                }
            }

            let priority = entry.priority.unwrap_or(entry_priority);
            entry_priority += 1;

            entries.push(json!({
                "match_key": match_key,
                "action_entry": { "action_id": action_id, "action_data": action_data },
                "priority": priority,
            }));
        }
        result.insert("entries".into(), entries.into());
    }
}

/// Renders an optional CFG node name: `None` is the exit and serializes
/// as null.
fn json_name(name: &Option<String>) -> Value {
    match name {
        Some(n) => json!(n),
        None => Value::Null,
    }
}
