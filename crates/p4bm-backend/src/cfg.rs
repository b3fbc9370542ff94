//! Control-flow graph for control blocks.
//!
//! Nodes are table invocations, conditionals, and a shared exit sink;
//! edges are tagged `Unconditional`, `Bool` (hit/miss and branch outcomes),
//! or `Label` (switch cases over `action_run`). Parsers may loop; controls
//! may not, so a cycle here is a user error.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use smallvec::SmallVec;

use p4bm_ir::{
    ControlDecl, DeclArena, DeclId, Expr, ExprArena, ExprId, RefMap, Stmt, StmtArena, StmtId,
    SwitchLabel, SwitchModel,
};

use crate::diag::{Diagnostic, Diagnostics};
use crate::json::ext_name;
use crate::method::{resolve_method, MethodKind};

/// A CFG node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgNode {
    /// A table invocation (plain apply, hit/miss branch, or action switch).
    Table { table: DeclId, name: String },
    /// A conditional on an ordinary boolean expression.
    If { cond: ExprId, name: String },
    /// Exit of the control: fallthrough, `exit`, and `return` all land here.
    Exit,
}

impl CfgNode {
    /// The node's name, or `None` for the exit sink (rendered as null).
    pub fn name(&self) -> Option<&str> {
        match self {
            CfgNode::Table { name, .. } | CfgNode::If { name, .. } => Some(name),
            CfgNode::Exit => None,
        }
    }
}

/// A CFG edge tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgEdge {
    Unconditional,
    Bool(bool),
    Label(String),
}

/// The built graph plus its entry node.
#[derive(Debug)]
pub struct Cfg {
    pub graph: DiGraph<CfgNode, CfgEdge>,
    pub entry: NodeIndex,
}

impl Cfg {
    /// Successor edges of a node: tag plus target name (`None` = exit).
    pub fn successors(&self, n: NodeIndex) -> SmallVec<[(CfgEdge, Option<String>); 4]> {
        self.graph
            .edges_directed(n, Direction::Outgoing)
            .map(|e| {
                let name = self.graph[e.target()].name().map(str::to_string);
                (e.weight().clone(), name)
            })
            .collect()
    }

    /// Name of the entry node, `None` for an empty control.
    pub fn init_table(&self) -> Option<&str> {
        self.graph[self.entry].name()
    }

    /// Node indices in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }
}

/// Builds the CFG of a control body and rejects cyclic control flow.
pub fn build_cfg(
    control: &ControlDecl,
    exprs: &ExprArena,
    stmts: &StmtArena,
    decls: &DeclArena,
    refs: &RefMap,
    model: &SwitchModel,
    diags: &mut Diagnostics,
) -> Cfg {
    let mut builder = CfgBuilder {
        graph: DiGraph::new(),
        exit: None,
        exprs,
        stmts,
        decls,
        refs,
        model,
        diags,
    };
    let exit = builder.exit_node();
    let entry = builder.build_seq(&control.body, exit);
    let cfg = Cfg {
        graph: builder.graph,
        entry,
    };
    if is_cyclic_directed(&cfg.graph) {
        diags.error(Diagnostic::CyclicControlFlow {
            control: control.name.clone(),
        });
    }
    cfg
}

struct CfgBuilder<'a> {
    graph: DiGraph<CfgNode, CfgEdge>,
    exit: Option<NodeIndex>,
    exprs: &'a ExprArena,
    stmts: &'a StmtArena,
    decls: &'a DeclArena,
    refs: &'a RefMap,
    model: &'a SwitchModel,
    diags: &'a mut Diagnostics,
}

impl<'a> CfgBuilder<'a> {
    fn exit_node(&mut self) -> NodeIndex {
        if let Some(exit) = self.exit {
            return exit;
        }
        let exit = self.graph.add_node(CfgNode::Exit);
        self.exit = Some(exit);
        exit
    }

    fn table_node(&mut self, table: DeclId) -> NodeIndex {
        let name = ext_name(self.decls.get(table).name()).to_string();
        self.graph.add_node(CfgNode::Table { table, name })
    }

    /// Builds a statement list; `follow` is where control goes afterwards.
    /// Returns the entry node of the list.
    fn build_seq(&mut self, list: &[StmtId], follow: NodeIndex) -> NodeIndex {
        let mut entry = follow;
        for &s in list.iter().rev() {
            entry = self.build_stmt(s, entry);
        }
        entry
    }

    fn build_stmt(&mut self, s: StmtId, follow: NodeIndex) -> NodeIndex {
        match self.stmts.get(s).clone() {
            Stmt::Empty | Stmt::Variable(_) => follow,
            Stmt::Exit | Stmt::Return => self.exit_node(),
            Stmt::Block(body) => self.build_seq(&body, follow),

            Stmt::MethodCall(call) => {
                match resolve_method(self.exprs, self.decls, self.refs, call) {
                    Some(MethodKind::Apply { table }) => {
                        let node = self.table_node(table);
                        self.graph.add_edge(node, follow, CfgEdge::Unconditional);
                        node
                    }
                    _ => {
                        self.diags.error(Diagnostic::NotSupported {
                            what: "this statement in a control body".into(),
                        });
                        follow
                    }
                }
            }

            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                // An if on apply().hit is the table itself with hit/miss
                // edges; anything else is a conditional node.
                let (node, invert) = match self.as_hit_condition(cond) {
                    Some((table, negated)) => (self.table_node(table), negated),
                    None => {
                        let name = format!("node_{}", self.graph.node_count());
                        (self.graph.add_node(CfgNode::If { cond, name }), false)
                    }
                };
                let then_entry = self.build_stmt(then_branch, follow);
                let else_entry = match else_branch {
                    Some(e) => self.build_stmt(e, follow),
                    None => follow,
                };
                let (on_true, on_false) = if invert {
                    (else_entry, then_entry)
                } else {
                    (then_entry, else_entry)
                };
                self.graph.add_edge(node, on_true, CfgEdge::Bool(true));
                self.graph.add_edge(node, on_false, CfgEdge::Bool(false));
                node
            }

            Stmt::Switch { expr, cases } => {
                let Some(table) = self.as_action_run(expr) else {
                    self.diags.error(Diagnostic::NotSupported {
                        what: "switch on something other than an apply result".into(),
                    });
                    return follow;
                };
                let node = self.table_node(table);
                self.graph.add_edge(node, follow, CfgEdge::Unconditional);

                // A case without a body falls through to the next one.
                let mut next_entry = follow;
                let mut edges: Vec<(CfgEdge, NodeIndex)> = Vec::new();
                for case in cases.iter().rev() {
                    let entry = match case.body {
                        Some(body) => self.build_stmt(body, follow),
                        None => next_entry,
                    };
                    next_entry = entry;
                    let tag = match &case.label {
                        SwitchLabel::Action(name) => CfgEdge::Label(name.clone()),
                        SwitchLabel::Default => CfgEdge::Label("default".to_string()),
                    };
                    edges.push((tag, entry));
                }
                for (tag, entry) in edges.into_iter().rev() {
                    self.graph.add_edge(node, entry, tag);
                }
                node
            }

            Stmt::Assign { .. } => {
                self.diags.error(Diagnostic::NotSupported {
                    what: "an assignment in a control body".into(),
                });
                follow
            }
        }
    }

    /// Matches `t.apply().hit` and its negations, returning the table and
    /// whether the condition is inverted.
    fn as_hit_condition(&self, cond: ExprId) -> Option<(DeclId, bool)> {
        match self.exprs.get(cond) {
            Expr::Unary {
                op: p4bm_ir::UnOp::Not,
                expr,
            } => self
                .as_hit_condition(*expr)
                .map(|(table, negated)| (table, !negated)),
            Expr::Member { base, member } if member == self.model.apply_hit => {
                match resolve_method(self.exprs, self.decls, self.refs, *base) {
                    Some(MethodKind::Apply { table }) => Some((table, false)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Matches `t.apply().action_run`.
    fn as_action_run(&self, expr: ExprId) -> Option<DeclId> {
        match self.exprs.get(expr) {
            Expr::Member { base, member } if member == self.model.action_run => {
                match resolve_method(self.exprs, self.decls, self.refs, *base) {
                    Some(MethodKind::Apply { table }) => Some(table),
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
    use p4bm_ir::{IrBuilder, TableDecl, Type};

    fn empty_table(b: &mut IrBuilder, name: &str) -> DeclId {
        b.table(TableDecl {
            name: name.into(),
            key: vec![],
            actions: vec![],
            entries: vec![],
            default_action: None,
            size: None,
            implementation: None,
            support_timeout: None,
            direct_counter: None,
            direct_meter: None,
        })
    }

    fn apply_of(b: &mut IrBuilder, t: DeclId) -> ExprId {
        let base = b.path(t, Type::Void);
        let m = b.member(base, "apply", Type::Void);
        b.method_call(m, vec![], vec![], Type::Void)
    }

    fn build(b: &IrBuilder, control: &ControlDecl) -> (Cfg, usize) {
        let mut diags = Diagnostics::new();
        let model = SwitchModel::default();
        let cfg = build_cfg(
            control,
            &b.program.exprs,
            &b.program.stmts,
            &b.program.decls,
            &b.refs,
            &model,
            &mut diags,
        );
        (cfg, diags.error_count())
    }

    #[test]
    fn sequential_applies() {
        let mut b = IrBuilder::new();
        let t1 = empty_table(&mut b, "t1");
        let t2 = empty_table(&mut b, "t2");
        let a1 = apply_of(&mut b, t1);
        let a2 = apply_of(&mut b, t2);
        let s1 = b.call_stmt(a1);
        let s2 = b.call_stmt(a2);

        let control = ControlDecl {
            name: "ingress".into(),
            body: vec![s1, s2],
            ..Default::default()
        };
        let (cfg, errs) = build(&b, &control);
        assert_eq!(errs, 0);
        assert_eq!(cfg.init_table(), Some("t1"));

        // t1 -> t2 -> exit, all unconditional.
        let entry = cfg.entry;
        let succ = cfg.successors(entry);
        assert_eq!(succ.len(), 1);
        assert_eq!(succ[0], (CfgEdge::Unconditional, Some("t2".to_string())));
    }

    #[test]
    fn hit_condition_makes_bool_edges() {
        let mut b = IrBuilder::new();
        let t1 = empty_table(&mut b, "t1");
        let t2 = empty_table(&mut b, "t2");
        let a1 = apply_of(&mut b, t1);
        let hit = b.member(a1, "hit", Type::Boolean);
        let a2 = apply_of(&mut b, t2);
        let s2 = b.call_stmt(a2);
        let branch = b.if_stmt(hit, s2, None);

        let control = ControlDecl {
            name: "ingress".into(),
            body: vec![branch],
            ..Default::default()
        };
        let (cfg, errs) = build(&b, &control);
        assert_eq!(errs, 0);
        assert_eq!(cfg.init_table(), Some("t1"));

        let succ = cfg.successors(cfg.entry);
        assert_eq!(succ.len(), 2);
        assert!(succ.contains(&(CfgEdge::Bool(true), Some("t2".to_string()))));
        assert!(succ.contains(&(CfgEdge::Bool(false), None)));
    }

    #[test]
    fn plain_condition_makes_if_node() {
        let mut b = IrBuilder::new();
        let t1 = empty_table(&mut b, "t1");
        let flag = b.variable("flag", Type::Boolean);
        let cond = b.path(flag, Type::Boolean);
        let a1 = apply_of(&mut b, t1);
        let s1 = b.call_stmt(a1);
        let branch = b.if_stmt(cond, s1, None);

        let control = ControlDecl {
            name: "egress".into(),
            body: vec![branch],
            ..Default::default()
        };
        let (cfg, errs) = build(&b, &control);
        assert_eq!(errs, 0);

        let entry = &cfg.graph[cfg.entry];
        assert!(matches!(entry, CfgNode::If { .. }));
        let succ = cfg.successors(cfg.entry);
        assert!(succ.contains(&(CfgEdge::Bool(true), Some("t1".to_string()))));
        assert!(succ.contains(&(CfgEdge::Bool(false), None)));
    }

    #[test]
    fn switch_labels_and_fallthrough() {
        let mut b = IrBuilder::new();
        let t1 = empty_table(&mut b, "t1");
        let t2 = empty_table(&mut b, "t2");
        let a1 = apply_of(&mut b, t1);
        let run = b.member(a1, "action_run", Type::Void);
        let a2 = apply_of(&mut b, t2);
        let s2 = b.call_stmt(a2);

        let switch = b.stmt(Stmt::Switch {
            expr: run,
            cases: vec![
                p4bm_ir::SwitchCase {
                    label: SwitchLabel::Action("drop_it".into()),
                    body: None, // falls through to set_port's body
                },
                p4bm_ir::SwitchCase {
                    label: SwitchLabel::Action("set_port".into()),
                    body: Some(s2),
                },
            ],
        });

        let control = ControlDecl {
            name: "ingress".into(),
            body: vec![switch],
            ..Default::default()
        };
        let (cfg, errs) = build(&b, &control);
        assert_eq!(errs, 0);

        let succ = cfg.successors(cfg.entry);
        assert!(succ.contains(&(CfgEdge::Unconditional, None)));
        assert!(succ.contains(&(
            CfgEdge::Label("drop_it".to_string()),
            Some("t2".to_string())
        )));
        assert!(succ.contains(&(
            CfgEdge::Label("set_port".to_string()),
            Some("t2".to_string())
        )));
    }

    #[test]
    fn exit_terminates_flow() {
        let mut b = IrBuilder::new();
        let t1 = empty_table(&mut b, "t1");
        let a1 = apply_of(&mut b, t1);
        let s1 = b.call_stmt(a1);
        let ex = b.stmt(Stmt::Exit);

        let control = ControlDecl {
            name: "ingress".into(),
            body: vec![s1, ex],
            ..Default::default()
        };
        let (cfg, errs) = build(&b, &control);
        assert_eq!(errs, 0);
        let succ = cfg.successors(cfg.entry);
        assert_eq!(succ.len(), 1);
        assert_eq!(succ[0], (CfgEdge::Unconditional, None));
    }

    #[test]
    fn empty_control_has_null_init() {
        let b = IrBuilder::new();
        let control = ControlDecl {
            name: "egress".into(),
            ..Default::default()
        };
        let (cfg, _) = build(&b, &control);
        assert_eq!(cfg.init_table(), None);
    }
}
