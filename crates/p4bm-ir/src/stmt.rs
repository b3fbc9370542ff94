//! Statement nodes and the arena that owns them.
//!
//! Statements reference expressions by [`ExprId`] and nest through
//! [`StmtId`]s. Unlike expressions, statements may be patched in place by
//! the lowering passes (the node stays, its expression ids are re-pointed).

use serde::{Deserialize, Serialize};

use crate::id::{DeclId, ExprId, StmtId};

/// Label of a switch case over a table's `action_run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchLabel {
    /// An action name as written in the control.
    Action(String),
    Default,
}

/// One case of a switch statement. A case without a body falls through to
/// the next case's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub label: SwitchLabel,
    pub body: Option<StmtId>,
}

/// A statement node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    Assign { left: ExprId, right: ExprId },

    /// Expression statement; always a method call.
    MethodCall(ExprId),

    Block(Vec<StmtId>),

    If {
        cond: ExprId,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    },

    /// Switch over `table.apply().action_run`.
    Switch { expr: ExprId, cases: Vec<SwitchCase> },

    /// Local variable declaration in statement position.
    Variable(DeclId),

    Exit,
    Return,
    Empty,
}

/// Append-only arena owning every statement of a program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StmtArena {
    nodes: Vec<Stmt>,
}

impl StmtArena {
    pub fn new() -> Self {
        StmtArena::default()
    }

    pub fn alloc(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.nodes.len() as u32);
        self.nodes.push(stmt);
        id
    }

    /// Looks up a node. A dangling [`StmtId`] is a bug in the producer.
    pub fn get(&self, id: StmtId) -> &Stmt {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_patch() {
        let mut arena = StmtArena::new();
        let id = arena.alloc(Stmt::Assign {
            left: ExprId(0),
            right: ExprId(1),
        });
        if let Stmt::Assign { right, .. } = arena.get_mut(id) {
            *right = ExprId(7);
        }
        assert_eq!(
            *arena.get(id),
            Stmt::Assign {
                left: ExprId(0),
                right: ExprId(7)
            }
        );
    }
}
