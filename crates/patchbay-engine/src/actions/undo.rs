use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, error};

use crate::error::GraphError;
use crate::router::{RecalcMode, RecalcOutcome, Router};
use crate::topology::Topology;

use super::GraphAction;

struct HistoryEntry {
    label: &'static str,
    action: Box<dyn GraphAction>,
}

/// Linear undo history of graph actions.
///
/// Every apply or revert is followed by exactly one hard recalculation. When
/// the router rejects the result the topology change is rolled back and the
/// history is left as it was.
pub struct UndoManager {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    max_depth: Option<usize>,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoManager {
    pub fn new() -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: None,
        }
    }

    /// Keeps at most `depth` undo steps, dropping the oldest first.
    pub fn with_max_depth(depth: usize) -> Self {
        Self {
            max_depth: Some(depth.max(1)),
            ..Self::new()
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_label(&self) -> Option<&'static str> {
        self.undo_stack.back().map(|entry| entry.label)
    }

    pub fn redo_label(&self) -> Option<&'static str> {
        self.redo_stack.last().map(|entry| entry.label)
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn perform(
        &mut self,
        mut action: Box<dyn GraphAction>,
        topology: &mut Topology,
        router: &Router,
    ) -> Result<RecalcOutcome, GraphError> {
        let label = action.label();
        action.apply(topology)?;
        match router.recalculate(RecalcMode::Hard, topology) {
            Ok(outcome) => {
                debug!(action = label, generation = outcome.generation, "performed");
                self.redo_stack.clear();
                self.undo_stack.push_back(HistoryEntry { label, action });
                if let Some(depth) = self.max_depth {
                    while self.undo_stack.len() > depth {
                        self.undo_stack.pop_front();
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                rollback(label, action.revert(topology));
                Err(err)
            }
        }
    }

    /// Reverts the newest action. `Ok(None)` when there is nothing to undo.
    pub fn undo(
        &mut self,
        topology: &mut Topology,
        router: &Router,
    ) -> Result<Option<&'static str>, GraphError> {
        let Some(mut entry) = self.undo_stack.pop_back() else {
            return Ok(None);
        };
        if let Err(err) = entry.action.revert(topology) {
            self.undo_stack.push_back(entry);
            return Err(err);
        }
        if let Err(err) = router.recalculate(RecalcMode::Hard, topology) {
            rollback(entry.label, entry.action.apply(topology));
            self.undo_stack.push_back(entry);
            return Err(err);
        }
        debug!(action = entry.label, "undone");
        let label = entry.label;
        self.redo_stack.push(entry);
        Ok(Some(label))
    }

    /// Re-applies the newest undone action with its captured ids.
    pub fn redo(
        &mut self,
        topology: &mut Topology,
        router: &Router,
    ) -> Result<Option<&'static str>, GraphError> {
        let Some(mut entry) = self.redo_stack.pop() else {
            return Ok(None);
        };
        if let Err(err) = entry.action.apply(topology) {
            self.redo_stack.push(entry);
            return Err(err);
        }
        if let Err(err) = router.recalculate(RecalcMode::Hard, topology) {
            rollback(entry.label, entry.action.revert(topology));
            self.redo_stack.push(entry);
            return Err(err);
        }
        debug!(action = entry.label, "redone");
        let label = entry.label;
        self.undo_stack.push_back(entry);
        Ok(Some(label))
    }
}

fn rollback(label: &'static str, result: Result<(), GraphError>) {
    if let Err(err) = result {
        error!(action = label, %err, "rollback failed, topology may diverge from the active graph");
    }
}

impl fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoManager")
            .field("undo", &self.undo_stack.iter().map(|e| e.label).collect::<Vec<_>>())
            .field("redo", &self.redo_stack.iter().map(|e| e.label).collect::<Vec<_>>())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
