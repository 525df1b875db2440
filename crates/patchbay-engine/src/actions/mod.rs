//! Undoable topology mutations.
//!
//! An action only edits the [`Topology`]. Recalculating the router after each
//! apply or revert is the job of [`UndoManager`], which also rolls an action
//! back when the resulting graph is rejected.

mod plugin;
mod port_connection;
mod track;
mod undo;

pub use plugin::{CreatePluginAction, DeletePluginAction};
pub use port_connection::{ConnectionChange, PortConnectionAction};
pub use track::{CreateTrackAction, DeleteTrackAction};
pub use undo::UndoManager;

use crate::error::GraphError;
use crate::topology::Topology;

pub trait GraphAction: Send {
    fn label(&self) -> &'static str;

    /// Applies the mutation. Applying again after [`GraphAction::revert`]
    /// must reproduce the same ids rather than derive new ones.
    fn apply(&mut self, topology: &mut Topology) -> Result<(), GraphError>;

    /// Exact inverse of the last successful `apply`.
    fn revert(&mut self, topology: &mut Topology) -> Result<(), GraphError>;
}

fn not_applied() -> GraphError {
    GraphError::InvalidState("action has not been applied")
}
