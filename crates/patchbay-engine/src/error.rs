use thiserror::Error;

use crate::port::{NodeKey, SignalKind};

/// Errors raised while editing the routing topology or rebuilding the graph.
///
/// All of these are produced and handled on the control thread; the audio
/// thread only ever sees schedules that already passed validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cannot connect {from:?} output to {to:?} input")]
    IncompatibleTypes { from: SignalKind, to: SignalKind },
    #[error("connection already exists")]
    DuplicateConnection,
    #[error("routing graph contains a cycle through {} node(s)", unresolved.len())]
    CyclicGraph { unresolved: Vec<NodeKey> },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid connection: {0}")]
    InvalidConnection(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("id space exhausted")]
    IdSpaceExhausted,
}

impl GraphError {
    pub fn is_cycle(&self) -> bool {
        matches!(self, GraphError::CyclicGraph { .. })
    }
}
