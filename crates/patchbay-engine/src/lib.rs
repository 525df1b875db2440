//! Patchbay Engine
//! ===============
//! Real-time audio/MIDI routing graph. Tracks, hosted plugins and port
//! connections are turned into a latency-compensated schedule that runs once
//! per audio callback across a pool of worker threads, while the topology is
//! edited through undoable actions on the control thread.

pub mod actions;
pub mod config;
pub mod connections;
mod delay;
#[cfg(feature = "native")]
pub mod driver;
pub mod engine;
pub mod error;
pub mod graph;
pub mod node;
pub mod plugin;
pub mod plugins;
pub mod port;
pub mod project;
pub mod router;
mod schedule;
pub mod scratch;
pub mod topology;

pub use actions::{
    ConnectionChange, CreatePluginAction, CreateTrackAction, DeletePluginAction,
    DeleteTrackAction, GraphAction, PortConnectionAction, UndoManager,
};
pub use config::EngineConfig;
pub use connections::{ConnectionId, PortConnection, PortConnectionRegistry};
pub use engine::{AudioEngine, AudioHandle, PollReport};
pub use error::GraphError;
pub use graph::{Graph, GraphSnapshot};
pub use plugin::{Plugin, PluginDescriptor, PluginFactory, PluginId};
pub use port::{MidiEvent, NodeKey, PortFlow, PortId, SignalKind};
pub use project::ProjectSnapshot;
pub use router::{CycleMetrics, CycleReport, RecalcMode, RecalcOutcome, Router, RouterState};
pub use scratch::{reset_rt_allocation_count, rt_allocation_count};
pub use topology::{Topology, Track, TrackId, TrackKind, MASTER_TRACK};
pub use patchbay_rt::RtEvent;
