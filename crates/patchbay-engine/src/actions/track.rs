use crate::error::GraphError;
use crate::topology::{RemovedTrack, Topology, Track, TrackId, TrackKind};

use super::{not_applied, GraphAction};

/// Appends a track with its locked processor -> fader -> master chain.
#[derive(Debug, Clone)]
pub struct CreateTrackAction {
    name: String,
    kind: TrackKind,
    track: Option<TrackId>,
    // Captured on revert so redo brings back the same fader state and ids.
    removed: Option<RemovedTrack>,
}

impl CreateTrackAction {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            name: name.into(),
            kind,
            track: None,
            removed: None,
        }
    }

    /// Id of the created track once the action has been applied.
    pub fn track_id(&self) -> Option<TrackId> {
        self.track
    }
}

impl GraphAction for CreateTrackAction {
    fn label(&self) -> &'static str {
        "Create track"
    }

    fn apply(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        if let Some(removed) = &self.removed {
            topology.restore_track(removed)?;
            self.removed = None;
            return Ok(());
        }
        if self.kind == TrackKind::Master {
            return Err(GraphError::InvalidState("only one master track may exist"));
        }
        let id = topology.allocate_track_id()?;
        let index = topology.tracks().len();
        topology.insert_track(index, Track::new(id, self.name.clone(), self.kind), &[])?;
        self.track = Some(id);
        Ok(())
    }

    fn revert(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        let id = self.track.ok_or_else(not_applied)?;
        self.removed = Some(topology.remove_track(id)?);
        Ok(())
    }
}

/// Removes a track, its plugins and every connection touching them.
#[derive(Debug, Clone)]
pub struct DeleteTrackAction {
    track: TrackId,
    removed: Option<RemovedTrack>,
}

impl DeleteTrackAction {
    pub fn new(track: TrackId) -> Self {
        Self {
            track,
            removed: None,
        }
    }
}

impl GraphAction for DeleteTrackAction {
    fn label(&self) -> &'static str {
        "Delete track"
    }

    fn apply(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        self.removed = Some(topology.remove_track(self.track)?);
        Ok(())
    }

    fn revert(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        let removed = self.removed.take().ok_or_else(not_applied)?;
        if let Err(err) = topology.restore_track(&removed) {
            self.removed = Some(removed);
            return Err(err);
        }
        Ok(())
    }
}
