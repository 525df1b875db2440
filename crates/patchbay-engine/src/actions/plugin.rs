use std::fmt;
use std::sync::Arc;

use crate::error::GraphError;
use crate::plugin::{Plugin, PluginId, PluginSlot};
use crate::topology::{PluginInsert, RemovedPlugin, Topology, TrackId};

use super::{not_applied, GraphAction};

/// Hosts a plugin instance in a track's insert chain.
pub struct CreatePluginAction {
    track: TrackId,
    position: usize,
    pending: Option<Box<dyn Plugin>>,
    slot: Option<Arc<PluginSlot>>,
    insert: Option<PluginInsert>,
    removed: Option<RemovedPlugin>,
}

impl CreatePluginAction {
    /// `position` counts inserts; anything past the end appends before the
    /// fader.
    pub fn new(track: TrackId, position: usize, plugin: Box<dyn Plugin>) -> Self {
        Self {
            track,
            position,
            pending: Some(plugin),
            slot: None,
            insert: None,
            removed: None,
        }
    }

    pub fn plugin_id(&self) -> Option<PluginId> {
        self.slot.as_ref().map(|slot| slot.id())
    }

    fn slot(&mut self, topology: &mut Topology) -> Result<Arc<PluginSlot>, GraphError> {
        if let Some(slot) = &self.slot {
            return Ok(Arc::clone(slot));
        }
        let plugin = self
            .pending
            .take()
            .ok_or(GraphError::InvalidState("plugin instance already consumed"))?;
        let id = topology.allocate_plugin_id()?;
        let slot = Arc::new(PluginSlot::new(
            id,
            plugin,
            topology.sample_rate(),
            topology.max_block(),
        ));
        self.slot = Some(Arc::clone(&slot));
        Ok(slot)
    }
}

impl fmt::Debug for CreatePluginAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatePluginAction")
            .field("track", &self.track)
            .field("position", &self.position)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl GraphAction for CreatePluginAction {
    fn label(&self) -> &'static str {
        "Create plugin"
    }

    fn apply(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        if let Some(removed) = &self.removed {
            topology.restore_plugin(removed)?;
            self.removed = None;
            return Ok(());
        }
        let slot = self.slot(topology)?;
        let insert = topology.insert_plugin(self.track, self.position, slot, &[])?;
        self.insert = Some(insert);
        Ok(())
    }

    fn revert(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        let id = self.plugin_id().ok_or_else(not_applied)?;
        let insert = self.insert.as_ref().ok_or_else(not_applied)?;
        self.removed = Some(topology.remove_plugin(id, &insert.bridged)?);
        Ok(())
    }
}

/// Removes a plugin and bridges its neighbours in the chain.
#[derive(Debug)]
pub struct DeletePluginAction {
    plugin: PluginId,
    removed: Option<RemovedPlugin>,
}

impl DeletePluginAction {
    pub fn new(plugin: PluginId) -> Self {
        Self {
            plugin,
            removed: None,
        }
    }
}

impl GraphAction for DeletePluginAction {
    fn label(&self) -> &'static str {
        "Delete plugin"
    }

    fn apply(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        let previous_bridge = self
            .removed
            .as_ref()
            .map(|removed| removed.bridge.clone())
            .unwrap_or_default();
        self.removed = Some(topology.remove_plugin(self.plugin, &previous_bridge)?);
        Ok(())
    }

    fn revert(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        let removed = self.removed.as_ref().ok_or_else(not_applied)?;
        topology.restore_plugin(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::plugins::{DelayPlugin, GainPlugin};
    use crate::topology::MASTER_TRACK;

    fn topology() -> Topology {
        Topology::new(&EngineConfig::new(48_000, 64).with_workers(0)).unwrap()
    }

    #[test]
    fn create_plugin_round_trip() {
        let mut topology = topology();
        let before = topology.registry().connections().to_vec();
        let mut action = CreatePluginAction::new(MASTER_TRACK, 0, Box::new(GainPlugin::new()));

        action.apply(&mut topology).unwrap();
        let id = action.plugin_id().unwrap();
        assert_eq!(topology.plugin_track(id), Some(MASTER_TRACK));
        let after = topology.registry().connections().to_vec();

        action.revert(&mut topology).unwrap();
        assert_eq!(topology.registry().connections(), &before[..]);

        action.apply(&mut topology).unwrap();
        assert_eq!(topology.registry().connections(), &after[..]);
    }

    #[test]
    fn delete_plugin_redo_keeps_bridge_ids() {
        let mut topology = topology();
        let mut create =
            CreatePluginAction::new(MASTER_TRACK, 0, Box::new(DelayPlugin::new(32)));
        create.apply(&mut topology).unwrap();
        let id = create.plugin_id().unwrap();
        let with_plugin = topology.registry().connections().to_vec();

        let mut delete = DeletePluginAction::new(id);
        delete.apply(&mut topology).unwrap();
        let bridged = topology.registry().connections().to_vec();
        assert!(topology.plugin(id).is_none());

        delete.revert(&mut topology).unwrap();
        assert_eq!(topology.registry().connections(), &with_plugin[..]);

        delete.apply(&mut topology).unwrap();
        assert_eq!(topology.registry().connections(), &bridged[..]);
    }
}
