//! Mutable track and plugin list plus the connection registry.
//!
//! Only the control thread touches a [`Topology`]. Readers are public; every
//! mutator is crate-private and reached through a graph action so that each
//! change is undoable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::connections::{ConnectionId, PortConnection, PortConnectionRegistry};
use crate::error::GraphError;
use crate::plugin::{PluginId, PluginSlot};
use crate::port::{ControlValue, NodeKey, PortFlow, PortId, PortSpec, SignalKind};

pub type TrackId = u32;

pub const MASTER_TRACK: TrackId = 0;

/// Index of the volume control on every fader.
pub const FADER_VOLUME_PORT: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Midi,
    Bus,
    Master,
}

/// Volume and mute shared between the mixer UI and the fader node.
#[derive(Debug)]
pub struct FaderState {
    volume: Arc<ControlValue>,
    mute: AtomicBool,
}

impl FaderState {
    pub fn new() -> Self {
        Self {
            volume: Arc::new(ControlValue::new(0.0, 2.0, 1.0)),
            mute: AtomicBool::new(false),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    pub fn volume_control(&self) -> &Arc<ControlValue> {
        &self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.mute.store(muted, Ordering::Relaxed);
    }
}

impl Default for FaderState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    pub plugins: Vec<PluginId>,
    pub fader: Arc<FaderState>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            plugins: Vec::new(),
            fader: Arc::new(FaderState::new()),
        }
    }

    pub fn processor_key(&self) -> NodeKey {
        NodeKey::TrackProcessor(self.id)
    }

    pub fn fader_key(&self) -> NodeKey {
        NodeKey::Fader(self.id)
    }

    /// Processor, inserts and fader in signal order.
    pub fn chain(&self) -> Vec<NodeKey> {
        let mut chain = Vec::with_capacity(self.plugins.len() + 2);
        chain.push(self.processor_key());
        chain.extend(self.plugins.iter().map(|id| NodeKey::Plugin(*id)));
        chain.push(self.fader_key());
        chain
    }
}

/// Everything needed to put a deleted track back.
#[derive(Debug, Clone)]
pub(crate) struct RemovedTrack {
    pub index: usize,
    pub track: Track,
    pub plugins: Vec<Arc<PluginSlot>>,
    pub connections: Vec<PortConnection>,
}

/// Result of inserting a plugin into a track's chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct PluginInsert {
    /// Locked edges that bypassed the new slot.
    pub bridged: Vec<PortConnection>,
}

/// Everything needed to put a removed plugin back.
#[derive(Debug, Clone)]
pub(crate) struct RemovedPlugin {
    pub track: TrackId,
    pub position: usize,
    pub slot: Arc<PluginSlot>,
    pub connections: Vec<PortConnection>,
    pub bridge: Vec<PortConnection>,
}

#[derive(Debug)]
pub struct Topology {
    sample_rate: u32,
    max_block: u32,
    hardware_inputs: u16,
    tracks: Vec<Track>,
    plugins: HashMap<PluginId, Arc<PluginSlot>>,
    registry: PortConnectionRegistry,
    next_track: TrackId,
    next_plugin: u64,
    generation: u64,
}

impl Topology {
    /// Creates the fixed nodes and the master track.
    pub fn new(config: &EngineConfig) -> Result<Self, GraphError> {
        Self::with_connections(config, &[])
    }

    /// Like [`Topology::new`], but structural edges found in `previous` keep
    /// their ids and fresh ids are allocated above every id in `previous`.
    pub(crate) fn with_connections(
        config: &EngineConfig,
        previous: &[PortConnection],
    ) -> Result<Self, GraphError> {
        let mut topology = Self {
            sample_rate: config.sample_rate,
            max_block: config.max_block,
            hardware_inputs: config.hardware_inputs,
            tracks: Vec::new(),
            plugins: HashMap::new(),
            registry: PortConnectionRegistry::new(),
            next_track: MASTER_TRACK + 1,
            next_plugin: 1,
            generation: 0,
        };
        let input_ports = hardware_input_ports(config.hardware_inputs);
        topology
            .registry
            .register_ports(NodeKey::HardwareInput, input_ports)?;
        topology
            .registry
            .register_ports(NodeKey::Monitor, monitor_ports())?;
        if let Some(last) = previous.iter().map(|conn| conn.id).max() {
            topology.registry.reserve_ids(last)?;
        }
        let master = Track::new(MASTER_TRACK, "Master", TrackKind::Master);
        topology.insert_track(0, master, previous)?;
        Ok(topology)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_block(&self) -> u32 {
        self.max_block
    }

    pub fn hardware_inputs(&self) -> u16 {
        self.hardware_inputs
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn master_track(&self) -> Option<&Track> {
        self.track(MASTER_TRACK)
    }

    pub fn plugin(&self, id: PluginId) -> Option<&Arc<PluginSlot>> {
        self.plugins.get(&id)
    }

    pub fn plugin_track(&self, id: PluginId) -> Option<TrackId> {
        self.tracks
            .iter()
            .find(|track| track.plugins.contains(&id))
            .map(|track| track.id)
    }

    pub fn registry(&self) -> &PortConnectionRegistry {
        &self.registry
    }

    /// Bumped on every structural or routing mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Every schedulable node in a stable order: hardware input, then each
    /// track's chain, then the monitor.
    pub fn node_keys(&self) -> Vec<NodeKey> {
        let mut keys = vec![NodeKey::HardwareInput];
        for track in &self.tracks {
            keys.extend(track.chain());
        }
        keys.push(NodeKey::Monitor);
        keys
    }

    /// Algorithmic latency currently reported by a node.
    pub fn node_latency(&self, node: NodeKey) -> u32 {
        match node {
            NodeKey::Plugin(id) => self.plugins.get(&id).map(|slot| slot.latency()).unwrap_or(0),
            _ => 0,
        }
    }

    pub(crate) fn registry_mut(&mut self) -> &mut PortConnectionRegistry {
        self.touch();
        &mut self.registry
    }

    pub(crate) fn allocate_track_id(&mut self) -> Result<TrackId, GraphError> {
        let id = self.next_track;
        self.next_track = id.checked_add(1).ok_or(GraphError::IdSpaceExhausted)?;
        Ok(id)
    }

    pub(crate) fn allocate_plugin_id(&mut self) -> Result<PluginId, GraphError> {
        let id = PluginId(self.next_plugin);
        self.next_plugin = id.0.checked_add(1).ok_or(GraphError::IdSpaceExhausted)?;
        Ok(id)
    }

    /// Registers a track's processor and fader and wires its locked chain.
    ///
    /// Connections listed in `previous` are restored with their ids instead
    /// of being created anew.
    pub(crate) fn insert_track(
        &mut self,
        index: usize,
        track: Track,
        previous: &[PortConnection],
    ) -> Result<Vec<PortConnection>, GraphError> {
        if self.track(track.id).is_some() {
            return Err(GraphError::InvalidState("track id already in use"));
        }
        let next_track = track.id.checked_add(1).ok_or(GraphError::IdSpaceExhausted)?;
        if track.kind == TrackKind::Master && track.id != MASTER_TRACK {
            return Err(GraphError::InvalidState("only one master track may exist"));
        }
        if track.kind != TrackKind::Master && self.master_track().is_none() {
            return Err(GraphError::NotFound("master track"));
        }
        if !track.plugins.is_empty() {
            return Err(GraphError::InvalidState("new track must not carry plugins"));
        }
        self.registry
            .register_ports(track.processor_key(), processor_ports(&track))?;
        if let Err(err) = self
            .registry
            .register_ports(track.fader_key(), fader_ports(&track))
        {
            let _ = self.registry.unregister_node(track.processor_key());
            return Err(err);
        }

        let mut pairs = self.chain_pairs(track.processor_key(), track.fader_key());
        let downstream = if track.kind == TrackKind::Master {
            NodeKey::Monitor
        } else {
            NodeKey::TrackProcessor(MASTER_TRACK)
        };
        pairs.extend(self.chain_pairs(track.fader_key(), downstream));

        let id = track.id;
        let processor = track.processor_key();
        let fader = track.fader_key();
        match self.link(&pairs, previous) {
            Ok(created) => {
                self.tracks.insert(index.min(self.tracks.len()), track);
                self.next_track = self.next_track.max(next_track);
                self.touch();
                Ok(created)
            }
            Err(err) => {
                let _ = self.registry.unregister_node(processor);
                let _ = self.registry.unregister_node(fader);
                Err(err)
            }
        }
    }

    /// Removes a track together with its plugins and every edge touching them.
    pub(crate) fn remove_track(&mut self, id: TrackId) -> Result<RemovedTrack, GraphError> {
        if id == MASTER_TRACK {
            return Err(GraphError::InvalidState("master track cannot be deleted"));
        }
        let index = self
            .tracks
            .iter()
            .position(|track| track.id == id)
            .ok_or(GraphError::NotFound("track"))?;
        let track = self.tracks.remove(index);
        let mut connections = Vec::new();
        let mut plugins = Vec::with_capacity(track.plugins.len());
        for node in track.chain() {
            connections.extend(self.registry.unregister_node(node)?);
            if let NodeKey::Plugin(plugin) = node {
                if let Some(slot) = self.plugins.remove(&plugin) {
                    plugins.push(slot);
                }
            }
        }
        connections.sort_by_key(|conn| conn.id);
        self.touch();
        Ok(RemovedTrack {
            index,
            track,
            plugins,
            connections,
        })
    }

    /// Puts back a track captured by [`Topology::remove_track`].
    pub(crate) fn restore_track(&mut self, removed: &RemovedTrack) -> Result<(), GraphError> {
        if self.track(removed.track.id).is_some() {
            return Err(GraphError::InvalidState("track id already in use"));
        }
        let track = &removed.track;
        self.registry
            .register_ports(track.processor_key(), processor_ports(track))?;
        self.registry
            .register_ports(track.fader_key(), fader_ports(track))?;
        for slot in &removed.plugins {
            self.registry.register_ports(slot.node_key(), slot.port_specs())?;
            slot.reset();
            self.plugins.insert(slot.id(), Arc::clone(slot));
        }
        for connection in &removed.connections {
            self.registry.restore(connection.clone())?;
        }
        let index = removed.index.min(self.tracks.len());
        self.tracks.insert(index, removed.track.clone());
        self.touch();
        Ok(())
    }

    /// Inserts `slot` at `position` in the track's chain, rewiring the locked
    /// edges around it.
    pub(crate) fn insert_plugin(
        &mut self,
        track: TrackId,
        position: usize,
        slot: Arc<PluginSlot>,
        previous: &[PortConnection],
    ) -> Result<PluginInsert, GraphError> {
        if self.plugins.contains_key(&slot.id()) {
            return Err(GraphError::InvalidState("plugin already hosted"));
        }
        let track_index = self.track_index(track)?;
        let chain = self.tracks[track_index].chain();
        let position = position.min(self.tracks[track_index].plugins.len());
        let upstream = chain[position];
        let downstream = chain[position + 1];
        let node = slot.node_key();

        let bridged_ids: Vec<ConnectionId> = self
            .registry
            .connections()
            .iter()
            .filter(|conn| {
                conn.locked && conn.source.node == upstream && conn.destination.node == downstream
            })
            .map(|conn| conn.id)
            .collect();
        let mut bridged = Vec::with_capacity(bridged_ids.len());
        for id in bridged_ids {
            bridged.push(self.registry.disconnect(id)?);
        }

        let outcome = self
            .registry
            .register_ports(node, slot.port_specs())
            .and_then(|_| {
                let mut pairs = self.chain_pairs(upstream, node);
                pairs.extend(self.chain_pairs(node, downstream));
                self.link(&pairs, previous)
            });
        if let Err(err) = outcome {
            if self.registry.contains_node(node) {
                let _ = self.registry.unregister_node(node);
            }
            for connection in bridged {
                let _ = self.registry.restore(connection);
            }
            return Err(err);
        }

        self.tracks[track_index].plugins.insert(position, slot.id());
        self.plugins.insert(slot.id(), slot);
        self.touch();
        Ok(PluginInsert { bridged })
    }

    /// Removes a plugin from its chain and bridges its neighbours.
    ///
    /// Bridge edges listed in `previous` keep their ids.
    pub(crate) fn remove_plugin(
        &mut self,
        id: PluginId,
        previous: &[PortConnection],
    ) -> Result<RemovedPlugin, GraphError> {
        let track = self.plugin_track(id).ok_or(GraphError::NotFound("plugin"))?;
        let track_index = self.track_index(track)?;
        let position = self.tracks[track_index]
            .plugins
            .iter()
            .position(|plugin| *plugin == id)
            .ok_or(GraphError::NotFound("plugin"))?;
        let chain = self.tracks[track_index].chain();
        let upstream = chain[position];
        let downstream = chain[position + 2];

        let slot = self
            .plugins
            .get(&id)
            .cloned()
            .ok_or(GraphError::NotFound("plugin"))?;
        let connections = self.registry.unregister_node(slot.node_key())?;
        let pairs = self.chain_pairs(upstream, downstream);
        let bridge = match self.link(&pairs, previous) {
            Ok(bridge) => bridge,
            Err(err) => {
                self.registry.register_ports(slot.node_key(), slot.port_specs())?;
                for connection in &connections {
                    self.registry.restore(connection.clone())?;
                }
                return Err(err);
            }
        };
        self.plugins.remove(&id);
        self.tracks[track_index].plugins.remove(position);
        self.touch();
        Ok(RemovedPlugin {
            track,
            position,
            slot,
            connections,
            bridge,
        })
    }

    /// Puts back a plugin captured by [`Topology::remove_plugin`].
    pub(crate) fn restore_plugin(&mut self, removed: &RemovedPlugin) -> Result<(), GraphError> {
        let track_index = self.track_index(removed.track)?;
        for connection in &removed.bridge {
            self.registry.disconnect(connection.id)?;
        }
        let slot = Arc::clone(&removed.slot);
        self.registry.register_ports(slot.node_key(), slot.port_specs())?;
        // Tail left over from before the removal must not play back.
        slot.reset();
        for connection in &removed.connections {
            self.registry.restore(connection.clone())?;
        }
        let plugins = &mut self.tracks[track_index].plugins;
        let position = removed.position.min(plugins.len());
        plugins.insert(position, slot.id());
        self.plugins.insert(slot.id(), slot);
        self.touch();
        Ok(())
    }

    /// Appends a hosted plugin on project load, outside of any action.
    pub(crate) fn adopt_plugin(
        &mut self,
        track: TrackId,
        slot: Arc<PluginSlot>,
        previous: &[PortConnection],
    ) -> Result<(), GraphError> {
        let position = self
            .track(track)
            .map(|track| track.plugins.len())
            .ok_or(GraphError::NotFound("track"))?;
        let next_plugin = slot.id().0.checked_add(1).ok_or(GraphError::IdSpaceExhausted)?;
        self.insert_plugin(track, position, slot, previous)?;
        self.next_plugin = self.next_plugin.max(next_plugin);
        Ok(())
    }

    fn track_index(&self, id: TrackId) -> Result<usize, GraphError> {
        self.tracks
            .iter()
            .position(|track| track.id == id)
            .ok_or(GraphError::NotFound("track"))
    }

    /// Pairs outputs of `upstream` with inputs of `downstream` of the same
    /// kind, by position, for audio and MIDI.
    fn chain_pairs(&self, upstream: NodeKey, downstream: NodeKey) -> Vec<(PortId, PortId)> {
        let mut pairs = Vec::new();
        for kind in [SignalKind::Audio, SignalKind::Midi] {
            let outputs = self
                .registry
                .outputs_of(upstream)
                .iter()
                .filter(|spec| spec.kind == kind);
            let inputs = self
                .registry
                .inputs_of(downstream)
                .iter()
                .filter(|spec| spec.kind == kind);
            pairs.extend(outputs.zip(inputs).map(|(out, input)| (out.id, input.id)));
        }
        pairs
    }

    fn link(
        &mut self,
        pairs: &[(PortId, PortId)],
        previous: &[PortConnection],
    ) -> Result<Vec<PortConnection>, GraphError> {
        let mut created = Vec::with_capacity(pairs.len());
        for (source, destination) in pairs {
            let reused = previous
                .iter()
                .find(|conn| conn.source == *source && conn.destination == *destination);
            let result = match reused {
                Some(connection) => self
                    .registry
                    .restore(connection.clone())
                    .map(|_| connection.id),
                None => self.registry.connect_locked(*source, *destination),
            };
            match result {
                Ok(id) => {
                    if let Some(connection) = self.registry.connection(id) {
                        created.push(connection.clone());
                    }
                }
                Err(err) => {
                    for connection in &created {
                        let _ = self.registry.disconnect(connection.id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(created)
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

fn hardware_input_ports(channels: u16) -> Vec<PortSpec> {
    let node = NodeKey::HardwareInput;
    let mut ports: Vec<PortSpec> = (0..channels)
        .map(|index| {
            PortSpec::new(
                PortId::output(node, index),
                SignalKind::Audio,
                format!("capture {}", index + 1),
            )
        })
        .collect();
    ports.push(PortSpec::new(
        PortId::output(node, channels),
        SignalKind::Midi,
        "midi capture",
    ));
    ports
}

fn monitor_ports() -> Vec<PortSpec> {
    let node = NodeKey::Monitor;
    vec![
        PortSpec::new(PortId::input(node, 0), SignalKind::Audio, "playback L"),
        PortSpec::new(PortId::input(node, 1), SignalKind::Audio, "playback R"),
    ]
}

fn processor_ports(track: &Track) -> Vec<PortSpec> {
    let node = track.processor_key();
    match track.kind {
        TrackKind::Midi => vec![
            PortSpec::new(PortId::input(node, 0), SignalKind::Midi, "midi in"),
            PortSpec::new(PortId::output(node, 0), SignalKind::Midi, "midi out"),
        ],
        TrackKind::Audio | TrackKind::Bus | TrackKind::Master => stereo_ports(node),
    }
}

fn fader_ports(track: &Track) -> Vec<PortSpec> {
    let node = track.fader_key();
    let mut ports = stereo_ports(node);
    ports.push(PortSpec::new(PortId::input(node, 2), SignalKind::Midi, "midi in"));
    ports.push(PortSpec::control(
        PortId::input(node, FADER_VOLUME_PORT),
        "volume",
        Arc::clone(track.fader.volume_control()),
    ));
    ports.push(PortSpec::new(PortId::output(node, 2), SignalKind::Midi, "midi out"));
    ports
}

fn stereo_ports(node: NodeKey) -> Vec<PortSpec> {
    let mut ports = Vec::with_capacity(4);
    for flow in [PortFlow::Input, PortFlow::Output] {
        for (index, side) in ["L", "R"].into_iter().enumerate() {
            let id = PortId {
                node,
                flow,
                index: index as u16,
            };
            let label = match flow {
                PortFlow::Input => format!("in {side}"),
                PortFlow::Output => format!("out {side}"),
            };
            ports.push(PortSpec::new(id, SignalKind::Audio, label));
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::GainPlugin;

    fn topology() -> Topology {
        Topology::new(&EngineConfig::new(48_000, 64).with_workers(0)).unwrap()
    }

    fn locked_edges(topology: &Topology) -> Vec<(NodeKey, NodeKey)> {
        let mut edges: Vec<_> = topology
            .registry()
            .connections()
            .iter()
            .filter(|conn| conn.locked)
            .map(|conn| (conn.source.node, conn.destination.node))
            .collect();
        edges.dedup();
        edges
    }

    #[test]
    fn master_chain_reaches_monitor() {
        let topology = topology();
        assert_eq!(topology.tracks().len(), 1);
        assert_eq!(
            locked_edges(&topology),
            vec![
                (NodeKey::TrackProcessor(0), NodeKey::Fader(0)),
                (NodeKey::Fader(0), NodeKey::Monitor),
            ]
        );
        assert_eq!(
            topology.node_keys(),
            vec![
                NodeKey::HardwareInput,
                NodeKey::TrackProcessor(0),
                NodeKey::Fader(0),
                NodeKey::Monitor,
            ]
        );
    }

    #[test]
    fn plugin_insert_and_removal_rewire_the_chain() {
        let mut topology = topology();
        let id = topology.allocate_track_id().unwrap();
        let created = topology
            .insert_track(1, Track::new(id, "Drums", TrackKind::Audio), &[])
            .unwrap();
        assert_eq!(created.len(), 4);

        let plugin = topology.allocate_plugin_id().unwrap();
        let slot = Arc::new(PluginSlot::new(plugin, Box::new(GainPlugin::new()), 48_000, 64));
        let insert = topology.insert_plugin(id, 0, slot, &[]).unwrap();
        assert_eq!(insert.bridged.len(), 2);
        let touching = topology
            .registry()
            .connections()
            .iter()
            .filter(|conn| {
                conn.source.node == NodeKey::Plugin(plugin)
                    || conn.destination.node == NodeKey::Plugin(plugin)
            })
            .count();
        assert_eq!(touching, 4);
        assert_eq!(topology.plugin_track(plugin), Some(id));

        let removed = topology.remove_plugin(plugin, &insert.bridged).unwrap();
        let bridge_ids: Vec<_> = removed.bridge.iter().map(|conn| conn.id).collect();
        let original_ids: Vec<_> = insert.bridged.iter().map(|conn| conn.id).collect();
        assert_eq!(bridge_ids, original_ids);
        assert!(topology.plugin(plugin).is_none());

        topology.restore_plugin(&removed).unwrap();
        assert_eq!(topology.track(id).unwrap().plugins, vec![plugin]);
    }

    struct CountResets(Arc<std::sync::atomic::AtomicUsize>);

    impl crate::plugin::Plugin for CountResets {
        fn descriptor(&self) -> crate::plugin::PluginDescriptor {
            crate::plugin::PluginDescriptor::new("test.count-resets", "Count resets")
                .with_audio(2, 2)
        }

        fn reset(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn process(&mut self, _buffers: &mut crate::plugin::PluginBuffers<'_>, _frames: usize) {}
    }

    #[test]
    fn restored_plugins_start_from_a_clean_state() {
        let mut topology = topology();
        let track = topology.allocate_track_id().unwrap();
        topology
            .insert_track(1, Track::new(track, "Echo", TrackKind::Audio), &[])
            .unwrap();
        let resets = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let plugin = topology.allocate_plugin_id().unwrap();
        let instance = Box::new(CountResets(Arc::clone(&resets)));
        let slot = PluginSlot::new(plugin, instance, 48_000, 64);
        let insert = topology.insert_plugin(track, 0, Arc::new(slot), &[]).unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 0);

        let removed = topology.remove_plugin(plugin, &insert.bridged).unwrap();
        topology.restore_plugin(&removed).unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        let removed = topology.remove_track(track).unwrap();
        topology.restore_track(&removed).unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 2);
        assert_eq!(topology.track(track).unwrap().plugins, vec![plugin]);
    }

    #[test]
    fn master_cannot_be_removed() {
        let mut topology = topology();
        assert_eq!(
            topology.remove_track(MASTER_TRACK).unwrap_err(),
            GraphError::InvalidState("master track cannot be deleted")
        );
    }
}
