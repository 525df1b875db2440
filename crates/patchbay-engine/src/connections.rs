//! Port table and directed port-to-port edges.
//!
//! The registry is the single source of truth for routing. It enforces local
//! edge legality (direction, signal kinds, no self-loops, no duplicates); the
//! global acyclicity check happens when the graph is built.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::port::{NodeKey, PortFlow, PortId, PortSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConnection {
    pub id: ConnectionId,
    pub source: PortId,
    pub destination: PortId,
    pub multiplier: f32,
    pub enabled: bool,
    /// Structural edge owned by a track or plugin chain.
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Default, Clone)]
struct NodePorts {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

#[derive(Debug, Default)]
pub struct PortConnectionRegistry {
    nodes: HashMap<NodeKey, NodePorts>,
    // Kept sorted by id, which is also creation order.
    connections: Vec<PortConnection>,
    by_destination: HashMap<PortId, Vec<ConnectionId>>,
    by_source: HashMap<PortId, Vec<ConnectionId>>,
    next_id: u64,
    dirty: bool,
    generation: u64,
}

impl PortConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Adds the port list of a newly instantiated node.
    pub(crate) fn register_ports(
        &mut self,
        node: NodeKey,
        ports: Vec<PortSpec>,
    ) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node) {
            return Err(GraphError::InvalidState("node ports already registered"));
        }
        let mut entry = NodePorts::default();
        for spec in ports {
            if spec.id.node != node {
                return Err(GraphError::InvalidState("port registered under foreign node"));
            }
            match spec.id.flow {
                PortFlow::Input => entry.inputs.push(spec),
                PortFlow::Output => entry.outputs.push(spec),
            }
        }
        entry.inputs.sort_by_key(|spec| spec.id.index);
        entry.outputs.sort_by_key(|spec| spec.id.index);
        self.nodes.insert(node, entry);
        self.mark_dirty();
        Ok(())
    }

    /// Drops a node's ports together with every connection touching them.
    ///
    /// The removed connections are returned so the caller can restore them.
    pub(crate) fn unregister_node(
        &mut self,
        node: NodeKey,
    ) -> Result<Vec<PortConnection>, GraphError> {
        if !self.nodes.contains_key(&node) {
            return Err(GraphError::NotFound("node"));
        }
        let removed_ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|conn| conn.source.node == node || conn.destination.node == node)
            .map(|conn| conn.id)
            .collect();
        let mut removed = Vec::with_capacity(removed_ids.len());
        for id in removed_ids {
            removed.push(self.disconnect(id)?);
        }
        self.nodes.remove(&node);
        self.mark_dirty();
        Ok(removed)
    }

    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn inputs_of(&self, node: NodeKey) -> &[PortSpec] {
        self.nodes
            .get(&node)
            .map(|ports| ports.inputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn outputs_of(&self, node: NodeKey) -> &[PortSpec] {
        self.nodes
            .get(&node)
            .map(|ports| ports.outputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn port(&self, id: PortId) -> Option<&PortSpec> {
        let ports = self.nodes.get(&id.node)?;
        let list = match id.flow {
            PortFlow::Input => &ports.inputs,
            PortFlow::Output => &ports.outputs,
        };
        list.iter().find(|spec| spec.id == id)
    }

    /// Checks local legality of a prospective edge.
    pub fn validate(&self, source: PortId, destination: PortId) -> Result<(), GraphError> {
        let source_spec = self.port(source).ok_or(GraphError::NotFound("source port"))?;
        let dest_spec = self
            .port(destination)
            .ok_or(GraphError::NotFound("destination port"))?;
        if source.flow != PortFlow::Output {
            return Err(GraphError::InvalidConnection("source must be an output port"));
        }
        if destination.flow != PortFlow::Input {
            return Err(GraphError::InvalidConnection(
                "destination must be an input port",
            ));
        }
        if source.node == destination.node {
            return Err(GraphError::InvalidConnection("node cannot feed itself"));
        }
        if !source_spec.kind.can_feed(dest_spec.kind) {
            return Err(GraphError::IncompatibleTypes {
                from: source_spec.kind,
                to: dest_spec.kind,
            });
        }
        if self.find_connection(source, destination).is_some() {
            return Err(GraphError::DuplicateConnection);
        }
        Ok(())
    }

    pub fn connect(
        &mut self,
        source: PortId,
        destination: PortId,
        multiplier: f32,
    ) -> Result<ConnectionId, GraphError> {
        self.insert_new(source, destination, multiplier, false)
    }

    /// Creates a structural connection that user actions may not remove.
    pub(crate) fn connect_locked(
        &mut self,
        source: PortId,
        destination: PortId,
    ) -> Result<ConnectionId, GraphError> {
        self.insert_new(source, destination, 1.0, true)
    }

    fn insert_new(
        &mut self,
        source: PortId,
        destination: PortId,
        multiplier: f32,
        locked: bool,
    ) -> Result<ConnectionId, GraphError> {
        self.validate(source, destination)?;
        let id = ConnectionId(self.next_id);
        self.next_id = successor(id)?;
        self.insert(PortConnection {
            id,
            source,
            destination,
            multiplier,
            enabled: true,
            locked,
        });
        Ok(id)
    }

    /// Makes sure ids up to and including `last` are never handed out.
    pub(crate) fn reserve_ids(&mut self, last: ConnectionId) -> Result<(), GraphError> {
        self.next_id = self.next_id.max(successor(last)?);
        Ok(())
    }

    /// Re-inserts a connection removed earlier, keeping its id.
    pub fn restore(&mut self, connection: PortConnection) -> Result<(), GraphError> {
        if self.connection(connection.id).is_some() {
            return Err(GraphError::DuplicateConnection);
        }
        self.validate(connection.source, connection.destination)?;
        self.next_id = self.next_id.max(successor(connection.id)?);
        self.insert(connection);
        Ok(())
    }

    fn insert(&mut self, connection: PortConnection) {
        let id = connection.id;
        insert_sorted(
            self.by_destination.entry(connection.destination).or_default(),
            id,
        );
        insert_sorted(self.by_source.entry(connection.source).or_default(), id);
        let position = self
            .connections
            .partition_point(|existing| existing.id < id);
        self.connections.insert(position, connection);
        self.mark_dirty();
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<PortConnection, GraphError> {
        let position = self
            .index_of(id)
            .ok_or(GraphError::NotFound("connection"))?;
        let removed = self.connections.remove(position);
        remove_id(&mut self.by_destination, removed.destination, id);
        remove_id(&mut self.by_source, removed.source, id);
        self.mark_dirty();
        Ok(removed)
    }

    /// Returns the previous enabled flag.
    pub fn set_enabled(&mut self, id: ConnectionId, enabled: bool) -> Result<bool, GraphError> {
        let position = self
            .index_of(id)
            .ok_or(GraphError::NotFound("connection"))?;
        let previous = std::mem::replace(&mut self.connections[position].enabled, enabled);
        if previous != enabled {
            self.mark_dirty();
        }
        Ok(previous)
    }

    /// Returns the previous multiplier.
    pub fn set_multiplier(&mut self, id: ConnectionId, multiplier: f32) -> Result<f32, GraphError> {
        let position = self
            .index_of(id)
            .ok_or(GraphError::NotFound("connection"))?;
        let previous = std::mem::replace(&mut self.connections[position].multiplier, multiplier);
        self.mark_dirty();
        Ok(previous)
    }

    /// Incoming edges of `destination` in insertion order.
    pub fn get_sources(&self, destination: PortId) -> Vec<&PortConnection> {
        self.resolve(self.by_destination.get(&destination))
    }

    /// Outgoing edges of `source` in insertion order.
    pub fn get_dests(&self, source: PortId) -> Vec<&PortConnection> {
        self.resolve(self.by_source.get(&source))
    }

    pub fn find_connection(&self, source: PortId, destination: PortId) -> Option<&PortConnection> {
        self.by_destination
            .get(&destination)?
            .iter()
            .filter_map(|id| self.connection(*id))
            .find(|conn| conn.source == source)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&PortConnection> {
        self.index_of(id).map(|index| &self.connections[index])
    }

    pub fn connections(&self) -> &[PortConnection] {
        &self.connections
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Bumped on every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.generation = self.generation.wrapping_add(1);
    }

    fn index_of(&self, id: ConnectionId) -> Option<usize> {
        self.connections
            .binary_search_by_key(&id, |conn| conn.id)
            .ok()
    }

    fn resolve(&self, ids: Option<&Vec<ConnectionId>>) -> Vec<&PortConnection> {
        ids.map(|ids| ids.iter().filter_map(|id| self.connection(*id)).collect())
            .unwrap_or_default()
    }
}

fn successor(id: ConnectionId) -> Result<u64, GraphError> {
    id.0.checked_add(1).ok_or(GraphError::IdSpaceExhausted)
}

fn insert_sorted(ids: &mut Vec<ConnectionId>, id: ConnectionId) {
    let position = ids.partition_point(|existing| *existing < id);
    ids.insert(position, id);
}

fn remove_id(map: &mut HashMap<PortId, Vec<ConnectionId>>, port: PortId, id: ConnectionId) {
    if let Some(ids) = map.get_mut(&port) {
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            map.remove(&port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginId;
    use crate::port::SignalKind;

    fn plugin(id: u64) -> NodeKey {
        NodeKey::Plugin(PluginId(id))
    }

    fn registry_with(nodes: &[NodeKey]) -> PortConnectionRegistry {
        let mut registry = PortConnectionRegistry::new();
        for node in nodes {
            registry
                .register_ports(
                    *node,
                    vec![
                        PortSpec::new(PortId::input(*node, 0), SignalKind::Audio, "in"),
                        PortSpec::new(PortId::output(*node, 0), SignalKind::Audio, "out"),
                        PortSpec::new(PortId::input(*node, 1), SignalKind::Midi, "midi in"),
                        PortSpec::new(PortId::output(*node, 1), SignalKind::Cv, "cv out"),
                    ],
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn connect_rejects_illegal_edges() {
        let a = plugin(1);
        let b = plugin(2);
        let mut registry = registry_with(&[a, b]);

        assert_eq!(
            registry.connect(PortId::output(a, 0), PortId::input(b, 1), 1.0),
            Err(GraphError::IncompatibleTypes {
                from: SignalKind::Audio,
                to: SignalKind::Midi,
            })
        );
        assert!(matches!(
            registry.connect(PortId::output(a, 0), PortId::input(a, 0), 1.0),
            Err(GraphError::InvalidConnection(_))
        ));
        assert!(matches!(
            registry.connect(PortId::input(a, 0), PortId::input(b, 0), 1.0),
            Err(GraphError::InvalidConnection(_))
        ));
        assert_eq!(
            registry.connect(PortId::output(a, 5), PortId::input(b, 0), 1.0),
            Err(GraphError::NotFound("source port"))
        );

        registry
            .connect(PortId::output(a, 0), PortId::input(b, 0), 1.0)
            .unwrap();
        assert_eq!(
            registry.connect(PortId::output(a, 0), PortId::input(b, 0), 0.5),
            Err(GraphError::DuplicateConnection)
        );
    }

    #[test]
    fn fan_in_and_fan_out_keep_insertion_order() {
        let a = plugin(1);
        let b = plugin(2);
        let c = plugin(3);
        let mut registry = registry_with(&[a, b, c]);
        let first = registry
            .connect(PortId::output(b, 0), PortId::input(c, 0), 1.0)
            .unwrap();
        let second = registry
            .connect(PortId::output(a, 0), PortId::input(c, 0), 1.0)
            .unwrap();
        let third = registry
            .connect(PortId::output(a, 0), PortId::input(b, 0), 1.0)
            .unwrap();

        let sources: Vec<_> = registry
            .get_sources(PortId::input(c, 0))
            .iter()
            .map(|conn| conn.id)
            .collect();
        assert_eq!(sources, vec![first, second]);
        let dests: Vec<_> = registry
            .get_dests(PortId::output(a, 0))
            .iter()
            .map(|conn| conn.id)
            .collect();
        assert_eq!(dests, vec![second, third]);
    }

    #[test]
    fn disconnect_then_restore_keeps_id_and_order() {
        let a = plugin(1);
        let b = plugin(2);
        let c = plugin(3);
        let mut registry = registry_with(&[a, b, c]);
        registry
            .connect(PortId::output(a, 0), PortId::input(c, 0), 1.0)
            .unwrap();
        let middle = registry
            .connect(PortId::output(b, 0), PortId::input(c, 0), 0.5)
            .unwrap();
        let before = registry.connections().to_vec();

        let removed = registry.disconnect(middle).unwrap();
        assert_eq!(registry.disconnect(middle), Err(GraphError::NotFound("connection")));
        registry.restore(removed).unwrap();
        assert_eq!(registry.connections(), before.as_slice());
    }

    #[test]
    fn cv_reaches_control_inputs() {
        let a = plugin(1);
        let b = plugin(2);
        let mut registry = registry_with(&[a]);
        let control = std::sync::Arc::new(crate::port::ControlValue::new(0.0, 1.0, 0.5));
        registry
            .register_ports(b, vec![PortSpec::control(PortId::input(b, 0), "gain", control)])
            .unwrap();
        let id = registry
            .connect(PortId::output(a, 1), PortId::input(b, 0), 0.25)
            .unwrap();
        assert_eq!(registry.set_multiplier(id, 0.5).unwrap(), 0.25);
        assert!(registry.set_enabled(id, false).unwrap());
        assert!(!registry.connection(id).unwrap().enabled);
    }

    #[test]
    fn unregister_returns_touching_connections() {
        let a = plugin(1);
        let b = plugin(2);
        let mut registry = registry_with(&[a, b]);
        registry
            .connect(PortId::output(a, 0), PortId::input(b, 0), 1.0)
            .unwrap();
        assert!(registry.take_dirty());
        let removed = registry.unregister_node(b).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(registry.connections().is_empty());
        assert!(registry.is_dirty());
        assert!(registry.get_dests(PortId::output(a, 0)).is_empty());
    }
}
