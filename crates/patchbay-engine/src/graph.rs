//! Dependency graph construction, topological ordering and latency analysis.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connections::ConnectionId;
use crate::error::GraphError;
use crate::port::{NodeKey, PortId, SignalKind};
use crate::topology::Topology;

/// Enabled connection resolved against the topological order.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub connection: ConnectionId,
    pub source: PortId,
    pub destination: PortId,
    /// Kind of the destination port.
    pub kind: SignalKind,
    pub multiplier: f32,
    pub(crate) source_node: usize,
    pub(crate) destination_node: usize,
}

/// Node order and dependency structure.
///
/// Shared between a graph and its soft refreshes; only a hard rebuild
/// derives a new plan.
#[derive(Debug)]
pub struct GraphPlan {
    order: Vec<NodeKey>,
    positions: HashMap<NodeKey, usize>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    edges: Vec<GraphEdge>,
    topology_generation: u64,
}

impl GraphPlan {
    fn derive(topology: &Topology) -> Result<Self, GraphError> {
        let keys = topology.node_keys();
        let creation: HashMap<NodeKey, usize> =
            keys.iter().enumerate().map(|(index, key)| (*key, index)).collect();
        let registry = topology.registry();

        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); keys.len()];
        let mut raw_edges = Vec::new();
        for (destination_index, key) in keys.iter().enumerate() {
            for input in registry.inputs_of(*key) {
                for connection in registry.get_sources(input.id) {
                    if !connection.enabled {
                        continue;
                    }
                    let source_index = *creation
                        .get(&connection.source.node)
                        .ok_or(GraphError::NotFound("source node"))?;
                    if !predecessors[destination_index].contains(&source_index) {
                        predecessors[destination_index].push(source_index);
                    }
                    raw_edges.push((connection.clone(), input.kind, source_index, destination_index));
                }
            }
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); keys.len()];
        let mut in_degree = vec![0usize; keys.len()];
        for (node, preds) in predecessors.iter().enumerate() {
            in_degree[node] = preds.len();
            for pred in preds {
                successors[*pred].push(node);
            }
        }

        // Kahn's algorithm; ties resolve to the earliest-created node.
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| Reverse(node))
            .collect();
        let mut sorted = Vec::with_capacity(keys.len());
        while let Some(Reverse(node)) = ready.pop() {
            sorted.push(node);
            for succ in &successors[node] {
                in_degree[*succ] -= 1;
                if in_degree[*succ] == 0 {
                    ready.push(Reverse(*succ));
                }
            }
        }
        if sorted.len() != keys.len() {
            let unresolved = keys
                .iter()
                .zip(&in_degree)
                .filter(|(_, degree)| **degree > 0)
                .map(|(key, _)| *key)
                .collect();
            return Err(GraphError::CyclicGraph { unresolved });
        }

        let mut position_of = vec![0usize; keys.len()];
        for (position, node) in sorted.iter().enumerate() {
            position_of[*node] = position;
        }
        let order: Vec<NodeKey> = sorted.iter().map(|node| keys[*node]).collect();
        let remap = |list: &Vec<usize>| -> Vec<usize> {
            let mut mapped: Vec<usize> = list.iter().map(|node| position_of[*node]).collect();
            mapped.sort_unstable();
            mapped
        };
        let predecessors = sorted.iter().map(|node| remap(&predecessors[*node])).collect();
        let successors = sorted.iter().map(|node| remap(&successors[*node])).collect();

        raw_edges.sort_by_key(|(connection, ..)| connection.id);
        let edges = raw_edges
            .into_iter()
            .map(|(connection, kind, source, destination)| GraphEdge {
                connection: connection.id,
                source: connection.source,
                destination: connection.destination,
                kind,
                multiplier: connection.multiplier,
                source_node: position_of[source],
                destination_node: position_of[destination],
            })
            .collect();

        Ok(Self {
            positions: order.iter().enumerate().map(|(i, key)| (*key, i)).collect(),
            order,
            predecessors,
            successors,
            edges,
            topology_generation: topology.generation(),
        })
    }

    pub fn order(&self) -> &[NodeKey] {
        &self.order
    }

    pub fn position(&self, node: NodeKey) -> Option<usize> {
        self.positions.get(&node).copied()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub(crate) fn predecessors_at(&self, position: usize) -> &[usize] {
        &self.predecessors[position]
    }

    pub(crate) fn successors_at(&self, position: usize) -> &[usize] {
        &self.successors[position]
    }

    /// Topology generation the plan was derived from.
    pub fn topology_generation(&self) -> u64 {
        self.topology_generation
    }
}

/// A validated, latency-annotated execution plan.
#[derive(Debug, Clone)]
pub struct Graph {
    plan: Arc<GraphPlan>,
    latencies: Vec<u32>,
    route_latencies: Vec<u32>,
    edge_delays: Vec<u32>,
    global_max_latency: u32,
}

impl Graph {
    /// Full rebuild: node set, dependencies, order and latencies.
    pub fn build(topology: &Topology) -> Result<Self, GraphError> {
        let plan = Arc::new(GraphPlan::derive(topology)?);
        Ok(Self::with_plan(plan, topology))
    }

    /// Recomputes latencies over the existing order.
    pub fn refresh_latencies(&self, topology: &Topology) -> Self {
        Self::with_plan(Arc::clone(&self.plan), topology)
    }

    /// Whether the plan still describes `topology`'s nodes and edges.
    pub fn is_current(&self, topology: &Topology) -> bool {
        self.plan.topology_generation == topology.generation()
    }

    fn with_plan(plan: Arc<GraphPlan>, topology: &Topology) -> Self {
        let latencies: Vec<u32> = plan
            .order
            .iter()
            .map(|key| topology.node_latency(*key))
            .collect();

        let mut route_latencies = vec![0u32; plan.order.len()];
        for position in 0..plan.order.len() {
            route_latencies[position] = plan.predecessors[position]
                .iter()
                .map(|pred| route_latencies[*pred].saturating_add(latencies[*pred]))
                .max()
                .unwrap_or(0);
        }

        let global_max_latency = (0..plan.order.len())
            .filter(|position| plan.successors[*position].is_empty())
            .map(|position| route_latencies[position])
            .max()
            .unwrap_or(0);

        let edge_delays = plan
            .edges
            .iter()
            .map(|edge| {
                if !edge.kind.is_sampled() {
                    return 0;
                }
                let arrival = route_latencies[edge.source_node]
                    .saturating_add(latencies[edge.source_node]);
                route_latencies[edge.destination_node].saturating_sub(arrival)
            })
            .collect();

        Self {
            plan,
            latencies,
            route_latencies,
            edge_delays,
            global_max_latency,
        }
    }

    pub fn plan(&self) -> &Arc<GraphPlan> {
        &self.plan
    }

    pub fn order(&self) -> &[NodeKey] {
        self.plan.order()
    }

    pub fn len(&self) -> usize {
        self.plan.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.order.is_empty()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        self.plan.edges()
    }

    pub fn latency(&self, node: NodeKey) -> Option<u32> {
        self.plan.position(node).map(|pos| self.latencies[pos])
    }

    pub fn route_latency(&self, node: NodeKey) -> Option<u32> {
        self.plan.position(node).map(|pos| self.route_latencies[pos])
    }

    /// Pure delay that aligns `node` with the longest route.
    pub fn alignment_delay(&self, node: NodeKey) -> Option<u32> {
        self.route_latency(node)
            .map(|route| self.global_max_latency.saturating_sub(route))
    }

    pub fn global_max_latency(&self) -> u32 {
        self.global_max_latency
    }

    pub fn edge_delay(&self, connection: ConnectionId) -> Option<u32> {
        self.plan
            .edges
            .iter()
            .position(|edge| edge.connection == connection)
            .map(|index| self.edge_delays[index])
    }

    pub(crate) fn edge_delays(&self) -> &[u32] {
        &self.edge_delays
    }

    pub fn predecessors(&self, node: NodeKey) -> Vec<NodeKey> {
        self.plan
            .position(node)
            .map(|pos| {
                self.plan.predecessors[pos]
                    .iter()
                    .map(|pred| self.plan.order[*pred])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .plan
            .order
            .iter()
            .enumerate()
            .map(|(pos, key)| NodeSnapshot {
                key: *key,
                latency: self.latencies[pos],
                route_latency: self.route_latencies[pos],
                alignment_delay: self
                    .global_max_latency
                    .saturating_sub(self.route_latencies[pos]),
            })
            .collect();
        let edges = self
            .plan
            .edges
            .iter()
            .zip(&self.edge_delays)
            .map(|(edge, delay)| EdgeSnapshot {
                connection: edge.connection,
                source: edge.source,
                destination: edge.destination,
                multiplier: edge.multiplier,
                delay: *delay,
            })
            .collect();
        GraphSnapshot {
            nodes,
            edges,
            global_max_latency: self.global_max_latency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub key: NodeKey,
    pub latency: u32,
    pub route_latency: u32,
    pub alignment_delay: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub connection: ConnectionId,
    pub source: PortId,
    pub destination: PortId,
    pub multiplier: f32,
    pub delay: u32,
}

/// Observable state of a graph, in topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
    pub global_max_latency: u32,
}

impl GraphSnapshot {
    pub fn order(&self) -> Vec<NodeKey> {
        self.nodes.iter().map(|node| node.key).collect()
    }

    pub fn node(&self, key: NodeKey) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.key == key)
    }
}
