//! Runtime form of a [`Graph`]: node instances, port buffers, delay lines and
//! the per-cycle dependency counters.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;
use crossbeam_queue::ArrayQueue;

use crate::config::EngineConfig;
use crate::delay::DelayCompensator;
use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{
    CycleTime, FaderNode, HardwareInputNode, MonitorNode, NodeIo, PluginNode, ProcessableNode,
    RtSignals, TrackProcessorNode,
};
use crate::port::{ControlValue, MidiEvent, NodeKey, Port, PortId, SignalKind};
use crate::scratch::RtAllocGuard;
use crate::topology::Topology;

struct Feed {
    input: usize,
    source: usize,
    output: usize,
    multiplier: f32,
    delay: Option<DelayCompensator>,
}

struct NodeState {
    processor: Box<dyn ProcessableNode>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    controls: Vec<Option<Arc<ControlValue>>>,
    modulated: Vec<bool>,
    feeds: Vec<Feed>,
}

struct ScheduledNode {
    in_degree: usize,
    successors: Vec<usize>,
    pending: AtomicUsize,
    state: UnsafeCell<NodeState>,
}

pub(crate) struct Schedule {
    serial: u64,
    graph: Graph,
    nodes: Vec<ScheduledNode>,
    roots: Vec<usize>,
    sinks: usize,
    ready: ArrayQueue<usize>,
    remaining: AtomicUsize,
    processed: AtomicUsize,
    frames: AtomicUsize,
    global_frame: AtomicU64,
    hardware_input: Option<usize>,
    monitor: Option<usize>,
    signals: Arc<RtSignals>,
}

// SAFETY: a node's `state` is only touched by the thread that popped it from
// the ready queue, which happens once per cycle after every predecessor has
// released its pending count. Predecessor outputs are read only after that
// release and are not written again until the next cycle, which begins only
// once every participant has left the schedule.
unsafe impl Sync for Schedule {}

impl Schedule {
    pub fn build(
        serial: u64,
        graph: Graph,
        topology: &Topology,
        config: &EngineConfig,
        signals: Arc<RtSignals>,
        midi_inbox: &Arc<ArrayQueue<MidiEvent>>,
    ) -> Result<Self, GraphError> {
        let max_block = config.max_block as usize;
        let registry = topology.registry();
        let mut states = Vec::with_capacity(graph.len());
        for key in graph.order() {
            let processor = instantiate(*key, topology, midi_inbox)?;
            debug_assert_eq!(processor.key(), *key);
            let latency = processor.latency();
            if graph.latency(*key) != Some(latency) {
                // Reported on the audio thread after the graph read it; the
                // next poll refreshes the latencies.
                tracing::debug!(node = processor.name(), latency, "latency moved during rebuild");
                signals.mark_latency_dirty();
            }
            let input_specs = registry.inputs_of(*key);
            let inputs = input_specs
                .iter()
                .map(|spec| Port::new(spec, max_block, config.midi_capacity))
                .collect();
            let outputs = registry
                .outputs_of(*key)
                .iter()
                .map(|spec| Port::new(spec, max_block, config.midi_capacity))
                .collect();
            states.push(NodeState {
                processor,
                inputs,
                outputs,
                controls: input_specs.iter().map(|spec| spec.control.clone()).collect(),
                modulated: vec![false; input_specs.len()],
                feeds: Vec::new(),
            });
        }

        for (edge, delay) in graph.edges().iter().zip(graph.edge_delays()) {
            let output = port_position(registry.outputs_of(edge.source.node), edge.source)?;
            let state = &mut states[edge.destination_node];
            let input = port_position(registry.inputs_of(edge.destination.node), edge.destination)?;
            let delay = (edge.kind.is_sampled() && *delay > 0)
                .then(|| DelayCompensator::new(*delay as usize));
            if edge.kind == SignalKind::Control {
                state.modulated[input] = true;
            }
            state.feeds.push(Feed {
                input,
                source: edge.source_node,
                output,
                multiplier: edge.multiplier,
                delay,
            });
        }

        let plan = graph.plan();
        let nodes: Vec<ScheduledNode> = states
            .into_iter()
            .enumerate()
            .map(|(position, state)| {
                let in_degree = plan.predecessors_at(position).len();
                ScheduledNode {
                    in_degree,
                    successors: plan.successors_at(position).to_vec(),
                    pending: AtomicUsize::new(in_degree),
                    state: UnsafeCell::new(state),
                }
            })
            .collect();
        let roots = nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.in_degree == 0)
            .map(|(index, _)| index)
            .collect();
        let sinks = nodes.iter().filter(|node| node.successors.is_empty()).count();

        Ok(Self {
            serial,
            hardware_input: plan.position(NodeKey::HardwareInput),
            monitor: plan.position(NodeKey::Monitor),
            ready: ArrayQueue::new(nodes.len().max(1)),
            nodes,
            roots,
            sinks,
            remaining: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
            global_frame: AtomicU64::new(0),
            graph,
            signals,
        })
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Copies driver capture channels into the hardware input node.
    ///
    /// # Safety
    /// No cycle may be in flight on this schedule.
    pub unsafe fn stage_inputs(&self, inputs: &[&[f32]], frames: usize) {
        let Some(index) = self.hardware_input else {
            return;
        };
        let state = &mut *self.nodes[index].state.get();
        let mut channels = inputs.iter();
        for port in state
            .outputs
            .iter_mut()
            .filter(|port| port.kind() == SignalKind::Audio)
        {
            let target = port.samples_mut(frames);
            match channels.next() {
                Some(channel) => {
                    let len = channel.len().min(target.len());
                    target[..len].copy_from_slice(&channel[..len]);
                    target[len..].fill(0.0);
                }
                None => target.fill(0.0),
            }
        }
    }

    /// Copies the monitor inputs into driver playback channels.
    ///
    /// # Safety
    /// No cycle may be in flight on this schedule.
    pub unsafe fn collect_outputs(&self, outputs: &mut [&mut [f32]], frames: usize) {
        let monitor = self
            .monitor
            .map(|index| &(*self.nodes[index].state.get()).inputs);
        for (channel, out) in outputs.iter_mut().enumerate() {
            let len = frames.min(out.len());
            let source = monitor.and_then(|ports| ports.get(channel));
            match source {
                Some(port) => {
                    let samples = port.samples(len);
                    out[..samples.len()].copy_from_slice(samples);
                    out[samples.len()..].fill(0.0);
                }
                None => out.fill(0.0),
            }
        }
    }

    /// Resets the dependency counters and seeds the ready queue.
    ///
    /// Must be called by the audio thread before the schedule is handed to
    /// workers.
    pub fn begin_cycle(&self, time: CycleTime) {
        self.frames.store(time.frames, Ordering::Relaxed);
        self.global_frame.store(time.global_frame, Ordering::Relaxed);
        for node in &self.nodes {
            node.pending.store(node.in_degree, Ordering::Relaxed);
        }
        self.processed.store(0, Ordering::Relaxed);
        self.remaining.store(self.sinks, Ordering::Release);
        for root in &self.roots {
            // Capacity equals the node count, so this cannot fail.
            let _ = self.ready.push(*root);
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    /// Runs ready nodes until every sink has finished.
    pub fn work(&self) {
        let backoff = Backoff::new();
        while !self.is_complete() {
            match self.ready.pop() {
                Some(index) => {
                    self.run_node(index);
                    backoff.reset();
                }
                None => backoff.snooze(),
            }
        }
    }

    fn run_node(&self, index: usize) {
        let node = &self.nodes[index];
        let time = CycleTime {
            global_frame: self.global_frame.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
        };
        {
            let _guard = RtAllocGuard::enter();
            // SAFETY: popped from the ready queue, so this thread has
            // exclusive access to the node for the rest of the cycle.
            let state = unsafe { &mut *node.state.get() };
            self.gather(state, time.frames);
            let mut io = NodeIo {
                time,
                inputs: &state.inputs,
                outputs: &mut state.outputs,
                signals: &self.signals,
            };
            state.processor.process(&mut io);
        }
        self.processed.fetch_add(1, Ordering::Relaxed);

        for succ in &node.successors {
            if self.nodes[*succ].pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _ = self.ready.push(*succ);
            }
        }
        if node.successors.is_empty() {
            self.remaining.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn gather(&self, state: &mut NodeState, frames: usize) {
        let NodeState {
            inputs,
            controls,
            modulated,
            feeds,
            ..
        } = state;
        for port in inputs.iter_mut() {
            port.clear(frames);
            port.set_value(0.0);
        }

        for feed in feeds.iter_mut() {
            // SAFETY: the source completed earlier in this cycle and its
            // outputs stay untouched until the cycle ends.
            let source_state = unsafe { &*self.nodes[feed.source].state.get() };
            let source = &source_state.outputs[feed.output];
            let destination = &mut inputs[feed.input];
            match destination.kind() {
                SignalKind::Audio | SignalKind::Cv => {
                    let input = source.samples(frames);
                    let output = destination.samples_mut(frames);
                    match feed.delay.as_mut() {
                        Some(delay) => delay.mix_into(input, output, feed.multiplier),
                        None => {
                            for (out, sample) in output.iter_mut().zip(input) {
                                *out += sample * feed.multiplier;
                            }
                        }
                    }
                }
                SignalKind::Midi => {
                    for event in source.midi() {
                        if !destination.push_midi(*event) {
                            break;
                        }
                    }
                }
                SignalKind::Control => {
                    // Block granularity: the first frame of the CV drives the control.
                    let cv = source.samples(frames).first().copied().unwrap_or(0.0);
                    destination.set_value(destination.value() + cv * feed.multiplier);
                }
            }
        }

        let controlled = inputs.iter_mut().zip(controls.iter()).zip(modulated.iter());
        for ((port, control), modulated) in controlled {
            if let Some(control) = control {
                let value = if *modulated {
                    control.modulated(port.value())
                } else {
                    control.get()
                };
                port.set_value(value);
            }
        }
    }
}

fn port_position(ports: &[crate::port::PortSpec], id: PortId) -> Result<usize, GraphError> {
    ports
        .iter()
        .position(|spec| spec.id == id)
        .ok_or(GraphError::NotFound("port"))
}

fn instantiate(
    key: NodeKey,
    topology: &Topology,
    midi_inbox: &Arc<ArrayQueue<MidiEvent>>,
) -> Result<Box<dyn ProcessableNode>, GraphError> {
    let node: Box<dyn ProcessableNode> = match key {
        NodeKey::HardwareInput => Box::new(HardwareInputNode::new(Arc::clone(midi_inbox))),
        NodeKey::TrackProcessor(id) => {
            let track = topology.track(id).ok_or(GraphError::NotFound("track"))?;
            Box::new(TrackProcessorNode::new(key, format!("{} input", track.name)))
        }
        NodeKey::Plugin(id) => {
            let slot = topology.plugin(id).ok_or(GraphError::NotFound("plugin"))?;
            Box::new(PluginNode::new(Arc::clone(slot)))
        }
        NodeKey::Fader(id) => {
            let track = topology.track(id).ok_or(GraphError::NotFound("track"))?;
            Box::new(FaderNode::new(
                key,
                format!("{} fader", track.name),
                Arc::clone(&track.fader),
            ))
        }
        NodeKey::Monitor => Box::new(MonitorNode),
    };
    Ok(node)
}
