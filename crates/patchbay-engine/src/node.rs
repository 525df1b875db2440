//! Schedulable units of the routing graph.
//!
//! Node objects are disposable: every schedule build creates fresh ones from
//! the topology. Anything that must outlive a rebuild (plugin instances,
//! fader state) lives behind an `Arc` shared with the topology.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use patchbay_rt::RtEvent;

use crate::plugin::{PluginBuffers, PluginSlot};
use crate::port::{MidiEvent, NodeKey, Port, SignalKind};
use crate::topology::{FaderState, FADER_VOLUME_PORT};

/// Position of the current cycle on the engine timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleTime {
    pub global_frame: u64,
    pub frames: usize,
}

/// Lock-free channel from the audio thread to the control thread.
#[derive(Debug)]
pub struct RtSignals {
    events: ArrayQueue<RtEvent>,
    dropped: AtomicU64,
    latency_dirty: AtomicBool,
}

impl RtSignals {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
            latency_dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn post(&self, event: RtEvent) {
        if self.events.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pop(&self) -> Option<RtEvent> {
        self.events.pop()
    }

    /// Events lost because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn mark_latency_dirty(&self) {
        self.latency_dirty.store(true, Ordering::Release);
    }

    pub fn take_latency_dirty(&self) -> bool {
        self.latency_dirty.swap(false, Ordering::AcqRel)
    }
}

/// Ports and timing handed to a node for one cycle.
pub struct NodeIo<'a> {
    pub time: CycleTime,
    pub inputs: &'a [Port],
    pub outputs: &'a mut [Port],
    pub signals: &'a RtSignals,
}

impl<'a> NodeIo<'a> {
    fn clear_outputs(&mut self) {
        let frames = self.time.frames;
        for port in self.outputs.iter_mut() {
            port.clear(frames);
        }
    }

    /// Copies each input to the output with the same index and kind.
    fn pass_through(&mut self, gain: f32, midi: bool) {
        let frames = self.time.frames;
        for (input, output) in self.inputs.iter().zip(self.outputs.iter_mut()) {
            if input.kind() != output.kind() {
                continue;
            }
            match input.kind() {
                SignalKind::Audio | SignalKind::Cv => {
                    let source = input.samples(frames);
                    for (out, sample) in output.samples_mut(frames).iter_mut().zip(source) {
                        *out = sample * gain;
                    }
                }
                SignalKind::Midi => {
                    output.clear(frames);
                    if midi {
                        for event in input.midi() {
                            output.push_midi(*event);
                        }
                    }
                }
                SignalKind::Control => {}
            }
        }
    }
}

/// Anything the router can schedule.
pub trait ProcessableNode: Send {
    fn key(&self) -> NodeKey;

    fn name(&self) -> &str;

    /// Algorithmic latency in frames.
    fn latency(&self) -> u32 {
        0
    }

    /// Must write every output port for `io.time.frames` frames.
    fn process(&mut self, io: &mut NodeIo<'_>);
}

/// Source of driver capture channels.
///
/// The router stages capture audio straight into this node's outputs before
/// the cycle is dispatched; the node itself only drains queued MIDI input.
pub struct HardwareInputNode {
    midi_inbox: Arc<ArrayQueue<MidiEvent>>,
}

impl HardwareInputNode {
    pub fn new(midi_inbox: Arc<ArrayQueue<MidiEvent>>) -> Self {
        Self { midi_inbox }
    }
}

impl ProcessableNode for HardwareInputNode {
    fn key(&self) -> NodeKey {
        NodeKey::HardwareInput
    }

    fn name(&self) -> &str {
        "hardware input"
    }

    fn process(&mut self, io: &mut NodeIo<'_>) {
        let frames = io.time.frames as u32;
        let Some(port) = io
            .outputs
            .iter_mut()
            .find(|port| port.kind() == SignalKind::Midi)
        else {
            return;
        };
        port.clear(io.time.frames);
        while let Some(mut event) = self.midi_inbox.pop() {
            event.frame = event.frame.min(frames.saturating_sub(1));
            if !port.push_midi(event) {
                break;
            }
        }
    }
}

pub struct TrackProcessorNode {
    key: NodeKey,
    name: String,
}

impl TrackProcessorNode {
    pub fn new(key: NodeKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }
}

impl ProcessableNode for TrackProcessorNode {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, io: &mut NodeIo<'_>) {
        io.pass_through(1.0, true);
    }
}

pub struct PluginNode {
    slot: Arc<PluginSlot>,
    latency: u32,
}

impl PluginNode {
    pub fn new(slot: Arc<PluginSlot>) -> Self {
        let latency = slot.latency();
        Self { slot, latency }
    }
}

impl ProcessableNode for PluginNode {
    fn key(&self) -> NodeKey {
        self.slot.node_key()
    }

    fn name(&self) -> &str {
        &self.slot.descriptor().name
    }

    fn latency(&self) -> u32 {
        self.latency
    }

    fn process(&mut self, io: &mut NodeIo<'_>) {
        io.clear_outputs();
        let frames = io.time.frames;
        let Some(mut instance) = self.slot.try_instance() else {
            io.signals.post(RtEvent::PluginBusy {
                plugin: self.slot.id().0,
            });
            return;
        };
        let mut buffers = PluginBuffers::new(self.slot.descriptor(), io.inputs, io.outputs, frames);
        instance.process(&mut buffers, frames);
        let reported = instance.latency_frames();
        drop(instance);

        if self.slot.publish_latency(reported) {
            io.signals.post(RtEvent::LatencyChanged {
                plugin: self.slot.id().0,
                frames: reported,
            });
            io.signals.mark_latency_dirty();
        }
    }
}

pub struct FaderNode {
    key: NodeKey,
    name: String,
    state: Arc<FaderState>,
}

impl FaderNode {
    pub fn new(key: NodeKey, name: impl Into<String>, state: Arc<FaderState>) -> Self {
        Self {
            key,
            name: name.into(),
            state,
        }
    }
}

impl ProcessableNode for FaderNode {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, io: &mut NodeIo<'_>) {
        if self.state.is_muted() {
            io.clear_outputs();
            return;
        }
        let volume = io
            .inputs
            .get(usize::from(FADER_VOLUME_PORT))
            .map(Port::value)
            .unwrap_or(1.0);
        io.pass_through(volume, true);
    }
}

/// Terminal node whose inputs become the driver's playback channels.
pub struct MonitorNode;

impl ProcessableNode for MonitorNode {
    fn key(&self) -> NodeKey {
        NodeKey::Monitor
    }

    fn name(&self) -> &str {
        "monitor"
    }

    fn process(&mut self, _io: &mut NodeIo<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ControlValue, PortId, PortSpec};

    fn audio(node: NodeKey, input: bool, index: u16) -> Port {
        let id = if input {
            PortId::input(node, index)
        } else {
            PortId::output(node, index)
        };
        Port::new(&PortSpec::new(id, SignalKind::Audio, "audio"), 8, 16)
    }

    #[test]
    fn fader_scales_by_control_value() {
        let key = NodeKey::Fader(1);
        let state = Arc::new(FaderState::new());
        let control = Arc::new(ControlValue::new(0.0, 2.0, 1.0));
        let mut volume = Port::new(
            &PortSpec::control(PortId::input(key, FADER_VOLUME_PORT), "volume", control),
            8,
            16,
        );
        volume.set_value(0.5);
        let midi = Port::new(
            &PortSpec::new(PortId::input(key, 2), SignalKind::Midi, "midi"),
            8,
            16,
        );
        let mut inputs = vec![audio(key, true, 0), audio(key, true, 1), midi, volume];
        inputs[0].samples_mut(8).fill(1.0);
        let mut outputs = vec![audio(key, false, 0), audio(key, false, 1)];
        let signals = RtSignals::new(4);
        let mut node = FaderNode::new(key, "fader", Arc::clone(&state));

        let mut io = NodeIo {
            time: CycleTime {
                global_frame: 0,
                frames: 8,
            },
            inputs: &inputs,
            outputs: &mut outputs,
            signals: &signals,
        };
        node.process(&mut io);
        assert_eq!(outputs[0].samples(8), &[0.5; 8]);

        state.set_muted(true);
        let mut io = NodeIo {
            time: CycleTime {
                global_frame: 8,
                frames: 8,
            },
            inputs: &inputs,
            outputs: &mut outputs,
            signals: &signals,
        };
        node.process(&mut io);
        assert_eq!(outputs[0].samples(8), &[0.0; 8]);
    }

    #[test]
    fn signals_count_dropped_events() {
        let signals = RtSignals::new(1);
        signals.post(RtEvent::PluginBusy { plugin: 1 });
        signals.post(RtEvent::PluginBusy { plugin: 2 });
        assert_eq!(signals.dropped(), 1);
        assert_eq!(signals.pop(), Some(RtEvent::PluginBusy { plugin: 1 }));
        assert!(!signals.take_latency_dirty());
        signals.mark_latency_dirty();
        assert!(signals.take_latency_dirty());
    }
}
