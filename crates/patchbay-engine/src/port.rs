use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arrayvec::ArrayVec;
use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::config::MAX_MIDI_EVENTS;
use crate::plugin::PluginId;
use crate::topology::TrackId;

/// Stable identity of a schedulable unit.
///
/// Node objects are rebuilt on every recalculation; the key is what survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKey {
    HardwareInput,
    TrackProcessor(TrackId),
    Plugin(PluginId),
    Fader(TrackId),
    Monitor,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::HardwareInput => f.write_str("hw-in"),
            NodeKey::TrackProcessor(track) => write!(f, "track{track}/processor"),
            NodeKey::Plugin(plugin) => write!(f, "plugin{}", plugin.0),
            NodeKey::Fader(track) => write!(f, "track{track}/fader"),
            NodeKey::Monitor => f.write_str("monitor"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortFlow {
    Input,
    Output,
}

/// Owner node plus direction and index within that node's port list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId {
    pub node: NodeKey,
    pub flow: PortFlow,
    pub index: u16,
}

impl PortId {
    pub const fn input(node: NodeKey, index: u16) -> Self {
        Self {
            node,
            flow: PortFlow::Input,
            index,
        }
    }

    pub const fn output(node: NodeKey, index: u16) -> Self {
        Self {
            node,
            flow: PortFlow::Output,
            index,
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flow = match self.flow {
            PortFlow::Input => "in",
            PortFlow::Output => "out",
        };
        write!(f, "{}.{}{}", self.node, flow, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Audio,
    Cv,
    Midi,
    Control,
}

impl SignalKind {
    /// Whether an output of this kind may drive an input of kind `destination`.
    pub fn can_feed(self, destination: SignalKind) -> bool {
        matches!(
            (self, destination),
            (SignalKind::Audio, SignalKind::Audio)
                | (SignalKind::Cv, SignalKind::Cv)
                | (SignalKind::Cv, SignalKind::Control)
                | (SignalKind::Midi, SignalKind::Midi)
        )
    }

    /// Audio and CV carry one sample per frame.
    pub fn is_sampled(self) -> bool {
        matches!(self, SignalKind::Audio | SignalKind::Cv)
    }
}

/// Scalar parameter shared between the control thread and the audio thread.
#[derive(Debug)]
pub struct ControlValue {
    value: AtomicF32,
    min: f32,
    max: f32,
    default: f32,
}

impl ControlValue {
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        let default = default.clamp(min, max);
        Self {
            value: AtomicF32::new(default),
            min,
            max,
            default,
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Relaxed)
    }

    /// Stores `value` clamped into the control range.
    pub fn set(&self, value: f32) {
        self.value
            .store(value.clamp(self.min, self.max), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(self.default);
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    /// Current value mapped onto `0.0..=1.0`.
    pub fn normalized(&self) -> f32 {
        let span = self.max - self.min;
        if span <= f32::EPSILON {
            return 0.0;
        }
        (self.get() - self.min) / span
    }

    /// Base value offset by `cv` scaled to the control range.
    #[inline]
    pub fn modulated(&self, cv: f32) -> f32 {
        let span = self.max - self.min;
        (self.get() + cv * span).clamp(self.min, self.max)
    }
}

/// Registration record for one port in the connection registry.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub id: PortId,
    pub kind: SignalKind,
    pub label: String,
    pub control: Option<Arc<ControlValue>>,
}

impl PortSpec {
    pub fn new(id: PortId, kind: SignalKind, label: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            label: label.into(),
            control: None,
        }
    }

    pub fn control(id: PortId, label: impl Into<String>, value: Arc<ControlValue>) -> Self {
        Self {
            id,
            kind: SignalKind::Control,
            label: label.into(),
            control: Some(value),
        }
    }
}

/// Short MIDI message positioned within the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiEvent {
    pub frame: u32,
    pub bytes: [u8; 3],
    pub len: u8,
}

impl MidiEvent {
    pub fn new(frame: u32, bytes: [u8; 3]) -> Self {
        Self {
            frame,
            bytes,
            len: 3,
        }
    }

    pub fn note_on(frame: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(frame, [0x90 | (channel & 0x0f), note & 0x7f, velocity & 0x7f])
    }

    pub fn note_off(frame: u32, channel: u8, note: u8) -> Self {
        Self::new(frame, [0x80 | (channel & 0x0f), note & 0x7f, 0])
    }

    pub fn is_note_on(&self) -> bool {
        self.bytes[0] & 0xf0 == 0x90 && self.bytes[2] > 0
    }
}

pub type MidiBuffer = ArrayVec<MidiEvent, MAX_MIDI_EVENTS>;

/// Runtime port owned by a scheduled node.
///
/// Storage is sized once when the schedule is built and never grows on the
/// audio thread.
#[derive(Debug)]
pub struct Port {
    id: PortId,
    kind: SignalKind,
    buffer: Vec<f32>,
    midi: Option<Box<MidiBuffer>>,
    midi_limit: usize,
    value: f32,
}

impl Port {
    pub fn new(spec: &PortSpec, max_block: usize, midi_limit: usize) -> Self {
        let buffer = if spec.kind.is_sampled() {
            vec![0.0; max_block]
        } else {
            Vec::new()
        };
        let midi = (spec.kind == SignalKind::Midi).then(|| Box::new(MidiBuffer::new()));
        let value = spec.control.as_ref().map(|c| c.get()).unwrap_or_default();
        Self {
            id: spec.id,
            kind: spec.kind,
            buffer,
            midi,
            midi_limit: midi_limit.min(MAX_MIDI_EVENTS),
            value,
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Sample data for the first `frames` frames, empty for MIDI/control.
    #[inline]
    pub fn samples(&self, frames: usize) -> &[f32] {
        let end = frames.min(self.buffer.len());
        &self.buffer[..end]
    }

    #[inline]
    pub fn samples_mut(&mut self, frames: usize) -> &mut [f32] {
        let end = frames.min(self.buffer.len());
        &mut self.buffer[..end]
    }

    pub fn midi(&self) -> &[MidiEvent] {
        self.midi.as_deref().map(|m| m.as_slice()).unwrap_or(&[])
    }

    /// Appends an event, dropping it once the per-port limit is reached.
    #[inline]
    pub fn push_midi(&mut self, event: MidiEvent) -> bool {
        let limit = self.midi_limit;
        match self.midi.as_deref_mut() {
            Some(buffer) if buffer.len() < limit => {
                buffer.push(event);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
    }

    /// Silences the port for the next `frames` frames.
    #[inline]
    pub fn clear(&mut self, frames: usize) {
        self.samples_mut(frames).fill(0.0);
        if let Some(midi) = self.midi.as_deref_mut() {
            midi.clear();
        }
    }
}
