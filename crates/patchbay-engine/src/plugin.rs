use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::port::{ControlValue, MidiEvent, NodeKey, Port, PortId, PortSpec, SignalKind};

/// Unique identifier for a plugin instance within the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginId(pub u64);

/// Parameter exposed by a plugin as a control input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSpec {
    pub label: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ControlSpec {
    pub fn new(label: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            label: label.into(),
            min,
            max,
            default,
        }
    }
}

/// Static shape of a plugin: identity plus its port counts.
///
/// Input ports are laid out as audio, MIDI, CV, then controls; output ports
/// as audio, MIDI, then CV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub uri: String,
    pub name: String,
    pub audio_inputs: u16,
    pub audio_outputs: u16,
    pub midi_input: bool,
    pub midi_output: bool,
    pub cv_inputs: u16,
    pub cv_outputs: u16,
    pub controls: Vec<ControlSpec>,
}

impl PluginDescriptor {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            audio_inputs: 0,
            audio_outputs: 0,
            midi_input: false,
            midi_output: false,
            cv_inputs: 0,
            cv_outputs: 0,
            controls: Vec::new(),
        }
    }

    pub fn with_audio(mut self, inputs: u16, outputs: u16) -> Self {
        self.audio_inputs = inputs;
        self.audio_outputs = outputs;
        self
    }

    pub fn with_midi(mut self, input: bool, output: bool) -> Self {
        self.midi_input = input;
        self.midi_output = output;
        self
    }

    pub fn with_cv(mut self, inputs: u16, outputs: u16) -> Self {
        self.cv_inputs = inputs;
        self.cv_outputs = outputs;
        self
    }

    pub fn with_control(mut self, control: ControlSpec) -> Self {
        self.controls.push(control);
        self
    }

    pub fn num_inputs(&self) -> u16 {
        self.audio_inputs + u16::from(self.midi_input) + self.cv_inputs + self.controls.len() as u16
    }

    pub fn num_outputs(&self) -> u16 {
        self.audio_outputs + u16::from(self.midi_output) + self.cv_outputs
    }

    fn midi_in_index(&self) -> u16 {
        self.audio_inputs
    }

    fn cv_in_offset(&self) -> u16 {
        self.audio_inputs + u16::from(self.midi_input)
    }

    fn control_offset(&self) -> u16 {
        self.cv_in_offset() + self.cv_inputs
    }

    fn midi_out_index(&self) -> u16 {
        self.audio_outputs
    }

    fn cv_out_offset(&self) -> u16 {
        self.audio_outputs + u16::from(self.midi_output)
    }

    pub fn control_port(&self, node: NodeKey, control: usize) -> PortId {
        PortId::input(node, self.control_offset() + control as u16)
    }

    pub fn audio_input_port(&self, node: NodeKey, index: u16) -> PortId {
        PortId::input(node, index)
    }

    pub fn audio_output_port(&self, node: NodeKey, index: u16) -> PortId {
        PortId::output(node, index)
    }

    pub fn midi_input_port(&self, node: NodeKey) -> Option<PortId> {
        self.midi_input
            .then(|| PortId::input(node, self.midi_in_index()))
    }

    pub fn midi_output_port(&self, node: NodeKey) -> Option<PortId> {
        self.midi_output
            .then(|| PortId::output(node, self.midi_out_index()))
    }

    pub fn cv_input_port(&self, node: NodeKey, index: u16) -> PortId {
        PortId::input(node, self.cv_in_offset() + index)
    }

    pub fn cv_output_port(&self, node: NodeKey, index: u16) -> PortId {
        PortId::output(node, self.cv_out_offset() + index)
    }

    /// Port table for a node hosting this plugin.
    pub fn port_specs(&self, node: NodeKey, controls: &[Arc<ControlValue>]) -> Vec<PortSpec> {
        let mut specs = Vec::with_capacity(usize::from(self.num_inputs() + self.num_outputs()));
        for index in 0..self.audio_inputs {
            specs.push(PortSpec::new(
                self.audio_input_port(node, index),
                SignalKind::Audio,
                format!("audio in {}", index + 1),
            ));
        }
        if let Some(id) = self.midi_input_port(node) {
            specs.push(PortSpec::new(id, SignalKind::Midi, "midi in"));
        }
        for index in 0..self.cv_inputs {
            specs.push(PortSpec::new(
                self.cv_input_port(node, index),
                SignalKind::Cv,
                format!("cv in {}", index + 1),
            ));
        }
        for (index, (spec, value)) in self.controls.iter().zip(controls).enumerate() {
            specs.push(PortSpec::control(
                self.control_port(node, index),
                spec.label.clone(),
                Arc::clone(value),
            ));
        }
        for index in 0..self.audio_outputs {
            specs.push(PortSpec::new(
                self.audio_output_port(node, index),
                SignalKind::Audio,
                format!("audio out {}", index + 1),
            ));
        }
        if let Some(id) = self.midi_output_port(node) {
            specs.push(PortSpec::new(id, SignalKind::Midi, "midi out"));
        }
        for index in 0..self.cv_outputs {
            specs.push(PortSpec::new(
                self.cv_output_port(node, index),
                SignalKind::Cv,
                format!("cv out {}", index + 1),
            ));
        }
        specs
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uri)
    }
}

/// Read side of a plugin's ports for one cycle.
pub struct PluginInputs<'a> {
    ports: &'a [Port],
    descriptor: &'a PluginDescriptor,
    frames: usize,
}

impl<'a> PluginInputs<'a> {
    pub fn audio(&self, index: u16) -> &[f32] {
        self.sampled(index)
    }

    pub fn cv(&self, index: u16) -> &[f32] {
        self.sampled(self.descriptor.cv_in_offset() + index)
    }

    pub fn midi(&self) -> &[MidiEvent] {
        if !self.descriptor.midi_input {
            return &[];
        }
        self.ports
            .get(usize::from(self.descriptor.midi_in_index()))
            .map(Port::midi)
            .unwrap_or(&[])
    }

    /// Control value for this cycle, including CV modulation.
    pub fn control(&self, index: usize) -> f32 {
        let port = usize::from(self.descriptor.control_offset()) + index;
        self.ports.get(port).map(Port::value).unwrap_or_default()
    }

    fn sampled(&self, index: u16) -> &[f32] {
        self.ports
            .get(usize::from(index))
            .map(|port| port.samples(self.frames))
            .unwrap_or(&[])
    }
}

/// Write side of a plugin's ports for one cycle.
pub struct PluginOutputs<'a> {
    ports: &'a mut [Port],
    descriptor: &'a PluginDescriptor,
    frames: usize,
}

impl<'a> PluginOutputs<'a> {
    pub fn audio(&mut self, index: u16) -> &mut [f32] {
        self.sampled(index)
    }

    pub fn cv(&mut self, index: u16) -> &mut [f32] {
        let index = self.descriptor.cv_out_offset() + index;
        self.sampled(index)
    }

    pub fn push_midi(&mut self, event: MidiEvent) -> bool {
        if !self.descriptor.midi_output {
            return false;
        }
        let index = usize::from(self.descriptor.midi_out_index());
        self.ports
            .get_mut(index)
            .map(|port| port.push_midi(event))
            .unwrap_or(false)
    }

    fn sampled(&mut self, index: u16) -> &mut [f32] {
        let frames = self.frames;
        match self.ports.get_mut(usize::from(index)) {
            Some(port) => port.samples_mut(frames),
            None => &mut [],
        }
    }
}

/// Buffers handed to [`Plugin::process`].
pub struct PluginBuffers<'a> {
    pub inputs: PluginInputs<'a>,
    pub outputs: PluginOutputs<'a>,
}

impl<'a> PluginBuffers<'a> {
    pub fn new(
        descriptor: &'a PluginDescriptor,
        inputs: &'a [Port],
        outputs: &'a mut [Port],
        frames: usize,
    ) -> Self {
        Self {
            inputs: PluginInputs {
                ports: inputs,
                descriptor,
                frames,
            },
            outputs: PluginOutputs {
                ports: outputs,
                descriptor,
                frames,
            },
        }
    }
}

/// Contract of a hosted plugin as seen by the graph.
///
/// `process` runs on the audio thread or a graph worker and must not block.
pub trait Plugin: Send {
    fn descriptor(&self) -> PluginDescriptor;

    fn prepare(&mut self, sample_rate: u32, max_block: u32) {
        let _ = (sample_rate, max_block);
    }

    /// Algorithmic latency in frames. May change between cycles.
    fn latency_frames(&self) -> u32 {
        0
    }

    fn reset(&mut self) {}

    fn process(&mut self, buffers: &mut PluginBuffers<'_>, frames: usize);
}

/// Creates plugin instances from their URI when a project is loaded.
pub trait PluginFactory {
    fn instantiate(&self, uri: &str) -> anyhow::Result<Box<dyn Plugin>>;
}

/// Engine-side home of a plugin instance.
///
/// Slots are shared between the topology and every schedule that runs the
/// plugin, so the instance survives graph rebuilds.
pub struct PluginSlot {
    id: PluginId,
    descriptor: PluginDescriptor,
    instance: Mutex<Box<dyn Plugin>>,
    controls: Vec<Arc<ControlValue>>,
    reported_latency: AtomicU32,
}

impl PluginSlot {
    pub fn new(id: PluginId, mut plugin: Box<dyn Plugin>, sample_rate: u32, max_block: u32) -> Self {
        plugin.prepare(sample_rate, max_block);
        let descriptor = plugin.descriptor();
        let controls = descriptor
            .controls
            .iter()
            .map(|spec| Arc::new(ControlValue::new(spec.min, spec.max, spec.default)))
            .collect();
        let latency = plugin.latency_frames();
        Self {
            id,
            descriptor,
            instance: Mutex::new(plugin),
            controls,
            reported_latency: AtomicU32::new(latency),
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn node_key(&self) -> NodeKey {
        NodeKey::Plugin(self.id)
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn controls(&self) -> &[Arc<ControlValue>] {
        &self.controls
    }

    pub fn control(&self, index: usize) -> Option<&Arc<ControlValue>> {
        self.controls.get(index)
    }

    /// Latency last observed on the audio thread.
    pub fn latency(&self) -> u32 {
        self.reported_latency.load(Ordering::Acquire)
    }

    /// Records a freshly reported latency, returning whether it changed.
    pub(crate) fn publish_latency(&self, frames: u32) -> bool {
        self.reported_latency.swap(frames, Ordering::AcqRel) != frames
    }

    /// Non-blocking access for the audio thread.
    pub(crate) fn try_instance(&self) -> Option<MutexGuard<'_, Box<dyn Plugin>>> {
        self.instance.try_lock()
    }

    /// Runs `func` with exclusive access to the instance. Control thread only.
    pub fn with_instance<R>(&self, func: impl FnOnce(&mut dyn Plugin) -> R) -> R {
        let mut guard = self.instance.lock();
        func(guard.as_mut())
    }

    /// Clears the instance's internal state, such as delay lines and
    /// oscillator phase.
    pub fn reset(&self) {
        self.with_instance(|plugin| plugin.reset());
    }

    pub fn port_specs(&self) -> Vec<PortSpec> {
        self.descriptor.port_specs(self.node_key(), &self.controls)
    }
}

impl fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSlot")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("latency", &self.latency())
            .finish_non_exhaustive()
    }
}
