use std::f32::consts::TAU;

use crate::plugin::{ControlSpec, Plugin, PluginBuffers, PluginDescriptor};

pub const SINE_URI: &str = "patchbay.sine";

/// Stereo sine generator, handy for smoke tests and soak runs.
///
/// Note-on events on the MIDI input retune the oscillator.
#[derive(Debug, Clone)]
pub struct SinePlugin {
    frequency: f32,
    phase: f32,
    sample_rate: f32,
}

impl SinePlugin {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency: frequency.clamp(0.0, 20_000.0),
            phase: 0.0,
            sample_rate: 48_000.0,
        }
    }

    fn note_frequency(note: u8) -> f32 {
        440.0 * 2f32.powf((f32::from(note) - 69.0) / 12.0)
    }
}

impl Plugin for SinePlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(SINE_URI, "Sine")
            .with_audio(0, 2)
            .with_midi(true, false)
            .with_control(ControlSpec::new("frequency", 0.0, 20_000.0, self.frequency))
            .with_control(ControlSpec::new("amplitude", 0.0, 1.0, 0.25))
    }

    fn prepare(&mut self, sample_rate: u32, _max_block: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.phase = 0.0;
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn process(&mut self, buffers: &mut PluginBuffers<'_>, frames: usize) {
        let mut frequency = buffers.inputs.control(0);
        if let Some(note) = buffers.inputs.midi().iter().rev().find(|event| event.is_note_on()) {
            frequency = Self::note_frequency(note.bytes[1]);
        }
        let amplitude = buffers.inputs.control(1);
        let delta = TAU * frequency / self.sample_rate;

        let start = self.phase;
        for channel in 0..2 {
            let mut phase = start;
            for sample in buffers.outputs.audio(channel).iter_mut() {
                *sample = phase.sin() * amplitude;
                phase += delta;
                if phase >= TAU {
                    phase -= TAU;
                }
            }
        }
        self.phase = (start + delta * frames as f32) % TAU;
    }
}
