use std::f32::consts::TAU;

use crate::plugin::{ControlSpec, Plugin, PluginBuffers, PluginDescriptor};

pub const LFO_URI: &str = "patchbay.lfo";

/// Low-frequency sine on a CV output. Audio passes through untouched so the
/// plugin can sit in any insert chain.
#[derive(Debug, Clone)]
pub struct LfoPlugin {
    rate: f32,
    phase: f32,
    sample_rate: f32,
}

impl LfoPlugin {
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.clamp(0.0, 50.0),
            phase: 0.0,
            sample_rate: 48_000.0,
        }
    }
}

impl Plugin for LfoPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(LFO_URI, "LFO")
            .with_audio(2, 2)
            .with_cv(0, 1)
            .with_control(ControlSpec::new("rate", 0.0, 50.0, self.rate))
            .with_control(ControlSpec::new("depth", 0.0, 1.0, 1.0))
    }

    fn prepare(&mut self, sample_rate: u32, _max_block: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.phase = 0.0;
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn process(&mut self, buffers: &mut PluginBuffers<'_>, _frames: usize) {
        for channel in 0..2 {
            let input = buffers.inputs.audio(channel);
            buffers.outputs.audio(channel).copy_from_slice(input);
        }

        let delta = TAU * buffers.inputs.control(0) / self.sample_rate;
        let depth = buffers.inputs.control(1);
        let mut phase = self.phase;
        for sample in buffers.outputs.cv(0).iter_mut() {
            *sample = phase.sin() * depth;
            phase = (phase + delta) % TAU;
        }
        self.phase = phase;
    }
}
