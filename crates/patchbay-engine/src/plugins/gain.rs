use crate::plugin::{ControlSpec, Plugin, PluginBuffers, PluginDescriptor};

pub const GAIN_URI: &str = "patchbay.gain";

/// Stereo linear gain stage.
#[derive(Clone, Copy, Debug)]
pub struct GainPlugin {
    initial: f32,
}

impl GainPlugin {
    pub fn new() -> Self {
        Self { initial: 1.0 }
    }

    pub fn with_gain(gain: f32) -> Self {
        Self {
            initial: gain.clamp(0.0, 4.0),
        }
    }
}

impl Default for GainPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for GainPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(GAIN_URI, "Gain")
            .with_audio(2, 2)
            .with_control(ControlSpec::new("gain", 0.0, 4.0, self.initial))
    }

    fn process(&mut self, buffers: &mut PluginBuffers<'_>, _frames: usize) {
        let gain = buffers.inputs.control(0);
        for channel in 0..2 {
            let input = buffers.inputs.audio(channel);
            let output = buffers.outputs.audio(channel);
            for (out, sample) in output.iter_mut().zip(input) {
                *out = sample * gain;
            }
        }
    }
}
