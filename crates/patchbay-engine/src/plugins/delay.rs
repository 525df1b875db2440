use crate::plugin::{ControlSpec, Plugin, PluginBuffers, PluginDescriptor};

pub const DELAY_URI: &str = "patchbay.delay";

/// Longest delay the plugin can be set to, in frames.
pub const MAX_DELAY_FRAMES: u32 = 48_000;

/// Pure stereo delay that reports its length as latency.
///
/// Changing the `delay` control while running changes the reported latency,
/// which the router picks up on its next soft recalculation.
#[derive(Debug)]
pub struct DelayPlugin {
    initial: u32,
    current: usize,
    lines: [Vec<f32>; 2],
    position: usize,
}

impl DelayPlugin {
    pub fn new(frames: u32) -> Self {
        let frames = frames.min(MAX_DELAY_FRAMES);
        Self {
            initial: frames,
            current: frames as usize,
            lines: [Vec::new(), Vec::new()],
            position: 0,
        }
    }
}

impl Plugin for DelayPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(DELAY_URI, "Delay")
            .with_audio(2, 2)
            .with_control(ControlSpec::new(
                "delay",
                0.0,
                MAX_DELAY_FRAMES as f32,
                self.initial as f32,
            ))
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block: u32) {
        let capacity = MAX_DELAY_FRAMES as usize + 1;
        for line in &mut self.lines {
            line.clear();
            line.resize(capacity, 0.0);
        }
        self.position = 0;
    }

    fn latency_frames(&self) -> u32 {
        self.current as u32
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.position = 0;
    }

    fn process(&mut self, buffers: &mut PluginBuffers<'_>, frames: usize) {
        let requested = buffers.inputs.control(0).round().max(0.0) as usize;
        self.current = requested.min(MAX_DELAY_FRAMES as usize);
        let capacity = self.lines[0].len();
        if capacity == 0 {
            return;
        }
        let delay = self.current;
        for (channel, line) in self.lines.iter_mut().enumerate() {
            let input = buffers.inputs.audio(channel as u16);
            let output = buffers.outputs.audio(channel as u16);
            let mut position = self.position;
            for (out, sample) in output.iter_mut().zip(input) {
                line[position] = *sample;
                let read = (position + capacity - delay) % capacity;
                *out = line[read];
                position = (position + 1) % capacity;
            }
        }
        self.position = (self.position + frames) % capacity;
    }
}
