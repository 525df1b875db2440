use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Engine-wide settings negotiated with the audio driver at startup.
///
/// `max_block` is the largest callback the driver may deliver; every port
/// buffer is allocated to this size before the audio thread starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub max_block: u32,
    pub hardware_inputs: u16,
    pub workers: u32,
    pub event_capacity: usize,
    pub midi_capacity: usize,
}

/// Upper bound for MIDI events held by a single port per cycle.
pub const MAX_MIDI_EVENTS: usize = 256;

impl Default for EngineConfig {
    fn default() -> Self {
        let phys = num_cpus::get_physical().max(2);
        Self {
            sample_rate: 48_000,
            max_block: 256,
            hardware_inputs: 2,
            workers: (phys - 1) as u32,
            event_capacity: 256,
            midi_capacity: MAX_MIDI_EVENTS,
        }
    }
}

impl EngineConfig {
    pub fn new(sample_rate: u32, max_block: u32) -> Self {
        Self {
            sample_rate,
            max_block,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_hardware_inputs(mut self, channels: u16) -> Self {
        self.hardware_inputs = channels;
        self
    }

    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(data).context("malformed engine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_json_str(&data).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_rate == 0 {
            anyhow::bail!("sample rate must be positive");
        }
        if self.max_block == 0 {
            anyhow::bail!("max block size must be positive");
        }
        if self.midi_capacity > MAX_MIDI_EVENTS {
            anyhow::bail!("midi capacity is limited to {MAX_MIDI_EVENTS} events per port");
        }
        Ok(())
    }

    /// Deadline of one full block in nanoseconds.
    pub fn block_period_ns(&self) -> u64 {
        patchbay_rt::cycle_period_ns(self.max_block, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "max_block": 64, "workers": 3 }"#).unwrap();
        assert_eq!(config.max_block, 64);
        assert_eq!(config.workers, 3);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.hardware_inputs, 2);
    }

    #[test]
    fn zero_block_is_rejected() {
        assert!(EngineConfig::from_json_str(r#"{ "max_block": 0 }"#).is_err());
    }

    #[test]
    fn default_reserves_a_core_for_the_audio_thread() {
        let config = EngineConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.block_period_ns(), 256 * 1_000_000_000 / 48_000);
    }
}
