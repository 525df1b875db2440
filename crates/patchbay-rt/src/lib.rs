#![cfg_attr(not(test), warn(clippy::pedantic))]

//! Real-time helpers shared by the patchbay engine and its tools.
//!
//! Nothing in here allocates or blocks, so every item is safe to use from the
//! audio callback and from graph worker threads.

/// Message posted by the audio thread for the control side to pick up.
///
/// The audio thread never logs; it pushes these into a preallocated queue and
/// the engine's poll loop turns them into log records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RtEvent {
    /// A cycle took longer than its period.
    Overrun { cycle: u64, micros: u32 },
    /// The audio thread picked up a newly published schedule.
    ScheduleActivated { generation: u64 },
    /// A hosted plugin reported a latency different from the one the active
    /// schedule was built with.
    LatencyChanged { plugin: u64, frames: u32 },
    /// A plugin instance was busy on another thread and was skipped for a cycle.
    PluginBusy { plugin: u64 },
}

/// Enables flush-to-zero and denormals-are-zero on supported CPUs.
#[inline]
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn enable_ftz_daz() {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::{_mm_getcsr, _mm_setcsr};
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};

    const FTZ: u32 = 1 << 15;
    const DAZ: u32 = 1 << 6;
    #[allow(deprecated)]
    unsafe {
        let csr = _mm_getcsr();
        _mm_setcsr(csr | FTZ | DAZ);
    }
}

/// No-op implementation for non x86/x86_64 targets.
#[inline]
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn enable_ftz_daz() {}

/// Nanoseconds covered by `frames` at `sample_rate`, used as the deadline of
/// one cycle.
#[inline]
#[must_use]
pub fn cycle_period_ns(frames: u32, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    u64::from(frames) * 1_000_000_000 / u64::from(sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_matches_block_duration() {
        assert_eq!(cycle_period_ns(48, 48_000), 1_000_000);
        assert_eq!(cycle_period_ns(128, 0), 0);
    }
}
