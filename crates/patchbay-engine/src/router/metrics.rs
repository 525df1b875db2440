use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;

/// Timing of the audio thread's most recent cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    pub cycles: u64,
    pub overruns: u64,
    pub last_cycle_ns: u64,
    pub max_cycle_ns: u64,
}

/// Written by the audio thread only, read from anywhere.
#[derive(Debug)]
pub(crate) struct CycleMetricsCollector {
    cycles: AtomicU64,
    overruns: AtomicU64,
    last_cycle_ns: AtomicU64,
    max_cycle_ns: AtomicU64,
    history: ArrayQueue<CycleMetrics>,
}

impl CycleMetricsCollector {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            cycles: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            last_cycle_ns: AtomicU64::new(0),
            max_cycle_ns: AtomicU64::new(0),
            history: ArrayQueue::new(history_capacity.max(1)),
        }
    }

    #[inline]
    pub fn snapshot(&self) -> CycleMetrics {
        CycleMetrics {
            cycles: self.cycles.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            last_cycle_ns: self.last_cycle_ns.load(Ordering::Relaxed),
            max_cycle_ns: self.max_cycle_ns.load(Ordering::Relaxed),
        }
    }

    /// Records one cycle and returns whether it overran `period_ns`.
    #[inline]
    pub fn record_cycle(&self, duration: Duration, period_ns: u64) -> bool {
        let nanos = duration.as_nanos().min(u128::from(u64::MAX)) as u64;
        let cycles = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_cycle_ns.store(nanos, Ordering::Relaxed);
        let max = self.max_cycle_ns.fetch_max(nanos, Ordering::Relaxed).max(nanos);
        let overrun = period_ns > 0 && nanos > period_ns;
        let overruns = if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.overruns.load(Ordering::Relaxed)
        };
        // Oldest entries make room; the audio thread never waits on readers.
        self.history.force_push(CycleMetrics {
            cycles,
            overruns,
            last_cycle_ns: nanos,
            max_cycle_ns: max,
        });
        overrun
    }

    pub fn drain_history(&self) -> Vec<CycleMetrics> {
        let mut metrics = Vec::with_capacity(self.history.len());
        while let Some(entry) = self.history.pop() {
            metrics.push(entry);
        }
        metrics
    }

    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.last_cycle_ns.store(0, Ordering::Relaxed);
        self.max_cycle_ns.store(0, Ordering::Relaxed);
        while self.history.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overruns_are_counted_against_the_period() {
        let collector = CycleMetricsCollector::new(2);
        assert!(!collector.record_cycle(Duration::from_micros(100), 1_000_000));
        assert!(collector.record_cycle(Duration::from_millis(2), 1_000_000));
        assert!(!collector.record_cycle(Duration::from_micros(10), 1_000_000));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.overruns, 1);
        assert_eq!(snapshot.max_cycle_ns, 2_000_000);
        assert_eq!(snapshot.last_cycle_ns, 10_000);

        let history = collector.drain_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].cycles, 3);

        collector.reset();
        assert_eq!(collector.snapshot(), CycleMetrics::default());
    }
}
