//! Owns the active schedule and runs it once per audio callback.
//!
//! `recalculate` builds a new schedule on the calling (control) thread and
//! publishes it with a single atomic swap. The audio thread loads the active
//! schedule once at the start of each cycle, so a swap takes effect at the
//! next cycle boundary. Replaced schedules are parked in a retired list and
//! freed by the control thread once every cycle that could still be using
//! them has completed.

mod metrics;
mod workers;

use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::sync::{Parker, Unparker};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use patchbay_rt::RtEvent;
use serde::{Deserialize, Serialize};

pub use metrics::CycleMetrics;

use crate::config::EngineConfig;
use crate::error::GraphError;
use crate::graph::{Graph, GraphSnapshot};
use crate::node::{CycleTime, RtSignals};
use crate::port::MidiEvent;
use crate::schedule::Schedule;
use crate::topology::Topology;
use metrics::CycleMetricsCollector;
use workers::WorkerPool;

const METRICS_HISTORY: usize = 1024;
const MAX_CYCLE_WAITERS: usize = 64;
const WAITER_FALLBACK_SLICE: Duration = Duration::from_millis(1);

thread_local! {
    // Lives as long as the waiting thread, so the audio thread never drops
    // the last reference to an unparker it pops.
    static CYCLE_WAITER: Parker = Parker::new();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecalcMode {
    /// Latency refresh over the current order.
    Soft,
    /// Full rebuild from the topology.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Uninitialized,
    Building,
    Active,
    Recalculating,
}

impl RouterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RouterState::Building,
            2 => RouterState::Active,
            3 => RouterState::Recalculating,
            _ => RouterState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RouterState::Uninitialized => 0,
            RouterState::Building => 1,
            RouterState::Active => 2,
            RouterState::Recalculating => 3,
        }
    }
}

/// Result of a successful recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecalcOutcome {
    /// Mode actually applied; a stale soft request is promoted to hard.
    pub mode: RecalcMode,
    pub generation: u64,
    pub nodes: usize,
    pub global_max_latency: u32,
}

/// What one call to `process_cycle` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// Generation of the schedule that served the cycle, 0 if none.
    pub generation: u64,
    pub nodes_processed: usize,
    pub frames: usize,
    /// Another cycle was still running on this router.
    pub refused: bool,
}

struct Retired {
    _schedule: Arc<Schedule>,
    // Cycles started before the swap; once that many have completed nothing
    // can still reference the schedule.
    after_cycles: u64,
}

/// Hands cycle completions to control threads blocked in
/// [`Router::wait_for_cycles`].
///
/// A waiter enqueues its thread's unparker before re-checking the cycle
/// counter; the audio thread bumps the counter and then drains the queue.
/// Neither side takes a lock.
struct CycleNotifier {
    waiters: ArrayQueue<Unparker>,
}

impl CycleNotifier {
    fn new() -> Self {
        Self {
            waiters: ArrayQueue::new(MAX_CYCLE_WAITERS),
        }
    }

    /// Returns false when the queue is full; the caller then parks on a
    /// short slice instead.
    fn register(&self, unparker: &Unparker) -> bool {
        let registered = self.waiters.push(unparker.clone()).is_ok();
        // Pairs with the fence in `notify`: either the waiter sees the new
        // count or the audio thread sees the registration.
        fence(Ordering::SeqCst);
        registered
    }

    fn notify(&self) {
        fence(Ordering::SeqCst);
        while let Some(unparker) = self.waiters.pop() {
            unparker.unpark();
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.waiters.len()
    }
}

pub struct Router {
    config: EngineConfig,
    active: ArcSwapOption<Schedule>,
    build_lock: Mutex<()>,
    retired: Mutex<Vec<Retired>>,
    state: AtomicU8,
    serial: AtomicU64,
    last_served: AtomicU64,
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    in_cycle: AtomicBool,
    notifier: CycleNotifier,
    signals: Arc<RtSignals>,
    midi_inbox: Arc<ArrayQueue<MidiEvent>>,
    metrics: CycleMetricsCollector,
    pool: WorkerPool,
}

impl Router {
    pub fn new(config: EngineConfig) -> std::io::Result<Self> {
        let pool = WorkerPool::spawn(config.workers as usize)?;
        tracing::debug!(
            workers = pool.len(),
            max_block = config.max_block,
            sample_rate = config.sample_rate,
            "router started"
        );
        Ok(Self {
            active: ArcSwapOption::empty(),
            build_lock: Mutex::new(()),
            retired: Mutex::new(Vec::new()),
            state: AtomicU8::new(RouterState::Uninitialized.as_u8()),
            serial: AtomicU64::new(0),
            last_served: AtomicU64::new(0),
            cycles_started: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            in_cycle: AtomicBool::new(false),
            notifier: CycleNotifier::new(),
            signals: Arc::new(RtSignals::new(config.event_capacity)),
            midi_inbox: Arc::new(ArrayQueue::new(config.midi_capacity.max(1))),
            metrics: CycleMetricsCollector::new(METRICS_HISTORY),
            pool,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    pub fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Builds and publishes a schedule for `topology`.
    ///
    /// On failure the previously active schedule stays in place.
    pub fn recalculate(
        &self,
        mode: RecalcMode,
        topology: &Topology,
    ) -> Result<RecalcOutcome, GraphError> {
        let _build = self.build_lock.lock();
        let previous_state = self.state();
        let building = match previous_state {
            RouterState::Uninitialized => RouterState::Building,
            _ => RouterState::Recalculating,
        };
        self.state.store(building.as_u8(), Ordering::Release);

        let result = self.build(mode, topology);
        match result {
            Ok(outcome) => {
                self.state
                    .store(RouterState::Active.as_u8(), Ordering::Release);
                self.collect_garbage();
                Ok(outcome)
            }
            Err(err) => {
                self.state.store(previous_state.as_u8(), Ordering::Release);
                tracing::debug!(%err, ?mode, "recalculation rejected");
                Err(err)
            }
        }
    }

    fn build(&self, mode: RecalcMode, topology: &Topology) -> Result<RecalcOutcome, GraphError> {
        let current = self.active.load_full();
        let graph = match (mode, current.as_deref()) {
            (RecalcMode::Soft, Some(schedule)) if schedule.graph().is_current(topology) => {
                schedule.graph().refresh_latencies(topology)
            }
            (RecalcMode::Soft, Some(_)) => {
                tracing::warn!("topology changed since the last rebuild; promoting soft recalculation");
                Graph::build(topology)?
            }
            _ => Graph::build(topology)?,
        };
        let applied = if current
            .as_deref()
            .is_some_and(|schedule| Arc::ptr_eq(schedule.graph().plan(), graph.plan()))
        {
            RecalcMode::Soft
        } else {
            RecalcMode::Hard
        };
        drop(current);

        let serial = self.serial.load(Ordering::Relaxed) + 1;
        let schedule = Schedule::build(
            serial,
            graph,
            topology,
            &self.config,
            Arc::clone(&self.signals),
            &self.midi_inbox,
        )?;
        self.serial.store(serial, Ordering::Relaxed);
        let outcome = RecalcOutcome {
            mode: applied,
            generation: serial,
            nodes: schedule.len(),
            global_max_latency: schedule.graph().global_max_latency(),
        };

        let previous = self.active.swap(Some(Arc::new(schedule)));
        std::sync::atomic::fence(Ordering::SeqCst);
        let after_cycles = self.cycles_started.load(Ordering::SeqCst);
        if let Some(schedule) = previous {
            self.retired.lock().push(Retired {
                _schedule: schedule,
                after_cycles,
            });
        }
        tracing::debug!(
            generation = serial,
            mode = ?applied,
            nodes = outcome.nodes,
            latency = outcome.global_max_latency,
            "schedule published"
        );
        Ok(outcome)
    }

    /// Frees retired schedules no cycle can still reference. Returns how many
    /// were freed.
    pub fn collect_garbage(&self) -> usize {
        let completed = self.cycles_completed.load(Ordering::SeqCst);
        let mut retired = self.retired.lock();
        let before = retired.len();
        retired.retain(|entry| entry.after_cycles > completed);
        before - retired.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    pub fn process_cycle(&self, global_frame: u64, frames: usize) -> CycleReport {
        self.process_cycle_with_io(global_frame, frames, &[], &mut [])
    }

    /// Runs one pass of the active schedule.
    ///
    /// Capture channels are copied into the hardware input node and the
    /// monitor inputs are copied to `outputs`. Frames beyond `max_block` are
    /// not processed; callers split larger callbacks.
    pub fn process_cycle_with_io(
        &self,
        global_frame: u64,
        frames: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
    ) -> CycleReport {
        if self.in_cycle.swap(true, Ordering::Acquire) {
            return CycleReport {
                refused: true,
                ..CycleReport::default()
            };
        }
        let started = Instant::now();
        let frames = frames.min(self.config.max_block as usize);
        self.cycles_started.fetch_add(1, Ordering::SeqCst);

        let report = match self.active.load_full() {
            Some(schedule) => {
                let report = self.run(&schedule, global_frame, frames, inputs, outputs);
                drop(schedule);
                report
            }
            None => {
                for out in outputs.iter_mut() {
                    out.fill(0.0);
                }
                CycleReport {
                    frames,
                    ..CycleReport::default()
                }
            }
        };

        let period_ns = patchbay_rt::cycle_period_ns(frames as u32, self.config.sample_rate);
        if self.metrics.record_cycle(started.elapsed(), period_ns) {
            let micros = started.elapsed().as_micros().min(u128::from(u32::MAX)) as u32;
            self.signals.post(RtEvent::Overrun {
                cycle: self.cycles_completed.load(Ordering::Relaxed) + 1,
                micros,
            });
        }
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
        self.in_cycle.store(false, Ordering::Release);
        self.notifier.notify();
        report
    }

    fn run(
        &self,
        schedule: &Schedule,
        global_frame: u64,
        frames: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
    ) -> CycleReport {
        let generation = schedule.serial();
        if self.last_served.swap(generation, Ordering::Relaxed) != generation {
            self.signals.post(RtEvent::ScheduleActivated { generation });
        }
        // SAFETY: `in_cycle` guarantees no other cycle runs, and the previous
        // cycle waited for every worker to leave before returning.
        unsafe { schedule.stage_inputs(inputs, frames) };
        schedule.begin_cycle(CycleTime {
            global_frame,
            frames,
        });
        self.pool.dispatch(schedule);
        schedule.work();
        self.pool.retire();
        // SAFETY: all sinks finished and every worker left the schedule.
        unsafe { schedule.collect_outputs(outputs, frames) };
        CycleReport {
            generation,
            nodes_processed: schedule.processed(),
            frames,
            refused: false,
        }
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    /// Blocks until `cycles` more cycles have completed or `timeout` expires.
    pub fn wait_for_cycles(&self, cycles: u64, timeout: Duration) -> bool {
        let target = self.cycles_completed().saturating_add(cycles);
        let deadline = Instant::now() + timeout;
        CYCLE_WAITER.with(|parker| loop {
            // The audio thread drains the queue every cycle, so register again
            // before each re-check.
            let registered = self.notifier.register(parker.unparker());
            if self.cycles_completed() >= target {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            if registered {
                parker.park_timeout(remaining);
            } else {
                parker.park_timeout(remaining.min(WAITER_FALLBACK_SLICE));
            }
        })
    }

    /// Set when a plugin reported a latency change since the last call.
    pub fn take_latency_dirty(&self) -> bool {
        self.signals.take_latency_dirty()
    }

    pub fn drain_events(&self) -> Vec<RtEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.signals.pop() {
            events.push(event);
        }
        events
    }

    pub fn dropped_events(&self) -> u64 {
        self.signals.dropped()
    }

    /// Queues a MIDI event for the hardware input node's next cycle.
    pub fn push_midi(&self, event: MidiEvent) -> bool {
        self.midi_inbox.push(event).is_ok()
    }

    pub fn metrics(&self) -> CycleMetrics {
        self.metrics.snapshot()
    }

    pub fn metrics_history(&self) -> Vec<CycleMetrics> {
        self.metrics.drain_history()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Generation of the active schedule, 0 before the first build.
    pub fn generation(&self) -> u64 {
        self.active
            .load()
            .as_ref()
            .map(|schedule| schedule.serial())
            .unwrap_or(0)
    }

    pub fn active_graph(&self) -> Option<Graph> {
        self.active
            .load()
            .as_ref()
            .map(|schedule| schedule.graph().clone())
    }

    pub fn active_snapshot(&self) -> Option<GraphSnapshot> {
        self.active
            .load()
            .as_ref()
            .map(|schedule| schedule.graph().snapshot())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("workers", &self.workers())
            .field("cycles_completed", &self.cycles_completed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::NodeKey;

    fn router(workers: u32) -> (Router, Topology) {
        let config = EngineConfig::new(48_000, 32).with_workers(workers);
        let topology = Topology::new(&config).unwrap();
        (Router::new(config).unwrap(), topology)
    }

    #[test]
    fn uninitialized_router_outputs_silence() {
        let (router, _) = router(0);
        assert_eq!(router.state(), RouterState::Uninitialized);
        let mut out = [1.0f32; 32];
        let report = router.process_cycle_with_io(0, 32, &[], &mut [&mut out[..]]);
        assert_eq!(report.generation, 0);
        assert_eq!(report.nodes_processed, 0);
        assert_eq!(out, [0.0; 32]);
    }

    #[test]
    fn recalculate_publishes_and_retires() {
        let (router, topology) = router(1);
        let first = router.recalculate(RecalcMode::Hard, &topology).unwrap();
        assert_eq!(first.generation, 1);
        assert_eq!(router.state(), RouterState::Active);

        let report = router.process_cycle(0, 32);
        assert_eq!(report.generation, 1);
        assert_eq!(report.nodes_processed, first.nodes);

        let soft = router.recalculate(RecalcMode::Soft, &topology).unwrap();
        assert_eq!(soft.mode, RecalcMode::Soft);
        assert_eq!(router.generation(), 2);
        assert_eq!(router.collect_garbage(), 0);
        assert_eq!(router.retired_count(), 0);
        assert!(router
            .drain_events()
            .contains(&RtEvent::ScheduleActivated { generation: 1 }));
        let snapshot = router.active_snapshot().unwrap();
        assert_eq!(snapshot.order().last(), Some(&NodeKey::Monitor));
    }

    #[test]
    fn metrics_history_drains_and_resets() {
        let (router, topology) = router(0);
        router.recalculate(RecalcMode::Hard, &topology).unwrap();
        for cycle in 0..4u64 {
            router.process_cycle(cycle * 32, 32);
        }
        let history = router.metrics_history();
        assert_eq!(history.len(), 4);
        assert_eq!(history.last().map(|sample| sample.cycles), Some(4));
        assert!(router.metrics_history().is_empty());

        router.reset_metrics();
        assert_eq!(router.metrics(), CycleMetrics::default());
    }

    #[test]
    fn wait_for_cycles_times_out_without_audio() {
        let (router, topology) = router(0);
        router.recalculate(RecalcMode::Hard, &topology).unwrap();
        assert!(!router.wait_for_cycles(1, Duration::from_millis(5)));
        router.process_cycle(0, 32);
        assert_eq!(router.cycles_completed(), 1);
        assert!(router.wait_for_cycles(0, Duration::from_millis(5)));
    }

    #[test]
    fn completed_cycles_wake_a_parked_waiter() {
        let (router, topology) = router(0);
        router.recalculate(RecalcMode::Hard, &topology).unwrap();
        let router = Arc::new(router);
        let waiter = {
            let router = Arc::clone(&router);
            std::thread::spawn(move || router.wait_for_cycles(3, Duration::from_secs(30)))
        };
        while router.notifier.pending() == 0 {
            std::thread::yield_now();
        }
        let started = Instant::now();
        while !waiter.is_finished() {
            router.process_cycle(router.cycles_completed() * 32, 32);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(waiter.join().unwrap());
        assert!(router.cycles_completed() >= 3);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn each_cycle_drains_registered_waiters() {
        let (router, topology) = router(0);
        router.recalculate(RecalcMode::Hard, &topology).unwrap();
        let parker = Parker::new();
        assert!(router.notifier.register(parker.unparker()));
        assert!(router.notifier.register(parker.unparker()));
        assert_eq!(router.notifier.pending(), 2);
        router.process_cycle(0, 32);
        assert_eq!(router.notifier.pending(), 0);
        // The token left by the unpark makes this return at once.
        let started = Instant::now();
        parker.park_timeout(Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
