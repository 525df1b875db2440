use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use arrayvec::ArrayVec;
use patchbay_rt::RtEvent;
use tracing::{debug, info, trace, warn};

use crate::actions::{GraphAction, UndoManager};
use crate::config::EngineConfig;
use crate::error::GraphError;
use crate::graph::GraphSnapshot;
use crate::plugin::{PluginFactory, PluginId};
use crate::port::MidiEvent;
use crate::project::ProjectSnapshot;
use crate::router::{RecalcMode, RecalcOutcome, Router};
use crate::topology::{Topology, Track, TrackId, MASTER_TRACK};

/// Most driver channels a single callback may carry in either direction.
pub const MAX_DRIVER_CHANNELS: usize = 32;

/// What one call to [`AudioEngine::poll`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub events: usize,
    pub overruns: usize,
    /// Set when a latency change triggered a soft recalculation.
    pub recalculated: Option<RecalcOutcome>,
    pub freed_schedules: usize,
}

/// Explicitly owned engine context: topology, router and undo history.
///
/// Everything here runs on the control thread. The audio driver gets an
/// [`AudioHandle`] instead.
pub struct AudioEngine {
    config: EngineConfig,
    topology: Topology,
    router: Arc<Router>,
    undo: UndoManager,
    dropped_events: u64,
}

impl AudioEngine {
    /// Creates the fixed nodes plus the master track and publishes the
    /// first schedule.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let topology = Topology::new(&config).context("failed to create topology")?;
        let router = Router::new(config.clone()).context("failed to start graph workers")?;
        let outcome = router
            .recalculate(RecalcMode::Hard, &topology)
            .context("initial graph rejected")?;
        info!(
            workers = router.workers(),
            nodes = outcome.nodes,
            sample_rate = config.sample_rate,
            max_block = config.max_block,
            "audio engine ready"
        );
        Ok(Self {
            config,
            topology,
            router: Arc::new(router),
            undo: UndoManager::new(),
            dropped_events: 0,
        })
    }

    /// Replaces the default unbounded history with a depth limit.
    pub fn with_undo_depth(mut self, depth: usize) -> Self {
        self.undo = UndoManager::with_max_depth(depth);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn undo_manager(&self) -> &UndoManager {
        &self.undo
    }

    pub fn master_track(&self) -> Option<&Track> {
        self.topology.master_track()
    }

    pub fn perform<A>(&mut self, action: A) -> Result<RecalcOutcome, GraphError>
    where
        A: GraphAction + 'static,
    {
        self.perform_boxed(Box::new(action))
    }

    pub fn perform_boxed(
        &mut self,
        action: Box<dyn GraphAction>,
    ) -> Result<RecalcOutcome, GraphError> {
        self.undo.perform(action, &mut self.topology, &self.router)
    }

    pub fn undo(&mut self) -> Result<Option<&'static str>, GraphError> {
        self.undo.undo(&mut self.topology, &self.router)
    }

    pub fn redo(&mut self) -> Result<Option<&'static str>, GraphError> {
        self.undo.redo(&mut self.topology, &self.router)
    }

    pub fn recalculate(&self, mode: RecalcMode) -> Result<RecalcOutcome, GraphError> {
        self.router.recalculate(mode, &self.topology)
    }

    /// Control-thread housekeeping, meant to run on a timer.
    ///
    /// Turns audio-thread events into log records, refreshes latencies when a
    /// plugin reported a change and frees retired schedules.
    pub fn poll(&mut self) -> Result<PollReport, GraphError> {
        let mut report = PollReport::default();
        for event in self.router.drain_events() {
            report.events += 1;
            match event {
                RtEvent::Overrun { cycle, micros } => {
                    report.overruns += 1;
                    warn!(cycle, micros, "audio cycle overran its period");
                }
                RtEvent::ScheduleActivated { generation } => {
                    debug!(generation, "schedule activated on the audio thread");
                }
                RtEvent::LatencyChanged { plugin, frames } => {
                    debug!(plugin, frames, "plugin latency changed");
                }
                RtEvent::PluginBusy { plugin } => {
                    trace!(plugin, "plugin busy, cycle skipped");
                }
            }
        }
        let dropped = self.router.dropped_events();
        if dropped > self.dropped_events {
            warn!(dropped = dropped - self.dropped_events, "real-time event queue overflowed");
            self.dropped_events = dropped;
        }
        if self.router.take_latency_dirty() {
            report.recalculated = Some(self.recalculate(RecalcMode::Soft)?);
        }
        report.freed_schedules = self.router.collect_garbage();
        Ok(report)
    }

    /// Handle for the audio driver thread.
    pub fn audio_handle(&self) -> AudioHandle {
        AudioHandle {
            router: Arc::clone(&self.router),
            max_block: self.config.max_block as usize,
            global_frame: 0,
            denormals_off: false,
        }
    }

    pub fn graph_snapshot(&self) -> Option<GraphSnapshot> {
        self.router.active_snapshot()
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot::capture(&self.topology)
    }

    pub fn save_project(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        self.snapshot().save(path)
    }

    /// Replaces the session with `snapshot`.
    ///
    /// The new topology is validated and published before it replaces the
    /// current one; on failure the current project stays active. History is
    /// cleared on success.
    pub fn load_project(
        &mut self,
        snapshot: &ProjectSnapshot,
        factory: &dyn PluginFactory,
    ) -> anyhow::Result<RecalcOutcome> {
        let topology = snapshot.instantiate(&self.config, factory)?;
        let outcome = self
            .router
            .recalculate(RecalcMode::Hard, &topology)
            .context("project graph rejected")?;
        self.topology = topology;
        self.undo.clear();
        info!(
            tracks = self.topology.tracks().len(),
            connections = self.topology.registry().connections().len(),
            latency = outcome.global_max_latency,
            "project loaded"
        );
        Ok(outcome)
    }

    pub fn open_project(
        &mut self,
        path: impl AsRef<Path>,
        factory: &dyn PluginFactory,
    ) -> anyhow::Result<RecalcOutcome> {
        let snapshot = ProjectSnapshot::load(path)?;
        self.load_project(&snapshot, factory)
    }

    pub fn set_track_volume(&self, track: TrackId, volume: f32) -> Result<(), GraphError> {
        self.track(track)?.fader.set_volume(volume);
        Ok(())
    }

    pub fn set_track_muted(&self, track: TrackId, muted: bool) -> Result<(), GraphError> {
        self.track(track)?.fader.set_muted(muted);
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<(), GraphError> {
        self.set_track_volume(MASTER_TRACK, volume)
    }

    /// Sets a plugin control; takes effect on the next cycle.
    pub fn set_plugin_control(
        &self,
        plugin: PluginId,
        control: usize,
        value: f32,
    ) -> Result<(), GraphError> {
        self.topology
            .plugin(plugin)
            .ok_or(GraphError::NotFound("plugin"))?
            .control(control)
            .ok_or(GraphError::NotFound("plugin control"))?
            .set(value);
        Ok(())
    }

    fn track(&self, id: TrackId) -> Result<&Track, GraphError> {
        self.topology.track(id).ok_or(GraphError::NotFound("track"))
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("config", &self.config)
            .field("tracks", &self.topology.tracks().len())
            .field("router", &self.router)
            .field("undo", &self.undo)
            .finish()
    }
}

/// Audio-thread side of the engine, owned by the driver callback.
#[derive(Debug)]
pub struct AudioHandle {
    router: Arc<Router>,
    max_block: usize,
    global_frame: u64,
    denormals_off: bool,
}

impl AudioHandle {
    /// Runs as many cycles as needed to cover `frames`, splitting at
    /// `max_block`. Returns the number of cycles run.
    pub fn on_audio_callback(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
    ) -> usize {
        if !self.denormals_off {
            patchbay_rt::enable_ftz_daz();
            self.denormals_off = true;
        }
        // Channels past the driver limit are never rendered.
        for channel in outputs.iter_mut().skip(MAX_DRIVER_CHANNELS) {
            let len = channel.len();
            channel[..frames.min(len)].fill(0.0);
        }
        let step = self.max_block.max(1);
        let mut offset = 0;
        let mut cycles = 0;
        while offset < frames {
            let end = (offset + step).min(frames);
            let chunk_inputs: ArrayVec<&[f32], MAX_DRIVER_CHANNELS> = inputs
                .iter()
                .take(MAX_DRIVER_CHANNELS)
                .map(|channel| &channel[offset.min(channel.len())..end.min(channel.len())])
                .collect();
            let mut chunk_outputs: ArrayVec<&mut [f32], MAX_DRIVER_CHANNELS> = outputs
                .iter_mut()
                .take(MAX_DRIVER_CHANNELS)
                .map(|channel| {
                    let len = channel.len();
                    &mut channel[offset.min(len)..end.min(len)]
                })
                .collect();
            self.router.process_cycle_with_io(
                self.global_frame,
                end - offset,
                &chunk_inputs,
                &mut chunk_outputs,
            );
            self.global_frame += (end - offset) as u64;
            offset = end;
            cycles += 1;
        }
        cycles
    }

    /// Frame position of the next cycle.
    pub fn global_frame(&self) -> u64 {
        self.global_frame
    }

    pub fn push_midi(&self, event: MidiEvent) -> bool {
        self.router.push_midi(event)
    }
}
