use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use patchbay_engine::plugins::{BuiltinPlugins, DelayPlugin, GainPlugin, SinePlugin};
use patchbay_engine::scratch::PlanarScratch;
use patchbay_engine::{
    AudioEngine, CreatePluginAction, CreateTrackAction, EngineConfig, GraphSnapshot, NodeKey,
    PortConnectionAction, PortId, TrackKind,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect(args) => execute_inspect(args),
        Commands::Soak(args) => execute_soak(args),
        #[cfg(feature = "native")]
        Commands::Play(args) => execute_play(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Tools for the Patchbay routing engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a project and print its schedule with per-node latencies.
    Inspect(InspectArgs),
    /// Render with a live control thread rewiring the graph underneath.
    Soak(SoakArgs),
    /// Play a project through the default output device.
    #[cfg(feature = "native")]
    Play(PlayArgs),
}

#[derive(Args)]
struct EngineArgs {
    /// Engine settings (JSON). Missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the number of worker threads.
    #[arg(long)]
    workers: Option<u32>,
}

impl EngineArgs {
    fn load(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct InspectArgs {
    /// Path to the project file (JSON).
    #[arg(long)]
    project: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn execute_inspect(args: InspectArgs) -> Result<()> {
    let config = args.engine.load()?;
    let mut engine = AudioEngine::new(config)?;
    engine
        .open_project(&args.project, &BuiltinPlugins)
        .with_context(|| format!("failed to open {}", args.project.display()))?;

    // One silent cycle lets plugins report latencies that depend on their
    // restored controls.
    let mut handle = engine.audio_handle();
    let frames = engine.config().max_block as usize;
    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];
    handle.on_audio_callback(&[], &mut [left.as_mut_slice(), right.as_mut_slice()], frames);
    engine.poll()?;

    let snapshot = engine
        .graph_snapshot()
        .context("engine has no active schedule")?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Table => print_table(&snapshot),
    }
    Ok(())
}

fn print_table(snapshot: &GraphSnapshot) {
    println!("{:<4} {:<24} {:>8} {:>8} {:>8}", "#", "node", "latency", "route", "align");
    for (index, node) in snapshot.nodes.iter().enumerate() {
        println!(
            "{:<4} {:<24} {:>8} {:>8} {:>8}",
            index,
            node.key.to_string(),
            node.latency,
            node.route_latency,
            node.alignment_delay
        );
    }
    let compensated: Vec<_> = snapshot.edges.iter().filter(|edge| edge.delay > 0).collect();
    if !compensated.is_empty() {
        println!();
        println!("Compensated edges:");
        for edge in compensated {
            println!(
                "  {} -> {} delayed {} frames",
                edge.source, edge.destination, edge.delay
            );
        }
    }
    println!();
    println!("Global latency: {} frames", snapshot.global_max_latency);
}

#[derive(Args)]
struct SoakArgs {
    #[command(flatten)]
    engine: EngineArgs,
    /// Number of synth tracks to create.
    #[arg(long, default_value_t = 16)]
    tracks: usize,
    /// Audio cycles to render.
    #[arg(long, default_value_t = 20_000)]
    cycles: u64,
    /// Pause between graph edits on the control thread, in milliseconds.
    #[arg(long, default_value_t = 2)]
    edit_interval_ms: u64,
}

fn execute_soak(args: SoakArgs) -> Result<()> {
    if args.tracks == 0 {
        anyhow::bail!("soak needs at least one track");
    }
    let config = args.engine.load()?;
    let frames = config.max_block as usize;
    let mut engine = AudioEngine::new(config)?.with_undo_depth(64);

    let mut tracks = Vec::with_capacity(args.tracks);
    for index in 0..args.tracks {
        engine.perform(CreateTrackAction::new(format!("synth {index}"), TrackKind::Midi))?;
        let track = engine
            .topology()
            .tracks()
            .last()
            .map(|track| track.id)
            .context("track vanished after creation")?;
        let frequency = 110.0 * (1.0 + index as f32 * 0.25);
        engine.perform(CreatePluginAction::new(track, 0, Box::new(SinePlugin::new(frequency))))?;
        engine.perform(CreatePluginAction::new(
            track,
            1,
            Box::new(DelayPlugin::new((index as u32 % 4) * 32)),
        ))?;
        tracks.push(track);
    }
    engine.perform(CreateTrackAction::new("returns", TrackKind::Bus))?;
    let bus = engine
        .topology()
        .tracks()
        .last()
        .map(|track| track.id)
        .context("bus vanished after creation")?;
    engine.perform(CreatePluginAction::new(bus, 0, Box::new(GainPlugin::with_gain(0.5))))?;
    let capture = PortId::output(NodeKey::HardwareInput, 0);
    engine.perform(PortConnectionAction::connect(
        capture,
        PortId::input(NodeKey::TrackProcessor(bus), 0),
        1.0,
    ))?;
    info!(
        tracks = engine.topology().tracks().len(),
        latency = engine.graph_snapshot().map(|s| s.global_max_latency).unwrap_or(0),
        "soak session ready"
    );

    engine.router().reset_metrics();
    let stop = Arc::new(AtomicBool::new(false));
    let mut handle = engine.audio_handle();
    let target = args.cycles;
    let audio = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("patchbay-soak-audio".into())
            .spawn(move || {
                let channels = 2;
                let mut capture = PlanarScratch::new(channels, frames);
                let mut playback = PlanarScratch::new(channels, frames);
                let mut interleaved = vec![0.0f32; frames * channels];
                let mut peak = 0.0f32;
                let mut rendered = 0u64;
                while rendered < target && !stop.load(Ordering::Acquire) {
                    for (frame, pair) in interleaved.chunks_mut(channels).enumerate() {
                        let value = ((rendered as usize * frames + frame) % 97) as f32 / 97.0;
                        pair.fill(value - 0.5);
                    }
                    capture.deinterleave(&interleaved, channels);
                    {
                        let inputs: Vec<&[f32]> = capture.slices().collect();
                        let mut outputs: Vec<&mut [f32]> = playback.slices_mut().collect();
                        handle.on_audio_callback(&inputs, &mut outputs, frames);
                    }
                    playback.interleave(&mut interleaved, channels, frames);
                    peak = interleaved.iter().fold(peak, |acc, sample| acc.max(sample.abs()));
                    rendered += 1;
                }
                (rendered, peak)
            })
            .context("failed to spawn audio thread")?
    };

    let started = Instant::now();
    let mut edits = 0u64;
    let mut rejected = 0u64;
    let mut step = 0usize;
    let mut cycle_times = Vec::new();
    while !audio.is_finished() {
        let source = tracks[step % tracks.len()];
        let result = if step % 5 == 4 && engine.undo_manager().can_undo() {
            engine.undo().map(|_| ())
        } else if step % 3 == 2 {
            engine.set_track_muted(source, step % 2 == 0)
        } else {
            engine
                .perform(PortConnectionAction::connect(
                    PortId::output(NodeKey::Fader(source), 0),
                    PortId::input(NodeKey::TrackProcessor(bus), 1),
                    0.25,
                ))
                .map(|_| ())
        };
        match result {
            Ok(()) => edits += 1,
            Err(err) => {
                rejected += 1;
                tracing::debug!(%err, "edit rejected");
            }
        }
        let report = engine.poll()?;
        if report.overruns > 0 {
            tracing::warn!(overruns = report.overruns, "overruns during soak");
        }
        cycle_times.extend(
            engine
                .router()
                .metrics_history()
                .iter()
                .map(|sample| sample.last_cycle_ns),
        );
        step += 1;
        thread::sleep(Duration::from_millis(args.edit_interval_ms));
    }
    stop.store(true, Ordering::Release);
    let (rendered, peak) = audio
        .join()
        .map_err(|_| anyhow::anyhow!("audio thread panicked"))?;

    let metrics = engine.router().metrics();
    cycle_times.extend(
        engine
            .router()
            .metrics_history()
            .iter()
            .map(|sample| sample.last_cycle_ns),
    );
    cycle_times.sort_unstable();
    let p99 = cycle_times
        .get(cycle_times.len().saturating_sub(1) * 99 / 100)
        .copied()
        .unwrap_or(0);
    println!(
        "Rendered {rendered} cycles in {:.2?} ({edits} edits, {rejected} rejected)",
        started.elapsed()
    );
    println!(
        "  max cycle {} us, p99 {} us over {} sampled cycles, overruns {}, peak {:.3}",
        metrics.max_cycle_ns / 1_000,
        p99 / 1_000,
        cycle_times.len(),
        metrics.overruns,
        peak
    );
    Ok(())
}

#[cfg(feature = "native")]
#[derive(Args)]
struct PlayArgs {
    /// Path to the project file (JSON).
    #[arg(long)]
    project: PathBuf,
    #[command(flatten)]
    engine: EngineArgs,
    /// Seconds to play before exiting.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
}

#[cfg(feature = "native")]
fn execute_play(args: PlayArgs) -> Result<()> {
    let config = args.engine.load()?;
    let mut engine = AudioEngine::new(config)?;
    engine.open_project(&args.project, &BuiltinPlugins)?;
    let stream = patchbay_engine::driver::start_output(engine.audio_handle(), engine.config())?;
    info!(
        sample_rate = stream.sample_rate(),
        channels = stream.channels(),
        "playing {}",
        args.project.display()
    );

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        engine.poll()?;
        thread::sleep(Duration::from_millis(20));
    }
    stream.pause()?;
    Ok(())
}
