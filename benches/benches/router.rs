use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use patchbay_engine::plugins::{DelayPlugin, GainPlugin, SinePlugin};
use patchbay_engine::{
    AudioEngine, CreatePluginAction, CreateTrackAction, EngineConfig, RecalcMode, TrackKind,
};

fn session(tracks: usize, workers: u32) -> AudioEngine {
    let config = EngineConfig::new(96_000, 64).with_workers(workers);
    let mut engine = AudioEngine::new(config).expect("engine");
    for track in 0..tracks {
        engine
            .perform(CreateTrackAction::new(format!("t{track}"), TrackKind::Midi))
            .expect("create track");
        let id = engine.topology().tracks().last().expect("track").id;
        let chain: [Box<dyn patchbay_engine::Plugin>; 3] = [
            Box::new(SinePlugin::new(110.0 + track as f32)),
            Box::new(DelayPlugin::new((track % 8) as u32 * 16)),
            Box::new(GainPlugin::with_gain(0.05)),
        ];
        for (position, plugin) in chain.into_iter().enumerate() {
            engine
                .perform_boxed(Box::new(CreatePluginAction::new(id, position, plugin)))
                .expect("insert plugin");
        }
    }
    engine
}

fn process_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_cycle");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(30);

    for workers in [0u32, 2, 4] {
        group.bench_with_input(
            BenchmarkId::new("48_tracks_96k_block64", workers),
            &workers,
            |b, workers| {
                let engine = session(48, *workers);
                let mut handle = engine.audio_handle();
                let mut left = vec![0.0f32; 64];
                let mut right = vec![0.0f32; 64];
                b.iter(|| {
                    handle.on_audio_callback(
                        &[],
                        &mut [left.as_mut_slice(), right.as_mut_slice()],
                        64,
                    )
                });
            },
        );
    }
    group.finish();
}

fn recalculate(c: &mut Criterion) {
    let mut group = c.benchmark_group("recalculate");
    group.sample_size(30);
    let engine = session(48, 0);
    for mode in [RecalcMode::Hard, RecalcMode::Soft] {
        group.bench_function(format!("{mode:?}"), |b| {
            b.iter(|| {
                let outcome = engine.recalculate(mode).expect("recalculate");
                engine.router().collect_garbage();
                outcome
            });
        });
    }
    group.finish();
}

criterion_group!(benches, process_cycle, recalculate);
criterion_main!(benches);
