use patchbay_engine::plugins::{DelayPlugin, GainPlugin, LfoPlugin, SinePlugin};
use patchbay_engine::{
    AudioEngine, CreatePluginAction, CreateTrackAction, EngineConfig, MidiEvent, NodeKey,
    PortConnectionAction, PortId, TrackKind,
};

const BLOCK: usize = 128;
const CYCLES: usize = 24;

/// A session wide enough for several nodes to be ready at once.
fn build_engine(workers: u32) -> AudioEngine {
    let mut engine =
        AudioEngine::new(EngineConfig::new(48_000, BLOCK as u32).with_workers(workers)).unwrap();

    let mut synths = Vec::new();
    for (index, frequency) in [110.0, 220.0, 330.0, 440.0, 550.0].into_iter().enumerate() {
        engine
            .perform(CreateTrackAction::new(format!("synth {index}"), TrackKind::Midi))
            .unwrap();
        let track = engine.topology().tracks().last().unwrap().id;
        engine
            .perform(CreatePluginAction::new(track, 0, Box::new(SinePlugin::new(frequency))))
            .unwrap();
        engine
            .perform(CreatePluginAction::new(
                track,
                1,
                Box::new(DelayPlugin::new(index as u32 * 17)),
            ))
            .unwrap();
        synths.push(track);
    }

    engine
        .perform(CreateTrackAction::new("bus", TrackKind::Bus))
        .unwrap();
    let bus = engine.topology().tracks().last().unwrap().id;
    engine
        .perform(CreatePluginAction::new(bus, 0, Box::new(LfoPlugin::new(3.0))))
        .unwrap();
    engine
        .perform(CreatePluginAction::new(bus, 1, Box::new(GainPlugin::with_gain(0.8))))
        .unwrap();
    let bus_plugins = engine.topology().track(bus).unwrap().plugins.clone();
    let lfo = NodeKey::Plugin(bus_plugins[0]);
    let gain = NodeKey::Plugin(bus_plugins[1]);
    engine
        .perform(PortConnectionAction::connect(
            PortId::output(lfo, 2),
            PortId::input(gain, 2),
            0.1,
        ))
        .unwrap();

    // Two synths also feed the bus, the rest go straight to master.
    for track in &synths[..2] {
        for channel in 0..2 {
            engine
                .perform(PortConnectionAction::connect(
                    PortId::output(NodeKey::Fader(*track), channel),
                    PortId::input(NodeKey::TrackProcessor(bus), channel),
                    0.5,
                ))
                .unwrap();
        }
    }
    engine
        .perform(PortConnectionAction::connect(
            PortId::output(NodeKey::HardwareInput, 2),
            PortId::input(NodeKey::TrackProcessor(synths[4]), 0),
            1.0,
        ))
        .unwrap();
    engine
}

fn render(engine: &AudioEngine) -> Vec<f32> {
    let mut handle = engine.audio_handle();
    let mut rendered = Vec::with_capacity(BLOCK * CYCLES * 2);
    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    for cycle in 0..CYCLES {
        if cycle == 4 {
            assert!(handle.push_midi(MidiEvent::note_on(10, 0, 64, 100)));
        }
        let mut outputs = [left.as_mut_slice(), right.as_mut_slice()];
        handle.on_audio_callback(&[], &mut outputs, BLOCK);
        rendered.extend_from_slice(&left);
        rendered.extend_from_slice(&right);
    }
    rendered
}

#[test]
fn worker_pool_matches_single_thread_output() {
    let serial = build_engine(0);
    let parallel = build_engine(2);
    assert_eq!(parallel.router().workers(), 2);
    assert_eq!(serial.graph_snapshot(), parallel.graph_snapshot());

    let expected = render(&serial);
    let actual = render(&parallel);
    assert!(expected.iter().any(|sample| *sample != 0.0));
    assert_eq!(expected.len(), actual.len());
    for (index, (a, b)) in expected.iter().zip(&actual).enumerate() {
        assert_eq!(a.to_bits(), b.to_bits(), "sample {index} differs");
    }
}

#[test]
fn every_node_runs_once_per_cycle() {
    let engine = build_engine(3);
    let nodes = engine.graph_snapshot().unwrap().nodes.len();
    for frame in 0..8u64 {
        let report = engine.router().process_cycle(frame * BLOCK as u64, BLOCK);
        assert!(!report.refused);
        assert_eq!(report.nodes_processed, nodes);
        assert_eq!(report.frames, BLOCK);
    }
}
