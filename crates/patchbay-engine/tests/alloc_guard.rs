use patchbay_engine::plugins::{DelayPlugin, GainPlugin, LfoPlugin, SinePlugin};
use patchbay_engine::scratch::RtAllocCounter;
use patchbay_engine::{
    reset_rt_allocation_count, rt_allocation_count, AudioEngine, CreatePluginAction,
    CreateTrackAction, EngineConfig, MidiEvent, NodeKey, PortConnectionAction, PortId, TrackKind,
};

#[global_allocator]
static ALLOCATOR: RtAllocCounter = RtAllocCounter;

const BLOCK: usize = 128;

fn session(workers: u32) -> AudioEngine {
    let mut engine =
        AudioEngine::new(EngineConfig::new(48_000, BLOCK as u32).with_workers(workers)).unwrap();
    for index in 0..3u32 {
        engine
            .perform(CreateTrackAction::new(format!("voice {index}"), TrackKind::Midi))
            .unwrap();
        let track = engine.topology().tracks().last().unwrap().id;
        engine
            .perform(CreatePluginAction::new(track, 0, Box::new(SinePlugin::new(220.0))))
            .unwrap();
        engine
            .perform(CreatePluginAction::new(track, 1, Box::new(DelayPlugin::new(index * 24))))
            .unwrap();
        engine
            .perform(PortConnectionAction::connect(
                PortId::output(NodeKey::HardwareInput, 2),
                PortId::input(NodeKey::TrackProcessor(track), 0),
                1.0,
            ))
            .unwrap();
    }
    engine
        .perform(CreateTrackAction::new("bus", TrackKind::Bus))
        .unwrap();
    let bus = engine.topology().tracks().last().unwrap().id;
    engine
        .perform(CreatePluginAction::new(bus, 0, Box::new(LfoPlugin::new(2.0))))
        .unwrap();
    engine
        .perform(CreatePluginAction::new(bus, 1, Box::new(GainPlugin::new())))
        .unwrap();
    let plugins = engine.topology().track(bus).unwrap().plugins.clone();
    engine
        .perform(PortConnectionAction::connect(
            PortId::output(NodeKey::Plugin(plugins[0]), 2),
            PortId::input(NodeKey::Plugin(plugins[1]), 2),
            0.5,
        ))
        .unwrap();
    engine
        .perform(PortConnectionAction::connect(
            PortId::output(NodeKey::HardwareInput, 0),
            PortId::input(NodeKey::TrackProcessor(bus), 0),
            1.0,
        ))
        .unwrap();
    engine
}

fn render(engine: &AudioEngine, cycles: usize) -> usize {
    let mut handle = engine.audio_handle();
    let input = vec![0.1f32; BLOCK];
    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];

    // One cycle outside the measurement so first-touch work is excluded.
    handle.on_audio_callback(&[&input], &mut [&mut left[..], &mut right[..]], BLOCK);

    reset_rt_allocation_count();
    for cycle in 0..cycles {
        if cycle % 8 == 0 {
            handle.push_midi(MidiEvent::note_on(3, 0, 60 + cycle as u8 % 12, 90));
        }
        handle.on_audio_callback(&[&input], &mut [&mut left[..], &mut right[..]], BLOCK);
    }
    rt_allocation_count()
}

#[test]
fn no_alloc_in_rt_path() {
    for workers in [0, 3] {
        let mut engine = session(workers);
        assert_eq!(render(&engine, 64), 0, "allocations with {workers} workers");

        // A latency change published from the audio thread stays allocation-free too.
        let delay = engine.topology().tracks()[1].plugins[1];
        engine.set_plugin_control(delay, 0, 96.0).unwrap();
        assert_eq!(render(&engine, 16), 0, "allocations after a latency change");
        assert!(engine.poll().unwrap().recalculated.is_some());
    }
}
