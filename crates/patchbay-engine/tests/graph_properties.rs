use std::collections::HashMap;

use patchbay_engine::plugins::DelayPlugin;
use patchbay_engine::{
    AudioEngine, CreatePluginAction, CreateTrackAction, EngineConfig, GraphSnapshot, NodeKey,
    PortConnection, PortConnectionAction, PortId, TrackKind,
};
use proptest::prelude::*;

const LATENCIES: [u32; 3] = [0, 16, 48];

struct Rig {
    engine: AudioEngine,
    outputs: Vec<PortId>,
    inputs: Vec<PortId>,
}

fn rig() -> Rig {
    let config = EngineConfig::new(48_000, 32).with_workers(0);
    let mut engine = AudioEngine::new(config).unwrap();
    let mut outputs = vec![PortId::output(NodeKey::HardwareInput, 0)];
    let mut inputs = vec![PortId::input(NodeKey::TrackProcessor(0), 1)];
    for latency in LATENCIES {
        engine
            .perform(CreateTrackAction::new(format!("lat {latency}"), TrackKind::Audio))
            .unwrap();
        let track = engine.topology().tracks().last().unwrap().id;
        engine
            .perform(CreatePluginAction::new(track, 0, Box::new(DelayPlugin::new(latency))))
            .unwrap();
        let plugin = NodeKey::Plugin(engine.topology().track(track).unwrap().plugins[0]);
        let processor = NodeKey::TrackProcessor(track);
        let fader = NodeKey::Fader(track);
        outputs.extend([
            PortId::output(processor, 0),
            PortId::output(plugin, 1),
            PortId::output(fader, 0),
        ]);
        inputs.extend([
            PortId::input(processor, 0),
            PortId::input(processor, 1),
            PortId::input(plugin, 1),
        ]);
    }
    Rig {
        engine,
        outputs,
        inputs,
    }
}

fn state(engine: &AudioEngine) -> (Vec<PortConnection>, GraphSnapshot) {
    (
        engine.topology().registry().connections().to_vec(),
        engine.graph_snapshot().unwrap(),
    )
}

fn assert_valid(engine: &AudioEngine) {
    let snapshot = engine.graph_snapshot().unwrap();
    let position: HashMap<NodeKey, usize> = snapshot
        .order()
        .into_iter()
        .enumerate()
        .map(|(index, key)| (key, index))
        .collect();

    for edge in &snapshot.edges {
        let source = snapshot.node(edge.source.node).unwrap();
        let destination = snapshot.node(edge.destination.node).unwrap();
        assert!(
            position[&edge.source.node] < position[&edge.destination.node],
            "{} scheduled after {}",
            edge.source.node,
            edge.destination.node
        );
        assert!(destination.route_latency >= source.route_latency + source.latency);
    }

    let enabled: Vec<_> = engine
        .topology()
        .registry()
        .connections()
        .iter()
        .filter(|conn| conn.enabled)
        .map(|conn| conn.id)
        .collect();
    let scheduled: Vec<_> = snapshot.edges.iter().map(|edge| edge.connection).collect();
    assert_eq!(scheduled, enabled, "active graph diverged from the registry");
}

#[derive(Clone, Debug)]
enum Operation {
    Connect { source: u8, destination: u8 },
    Disconnect { hint: u8 },
    Toggle { hint: u8 },
    Undo,
    Redo,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => (any::<u8>(), any::<u8>())
            .prop_map(|(source, destination)| Operation::Connect { source, destination }),
        1 => any::<u8>().prop_map(|hint| Operation::Disconnect { hint }),
        1 => any::<u8>().prop_map(|hint| Operation::Toggle { hint }),
        1 => Just(Operation::Undo),
        1 => Just(Operation::Redo),
    ]
}

fn user_connection(engine: &AudioEngine, hint: u8) -> Option<&PortConnection> {
    let user: Vec<_> = engine
        .topology()
        .registry()
        .connections()
        .iter()
        .filter(|conn| !conn.locked)
        .collect();
    if user.is_empty() {
        return None;
    }
    Some(user[usize::from(hint) % user.len()])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_published_graph_is_ordered_and_monotonic(
        ops in prop::collection::vec(operation_strategy(), 1..40)
    ) {
        let Rig { mut engine, outputs, inputs } = rig();
        for op in ops {
            let before = state(&engine);
            let result = match op {
                Operation::Connect { source, destination } => {
                    let source = outputs[usize::from(source) % outputs.len()];
                    let destination = inputs[usize::from(destination) % inputs.len()];
                    engine.perform(PortConnectionAction::connect(source, destination, 1.0)).map(|_| ())
                }
                Operation::Disconnect { hint } => {
                    let Some(id) = user_connection(&engine, hint).map(|conn| conn.id) else {
                        continue;
                    };
                    engine.perform(PortConnectionAction::disconnect(id)).map(|_| ())
                }
                Operation::Toggle { hint } => {
                    let Some((id, enabled)) =
                        user_connection(&engine, hint).map(|conn| (conn.id, conn.enabled))
                    else {
                        continue;
                    };
                    let action = if enabled {
                        PortConnectionAction::disable(id)
                    } else {
                        PortConnectionAction::enable(id)
                    };
                    engine.perform(action).map(|_| ())
                }
                Operation::Undo => engine.undo().map(|_| ()),
                Operation::Redo => engine.redo().map(|_| ()),
            };
            if result.is_err() {
                prop_assert_eq!(&state(&engine), &before);
            }
            assert_valid(&engine);
        }
    }

    #[test]
    fn undo_all_then_redo_all_round_trips(
        pairs in prop::collection::vec((any::<u8>(), any::<u8>()), 1..24)
    ) {
        let Rig { mut engine, outputs, inputs } = rig();
        let initial = state(&engine);
        let mut performed = 0;
        for (source, destination) in pairs {
            let source = outputs[usize::from(source) % outputs.len()];
            let destination = inputs[usize::from(destination) % inputs.len()];
            if engine.perform(PortConnectionAction::connect(source, destination, 0.5)).is_ok() {
                performed += 1;
            }
        }
        let after = state(&engine);

        for _ in 0..performed {
            prop_assert!(engine.undo().unwrap().is_some());
        }
        prop_assert_eq!(&state(&engine), &initial);

        for _ in 0..performed {
            prop_assert!(engine.redo().unwrap().is_some());
        }
        prop_assert_eq!(&state(&engine), &after);
    }
}
