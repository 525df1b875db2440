//! Project files: tracks, hosted plugins and every connection, as JSON.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::connections::PortConnection;
use crate::plugin::{PluginFactory, PluginId, PluginSlot};
use crate::topology::{Topology, Track, TrackId, TrackKind, MASTER_TRACK};

pub const PROJECT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub id: PluginId,
    pub uri: String,
    /// Control values in descriptor order.
    #[serde(default)]
    pub controls: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub plugins: Vec<PluginSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub tracks: Vec<TrackSnapshot>,
    pub connections: Vec<PortConnection>,
}

fn default_version() -> u32 {
    PROJECT_VERSION
}

impl ProjectSnapshot {
    pub fn capture(topology: &Topology) -> Self {
        let tracks = topology
            .tracks()
            .iter()
            .map(|track| TrackSnapshot {
                id: track.id,
                name: track.name.clone(),
                kind: track.kind,
                volume: track.fader.volume(),
                muted: track.fader.is_muted(),
                plugins: track
                    .plugins
                    .iter()
                    .filter_map(|id| topology.plugin(*id))
                    .map(|slot| PluginSnapshot {
                        id: slot.id(),
                        uri: slot.descriptor().uri.clone(),
                        controls: slot.controls().iter().map(|control| control.get()).collect(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            version: PROJECT_VERSION,
            tracks,
            connections: topology.registry().connections().to_vec(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize project")
    }

    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let snapshot: Self = serde_json::from_str(data).context("malformed project file")?;
        if snapshot.version > PROJECT_VERSION {
            bail!(
                "project version {} is newer than supported version {PROJECT_VERSION}",
                snapshot.version
            );
        }
        Ok(snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        fs::write(path, json)
            .with_context(|| format!("failed to write project {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read project {}", path.display()))?;
        Self::from_json(&data).with_context(|| format!("in {}", path.display()))
    }

    /// Rebuilds a topology with the same ids as the one captured.
    pub(crate) fn instantiate(
        &self,
        config: &EngineConfig,
        factory: &dyn PluginFactory,
    ) -> anyhow::Result<Topology> {
        let saved = &self.connections;
        let mut topology = Topology::with_connections(config, saved)
            .context("failed to create the master track")?;

        for snapshot in &self.tracks {
            if snapshot.id != MASTER_TRACK {
                if snapshot.kind == TrackKind::Master {
                    bail!("track {} claims to be a second master", snapshot.id);
                }
                let index = topology.tracks().len();
                let track = Track::new(snapshot.id, snapshot.name.clone(), snapshot.kind);
                topology
                    .insert_track(index, track, saved)
                    .with_context(|| format!("failed to restore track {}", snapshot.id))?;
            }
            let track = topology
                .track(snapshot.id)
                .with_context(|| format!("track {} missing after restore", snapshot.id))?;
            track.fader.set_volume(snapshot.volume);
            track.fader.set_muted(snapshot.muted);

            for plugin in &snapshot.plugins {
                let instance = factory
                    .instantiate(&plugin.uri)
                    .with_context(|| format!("failed to instantiate {}", plugin.uri))?;
                let slot = PluginSlot::new(
                    plugin.id,
                    instance,
                    topology.sample_rate(),
                    topology.max_block(),
                );
                for (control, value) in slot.controls().iter().zip(&plugin.controls) {
                    control.set(*value);
                }
                topology
                    .adopt_plugin(snapshot.id, Arc::new(slot), saved)
                    .with_context(|| format!("failed to host plugin {}", plugin.id.0))?;
            }
        }

        for connection in saved {
            if topology.registry().connection(connection.id).is_some() {
                continue;
            }
            if connection.locked {
                tracing::warn!(
                    id = connection.id.0,
                    source = %connection.source,
                    destination = %connection.destination,
                    "dropping structural connection that no longer matches the chain"
                );
                continue;
            }
            topology
                .registry_mut()
                .restore(connection.clone())
                .with_context(|| {
                    format!(
                        "failed to restore connection {} -> {}",
                        connection.source, connection.destination
                    )
                })?;
        }
        Ok(topology)
    }
}

/// Parses arbitrary bytes as a project and loads it into a fresh engine.
/// Errors are expected; panics are bugs.
#[cfg(feature = "fuzzing")]
pub fn fuzz_load_project(data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(snapshot) = ProjectSnapshot::from_json(text) else {
        return;
    };
    let config = EngineConfig::new(48_000, 64).with_workers(0);
    let Ok(mut engine) = crate::engine::AudioEngine::new(config) else {
        return;
    };
    if engine
        .load_project(&snapshot, &crate::plugins::BuiltinPlugins)
        .is_ok()
    {
        assert!(engine.graph_snapshot().is_some());
        assert!(engine.master_track().is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{BuiltinPlugins, GainPlugin};

    #[test]
    fn json_round_trip() {
        let config = EngineConfig::new(48_000, 64).with_workers(0);
        let mut topology = Topology::new(&config).unwrap();
        let slot = Arc::new(PluginSlot::new(
            topology.allocate_plugin_id().unwrap(),
            Box::new(GainPlugin::with_gain(2.0)),
            48_000,
            64,
        ));
        topology.adopt_plugin(MASTER_TRACK, slot, &[]).unwrap();

        let snapshot = ProjectSnapshot::capture(&topology);
        let parsed = ProjectSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(parsed, snapshot);

        let rebuilt = parsed.instantiate(&config, &BuiltinPlugins).unwrap();
        assert_eq!(ProjectSnapshot::capture(&rebuilt), snapshot);
    }

    #[test]
    fn newer_versions_are_rejected() {
        let json = r#"{ "version": 99, "tracks": [], "connections": [] }"#;
        assert!(ProjectSnapshot::from_json(json).is_err());
    }
}
