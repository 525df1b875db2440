//! Plugins shipped with the engine.

mod delay;
mod gain;
mod lfo;
mod sine;

pub use delay::{DelayPlugin, DELAY_URI, MAX_DELAY_FRAMES};
pub use gain::{GainPlugin, GAIN_URI};
pub use lfo::{LfoPlugin, LFO_URI};
pub use sine::{SinePlugin, SINE_URI};

use crate::plugin::{Plugin, PluginFactory};

/// Factory for the built-in plugins, keyed by URI.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPlugins;

impl PluginFactory for BuiltinPlugins {
    fn instantiate(&self, uri: &str) -> anyhow::Result<Box<dyn Plugin>> {
        let plugin: Box<dyn Plugin> = match uri {
            GAIN_URI => Box::new(GainPlugin::new()),
            DELAY_URI => Box::new(DelayPlugin::new(0)),
            SINE_URI => Box::new(SinePlugin::new(440.0)),
            LFO_URI => Box::new(LfoPlugin::new(1.0)),
            other => anyhow::bail!("unknown plugin uri `{other}`"),
        };
        Ok(plugin)
    }
}
