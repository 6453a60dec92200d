//! # Built-in Plugins
//!
//! Plugin code compiled into the daemon. Each plugin still needs a manifest
//! directory on a plugin root (see `plugins/` in the repository) before the
//! loader will run it.

mod ai;
mod clock;
mod echo;

pub use ai::{AiPlugin, AI};
pub use clock::{ClockPlugin, CLOCK};
pub use echo::{EchoPlugin, ECHO};

use crate::ai::AiManager;
use kaos_plugin_api::{Plugin, PluginCatalog};
use std::sync::Arc;

/// Catalog with every built-in plugin, sharing `ai` with the AI plugin.
pub fn catalog(ai: Arc<AiManager>) -> PluginCatalog {
    PluginCatalog::new()
        .with(AI, move || Arc::new(AiPlugin::new(Arc::clone(&ai))) as Arc<dyn Plugin>)
        .with(CLOCK, || Arc::new(ClockPlugin::new()) as Arc<dyn Plugin>)
        .with(ECHO, || Arc::new(EchoPlugin::new()) as Arc<dyn Plugin>)
}

/// Catalog with every built-in plugin and no AI models configured.
pub fn default_catalog() -> PluginCatalog {
    catalog(Arc::new(AiManager::default()))
}
