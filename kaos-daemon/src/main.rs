//! # kaos-daemon
//!
//! The Kaos host daemon.
//!
//! This daemon is responsible for:
//! - Discovering plugin directories on the configured plugin roots
//! - Validating manifests and ordering plugins by dependency
//! - Loading plugins in order, gating Admin installs
//! - Holding the capability and content registries for the lifetime of the run
//! - Sharing configured AI models with plugins through the `Ai` plugin
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       kaos-daemon                            │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │   Manifest   │  │  Dependency  │  │    Plugin    │      │
//! │  │  Validator   │─▶│   Resolver   │─▶│    Loader    │      │
//! │  └──────────────┘  └──────────────┘  └──────┬───────┘      │
//! │                                             │               │
//! │  ┌──────────────────────┐  ┌────────────────▼─────┐        │
//! │  │   Content Registry   │  │     API Registry     │        │
//! │  └──────────────────────┘  └──────────────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//!
//! The daemon reads configuration from `$XDG_CONFIG_HOME/kaos/config.toml`.
//! Logs go to the console and to a daily file under `$XDG_DATA_HOME/kaos/logs`.
//!
//! ## Running
//!
//! ```bash
//! # Start the daemon
//! cargo run --bin kaos-daemon
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin kaos-daemon
//! ```

use anyhow::Result;
use kaos_daemon::ai::AiManager;
use kaos_daemon::builtin::catalog;
use kaos_daemon::config::Config;
use kaos_daemon::logging;
use kaos_daemon::plugin::{PluginManager, PluginStatus};
use kaos_plugin_api::HostContext;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = Config::load_default();
    let host_config = loaded
        .as_ref()
        .map(|cfg| cfg.host.clone())
        .unwrap_or_default();

    // Initialize logging
    let _log_guard = logging::init(&host_config)?;

    info!("Starting kaos-daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from default path");
            cfg
        }
        Err(e) => {
            warn!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    let ai = Arc::new(AiManager::new(config.ai.clone())?);
    let host = HostContext::new(config.authorization_gate(), config.host_settings()?);
    let mut manager = PluginManager::new(host, catalog(ai), config.plugin_roots()?);

    let active = manager.discover_and_load().await;

    for plugin in manager.list_plugins() {
        let version = plugin.version.as_deref().unwrap_or("?");
        match &plugin.status {
            PluginStatus::Active => {
                info!("Plugin: {} v{} ({})", plugin.name, version, plugin.state)
            }
            PluginStatus::Degraded(e) => warn!(
                "Plugin: {} v{} ({}) - start failed: {}",
                plugin.name, version, plugin.state, e
            ),
            PluginStatus::Failed(reason) => error!(
                "Plugin: {} v{} ({}) - {}",
                plugin.name, version, plugin.state, reason
            ),
            PluginStatus::Pending => info!("Plugin: {} ({})", plugin.name, plugin.state),
        }
    }

    let apis = manager.host().apis();
    info!(
        "{} of {} plugin(s) active, {} API(s) from {:?}",
        active,
        manager.plugin_count(),
        apis.len().await,
        apis.owners().await
    );

    info!("Daemon startup complete");
    info!("Press Ctrl+C to stop");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    manager.shutdown().await;

    info!("Daemon stopped");
    Ok(())
}
