//! Plugin manager driving one host run.

use kaos_plugin_api::{HostContext, LifecycleState, LoadReport, PluginCatalog, PluginLoader};
use kaos_runtime::discover_plugins;
use std::path::PathBuf;
use tracing::info;

/// Status of a plugin, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginStatus {
    /// Plugin is loaded and serving.
    Active,
    /// Plugin is loaded but its start step reported an error.
    Degraded(String),
    /// Plugin never became active.
    Failed(String),
    /// Plugin has not been through a run yet.
    Pending,
}

/// Information about a discovered plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub version: Option<String>,
    pub developer: Option<String>,
    pub state: LifecycleState,
    pub status: PluginStatus,
    /// Failure reason, present only in the Failed state.
    pub reason: Option<String>,
}

/// Manager for the plugin lifecycle.
///
/// Owns the [`HostContext`] holding both registries and the authorization
/// gate, and keeps the report of the last run for status queries.
pub struct PluginManager {
    loader: PluginLoader,
    roots: Vec<PathBuf>,
    report: LoadReport,
}

impl PluginManager {
    /// Create a new plugin manager.
    pub fn new(host: HostContext, catalog: PluginCatalog, roots: Vec<PathBuf>) -> Self {
        Self {
            loader: PluginLoader::new(host, catalog),
            roots,
            report: LoadReport::default(),
        }
    }

    /// Discover, validate, resolve, load and start every plugin.
    ///
    /// Returns the number of Active plugins.
    pub async fn discover_and_load(&mut self) -> usize {
        info!("Discovering plugins in {} root(s)...", self.roots.len());
        let discovered = discover_plugins(&self.roots);
        info!("Discovered {} plugin(s)", discovered.len());

        let mut report = self.loader.run(discovered).await;
        self.loader.start_all(&mut report).await;
        self.report = report;
        self.report.active_count()
    }

    /// Report of the last run.
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn host(&self) -> &HostContext {
        self.loader.host()
    }

    pub fn plugin_count(&self) -> usize {
        self.report.records().len()
    }

    pub fn active_count(&self) -> usize {
        self.report.active_count()
    }

    /// Every discovered plugin in load order, failures last.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.report
            .records()
            .iter()
            .map(|record| {
                let manifest = record.manifest();
                let reason = record.failure().map(|f| f.to_string());
                let status = match (record.state(), &reason, record.start_error()) {
                    (LifecycleState::Active, _, Some(e)) => PluginStatus::Degraded(e.to_string()),
                    (LifecycleState::Active, _, None) => PluginStatus::Active,
                    (LifecycleState::Failed, Some(reason), _) => {
                        PluginStatus::Failed(reason.clone())
                    }
                    _ => PluginStatus::Pending,
                };

                PluginInfo {
                    name: record.plugin_name().to_string(),
                    version: manifest.map(|m| m.version().to_string()),
                    developer: manifest.map(|m| m.developer().to_string()),
                    state: record.state(),
                    status,
                    reason,
                }
            })
            .collect()
    }

    /// Check if a plugin is Active.
    pub fn is_active(&self, name: &str) -> bool {
        self.report.get(name).is_some_and(|r| r.is_active())
    }

    /// Revoke every active plugin and drop every registration.
    pub async fn shutdown(&self) {
        info!("Shutting down {} active plugin(s)", self.active_count());
        self.loader.shutdown(&self.report).await;
    }
}
