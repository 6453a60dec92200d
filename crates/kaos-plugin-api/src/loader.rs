//! Plugin loader and per-plugin lifecycle state machine.
//!
//! Each discovered plugin gets one [`PluginRecord`] that moves through
//!
//! ```text
//! Discovered -> Validated -> Resolved -> Active
//!      \            \            \
//!       `------------`------------`--> Failed
//! ```
//!
//! Transitions only move forward. Records are never dropped during a run so
//! the host can report on every plugin it found.
//!
//! Loading is strictly sequential in resolver order: a plugin's load step
//! finishes (or fails) before the next one starts, so later plugins can look
//! up capabilities their dependencies registered.

use crate::context::HostContext;
use crate::host::{DefaultHostFunctions, HostFunctions};
use crate::plugin::{Plugin, PluginCatalog, PluginContext};
use chrono::{DateTime, Utc};
use kaos_runtime::{
    resolve, DiscoveredPlugin, InstallationLevel, LoadError, ManifestError, PluginManifest,
    ResolutionError,
};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Lifecycle state of a plugin within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Discovered,
    Validated,
    Resolved,
    Active,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Discovered => "discovered",
            LifecycleState::Validated => "validated",
            LifecycleState::Resolved => "resolved",
            LifecycleState::Active => "active",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a plugin ended up Failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The manifest did not validate.
    Manifest(ManifestError),

    /// The resolver excluded the plugin.
    ///
    /// `via` is set when the cause was inherited through a dependency.
    Resolution {
        cause: ResolutionError,
        via: Option<String>,
    },

    /// The load step did not complete.
    Load(LoadError),

    /// A declared dependency failed to load, so this plugin was never run.
    ///
    /// `cause` is the root load failure; `via` names the direct dependency
    /// it arrived through.
    Dependency { cause: LoadError, via: String },
}

impl FailureReason {
    /// Load failure at the root of this reason, if it happened at load time.
    pub fn root_load_error(&self) -> Option<&LoadError> {
        match self {
            FailureReason::Load(e) | FailureReason::Dependency { cause: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Manifest(e) => write!(f, "{}", e),
            FailureReason::Resolution { cause, via: None } => write!(f, "{}", cause),
            FailureReason::Resolution {
                cause,
                via: Some(via),
            } => write!(f, "{} (via dependency {})", cause, via),
            FailureReason::Load(e) => write!(f, "{}", e),
            FailureReason::Dependency { cause, via } => {
                write!(f, "{} (via dependency {})", cause, via)
            }
        }
    }
}

/// Lifecycle record for one discovered plugin directory.
pub struct PluginRecord {
    id: usize,
    path: PathBuf,
    dir_name: String,
    manifest: Option<PluginManifest>,
    state: LifecycleState,
    failure: Option<FailureReason>,
    instance: Option<Arc<dyn Plugin>>,
    context: Option<PluginContext>,
    loaded_at: Option<DateTime<Utc>>,
    start_error: Option<String>,
}

impl PluginRecord {
    fn discovered(id: usize, plugin: &DiscoveredPlugin) -> Self {
        Self {
            id,
            path: plugin.path.clone(),
            dir_name: plugin.dir_name(),
            manifest: None,
            state: LifecycleState::Discovered,
            failure: None,
            instance: None,
            context: None,
            loaded_at: None,
            start_error: None,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        debug_assert!(
            self.state < next && self.state != LifecycleState::Failed,
            "lifecycle moved backwards: {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    fn fail(&mut self, reason: FailureReason) {
        warn!(plugin = %self.plugin_name(), "Plugin failed: {}", reason);
        self.advance(LifecycleState::Failed);
        self.failure = Some(reason);
    }

    /// Discovery index.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    /// Declared plugin name, or the directory name if the manifest never validated.
    pub fn plugin_name(&self) -> &str {
        self.manifest
            .as_ref()
            .map(|m| m.plugin_name())
            .unwrap_or(&self.dir_name)
    }

    pub fn manifest(&self) -> Option<&PluginManifest> {
        self.manifest.as_ref()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    /// Loaded plugin code. Present only while Active.
    pub fn instance(&self) -> Option<&Arc<dyn Plugin>> {
        self.instance.as_ref()
    }

    pub fn context(&self) -> Option<&PluginContext> {
        self.context.as_ref()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// Error reported by the start step, if any. The plugin stays Active.
    pub fn start_error(&self) -> Option<&str> {
        self.start_error.as_deref()
    }
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("id", &self.id)
            .field("dir_name", &self.dir_name)
            .field("plugin_name", &self.plugin_name())
            .field("state", &self.state)
            .field("failure", &self.failure)
            .field("loaded_at", &self.loaded_at)
            .field("start_error", &self.start_error)
            .finish()
    }
}

/// Outcome of a load run.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Resolved plugins in load order, then the rest in discovery order.
    records: Vec<PluginRecord>,
}

impl LoadReport {
    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<PluginRecord> {
        self.records
    }

    pub fn active(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.iter().filter(|r| r.is_active())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records
            .iter()
            .filter(|r| r.state == LifecycleState::Failed)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// First record carrying `name`, preferring an Active one.
    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records
            .iter()
            .find(|r| r.is_active() && r.plugin_name() == name)
            .or_else(|| self.records.iter().find(|r| r.plugin_name() == name))
    }

    /// Names of Active plugins in load order.
    pub fn load_order(&self) -> Vec<&str> {
        self.active().map(|r| r.plugin_name()).collect()
    }
}

/// Drives discovered plugins through validation, resolution and loading.
pub struct PluginLoader {
    host: HostContext,
    catalog: PluginCatalog,
}

impl PluginLoader {
    pub fn new(host: HostContext, catalog: PluginCatalog) -> Self {
        Self { host, catalog }
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Validate, resolve and load a discovered plugin set.
    ///
    /// Never fails as a whole: every problem is recorded on the affected
    /// plugin and the run continues with the rest.
    pub async fn run(&self, discovered: Vec<DiscoveredPlugin>) -> LoadReport {
        let mut records: Vec<PluginRecord> = discovered
            .iter()
            .enumerate()
            .map(|(id, plugin)| PluginRecord::discovered(id, plugin))
            .collect();

        // Validate
        for (record, plugin) in records.iter_mut().zip(&discovered) {
            match plugin.validate() {
                Ok(manifest) => {
                    record.manifest = Some(manifest);
                    record.advance(LifecycleState::Validated);
                }
                Err(e) => record.fail(FailureReason::Manifest(e)),
            }
        }

        // Resolve
        let resolution = resolve(
            records
                .iter()
                .filter_map(|r| r.manifest.as_ref().map(|m| (r.id, m))),
        );
        for exclusion in &resolution.exclusions {
            records[exclusion.id].fail(FailureReason::Resolution {
                cause: exclusion.cause.clone(),
                via: exclusion.via.clone(),
            });
        }
        for &id in &resolution.order {
            records[id].advance(LifecycleState::Resolved);
        }
        debug!("Resolved load order over {} plugins", resolution.order.len());

        // Load
        let mut active_names: HashSet<String> = HashSet::new();
        let mut load_failures: HashMap<String, LoadError> = HashMap::new();
        for &id in &resolution.order {
            let record = &mut records[id];
            let name = record.plugin_name().to_string();

            if let Some(reason) = unmet_dependency(record, &active_names, &load_failures) {
                if let Some(cause) = reason.root_load_error() {
                    load_failures.entry(name).or_insert_with(|| cause.clone());
                }
                record.fail(reason);
                continue;
            }

            match self.load_one(record, &active_names).await {
                Ok(()) => {
                    active_names.insert(name);
                }
                Err(e) => {
                    load_failures.entry(name).or_insert_with(|| e.clone());
                    record.fail(FailureReason::Load(e));
                }
            }
        }

        // Report order: load order first, then everything else by discovery index.
        let mut positions = vec![usize::MAX; records.len()];
        for (pos, &id) in resolution.order.iter().enumerate() {
            positions[id] = pos;
        }
        records.sort_by_key(|r| (positions[r.id], r.id));

        let report = LoadReport { records };
        info!(
            "Plugin load finished: {} active, {} failed",
            report.active_count(),
            report.failed_count()
        );
        report
    }

    async fn load_one(
        &self,
        record: &mut PluginRecord,
        active_names: &HashSet<String>,
    ) -> Result<(), LoadError> {
        let manifest = match record.manifest.as_ref() {
            Some(manifest) => manifest,
            None => {
                return Err(LoadError::LoadExecutionError {
                    plugin: record.dir_name.clone(),
                    message: "plugin has no validated manifest".to_string(),
                })
            }
        };
        let name = manifest.plugin_name().to_string();

        if active_names.contains(&name) {
            return Err(LoadError::DuplicatePluginName(name));
        }

        if manifest.installation_level() == InstallationLevel::Admin {
            self.authorize(&name).await?;
        }

        let plugin = self
            .catalog
            .instantiate(&name)
            .ok_or_else(|| LoadError::LoadExecutionError {
                plugin: name.clone(),
                message: "no plugin code is registered under this name".to_string(),
            })?;

        let host: Option<Arc<dyn HostFunctions>> = if manifest.permission().grants_host_access() {
            let settings = self.host.settings();
            Some(Arc::new(DefaultHostFunctions::new(
                name.as_str(),
                &settings.root,
                settings.command_timeout,
            )))
        } else {
            None
        };

        let ctx = PluginContext::new(
            &name,
            manifest.permission(),
            Arc::clone(self.host.apis()),
            Arc::clone(self.host.content()),
            host,
        );

        debug!(plugin = %name, "Loading plugin");
        if let Err(message) = run_isolated(&name, Phase::Load, &plugin, &ctx).await {
            let withdrawn = ctx.revoke().await;
            if withdrawn > 0 {
                debug!(plugin = %name, "Withdrew {} registrations", withdrawn);
            }
            return Err(LoadError::LoadExecutionError {
                plugin: name,
                message,
            });
        }

        info!(
            plugin = %name,
            version = %manifest.version(),
            permission = %manifest.permission(),
            "Plugin loaded"
        );
        record.instance = Some(plugin);
        record.context = Some(ctx);
        record.loaded_at = Some(Utc::now());
        record.advance(LifecycleState::Active);
        Ok(())
    }

    async fn authorize(&self, name: &str) -> Result<(), LoadError> {
        match self.host.gate().authorize(name).await {
            Ok(true) => {
                debug!(plugin = %name, "Admin installation approved");
                Ok(())
            }
            Ok(false) => Err(LoadError::InstallationDenied {
                plugin: name.to_string(),
                reason: "not approved by host".to_string(),
            }),
            Err(e) => Err(LoadError::InstallationDenied {
                plugin: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Call `start` on every Active plugin in load order.
    ///
    /// A failing start is recorded on the record; the plugin stays Active.
    pub async fn start_all(&self, report: &mut LoadReport) {
        for record in report.records.iter_mut().filter(|r| r.is_active()) {
            let (plugin, ctx) = match (record.instance.as_ref(), record.context.as_ref()) {
                (Some(plugin), Some(ctx)) => (Arc::clone(plugin), ctx.clone()),
                _ => continue,
            };
            let name = record.plugin_name().to_string();

            if let Err(message) = run_isolated(&name, Phase::Start, &plugin, &ctx).await {
                error!(plugin = %name, "Plugin start failed: {}", message);
                record.start_error = Some(message);
            }
        }
    }

    /// Revoke every Active plugin in reverse load order, then clear the host.
    ///
    /// Handles a plugin kept past this point refuse further writes.
    pub async fn shutdown(&self, report: &LoadReport) {
        for record in report.records.iter().rev().filter(|r| r.is_active()) {
            if let Some(ctx) = record.context() {
                let withdrawn = ctx.revoke().await;
                debug!(
                    plugin = %record.plugin_name(),
                    "Revoked, withdrew {} registrations",
                    withdrawn
                );
            }
        }
        self.host.teardown().await;
    }
}

/// First declared dependency that is not Active, as a failure reason.
///
/// A name with an Active holder counts as satisfied even if a duplicate of
/// it failed.
fn unmet_dependency(
    record: &PluginRecord,
    active_names: &HashSet<String>,
    load_failures: &HashMap<String, LoadError>,
) -> Option<FailureReason> {
    let manifest = record.manifest.as_ref()?;
    let dependency = manifest
        .dependencies()
        .iter()
        .find(|dep| !active_names.contains(dep.as_str()))?;

    let cause = load_failures.get(dependency).cloned().unwrap_or_else(|| {
        LoadError::LoadExecutionError {
            plugin: dependency.clone(),
            message: "dependency did not become active".to_string(),
        }
    });
    debug!(
        plugin = %manifest.plugin_name(),
        dependency = %dependency,
        "Skipping load, dependency is not active"
    );
    Some(FailureReason::Dependency {
        cause,
        via: dependency.clone(),
    })
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Load,
    Start,
}

/// Run one plugin step on its own task so a panic cannot take the host down.
async fn run_isolated(
    name: &str,
    phase: Phase,
    plugin: &Arc<dyn Plugin>,
    ctx: &PluginContext,
) -> Result<(), String> {
    let plugin = Arc::clone(plugin);
    let ctx = ctx.clone();
    let span = info_span!("plugin", plugin = %name, phase = ?phase);

    let task = tokio::spawn(
        async move {
            match phase {
                Phase::Load => plugin.load(&ctx).await,
                Phase::Start => plugin.start(&ctx).await,
            }
        }
        .instrument(span),
    );

    match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_error) if join_error.is_panic() => Err(format!(
            "panicked: {}",
            panic_message(join_error.into_panic())
        )),
        Err(join_error) => Err(join_error.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
