//! Shared host state for one plugin run.

use crate::auth::{AuthorizationGate, DenyAll};
use crate::content::ContentRegistry;
use crate::registry::ApiRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Settings for host functions handed to System-tier plugins.
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Directory host file operations are confined to.
    pub root: PathBuf,

    /// Default timeout for host commands.
    pub command_timeout: Duration,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Registries, authorization gate and host settings shared by every plugin.
///
/// Constructed explicitly by the host; there is no global instance.
#[derive(Clone)]
pub struct HostContext {
    apis: Arc<ApiRegistry>,
    content: Arc<ContentRegistry>,
    gate: Arc<dyn AuthorizationGate>,
    settings: HostSettings,
}

impl HostContext {
    pub fn new(gate: Arc<dyn AuthorizationGate>, settings: HostSettings) -> Self {
        Self {
            apis: Arc::new(ApiRegistry::new()),
            content: Arc::new(ContentRegistry::new()),
            gate,
            settings,
        }
    }

    pub fn apis(&self) -> &Arc<ApiRegistry> {
        &self.apis
    }

    pub fn content(&self) -> &Arc<ContentRegistry> {
        &self.content
    }

    pub fn gate(&self) -> &Arc<dyn AuthorizationGate> {
        &self.gate
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Drop every registration. Used at host shutdown.
    pub async fn teardown(&self) {
        let apis = self.apis.len().await;
        let fragments = self.content.len().await;
        self.apis.clear().await;
        self.content.clear().await;
        info!("Host torn down ({} APIs, {} fragments dropped)", apis, fragments);
    }
}

impl Default for HostContext {
    /// Denies Admin installs and uses default host settings.
    fn default() -> Self {
        Self::new(Arc::new(DenyAll), HostSettings::default())
    }
}
