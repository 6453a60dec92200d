//! Plugin contract and the context handed to plugin code.
//!
//! Plugin code is compiled into the host and bound to a manifest by plugin
//! name through a [`PluginCatalog`]. At load time each plugin receives a
//! [`PluginContext`] whose registry handles are scoped to the plugin's own
//! name: a plugin can read anybody's APIs but only register under itself.

use crate::content::{ContentFragment, ContentKind, ContentRegistry};
use crate::host::{plugin_log, HostFunctions, LogLevel};
use crate::registry::{capability_fn, ApiRegistry, CapabilityRef, CapabilityResult};
use async_trait::async_trait;
use kaos_runtime::{Permission, RegistryError, RuntimeResult};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Code behind a plugin manifest.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Initialize the plugin: register APIs and content, look up dependencies.
    ///
    /// Runs exactly once, after every dependency has become Active.
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()>;

    /// Called once every plugin has been loaded.
    async fn start(&self, _ctx: &PluginContext) -> RuntimeResult<()> {
        Ok(())
    }
}

/// Context passed to a plugin's load and start steps.
#[derive(Clone)]
pub struct PluginContext {
    plugin_name: String,
    permission: Permission,
    apis: ScopedApis,
    content: ScopedContent,
    host: Option<Arc<dyn HostFunctions>>,
    active: Arc<AtomicBool>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin_name: &str,
        permission: Permission,
        apis: Arc<ApiRegistry>,
        content: Arc<ContentRegistry>,
        host: Option<Arc<dyn HostFunctions>>,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        Self {
            plugin_name: plugin_name.to_string(),
            permission,
            apis: ScopedApis {
                owner: plugin_name.to_string(),
                registry: apis,
                active: Arc::clone(&active),
            },
            content: ScopedContent {
                owner: plugin_name.to_string(),
                registry: content,
                active: Arc::clone(&active),
            },
            host,
            active,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    /// API registry handle scoped to this plugin.
    pub fn apis(&self) -> &ScopedApis {
        &self.apis
    }

    /// Content registry handle scoped to this plugin.
    pub fn content(&self) -> &ScopedContent {
        &self.content
    }

    /// Host functions. Only System-tier plugins get them.
    pub fn host(&self) -> Option<&Arc<dyn HostFunctions>> {
        self.host.as_ref()
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        plugin_log(&self.plugin_name, level, message);
    }

    /// Withdraw everything this plugin registered and refuse further writes.
    ///
    /// Clones of the context held by spawned tasks stop working too.
    pub(crate) async fn revoke(&self) -> usize {
        self.active.store(false, Ordering::Release);
        let apis = self.apis.registry.remove_owner(&self.plugin_name).await;
        let fragments = self.content.registry.remove_owner(&self.plugin_name).await;
        apis + fragments
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_name", &self.plugin_name)
            .field("permission", &self.permission)
            .field("host", &self.host.is_some())
            .finish()
    }
}

/// API registry handle that registers under one owner.
#[derive(Clone)]
pub struct ScopedApis {
    owner: String,
    registry: Arc<ApiRegistry>,
    active: Arc<AtomicBool>,
}

impl ScopedApis {
    /// Register a capability under this plugin's name.
    pub async fn register(
        &self,
        api: &str,
        capability: CapabilityRef,
    ) -> Result<(), RegistryError> {
        self.registry
            .register(&self.owner, api, capability, &self.active)
            .await
    }

    /// Register a closure as a capability.
    pub async fn register_fn<F>(&self, api: &str, func: F) -> Result<(), RegistryError>
    where
        F: Fn(Vec<Value>) -> CapabilityResult + Send + Sync + 'static,
    {
        self.register(api, capability_fn(func)).await
    }

    /// Look up any plugin's capability.
    pub async fn get(&self, owner: &str, api: &str) -> Option<CapabilityRef> {
        self.registry.get(owner, api).await
    }

    /// Call any plugin's capability.
    pub async fn invoke(
        &self,
        owner: &str,
        api: &str,
        args: Vec<Value>,
    ) -> Result<Value, RegistryError> {
        self.registry.invoke(owner, api, args).await
    }

    pub async fn list_apis(&self, owner: &str) -> Vec<String> {
        self.registry.list_apis(owner).await
    }
}

/// Content registry handle that contributes under one owner.
#[derive(Clone)]
pub struct ScopedContent {
    owner: String,
    registry: Arc<ContentRegistry>,
    active: Arc<AtomicBool>,
}

impl ScopedContent {
    /// Contribute a fragment to a slot. Returns its sequence number.
    pub async fn add_fragment(
        &self,
        slot: &str,
        kind: ContentKind,
        content: impl Into<String>,
    ) -> Result<u64, RegistryError> {
        self.registry
            .add_fragment(&self.owner, slot, kind, content, &self.active)
            .await
    }

    pub async fn list_fragments(&self, slot: &str, kind: ContentKind) -> Vec<ContentFragment> {
        self.registry.list_fragments(slot, kind).await
    }
}

/// Factory producing a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Compiled-in plugin code, looked up by plugin name.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind plugin code to a plugin name, replacing any earlier binding.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn instantiate(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Bound plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
