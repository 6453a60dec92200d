//! Capability registry shared by all loaded plugins.
//!
//! Capabilities are keyed by `(owner plugin name, api name)`. Every
//! capability follows one calling contract: a list of JSON arguments in, a
//! JSON value or a [`CapabilityError`] out.
//!
//! The map sits behind an async `RwLock`. Lookups clone the `Arc` out and
//! release the lock before the capability runs, so capabilities may call
//! back into the registry and concurrent invocations never block each other.

use async_trait::async_trait;
use kaos_runtime::{CapabilityError, RegistryError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Result of invoking a capability.
pub type CapabilityResult = Result<Value, CapabilityError>;

/// A named unit of functionality a plugin exposes to others.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> CapabilityResult;
}

/// Shared reference to a registered capability.
pub type CapabilityRef = Arc<dyn Capability>;

/// Adapter turning a synchronous closure into a [`Capability`].
pub struct FnCapability<F> {
    func: F,
}

#[async_trait]
impl<F> Capability for FnCapability<F>
where
    F: Fn(Vec<Value>) -> CapabilityResult + Send + Sync,
{
    async fn call(&self, args: Vec<Value>) -> CapabilityResult {
        (self.func)(args)
    }
}

/// Wrap a closure as a capability reference.
pub fn capability_fn<F>(func: F) -> CapabilityRef
where
    F: Fn(Vec<Value>) -> CapabilityResult + Send + Sync + 'static,
{
    Arc::new(FnCapability { func })
}

/// Registry of capabilities, namespaced by owner plugin.
///
/// Outside this crate the registry is read-only: writes go through a
/// plugin's [`ScopedApis`](crate::ScopedApis).
///
/// ```compile_fail
/// use kaos_plugin_api::{capability_fn, ApiRegistry};
/// use std::sync::atomic::AtomicBool;
///
/// async fn impersonate(registry: &ApiRegistry) {
///     let live = AtomicBool::new(true);
///     let capability = capability_fn(|_| Ok(serde_json::Value::Null));
///     let _ = registry.register("Clock", "now", capability, &live).await;
/// }
/// ```
#[derive(Default)]
pub struct ApiRegistry {
    apis: RwLock<HashMap<String, HashMap<String, CapabilityRef>>>,
}

impl ApiRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under `(owner, api)` while `active` is set.
    ///
    /// The flag is checked under the write lock. Fails with
    /// [`RegistryError::DuplicateApi`] if the key exists; the existing entry
    /// is left untouched. Plugins reach this through
    /// [`ScopedApis`](crate::ScopedApis) only.
    pub(crate) async fn register(
        &self,
        owner: &str,
        api: &str,
        capability: CapabilityRef,
        active: &AtomicBool,
    ) -> Result<(), RegistryError> {
        let mut apis = self.apis.write().await;
        if !active.load(Ordering::Acquire) {
            return Err(RegistryError::OwnerInactive(owner.to_string()));
        }
        Self::insert(&mut apis, owner, api, capability)
    }

    fn insert(
        apis: &mut HashMap<String, HashMap<String, CapabilityRef>>,
        owner: &str,
        api: &str,
        capability: CapabilityRef,
    ) -> Result<(), RegistryError> {
        let owned = apis.entry(owner.to_string()).or_default();
        if owned.contains_key(api) {
            return Err(RegistryError::DuplicateApi {
                owner: owner.to_string(),
                api: api.to_string(),
            });
        }
        owned.insert(api.to_string(), capability);
        debug!("API registered: {}.{}", owner, api);
        Ok(())
    }

    /// Look up a capability. A miss is `None`, never an error.
    pub async fn get(&self, owner: &str, api: &str) -> Option<CapabilityRef> {
        let apis = self.apis.read().await;
        apis.get(owner).and_then(|owned| owned.get(api)).cloned()
    }

    /// Look up and call a capability.
    ///
    /// A failure reported by the capability comes back as
    /// [`RegistryError::CapabilityFailed`] carrying the original error.
    pub async fn invoke(
        &self,
        owner: &str,
        api: &str,
        args: Vec<Value>,
    ) -> Result<Value, RegistryError> {
        let capability = self
            .get(owner, api)
            .await
            .ok_or_else(|| RegistryError::UnknownApi {
                owner: owner.to_string(),
                api: api.to_string(),
            })?;

        capability
            .call(args)
            .await
            .map_err(|source| RegistryError::CapabilityFailed {
                owner: owner.to_string(),
                api: api.to_string(),
                source,
            })
    }

    /// API names registered by one owner, sorted.
    pub async fn list_apis(&self, owner: &str) -> Vec<String> {
        let apis = self.apis.read().await;
        let mut names: Vec<String> = apis
            .get(owner)
            .map(|owned| owned.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Owners with at least one registered API, sorted.
    pub async fn owners(&self) -> Vec<String> {
        let apis = self.apis.read().await;
        let mut owners: Vec<String> = apis
            .iter()
            .filter(|(_, owned)| !owned.is_empty())
            .map(|(owner, _)| owner.clone())
            .collect();
        owners.sort();
        owners
    }

    /// Total number of registered APIs.
    pub async fn len(&self) -> usize {
        self.apis.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every API of one owner. Returns how many were removed.
    pub(crate) async fn remove_owner(&self, owner: &str) -> usize {
        let mut apis = self.apis.write().await;
        apis.remove(owner).map(|owned| owned.len()).unwrap_or(0)
    }

    /// Drop everything.
    pub(crate) async fn clear(&self) {
        self.apis.write().await.clear();
    }
}
