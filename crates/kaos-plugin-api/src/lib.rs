//! # kaos-plugin-api
//!
//! Plugin contract and lifecycle engine for the Kaos host.
//!
//! This crate provides:
//!
//! - The [`Plugin`] trait implemented by compiled-in plugin code
//! - [`ApiRegistry`], a concurrency-safe registry of capabilities keyed by
//!   `(owner plugin, api name)`
//! - [`ContentRegistry`], ordered CSS/HTML/JS fragments per slot
//! - [`PluginLoader`], which validates, resolves and loads a discovered plugin
//!   set in dependency order
//! - Host functions handed to System-tier plugins
//!
//! ## Plugin Development
//!
//! A plugin is a manifest directory plus code registered in a
//! [`PluginCatalog`] under the manifest's `pluginName`. Its `load` step gets a
//! [`PluginContext`] whose registry handles write under the plugin's own name.

pub mod auth;
pub mod content;
pub mod context;
pub mod host;
pub mod loader;
pub mod plugin;
pub mod registry;

pub use auth::{AllowAll, AllowList, AuthorizationGate, DenyAll};
pub use content::{ContentFragment, ContentKind, ContentRegistry};
pub use context::{HostContext, HostSettings};
pub use host::{CommandOutput, DefaultHostFunctions, HostFunctions, LogLevel};
pub use loader::{FailureReason, LifecycleState, LoadReport, PluginLoader, PluginRecord};
pub use plugin::{Plugin, PluginCatalog, PluginContext, PluginFactory, ScopedApis, ScopedContent};
pub use registry::{capability_fn, ApiRegistry, Capability, CapabilityRef, CapabilityResult};
