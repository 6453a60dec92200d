//! # kaos-runtime
//!
//! Plugin lifecycle groundwork for the Kaos host.
//!
//! This crate provides:
//! - Plugin discovery from plugin root directories
//! - Manifest parsing and validation
//! - Permission and installation tiers
//! - Dependency resolution into a deterministic load order
//! - The error taxonomy shared by the whole plugin system
//!
//! ## Plugin Structure
//!
//! Plugins are directories containing a `_manifest.json` file. The code
//! behind a plugin is compiled into the host and looked up by plugin name
//! (see `kaos-plugin-api`).
//!
//! ## Trust Model
//!
//! Plugins declare a permission tier (System, User, Visitor) and an
//! installation level (Admin, Normal). Tiers only decide which surface a
//! plugin is handed at load time and whether the host must approve the
//! install. They are not a sandbox.

pub mod discovery;
pub mod error;
pub mod manifest;
pub mod permission;
pub mod resolver;

pub use discovery::{discover_plugin, discover_plugins, DiscoveredPlugin};
pub use error::{
    CapabilityError, HostError, LoadError, ManifestError, RegistryError, ResolutionError,
    RuntimeError, RuntimeResult,
};
pub use manifest::{PluginManifest, MANIFEST_FILE};
pub use permission::{InstallationLevel, Permission};
pub use resolver::{resolve, DependencyResolver, Exclusion, Resolution};
