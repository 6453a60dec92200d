//! Error types for the Kaos plugin runtime.
//!
//! Every failure here is recovered per plugin: the host records it against
//! the affected plugin and keeps going with the rest of the set.

use std::path::PathBuf;
use thiserror::Error;

/// A plugin manifest failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// The manifest is not a structured object (array, scalar, bad JSON, unreadable file).
    #[error("Invalid manifest format: {0}")]
    InvalidFormat(String),

    /// A required field is absent.
    #[error("Missing required field in manifest: {field}")]
    MissingField { field: &'static str },

    /// A field is present but has the wrong type or an empty value.
    #[error("Invalid manifest field {field}: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// `Permission` is not one of System, User or Visitor.
    #[error("Invalid permission level in manifest: {0}")]
    InvalidPermission(String),

    /// `InstallationLevel` is not one of Admin or Normal.
    #[error("Invalid installation level in manifest: {0}")]
    InvalidInstallationLevel(String),

    /// `dependencies` is not a list of strings.
    #[error("Invalid dependency list in manifest: expected a list of plugin names")]
    InvalidDependencyList,
}

/// Root cause for excluding a plugin from the load order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// `plugin` declares `dependency`, which no validated plugin provides.
    #[error("Plugin {plugin} depends on missing plugin {dependency}")]
    MissingDependency { plugin: String, dependency: String },

    /// The listed plugins depend on each other in a cycle.
    #[error("Cyclic dependency between plugins: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// A resolved plugin could not be brought to the Active state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// An Admin-level install was not authorized by the host gate.
    #[error("Installation of {plugin} was not authorized: {reason}")]
    InstallationDenied { plugin: String, reason: String },

    /// The plugin's load step failed or panicked.
    #[error("Plugin {plugin} failed to load: {message}")]
    LoadExecutionError { plugin: String, message: String },

    /// Another plugin with the same name is already Active.
    #[error("Plugin name {0} is already taken by an active plugin")]
    DuplicatePluginName(String),
}

/// Failure reported by a capability itself.
///
/// The registry passes these through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors returned by the API and content registries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The `(owner, api)` key is already registered.
    #[error("API {owner}.{api} is already registered")]
    DuplicateApi { owner: String, api: String },

    /// No capability is registered under `(owner, api)`.
    #[error("Unknown API {owner}.{api}")]
    UnknownApi { owner: String, api: String },

    /// The owning plugin is no longer allowed to register.
    #[error("Plugin {0} is not active and cannot register")]
    OwnerInactive(String),

    /// The capability ran and reported a failure of its own.
    #[error("API {owner}.{api} failed: {source}")]
    CapabilityFailed {
        owner: String,
        api: String,
        #[source]
        source: CapabilityError,
    },
}

/// Errors from host functions handed to System-tier plugins.
#[derive(Error, Debug)]
pub enum HostError {
    /// The path resolves outside the host root.
    #[error("Access outside the host root is not allowed: {0}")]
    PathOutsideRoot(PathBuf),

    /// A host command did not finish in time.
    #[error("Command timed out after {0} seconds")]
    CommandTimedOut(u64),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the Kaos runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Host(#[from] HostError),

    /// Plugin directory not found at the specified path.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Plugin code reported a failure while initializing.
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
