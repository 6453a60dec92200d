//! Plugin manifest parsing and validation.
//!
//! Each plugin directory has a `_manifest.json` file describing the plugin's
//! identity, dependencies and trust tier:
//!
//! ```json
//! {
//!     "version": "1.0.0",
//!     "pluginName": "Clock",
//!     "dependencies": [],
//!     "Developer": "Kaos",
//!     "Permission": "System",
//!     "InstallationLevel": "Normal"
//! }
//! ```
//!
//! Unknown keys are ignored.

use crate::error::{ManifestError, RuntimeResult};
use crate::permission::{InstallationLevel, Permission};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;

/// File name of the manifest inside a plugin directory.
pub const MANIFEST_FILE: &str = "_manifest.json";

/// Accepted spellings per logical field, in lookup order.
const VERSION: (&str, &[&str]) = ("version", &["version"]);
const PLUGIN_NAME: (&str, &[&str]) = ("pluginName", &["pluginName"]);
const DEVELOPER: (&str, &[&str]) = ("Developer", &["Developer", "developer"]);
const PERMISSION: (&str, &[&str]) = ("Permission", &["Permission", "permission"]);
const INSTALLATION_LEVEL: (&str, &[&str]) = (
    "InstallationLevel",
    &["InstallationLevel", "installationLevel"],
);
const DEPENDENCIES: (&str, &[&str]) = ("dependencies", &["dependencies"]);

/// A validated plugin manifest. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    version: String,
    plugin_name: String,
    dependencies: Vec<String>,
    developer: String,
    permission: Permission,
    installation_level: InstallationLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl PluginManifest {
    /// Load and validate a manifest file.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_str(&content)?)
    }

    /// Parse and validate a manifest from JSON text.
    pub fn from_str(content: &str) -> Result<Self, ManifestError> {
        let raw: Value = serde_json::from_str(content)
            .map_err(|e| ManifestError::InvalidFormat(e.to_string()))?;
        Self::validate(&raw)
    }

    /// Validate raw manifest data.
    ///
    /// Checks run in a fixed order and the first failure wins: object shape,
    /// field presence, field types, `Permission`, `InstallationLevel`, then
    /// `dependencies`.
    pub fn validate(raw: &Value) -> Result<Self, ManifestError> {
        let obj = raw.as_object().ok_or_else(|| {
            ManifestError::InvalidFormat(format!("expected an object, found {}", kind_of(raw)))
        })?;

        for field in [VERSION, PLUGIN_NAME, DEVELOPER, PERMISSION, INSTALLATION_LEVEL] {
            if lookup(obj, field).is_none() {
                return Err(ManifestError::MissingField { field: field.0 });
            }
        }

        let version = required_string(obj, VERSION, true)?;
        let plugin_name = required_string(obj, PLUGIN_NAME, true)?;
        let developer = required_string(obj, DEVELOPER, false)?;

        let permission = lookup(obj, PERMISSION)
            .and_then(Value::as_str)
            .and_then(Permission::parse)
            .ok_or_else(|| {
                ManifestError::InvalidPermission(display_value(lookup(obj, PERMISSION)))
            })?;

        let installation_level = lookup(obj, INSTALLATION_LEVEL)
            .and_then(Value::as_str)
            .and_then(InstallationLevel::parse)
            .ok_or_else(|| {
                ManifestError::InvalidInstallationLevel(display_value(lookup(
                    obj,
                    INSTALLATION_LEVEL,
                )))
            })?;

        let dependencies = match lookup(obj, DEPENDENCIES) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(ManifestError::InvalidDependencyList)?,
            Some(_) => return Err(ManifestError::InvalidDependencyList),
        };

        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            version,
            plugin_name,
            dependencies,
            developer,
            permission,
            installation_level,
            description,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Unique name the plugin registers its APIs under.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Declared dependencies, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn developer(&self) -> &str {
        &self.developer
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn installation_level(&self) -> InstallationLevel {
        self.installation_level
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

fn lookup<'a>(obj: &'a Map<String, Value>, field: (&str, &[&str])) -> Option<&'a Value> {
    field.1.iter().find_map(|key| obj.get(*key))
}

fn required_string(
    obj: &Map<String, Value>,
    field: (&'static str, &[&str]),
    non_empty: bool,
) -> Result<String, ManifestError> {
    let expected = if non_empty {
        "a non-empty string"
    } else {
        "a string"
    };
    match lookup(obj, field).and_then(Value::as_str) {
        Some(s) if !(non_empty && s.trim().is_empty()) => Ok(s.to_string()),
        _ => Err(ManifestError::InvalidField {
            field: field.0,
            expected,
        }),
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
