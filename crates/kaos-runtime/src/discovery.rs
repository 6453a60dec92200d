//! Plugin discovery from plugin root directories.
//!
//! Each immediate sub-directory of a plugin root that contains a
//! `_manifest.json` file is one plugin. Discovery only reads the manifest
//! text; validation is a separate step so that a broken manifest still shows
//! up in the status report.
//!
//! Roots are scanned in the order given, and directories within a root in
//! name order, so the discovery order is reproducible across platforms.

use crate::error::{ManifestError, RuntimeError, RuntimeResult};
use crate::manifest::{PluginManifest, MANIFEST_FILE};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A plugin directory found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// Path to the plugin directory.
    pub path: PathBuf,

    /// Parsed manifest data, or why it could not be read.
    pub raw: Result<Value, String>,
}

impl DiscoveredPlugin {
    /// Read the manifest of a plugin directory without validating it.
    pub fn read(path: &Path) -> Self {
        let manifest_path = path.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&manifest_path)
            .map_err(|e| format!("failed to read {}: {}", manifest_path.display(), e))
            .and_then(|content| {
                serde_json::from_str::<Value>(&content)
                    .map_err(|e| format!("failed to parse {}: {}", manifest_path.display(), e))
            });

        Self {
            path: path.to_path_buf(),
            raw,
        }
    }

    /// Directory name, used to identify the plugin before its manifest is trusted.
    pub fn dir_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Path to the manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Run manifest validation on the discovered data.
    pub fn validate(&self) -> Result<PluginManifest, ManifestError> {
        match &self.raw {
            Ok(raw) => PluginManifest::validate(raw),
            Err(reason) => Err(ManifestError::InvalidFormat(reason.clone())),
        }
    }
}

/// Get the user plugins directory.
pub fn user_plugins_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kaos").map(|dirs| dirs.data_dir().join("plugins"))
}

/// Discover plugins in every root, in the given order.
///
/// Missing or unreadable roots are skipped with a warning.
pub fn discover_plugins(roots: &[PathBuf]) -> Vec<DiscoveredPlugin> {
    let mut plugins = Vec::new();

    for root in roots {
        debug!("Scanning plugins directory: {:?}", root);
        if let Err(e) = discover_in_directory(root, &mut plugins) {
            warn!("Failed to scan plugins directory {:?}: {}", root, e);
        }
    }

    info!("Discovered {} plugins", plugins.len());
    plugins
}

/// Discover plugins in a specific directory.
pub fn discover_in_directory(dir: &Path, plugins: &mut Vec<DiscoveredPlugin>) -> RuntimeResult<()> {
    if !dir.exists() {
        warn!("Plugins directory {:?} does not exist", dir);
        return Ok(());
    }

    for path in plugin_dirs(dir)? {
        if !path.join(MANIFEST_FILE).exists() {
            debug!("Skipping {:?}: no {}", path, MANIFEST_FILE);
            continue;
        }

        let plugin = DiscoveredPlugin::read(&path);
        match &plugin.raw {
            Ok(_) => debug!("Discovered plugin directory {:?}", path),
            Err(e) => warn!("Unreadable manifest in {:?}: {}", path, e),
        }
        plugins.push(plugin);
    }

    Ok(())
}

/// Sub-directories of `dir` in name order.
///
/// An entry that cannot be read is skipped with a warning.
fn plugin_dirs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if path.is_dir() {
                    dirs.push(path);
                }
            }
            Err(e) => warn!("Skipping unreadable entry in {:?}: {}", dir, e),
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Discover a single plugin from a path.
pub fn discover_plugin(path: &Path) -> RuntimeResult<DiscoveredPlugin> {
    if !path.join(MANIFEST_FILE).exists() {
        return Err(RuntimeError::PluginNotFound(path.display().to_string()));
    }
    Ok(DiscoveredPlugin::read(path))
}
