//! Configuration file loading and management
//!
//! This module handles loading and parsing the daemon configuration from
//! `$XDG_CONFIG_HOME/kaos/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use crate::ai::AiConfig;
use anyhow::{Context, Result};
use kaos_plugin_api::{AllowAll, AllowList, AuthorizationGate, HostSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Host configuration
    #[serde(default)]
    pub host: HostConfig,
    /// Plugin loading configuration
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// AI providers and models shared through the Ai plugin
    #[serde(default)]
    pub ai: AiConfig,
}

/// Host process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Console log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Write a daily log file next to console output
    /// Default: true
    pub log_to_file: bool,
    /// Log file level, independent of the console level
    /// Default: "info"
    pub file_log_level: String,
    /// Directory for log files
    /// If None, uses $XDG_DATA_HOME/kaos/logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Number of daily log files to keep
    /// Default: 30
    pub log_retention: usize,
    /// Directory System-tier plugins may touch through host functions
    /// If None, uses the current working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// Plugin loading configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginsConfig {
    /// Plugin root directories, scanned in order
    /// If empty, uses $XDG_DATA_HOME/kaos/plugins
    pub directories: Vec<PathBuf>,
    /// Plugin names approved for Admin-level installation
    pub approved_admin: Vec<String>,
    /// Approve every Admin-level installation
    pub allow_all_admin: bool,
    /// Default timeout for host commands, in seconds
    /// Default: 30
    pub command_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
            file_log_level: "info".to_string(),
            log_dir: None,
            log_retention: 30,
            root: None,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            approved_admin: Vec::new(),
            allow_all_admin: false,
            command_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Returns `$XDG_CONFIG_HOME/kaos/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "kaos")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    fn default_config_content() -> String {
        r#"# Kaos Daemon Configuration
# This file configures the kaos-daemon behavior.

[host]
# Log level: trace, debug, info, warn, error
# Overridden by RUST_LOG when set
# Default: "info"
log_level = "info"

# Also write a daily log file
# Default: true
log_to_file = true

# Log file level, independent of the console level
# Default: "info"
file_log_level = "info"

# Directory for log files
# If not specified, defaults to $XDG_DATA_HOME/kaos/logs
# log_dir = "/path/to/logs"

# Number of daily log files to keep
# Default: 30
log_retention = 30

# Directory System-tier plugins may read, write and run commands in
# If not specified, defaults to the current working directory
# root = "/path/to/workspace"

[plugins]
# Plugin root directories, scanned in order
# Each plugin is a subdirectory containing a _manifest.json file
# If empty, defaults to $XDG_DATA_HOME/kaos/plugins
# directories = ["/path/to/plugins"]

# Plugins allowed to install with InstallationLevel = "Admin"
approved_admin = ["Ai", "Clock"]

# Approve every Admin-level installation
# Default: false
allow_all_admin = false

# Default timeout for host commands, in seconds
# Default: 30
command_timeout_secs = 30

# [ai]
# Providers speak either the OpenAI chat-completions format or Gemini's
# generateContent format.
#
# [[ai.api_providers]]
# name = "openai"
# base_url = "https://api.openai.com/v1"
# api_key_env = "OPENAI_API_KEY"
# client_type = "openai"
# max_retry = 2
# timeout_secs = 120
# retry_interval_secs = 10
#
# [[ai.models]]
# name = "chat"
# api_provider = "openai"
# model_identifier = "gpt-4o-mini"
#
# [ai.model_task_config.chat]
# model_list = ["chat"]
"#
        .to_string()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        for (key, level) in [
            ("log_level", &self.host.log_level),
            ("file_log_level", &self.host.file_log_level),
        ] {
            if !valid_log_levels.contains(&level.as_str()) {
                anyhow::bail!(
                    "Invalid {}: {}. Must be one of: {}",
                    key,
                    level,
                    valid_log_levels.join(", ")
                );
            }
        }

        if self.host.log_retention == 0 {
            anyhow::bail!("host.log_retention must be greater than 0");
        }

        if self.plugins.command_timeout_secs == 0 {
            anyhow::bail!("plugins.command_timeout_secs must be greater than 0");
        }

        for name in &self.plugins.approved_admin {
            if name.trim().is_empty() {
                anyhow::bail!("plugins.approved_admin must not contain empty names");
            }
        }

        self.ai.validate()?;
        Ok(())
    }

    /// Plugin roots to scan
    ///
    /// Returns the configured directories or the default XDG data directory
    pub fn plugin_roots(&self) -> Result<Vec<PathBuf>> {
        if !self.plugins.directories.is_empty() {
            return Ok(self.plugins.directories.clone());
        }

        let dir = kaos_runtime::discovery::user_plugins_dir()
            .context("Failed to determine plugin directory")?;
        Ok(vec![dir])
    }

    /// Settings for host functions handed to System-tier plugins
    pub fn host_settings(&self) -> Result<HostSettings> {
        let root = match &self.host.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };

        Ok(HostSettings {
            root,
            command_timeout: Duration::from_secs(self.plugins.command_timeout_secs),
        })
    }

    /// Authorization gate for Admin-level installs
    pub fn authorization_gate(&self) -> Arc<dyn AuthorizationGate> {
        if self.plugins.allow_all_admin {
            Arc::new(AllowAll)
        } else {
            Arc::new(AllowList::new(self.plugins.approved_admin.iter().cloned()))
        }
    }
}
