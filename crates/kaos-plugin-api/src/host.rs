//! Host functions exposed to System-tier plugins.
//!
//! Only plugins declaring `Permission: System` receive a [`HostFunctions`]
//! handle at load time. Every file path is confined to the host root.

use async_trait::async_trait;
use kaos_runtime::HostError;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Host functions available to System-tier plugins.
#[async_trait]
pub trait HostFunctions: Send + Sync {
    /// Read a UTF-8 text file.
    async fn read_file(&self, path: &Path) -> Result<String, HostError>;

    /// Write a text file, creating parent directories as needed.
    async fn write_file(&self, path: &Path, content: &str) -> Result<(), HostError>;

    /// Append to a text file, creating it if absent.
    async fn append_file(&self, path: &Path, content: &str) -> Result<(), HostError>;

    /// Replace every occurrence of `old` with `new`. Returns the number of replacements.
    async fn edit_file(&self, path: &Path, old: &str, new: &str) -> Result<usize, HostError>;

    /// Run a shell command.
    ///
    /// `timeout` falls back to the host default when `None`.
    async fn run_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, HostError>;

    /// Log a message (always allowed).
    fn log(&self, level: LogLevel, message: &str);

    /// Get current timestamp in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Result of a host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Log level for plugin logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Emit a log line attributed to a plugin.
pub fn plugin_log(plugin: &str, level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(plugin = %plugin, "{}", message),
        LogLevel::Debug => tracing::debug!(plugin = %plugin, "{}", message),
        LogLevel::Info => tracing::info!(plugin = %plugin, "{}", message),
        LogLevel::Warn => tracing::warn!(plugin = %plugin, "{}", message),
        LogLevel::Error => tracing::error!(plugin = %plugin, "{}", message),
    }
}

/// Default host functions, confined to a root directory.
pub struct DefaultHostFunctions {
    /// Directory every file operation must stay inside.
    root: PathBuf,

    /// Timeout for commands that do not pass one.
    command_timeout: Duration,

    /// Plugin name for logging.
    plugin_name: String,
}

impl DefaultHostFunctions {
    /// Create host functions for one plugin.
    ///
    /// A relative `root` is taken against the current directory.
    pub fn new(plugin_name: impl Into<String>, root: &Path, command_timeout: Duration) -> Self {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(root))
                .unwrap_or_else(|_| root.to_path_buf())
        };
        Self {
            root: normalize(&root),
            command_timeout,
            plugin_name: plugin_name.into(),
        }
    }

    /// Resolve `path` against the root and reject anything outside it.
    fn resolve(&self, path: &Path) -> Result<PathBuf, HostError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize(&joined);

        // A root that could not be made absolute confines nothing.
        if self.root.is_absolute() && resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(HostError::PathOutsideRoot(path.to_path_buf()))
        }
    }
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl HostFunctions for DefaultHostFunctions {
    async fn read_file(&self, path: &Path) -> Result<String, HostError> {
        let path = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<(), HostError> {
        let path = self.resolve(path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn append_file(&self, path: &Path, content: &str) -> Result<(), HostError> {
        let path = self.resolve(path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn edit_file(&self, path: &Path, old: &str, new: &str) -> Result<usize, HostError> {
        let resolved = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&resolved).await?;
        let count = if old.is_empty() {
            0
        } else {
            content.matches(old).count()
        };
        if count > 0 {
            tokio::fs::write(&resolved, content.replace(old, new)).await?;
        }
        Ok(count)
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, HostError> {
        let timeout = timeout.unwrap_or(self.command_timeout);

        let mut cmd = if cfg!(windows) {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };
        cmd.current_dir(&self.root).kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| HostError::CommandTimedOut(timeout.as_secs()))??;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn log(&self, level: LogLevel, message: &str) {
        plugin_log(&self.plugin_name, level, message);
    }

    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
