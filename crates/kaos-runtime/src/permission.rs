//! Trust tiers declared by plugins.
//!
//! Tiers are metadata: they decide which surface a plugin is handed at load
//! time and whether loading needs host authorization. Nothing here polices
//! a plugin after it has loaded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared trust level of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// Host-level plugin; receives host functions at load time.
    System,
    /// Regular plugin.
    User,
    /// Least trusted tier.
    Visitor,
}

impl Permission {
    /// Parse a permission from its manifest spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "System" => Some(Permission::System),
            "User" => Some(Permission::User),
            "Visitor" => Some(Permission::Visitor),
            _ => None,
        }
    }

    /// Convert permission to its manifest spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::System => "System",
            Permission::User => "User",
            Permission::Visitor => "Visitor",
        }
    }

    /// Whether plugins of this tier are handed host functions.
    pub fn grants_host_access(&self) -> bool {
        matches!(self, Permission::System)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared privilege requirement for installing a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallationLevel {
    /// Loading requires approval from the host authorization gate.
    Admin,
    /// Loads without approval.
    Normal,
}

impl InstallationLevel {
    /// Parse an installation level from its manifest spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Admin" => Some(InstallationLevel::Admin),
            "Normal" => Some(InstallationLevel::Normal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationLevel::Admin => "Admin",
            InstallationLevel::Normal => "Normal",
        }
    }

    /// Whether the host gate must approve this install before any plugin code runs.
    pub fn requires_authorization(&self) -> bool {
        matches!(self, InstallationLevel::Admin)
    }
}

impl fmt::Display for InstallationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
