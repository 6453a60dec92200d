//! Authorization gate for Admin-level installs.
//!
//! The loader asks the gate before executing any plugin whose manifest says
//! `InstallationLevel: Admin`. Normal installs never reach the gate.

use async_trait::async_trait;
use kaos_runtime::RuntimeResult;
use std::collections::HashSet;

/// Host-supplied approval policy.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    /// Decide whether `plugin_name` may be installed at Admin level.
    ///
    /// An error is treated like a refusal.
    async fn authorize(&self, plugin_name: &str) -> RuntimeResult<bool>;
}

/// Refuses every Admin install.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl AuthorizationGate for DenyAll {
    async fn authorize(&self, _plugin_name: &str) -> RuntimeResult<bool> {
        Ok(false)
    }
}

/// Approves every Admin install.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AuthorizationGate for AllowAll {
    async fn authorize(&self, _plugin_name: &str) -> RuntimeResult<bool> {
        Ok(true)
    }
}

/// Approves a fixed set of plugin names.
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    approved: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            approved: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AuthorizationGate for AllowList {
    async fn authorize(&self, plugin_name: &str) -> RuntimeResult<bool> {
        Ok(self.approved.contains(plugin_name))
    }
}
