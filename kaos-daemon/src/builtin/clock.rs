//! Clock plugin.
//!
//! System tier: reads host time through the host functions it is handed.

use async_trait::async_trait;
use chrono::Utc;
use kaos_plugin_api::{LogLevel, Plugin, PluginContext};
use kaos_runtime::{RuntimeError, RuntimeResult};
use serde_json::{json, Value};

/// Plugin name the clock registers under.
pub const CLOCK: &str = "Clock";

/// Exposes `now` (RFC 3339 timestamp) and `uptime_millis`.
#[derive(Debug, Default)]
pub struct ClockPlugin;

impl ClockPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for ClockPlugin {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        let host = ctx.host().cloned().ok_or_else(|| {
            RuntimeError::InitializationFailed(
                "Clock needs host functions (Permission: System)".to_string(),
            )
        })?;
        let started = host.now_millis();

        ctx.apis()
            .register_fn("now", |_| Ok(Value::String(Utc::now().to_rfc3339())))
            .await?;
        ctx.apis()
            .register_fn("uptime_millis", move |_| {
                Ok(json!(host.now_millis().saturating_sub(started)))
            })
            .await?;

        ctx.log(LogLevel::Debug, "Clock ready");
        Ok(())
    }
}
