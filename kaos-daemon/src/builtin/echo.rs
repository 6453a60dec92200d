//! Echo plugin.
//!
//! User tier, depends on [`ClockPlugin`](super::ClockPlugin).

use super::clock::CLOCK;
use async_trait::async_trait;
use kaos_plugin_api::{
    Capability, CapabilityResult, ContentKind, LogLevel, Plugin, PluginContext, ScopedApis,
};
use kaos_runtime::{CapabilityError, RuntimeError, RuntimeResult};
use serde_json::{json, Value};
use std::sync::Arc;

/// Plugin name the echo plugin registers under.
pub const ECHO: &str = "Echo";

/// Stylesheet contributed to the `head` slot.
const ECHO_CSS: &str = ".kaos-echo { font-family: monospace; }";

/// Exposes `echo` and `stamped_echo`.
#[derive(Debug, Default)]
pub struct EchoPlugin;

impl EchoPlugin {
    pub fn new() -> Self {
        Self
    }
}

/// Echoes its arguments along with the time reported by `Clock.now`.
struct StampedEcho {
    apis: ScopedApis,
}

#[async_trait]
impl Capability for StampedEcho {
    async fn call(&self, args: Vec<Value>) -> CapabilityResult {
        let at = self
            .apis
            .invoke(CLOCK, "now", vec![])
            .await
            .map_err(|e| CapabilityError::new(e.to_string()))?;
        Ok(json!({ "at": at, "args": args }))
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        if ctx.apis().get(CLOCK, "now").await.is_none() {
            return Err(RuntimeError::InitializationFailed(format!(
                "{}.now is not registered",
                CLOCK
            )));
        }

        ctx.apis()
            .register_fn("echo", |args| Ok(Value::Array(args)))
            .await?;
        ctx.apis()
            .register(
                "stamped_echo",
                Arc::new(StampedEcho {
                    apis: ctx.apis().clone(),
                }),
            )
            .await?;
        ctx.content()
            .add_fragment("head", ContentKind::Css, ECHO_CSS)
            .await?;
        Ok(())
    }

    async fn start(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        let apis = ctx.apis().list_apis(ECHO).await;
        ctx.log(LogLevel::Info, &format!("Echo serving {}", apis.join(", ")));
        Ok(())
    }
}
