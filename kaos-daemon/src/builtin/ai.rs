//! AI plugin.
//!
//! Shares the host's [`AiManager`] with other plugins. Calls:
//!
//! - `send_request(model, messages, tools?, request_id?)` returns the reply
//! - `available_models()` returns every configured model name
//! - `model_for_task(task)` returns the preferred model or `null`

use crate::ai::{AiManager, ChatMessage};
use async_trait::async_trait;
use kaos_plugin_api::{Capability, CapabilityResult, LogLevel, Plugin, PluginContext};
use kaos_runtime::{CapabilityError, RuntimeResult};
use serde_json::{json, Value};
use std::sync::Arc;

/// Plugin name the AI plugin registers under.
pub const AI: &str = "Ai";

pub struct AiPlugin {
    ai: Arc<AiManager>,
}

impl AiPlugin {
    pub fn new(ai: Arc<AiManager>) -> Self {
        Self { ai }
    }
}

struct SendRequest {
    ai: Arc<AiManager>,
}

#[async_trait]
impl Capability for SendRequest {
    async fn call(&self, args: Vec<Value>) -> CapabilityResult {
        let model = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::new("expected a model name"))?;
        let messages: Vec<ChatMessage> = args
            .get(1)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CapabilityError::new(format!("invalid messages: {}", e)))?
            .ok_or_else(|| CapabilityError::new("expected a message list"))?;
        let tools = args.get(2).and_then(Value::as_array);
        let request_id = args.get(3).and_then(Value::as_str).map(str::to_string);

        let reply = self
            .ai
            .send_request(model, &messages, tools.map(Vec::as_slice), request_id)
            .await
            .map_err(|e| CapabilityError::new(e.to_string()))?;
        serde_json::to_value(reply).map_err(|e| CapabilityError::new(e.to_string()))
    }
}

#[async_trait]
impl Plugin for AiPlugin {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        ctx.apis()
            .register(
                "send_request",
                Arc::new(SendRequest {
                    ai: Arc::clone(&self.ai),
                }),
            )
            .await?;

        let ai = Arc::clone(&self.ai);
        ctx.apis()
            .register_fn("available_models", move |_| Ok(json!(ai.available_models())))
            .await?;

        let ai = Arc::clone(&self.ai);
        ctx.apis()
            .register_fn("model_for_task", move |args| {
                let task = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| CapabilityError::new("expected a task name"))?;
                Ok(json!(ai.model_for_task(task)))
            })
            .await?;

        let models = self.ai.available_models();
        ctx.log(
            LogLevel::Debug,
            &format!("AI ready with {} model(s)", models.len()),
        );
        Ok(())
    }
}
