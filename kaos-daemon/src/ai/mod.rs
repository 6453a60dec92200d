//! # AI Requests
//!
//! Host-side access to chat models, shared with plugins through the `Ai`
//! built-in plugin.
//!
//! The `[ai]` configuration section declares three things:
//!
//! - `api_providers`: endpoints with credentials and retry policy
//! - `models`: names plugins use, each bound to a provider and a model id
//! - `model_task_config`: preferred models per task type
//!
//! A request names a model; the manager finds its provider, sends the
//! messages and returns the parsed reply to the caller.

mod provider;

pub use provider::{AiResponse, Provider};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI API error: {0}")]
    Api(String),

    #[error("AI API returned an empty response")]
    EmptyResponse,

    #[error("AI API returned an HTML page instead of JSON: {0}")]
    HtmlResponse(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown API provider: {0}")]
    UnknownProvider(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Wire format spoken by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Openai,
    Gemini,
}

/// Optional sampling parameters forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// One API provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    /// API key, written inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key; wins over `api_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub client_type: ClientType,
    /// Retries after the first attempt
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// Per-request timeout, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between attempts, in seconds
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default)]
    pub extra_params: ExtraParams,
}

fn default_max_retry() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_retry_interval_secs() -> u64 {
    10
}

impl ProviderConfig {
    /// API key from `api_key_env` if set and present, else `api_key`.
    pub fn resolve_api_key(&self) -> String {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .or_else(|| self.api_key.clone())
            .unwrap_or_default()
    }
}

/// A model name plugins can request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub api_provider: String,
    pub model_identifier: String,
}

/// Preferred models for one task type, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub model_list: Vec<String>,
}

/// The `[ai]` configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_providers: Vec<ProviderConfig>,
    pub models: Vec<ModelConfig>,
    pub model_task_config: BTreeMap<String, TaskConfig>,
}

impl AiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for provider in &self.api_providers {
            if provider.name.trim().is_empty() {
                anyhow::bail!("ai.api_providers entries need a name");
            }
            if provider.base_url.trim().is_empty() {
                anyhow::bail!("ai provider {} has an empty base_url", provider.name);
            }
        }
        for model in &self.models {
            if !self.api_providers.iter().any(|p| p.name == model.api_provider) {
                anyhow::bail!(
                    "ai model {} uses unknown provider {}",
                    model.name,
                    model.api_provider
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// OpenAI-style chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiReply {
    pub request_id: String,
    pub model: String,
    pub provider: String,
    pub response: AiResponse,
}

/// Routes model requests to their providers.
#[derive(Default)]
pub struct AiManager {
    providers: HashMap<String, Provider>,
    /// Models in configuration order.
    models: Vec<ModelConfig>,
    tasks: BTreeMap<String, TaskConfig>,
    next_request: AtomicU64,
}

impl AiManager {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let mut providers = HashMap::new();
        for provider in config.api_providers {
            let name = provider.name.clone();
            providers.insert(name, Provider::new(provider)?);
        }
        info!(
            "AI manager ready: {} provider(s), {} model(s)",
            providers.len(),
            config.models.len()
        );

        Ok(Self {
            providers,
            models: config.models,
            tasks: config.model_task_config,
            next_request: AtomicU64::new(0),
        })
    }

    /// Model names in configuration order.
    pub fn available_models(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    /// First configured model for `task`, or the first model overall.
    pub fn model_for_task(&self, task: &str) -> Option<String> {
        self.tasks
            .get(task)
            .and_then(|task| {
                task.model_list
                    .iter()
                    .find(|name| self.model(name).is_some())
                    .cloned()
            })
            .or_else(|| self.models.first().map(|m| m.name.clone()))
    }

    fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    fn next_request_id(&self) -> String {
        let seq = self.next_request.fetch_add(1, Ordering::Relaxed);
        format!("req_{}_{}", Utc::now().timestamp_micros(), seq)
    }

    /// Send `messages` to the named model and wait for the reply.
    pub async fn send_request(
        &self,
        model_name: &str,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
        request_id: Option<String>,
    ) -> Result<AiReply, AiError> {
        let request_id = request_id.unwrap_or_else(|| self.next_request_id());

        let model = self.model(model_name).ok_or_else(|| {
            warn!(request = %request_id, "Unknown model {}", model_name);
            AiError::UnknownModel(model_name.to_string())
        })?;
        let provider = self
            .providers
            .get(&model.api_provider)
            .ok_or_else(|| AiError::UnknownProvider(model.api_provider.clone()))?;

        debug!(
            request = %request_id,
            model = %model.name,
            provider = %provider.name(),
            client = ?provider.client_type(),
            "Sending AI request"
        );
        let response = provider
            .send(&model.model_identifier, messages, tools)
            .await?;

        Ok(AiReply {
            request_id,
            model: model.name.clone(),
            provider: provider.name().to_string(),
            response,
        })
    }
}
