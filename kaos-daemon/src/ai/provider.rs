//! HTTP clients for the supported model providers.
//!
//! Both providers take OpenAI-style chat messages. Gemini requests are
//! translated on the way out and its responses translated back, so callers
//! always see an [`AiResponse`].

use super::{AiError, ChatMessage, ClientType, ExtraParams, ProviderConfig};
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Parsed model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

/// One configured API provider.
pub struct Provider {
    config: ProviderConfig,
    client: Client,
}

impl Provider {
    pub fn new(config: ProviderConfig) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn client_type(&self) -> ClientType {
        self.config.client_type
    }

    /// Send a chat request, retrying up to `max_retry` times.
    pub async fn send(
        &self,
        model_identifier: &str,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<AiResponse, AiError> {
        let attempts = self.config.max_retry + 1;
        let mut attempt = 1;
        loop {
            match self.send_once(model_identifier, messages, tools).await {
                Ok(body) => return self.parse(body),
                Err(e) if attempt < attempts => {
                    warn!(
                        provider = %self.config.name,
                        "Request failed, retrying in {}s (attempt {}/{}): {}",
                        self.config.retry_interval_secs,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.retry_interval_secs)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(provider = %self.config.name, "Request failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn send_once(
        &self,
        model_identifier: &str,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<Value, AiError> {
        let request = match self.config.client_type {
            ClientType::Openai => {
                let base = self.config.base_url.trim_end_matches('/');
                let url = format!("{}/chat/completions", base);
                debug!("Sending OpenAI request to {}", url);
                let payload =
                    openai_payload(model_identifier, messages, tools, &self.config.extra_params);
                self.client
                    .post(url)
                    .bearer_auth(self.config.resolve_api_key())
                    .json(&payload)
            }
            ClientType::Gemini => {
                let url = gemini_url(&self.config.base_url, model_identifier);
                debug!("Sending Gemini request to {}", url);
                let payload = gemini_payload(messages, tools, &self.config.extra_params);
                self.client
                    .post(url)
                    .query(&[("key", self.config.resolve_api_key())])
                    .json(&payload)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Api(format!("HTTP {}: {}", status, preview(&text, 200))));
        }
        debug!("Received response, {} bytes", text.len());
        decode_body(&text)
    }

    fn parse(&self, body: Value) -> Result<AiResponse, AiError> {
        match self.config.client_type {
            ClientType::Openai => parse_openai(&body),
            ClientType::Gemini => parse_gemini(&body),
        }
    }
}

/// Reject empty and HTML bodies, then decode JSON.
pub(crate) fn decode_body(text: &str) -> Result<Value, AiError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AiError::EmptyResponse);
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("<!doctype") || lowered.starts_with("<html") {
        return Err(AiError::HtmlResponse(preview(trimmed, 200)));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| AiError::Parse(format!("{}: {}", e, preview(trimmed, 500))))
}

fn preview(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Chat-completions payload.
pub(crate) fn openai_payload(
    model_identifier: &str,
    messages: &[ChatMessage],
    tools: Option<&[Value]>,
    extra: &ExtraParams,
) -> Value {
    let mut payload = json!({
        "model": model_identifier,
        "messages": messages,
    });
    if let Some(temperature) = extra.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = extra.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        payload["tools"] = json!(tools);
        payload["tool_choice"] = json!("auto");
    }
    payload
}

/// `generateContent` payload. Gemini has no system role, so system messages
/// become tagged user turns.
pub(crate) fn gemini_payload(
    messages: &[ChatMessage],
    tools: Option<&[Value]>,
    extra: &ExtraParams,
) -> Value {
    let contents: Vec<Value> = messages
        .iter()
        .map(|msg| {
            if msg.role == "system" {
                json!({
                    "role": "user",
                    "parts": [{ "text": format!("[System Message] {}", msg.content) }],
                })
            } else {
                json!({
                    "role": msg.role,
                    "parts": [{ "text": msg.content }],
                })
            }
        })
        .collect();

    let mut payload = json!({ "contents": contents });

    let mut generation = Map::new();
    if let Some(temperature) = extra.temperature {
        generation.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = extra.max_tokens {
        generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if !generation.is_empty() {
        payload["generationConfig"] = Value::Object(generation);
    }
    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        payload["tools"] = json!([{ "functionDeclarations": tools }]);
    }
    payload
}

/// Endpoint for a Gemini model. Base URLs without an API version get `v1beta`.
pub(crate) fn gemini_url(base_url: &str, model_identifier: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let versioned = base.contains("/v1beta/")
        || base.ends_with("/v1beta")
        || base.contains("/v1/")
        || base.ends_with("/v1");
    if versioned {
        format!("{}/models/{}:generateContent", base, model_identifier)
    } else {
        format!("{}/v1beta/models/{}:generateContent", base, model_identifier)
    }
}

pub(crate) fn parse_openai(body: &Value) -> Result<AiResponse, AiError> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| AiError::Parse("response has no choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| AiError::Parse("choice has no message".to_string()))?;

    Ok(AiResponse {
        content: message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        role: message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("assistant")
            .to_string(),
        tool_calls: message
            .get("tool_calls")
            .and_then(Value::as_array)
            .cloned(),
    })
}

pub(crate) fn parse_gemini(body: &Value) -> Result<AiResponse, AiError> {
    let candidate = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .ok_or_else(|| AiError::Parse("response has no candidates".to_string()))?;
    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .ok_or_else(|| AiError::Parse("candidate has no content parts".to_string()))?;

    let stamp = Utc::now().timestamp_micros();
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            content.push_str(text);
        } else if let Some(call) = part.get("functionCall") {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            tool_calls.push(json!({
                "id": format!("call_{}_{}", stamp, tool_calls.len()),
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": args.to_string(),
                },
            }));
        }
    }

    Ok(AiResponse {
        content,
        role: "assistant".to_string(),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new("system", "be brief"),
            ChatMessage::new("user", "hello"),
        ]
    }

    #[test]
    fn test_openai_payload() {
        let extra = ExtraParams {
            temperature: Some(0.5),
            max_tokens: None,
        };
        let tools = [json!({ "type": "function" })];
        let payload = openai_payload("gpt-x", &messages(), Some(&tools), &extra);

        assert_eq!(payload["model"], "gpt-x");
        assert_eq!(payload["messages"][1]["content"], "hello");
        assert_eq!(payload["temperature"], 0.5);
        assert!(payload.get("max_tokens").is_none());
        assert_eq!(payload["tool_choice"], "auto");
    }

    #[test]
    fn test_gemini_payload_folds_system_role() {
        let extra = ExtraParams {
            temperature: None,
            max_tokens: Some(64),
        };
        let payload = gemini_payload(&messages(), None, &extra);

        assert_eq!(payload["contents"][0]["role"], "user");
        assert_eq!(
            payload["contents"][0]["parts"][0]["text"],
            "[System Message] be brief"
        );
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 64);
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn test_gemini_url() {
        assert_eq!(
            gemini_url("https://g.example/v1beta", "flash"),
            "https://g.example/v1beta/models/flash:generateContent"
        );
        assert_eq!(
            gemini_url("https://relay.example/", "flash"),
            "https://relay.example/v1beta/models/flash:generateContent"
        );
    }

    #[test]
    fn test_decode_body_rejects_empty_and_html() {
        assert!(matches!(decode_body("  "), Err(AiError::EmptyResponse)));
        assert!(matches!(
            decode_body("<!DOCTYPE html><html></html>"),
            Err(AiError::HtmlResponse(_))
        ));
        assert!(matches!(decode_body("not json"), Err(AiError::Parse(_))));
        assert_eq!(decode_body(r#"{"ok":1}"#).unwrap(), json!({ "ok": 1 }));
    }

    #[test]
    fn test_parse_openai() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "hi",
                    "tool_calls": [{ "id": "1" }]
                }
            }]
        });
        let response = parse_openai(&body).unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(response.tool_calls.unwrap().len(), 1);

        assert!(parse_openai(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_parse_gemini_joins_text_and_collects_calls() {
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "one " },
                        { "functionCall": { "name": "lookup", "args": { "q": "x" } } },
                        { "text": "two" }
                    ]
                }
            }]
        });
        let response = parse_gemini(&body).unwrap();
        assert_eq!(response.content, "one two");
        assert_eq!(response.role, "assistant");

        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0]["function"]["name"], "lookup");
        assert_eq!(calls[0]["function"]["arguments"], r#"{"q":"x"}"#);

        assert!(parse_gemini(&json!({ "candidates": [{}] })).is_err());
    }
}
