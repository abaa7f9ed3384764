//! Anthropic Messages API backend.
//!
//! Failures are classified for the investigation loop: rate limits, overload,
//! server errors and transport problems come back as [`RemediateError::Ai`]
//! (retried once), while rejected credentials and malformed requests come
//! back as [`RemediateError::InfrastructureUnavailable`] (never retried).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{RemediateError, RemediateResult};

use super::provider::{AIMessage, AIProvider, AIResponse, AIRole, GenerateOptions};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

const API_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Model used when the configuration does not name one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> MessagesRequest<'a> {
    /// System prompts move to the top-level `system` field; the rest keep
    /// their order.
    fn build(model: &'a str, messages: &'a [AIMessage], options: &'a GenerateOptions) -> Self {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == AIRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns = messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    AIRole::System => return None,
                    AIRole::User => "user",
                    AIRole::Assistant => "assistant",
                };
                Some(WireMessage {
                    role,
                    content: &m.content,
                })
            })
            .collect();

        Self {
            model,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: turns,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            temperature: options.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

impl MessagesResponse {
    fn into_ai_response(self) -> AIResponse {
        let text: String = self
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();
        AIResponse {
            text,
            model: self.model,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Map a non-success HTTP reply to an error the loop can act on.
fn classify(status: StatusCode, body: &str) -> RemediateError {
    let detail = serde_json::from_str::<ErrorBody>(body).map_or_else(
        |_| format!("HTTP {status}: {}", body.trim()),
        |b| format!("{} ({status}): {}", b.error.kind, b.error.message),
    );
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND => RemediateError::InfrastructureUnavailable {
            component: "model backend".to_string(),
            reason: detail,
        },
        _ => RemediateError::Ai(format!("Anthropic API error {detail}")),
    }
}

/// Claude through the Anthropic Messages API.
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_key(Some(api_key.into()))
    }

    /// Read the key from `ANTHROPIC_API_KEY`. A missing key is reported on
    /// the first call, not here.
    pub fn from_env() -> Self {
        Self::with_key(std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
    }

    fn with_key(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            url: MESSAGES_URL.to_string(),
        }
    }

    /// Point at another Messages endpoint (proxies, tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl AIProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> RemediateResult<AIResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(RemediateError::InfrastructureUnavailable {
                component: "model backend".to_string(),
                reason: format!("{API_KEY_ENV} is not set"),
            });
        };

        let request = MessagesRequest::build(model, messages, options);
        debug!("Sending {} turns to {model}", request.messages.len());

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemediateError::Ai(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemediateError::Ai(format!("Anthropic response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(classify(status, &body));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| RemediateError::Ai(format!("Unexpected Anthropic response: {e}")))?;
        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            warn!(
                "{model} stopped at the max_tokens limit ({}); the reply is likely truncated",
                options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
            );
        }
        Ok(parsed.into_ai_response())
    }
}
