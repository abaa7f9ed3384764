//! The seam between the investigation loop and a model backend.
//!
//! The loop only needs plain chat turns in and a text reply out; schemas and
//! retries live with the caller, so backends stay thin.

use async_trait::async_trait;

use crate::errors::RemediateResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AIRole {
    System,
    User,
    Assistant,
}

/// One chat turn sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AIMessage {
    pub role: AIRole,
    pub content: String,
}

impl AIMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: AIRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: AIRole::User,
            content: content.into(),
        }
    }

    /// A previous reply, replayed when asking the model to correct itself.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: AIRole::Assistant,
            content: content.into(),
        }
    }
}

/// A backend reply. Token counts are zero when the backend does not report them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AIResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl AIResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Sampling settings for one call; `None` leaves the backend default.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A model backend.
///
/// Implementations report rejected credentials or requests as
/// `InfrastructureUnavailable` and transient failures as `Ai`, so the loop
/// knows what to retry. Timeouts are applied by the caller.
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether credentials are present; checked once at startup.
    fn is_configured(&self) -> bool;

    async fn generate_text(
        &self,
        model: &str,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> RemediateResult<AIResponse>;
}
