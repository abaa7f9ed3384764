//! Model backend integration.
//!
//! This module provides:
//! - The provider abstraction and its Anthropic implementation
//! - Handlebars prompt templates
//! - Schemas and defensive parsing for model responses

pub mod anthropic;
pub mod prompts;
pub mod provider;
pub mod schema;

pub use anthropic::AnthropicProvider;
pub use prompts::{correction_hint, PromptRenderer, RenderedPrompt};
pub use provider::{AIMessage, AIProvider, AIResponse, AIRole, GenerateOptions};
pub use schema::{parse_analysis, parse_investigation, parse_model_json, InvestigationResponse};
