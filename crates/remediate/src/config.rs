//! Engine configuration.
//!
//! Loaded from an optional JSON file, then overridden by environment
//! variables. Every field has a default, so an empty file (or none) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ai::anthropic::DEFAULT_MODEL;
use crate::errors::{RemediateError, RemediateResult};
use crate::session::{RiskLevel, DEFAULT_MAX_ITERATIONS};

/// Overrides the model id.
pub const MODEL_ENV: &str = "REMEDIATE_MODEL";

/// Overrides the session directory.
pub const SESSION_DIR_ENV: &str = "REMEDIATE_SESSION_DIR";

/// Standard kubeconfig location override.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Runtime configuration for the remediation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemediateConfig {
    /// Model id passed to the provider
    pub model: String,
    /// Maximum tokens per model response
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Iteration ceiling per session (validation runs included)
    pub max_iterations: usize,
    pub model_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    /// Data requests in flight at once within an iteration
    pub max_concurrent_requests: usize,
    /// Prompt budget in estimated tokens
    pub max_context_tokens: usize,
    /// Iterations kept verbatim when the budget is exceeded
    pub keep_recent_iterations: usize,
    /// Cap on stored output per query
    pub max_output_chars: usize,
    /// `--tail` used for log requests
    pub log_tail: u32,
    pub session_dir: PathBuf,
    /// Default threshold when a request does not set one
    pub confidence_threshold: f64,
    /// Default maximum risk when a request does not set one
    pub max_risk_level: RiskLevel,
    /// Follow-up validation rounds allowed after one execution
    pub max_cascade_depth: usize,
    /// kubectl binary
    pub kubectl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,
}

impl Default for RemediateConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            model_timeout_secs: 120,
            query_timeout_secs: 30,
            execution_timeout_secs: 120,
            max_concurrent_requests: 4,
            max_context_tokens: 60_000,
            keep_recent_iterations: 3,
            max_output_chars: 20_000,
            log_tail: 200,
            session_dir: PathBuf::from(".remediate/sessions"),
            confidence_threshold: 0.8,
            max_risk_level: RiskLevel::Low,
            max_cascade_depth: 3,
            kubectl: "kubectl".to_string(),
            kubeconfig: None,
            kube_context: None,
        }
    }
}

impl RemediateConfig {
    /// Load from an optional file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> RemediateResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> RemediateResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| RemediateError::FileReadError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        serde_json::from_str(&content).map_err(|e| RemediateError::ConfigError {
            reason: format!("{}: {e}", path.display()),
        })
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(model) = lookup(MODEL_ENV) {
            self.model = model;
        }
        if let Some(dir) = lookup(SESSION_DIR_ENV) {
            self.session_dir = PathBuf::from(dir);
        }
        if self.kubeconfig.is_none() {
            // KUBECONFIG may be a path list; kubectl resolves that itself
            if let Some(path) = lookup(KUBECONFIG_ENV).filter(|p| !p.contains(':')) {
                self.kubeconfig = Some(PathBuf::from(path));
            }
        }
    }

    /// Check ranges.
    pub fn validate(&self) -> RemediateResult<()> {
        let invalid =
            |reason: String| -> RemediateResult<()> { Err(RemediateError::ConfigError { reason }) };
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "confidenceThreshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.max_iterations == 0 {
            return invalid("maxIterations must be at least 1".to_string());
        }
        if self.max_concurrent_requests == 0 {
            return invalid("maxConcurrentRequests must be at least 1".to_string());
        }
        if self.model.trim().is_empty() {
            return invalid("model must not be empty".to_string());
        }
        if self.model_timeout_secs == 0 || self.query_timeout_secs == 0 {
            return invalid("timeouts must be at least 1 second".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}
