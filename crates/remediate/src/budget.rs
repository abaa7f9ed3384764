//! Context budgeting for model prompts.
//!
//! The persisted session keeps every byte of evidence; this module shapes the
//! model-facing view of it. When the view is over budget, older iterations
//! are compressed to one-line findings, and as a last resort the verbatim
//! history is dropped entirely (emergency reset). The session id and issue
//! text survive every path.

use serde::Serialize;
use tracing::{debug, warn};

use crate::session::types::truncate_chars;
use crate::session::{InvestigationSession, IssueContext, Iteration};

/// Default prompt budget in tokens.
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 60_000;

/// Default number of iterations kept verbatim.
pub const DEFAULT_KEEP_RECENT: usize = 3;

/// Rough characters-per-token ratio for English and YAML.
const CHARS_PER_TOKEN: usize = 4;

/// Cap applied to reporter-supplied logs after an emergency reset.
const RESET_LOG_CHARS: usize = 2_000;

/// Estimated prompt size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub chars: usize,
    pub tokens: usize,
}

/// Compressed form of an older iteration: findings only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationSummary {
    pub step: u32,
    pub rationale: String,
    pub findings: Vec<String>,
}

impl IterationSummary {
    fn from_iteration(iteration: &Iteration) -> Self {
        Self {
            step: iteration.step,
            rationale: truncate_chars(&iteration.rationale, 300),
            findings: iteration
                .gathered_data
                .iter()
                .map(|d| format!("{}: {}", d.request.label(), d.outcome.finding()))
                .collect(),
        }
    }
}

/// Focus of a post-execution validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFocus {
    pub intent: String,
    pub executed_commands: Vec<String>,
}

/// Model-facing view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationContext {
    pub session_id: String,
    pub issue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_context: Option<IssueContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationFocus>,
    pub summaries: Vec<IterationSummary>,
    pub iterations: Vec<Iteration>,
    pub feedback: Vec<String>,
    /// Set once verbatim history has been discarded
    pub reset: bool,
}

impl InvestigationContext {
    /// Full, uncompressed view of the primary investigation or one
    /// validation run. Iterations from other phases appear as summaries.
    #[must_use]
    pub fn from_session(session: &InvestigationSession, validation: Option<usize>) -> Self {
        let (summaries, iterations): (Vec<_>, Vec<_>) = session
            .iterations
            .iter()
            .partition(|it| it.validation != validation);

        Self {
            session_id: session.id.clone(),
            issue: session.issue.clone(),
            initial_context: session.initial_context.clone(),
            validation: validation.and_then(|idx| session.validations.get(idx)).map(|v| {
                ValidationFocus {
                    intent: v.intent.clone(),
                    executed_commands: v.executed_commands.clone(),
                }
            }),
            summaries: summaries
                .into_iter()
                .map(IterationSummary::from_iteration)
                .collect(),
            iterations: iterations.into_iter().cloned().collect(),
            feedback: session.feedback.clone(),
            reset: false,
        }
    }
}

/// Keeps prompt context within a token budget.
#[derive(Debug, Clone)]
pub struct ContextBudgeter {
    max_tokens: usize,
    keep_recent: usize,
}

impl Default for ContextBudgeter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_TOKENS, DEFAULT_KEEP_RECENT)
    }
}

impl ContextBudgeter {
    #[must_use]
    pub fn new(max_tokens: usize, keep_recent: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            keep_recent,
        }
    }

    /// Estimate the serialized size of a context.
    #[must_use]
    pub fn estimate(&self, context: &InvestigationContext) -> TokenEstimate {
        let chars = serde_json::to_string(context).map_or(0, |s| s.chars().count());
        TokenEstimate {
            chars,
            tokens: chars.div_ceil(CHARS_PER_TOKEN),
        }
    }

    fn fits(&self, context: &InvestigationContext) -> bool {
        self.estimate(context).tokens <= self.max_tokens
    }

    /// Build the budgeted view of a session for the next model call.
    #[must_use]
    pub fn prepare(
        &self,
        session: &InvestigationSession,
        validation: Option<usize>,
    ) -> InvestigationContext {
        self.shrink(InvestigationContext::from_session(session, validation))
    }

    /// Bring a context within budget: sliding window first, then reset.
    #[must_use]
    pub fn shrink(&self, mut context: InvestigationContext) -> InvestigationContext {
        if self.fits(&context) {
            return context;
        }

        let before = self.estimate(&context).tokens;
        if context.iterations.len() > self.keep_recent {
            let older = context.iterations.len() - self.keep_recent;
            let compressed: Vec<IterationSummary> = context
                .iterations
                .drain(..older)
                .map(|it| IterationSummary::from_iteration(&it))
                .collect();
            context.summaries.extend(compressed);
            debug!(
                "Compressed {older} iterations for session {} ({before} tokens before)",
                context.session_id
            );
            if self.fits(&context) {
                return context;
            }
        }

        warn!(
            "Emergency context reset for session {}: {} tokens over a {} token budget",
            context.session_id,
            self.estimate(&context).tokens,
            self.max_tokens
        );
        self.reset(context)
    }

    /// Discard verbatim history, keeping the issue, session id and summaries.
    fn reset(&self, mut context: InvestigationContext) -> InvestigationContext {
        let remaining: Vec<IterationSummary> = context
            .iterations
            .drain(..)
            .map(|it| IterationSummary::from_iteration(&it))
            .collect();
        context.summaries.extend(remaining);
        context.reset = true;

        if let Some(initial) = context.initial_context.as_mut() {
            if let Some(logs) = initial.logs.as_mut() {
                *logs = truncate_chars(logs, RESET_LOG_CHARS);
            }
        }

        while !self.fits(&context) && !context.summaries.is_empty() {
            context.summaries.remove(0);
        }
        context
    }
}
