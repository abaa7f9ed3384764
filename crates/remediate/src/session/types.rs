//! Core types for remediation sessions.
//!
//! This module defines the records persisted for one remediation attempt:
//! - The session itself and its lifecycle status
//! - Investigation iterations with their data requests and gathered evidence
//! - The converged analysis and its proposed remediation actions
//! - Execution results and follow-up validation runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{RemediateError, RemediateResult};
use crate::safety::RejectionReason;

/// Default ceiling on iterations per session.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The investigation loop is still running
    Investigating,
    /// A final analysis exists, no decision applied yet
    Analyzed,
    /// Waiting for the caller to pick an execution choice
    AwaitingApproval,
    /// Remediation commands are running or being validated
    Executing,
    /// Remediation finished and (where requested) validated
    Succeeded,
    /// Investigation or remediation could not complete
    Failed,
}

impl SessionStatus {
    /// Get the status as its wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Investigating => "investigating",
            Self::Analyzed => "analyzed",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Whether a final analysis must be present in this status.
    #[must_use]
    pub fn requires_analysis(self) -> bool {
        matches!(
            self,
            Self::Analyzed | Self::AwaitingApproval | Self::Executing | Self::Succeeded
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse risk ordinal for remediation actions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Numeric rank, used to report how far a threshold was exceeded.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = RemediateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(RemediateError::InvalidArgument {
                reason: format!("unknown risk level '{other}' (expected low, medium or high)"),
            }),
        }
    }
}

/// Whether the reported problem is actually present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    #[default]
    Active,
    Resolved,
    Nonexistent,
}

impl IssueStatus {
    /// Resolved and nonexistent issues never need remediation.
    #[must_use]
    pub fn needs_remediation(self) -> bool {
        self == Self::Active
    }
}

/// Execution mode chosen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Automatic,
}

impl FromStr for ExecutionMode {
    type Err = RemediateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "automatic" | "auto" => Ok(Self::Automatic),
            other => Err(RemediateError::InvalidArgument {
                reason: format!("unknown mode '{other}' (expected manual or automatic)"),
            }),
        }
    }
}

/// Optional hints supplied with the issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueContext {
    /// Event that triggered the report (e.g. a Kubernetes warning event)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_event: Option<String>,
    /// Log excerpt supplied by the reporter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Whether a human is waiting on the other end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

/// One atomic read-only query proposed by the model.
///
/// `operation_type` keeps the raw model string so that unsupported values
/// can be recorded and rejected rather than lost during parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    #[serde(alias = "type", alias = "operation")]
    pub operation_type: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

impl DataRequest {
    pub fn new(operation_type: &str, resource: &str, namespace: Option<&str>) -> Self {
        Self {
            operation_type: operation_type.to_string(),
            resource: resource.to_string(),
            namespace: namespace.map(str::to_string),
            rationale: String::new(),
        }
    }

    /// Short human label, e.g. `describe pod/web-0 (default)`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {} ({ns})", self.operation_type, self.resource),
            None => format!("{} {}", self.operation_type, self.resource),
        }
    }
}

/// Result of one data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatherOutcome {
    /// The query ran and produced output
    Output {
        output: String,
        #[serde(default)]
        truncated: bool,
    },
    /// The query ran and failed; the failure is itself evidence
    Error { error: String, suggestion: String },
    /// The safety validator refused the query
    Rejected {
        reason: RejectionReason,
        message: String,
    },
}

impl GatherOutcome {
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// One-line finding used when older iterations are compressed.
    #[must_use]
    pub fn finding(&self) -> String {
        match self {
            Self::Output { output, truncated } => {
                let lines = output.lines().count();
                let first = output.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                let first = truncate_chars(first.trim(), 120);
                if *truncated {
                    format!("ok, {lines} lines (truncated): {first}")
                } else {
                    format!("ok, {lines} lines: {first}")
                }
            }
            Self::Error { error, .. } => {
                let first = error.lines().next().unwrap_or("").trim();
                format!("error: {}", truncate_chars(first, 160))
            }
            Self::Rejected { reason, .. } => format!("rejected ({})", reason.as_str()),
        }
    }
}

/// Keyed evidence for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatheredData {
    /// `<index>:<operation> <resource>`
    pub key: String,
    pub request: DataRequest,
    pub outcome: GatherOutcome,
}

/// One request/response cycle of the investigation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<usize>,
    pub data_requests: Vec<DataRequest>,
    pub gathered_data: Vec<GatheredData>,
    pub complete: bool,
    /// Advisory only; execution gating uses the final analysis confidence
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the server-side dry-run performed before an action is surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunOutcome {
    pub success: bool,
    pub output: String,
}

/// One proposed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationAction {
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub risk: RiskLevel,
    #[serde(default)]
    pub rationale: String,
    /// Manifest applied declaratively (`kubectl apply -f -`) instead of the
    /// command's own arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_resource_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunOutcome>,
}

/// Converged root-cause analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub root_cause: String,
    pub confidence: f64,
    #[serde(default)]
    pub supporting_factors: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub remediation_actions: Vec<RemediationAction>,
    /// Maximum risk across `remediation_actions`
    pub risk: RiskLevel,
    pub issue_status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_intent: Option<String>,
}

impl Analysis {
    /// Highest risk among the given actions, `low` when there are none.
    #[must_use]
    pub fn max_risk(actions: &[RemediationAction]) -> RiskLevel {
        actions
            .iter()
            .map(|a| a.risk)
            .max()
            .unwrap_or(RiskLevel::Low)
    }

    /// Commands of the proposed actions, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.remediation_actions
            .iter()
            .map(|a| a.command.clone())
            .collect()
    }
}

/// Menu entry presented with a pending remediation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionChoice {
    pub id: u8,
    pub label: String,
    pub description: String,
    pub risk: RiskLevel,
}

/// Outcome of one executed remediation command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub command: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Status of a post-execution validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Investigating,
    Completed,
    Failed,
}

/// A re-entry of the investigation loop driven by a validation intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRun {
    pub intent: String,
    pub executed_commands: Vec<String>,
    pub first_step: u32,
    pub status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// One remediation attempt end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationSession {
    pub id: String,
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_context: Option<IssueContext>,
    #[serde(default)]
    pub mode: ExecutionMode,
    pub iterations: Vec<Iteration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_analysis: Option<Analysis>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Feedback for the next model prompt (e.g. a failed dry-run)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution_results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<ValidationRun>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvestigationSession {
    /// Start a new session for an issue.
    pub fn new(issue: impl Into<String>, initial_context: Option<IssueContext>) -> Self {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("rem-{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..8]),
            issue: issue.into(),
            initial_context,
            mode: ExecutionMode::default(),
            iterations: Vec::new(),
            final_analysis: None,
            status: SessionStatus::Investigating,
            failure_reason: None,
            feedback: Vec::new(),
            execution_results: Vec::new(),
            validations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Step number the next iteration will carry.
    #[must_use]
    pub fn next_step(&self) -> u32 {
        self.iterations.last().map_or(1, |it| it.step + 1)
    }

    /// Append an iteration, enforcing the ceiling and step ordering.
    pub fn append_iteration(&mut self, iteration: Iteration, ceiling: usize) -> RemediateResult<()> {
        if self.iterations.len() >= ceiling {
            return Err(RemediateError::InvalidState {
                id: self.id.clone(),
                status: self.status.to_string(),
                operation: format!("append iteration beyond ceiling of {ceiling}"),
            });
        }
        if let Some(last) = self.iterations.last() {
            if iteration.step <= last.step {
                return Err(RemediateError::InvalidArgument {
                    reason: format!(
                        "iteration step {} does not follow step {}",
                        iteration.step, last.step
                    ),
                });
            }
        }
        self.iterations.push(iteration);
        self.feedback.clear();
        self.touch();
        Ok(())
    }

    /// Record the converged analysis. May happen once per session.
    pub fn set_final_analysis(&mut self, analysis: Analysis) -> RemediateResult<()> {
        if self.final_analysis.is_some() {
            return Err(RemediateError::InvalidState {
                id: self.id.clone(),
                status: self.status.to_string(),
                operation: "replace the final analysis".to_string(),
            });
        }
        self.final_analysis = Some(analysis);
        self.status = SessionStatus::Analyzed;
        self.touch();
        Ok(())
    }

    /// Mark the session failed with a diagnostic.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.touch();
    }

    /// Change status, refusing states that would lose the analysis invariant.
    pub fn transition(&mut self, status: SessionStatus) -> RemediateResult<()> {
        if status.requires_analysis() && self.final_analysis.is_none() {
            return Err(RemediateError::InvalidState {
                id: self.id.clone(),
                status: self.status.to_string(),
                operation: format!("move to {status} without an analysis"),
            });
        }
        self.status = status;
        self.touch();
        Ok(())
    }

    /// The validation run currently in progress, if any.
    #[must_use]
    pub fn active_validation(&self) -> Option<usize> {
        self.validations
            .iter()
            .rposition(|v| v.status == ValidationStatus::Investigating)
    }

    /// The analysis that governs the next decision: the latest completed
    /// validation analysis, falling back to the primary one.
    #[must_use]
    pub fn current_analysis(&self) -> Option<&Analysis> {
        self.validations
            .iter()
            .rev()
            .find_map(|v| v.analysis.as_ref())
            .or(self.final_analysis.as_ref())
    }

    /// Iterations belonging to the primary investigation or one validation run.
    pub fn iterations_for(&self, validation: Option<usize>) -> impl Iterator<Item = &Iteration> {
        self.iterations
            .iter()
            .filter(move |it| it.validation == validation)
    }

    /// Total number of data requests processed across iterations.
    #[must_use]
    pub fn data_gathered(&self) -> usize {
        self.iterations.iter().map(|it| it.gathered_data.len()).sum()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
