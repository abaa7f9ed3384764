//! Remediation session records.

pub mod types;

pub use types::{
    Analysis, DataRequest, DryRunOutcome, ExecutionChoice, ExecutionMode, ExecutionResult,
    GatherOutcome, GatheredData, InvestigationSession, IssueContext, IssueStatus, Iteration,
    RemediationAction, RiskLevel, SessionStatus, ValidationRun, ValidationStatus,
    DEFAULT_MAX_ITERATIONS,
};
