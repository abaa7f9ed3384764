//! Execution decision engine.
//!
//! Maps an analysis and the caller's policy to what happens next. Pure: no
//! I/O, no clock, no session access.

use serde::{Deserialize, Serialize};

use crate::errors::{RemediateError, RemediateResult};
use crate::session::{Analysis, ExecutionChoice, ExecutionMode, IssueStatus, RiskLevel};

/// Mode and thresholds supplied with a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub mode: ExecutionMode,
    pub confidence_threshold: f64,
    pub max_risk: RiskLevel,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Manual,
            confidence_threshold: 0.8,
            max_risk: RiskLevel::Low,
        }
    }
}

/// Entries of the approval menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MenuChoice {
    /// Run the plan through the execution engine
    Execute = 1,
    /// Return the commands for the caller to run
    ShowCommands = 2,
    Cancel = 3,
}

impl MenuChoice {
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MenuChoice {
    type Error = RemediateError;

    fn try_from(id: u8) -> RemediateResult<Self> {
        match id {
            1 => Ok(Self::Execute),
            2 => Ok(Self::ShowCommands),
            3 => Ok(Self::Cancel),
            other => Err(RemediateError::InvalidArgument {
                reason: format!("execution choice must be 1, 2 or 3, got {other}"),
            }),
        }
    }
}

impl From<MenuChoice> for u8 {
    fn from(choice: MenuChoice) -> Self {
        choice.id()
    }
}

/// What the caller should see next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The issue is resolved or never existed
    NoAction,
    /// Manual mode: the plan waits for a menu choice
    AwaitingApproval { choices: Vec<ExecutionChoice> },
    /// Automatic mode, thresholds satisfied
    Execute,
    /// Automatic mode, thresholds violated
    FallbackToManual {
        reason: String,
        choices: Vec<ExecutionChoice>,
    },
}

impl Decision {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::AwaitingApproval { .. } => "awaiting_approval",
            Self::Execute => "execute",
            Self::FallbackToManual { .. } => "fallback_to_manual",
        }
    }

    /// Menu presented with this decision, if any.
    #[must_use]
    pub fn choices(&self) -> Option<&[ExecutionChoice]> {
        match self {
            Self::AwaitingApproval { choices } | Self::FallbackToManual { choices, .. } => {
                Some(choices)
            }
            Self::NoAction | Self::Execute => None,
        }
    }

    #[must_use]
    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::FallbackToManual { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Apply the decision rules to an analysis.
#[must_use]
pub fn decide(analysis: &Analysis, policy: &DecisionPolicy) -> Decision {
    if !analysis.issue_status.needs_remediation() {
        return Decision::NoAction;
    }

    match policy.mode {
        ExecutionMode::Manual => Decision::AwaitingApproval {
            choices: execution_choices(analysis),
        },
        ExecutionMode::Automatic => {
            let violations = violations(analysis, policy);
            if violations.is_empty() {
                Decision::Execute
            } else {
                Decision::FallbackToManual {
                    reason: format!(
                        "Automatic execution skipped: {}",
                        violations.join("; ")
                    ),
                    choices: execution_choices(analysis),
                }
            }
        }
    }
}

fn violations(analysis: &Analysis, policy: &DecisionPolicy) -> Vec<String> {
    let mut violations = Vec::new();
    if analysis.remediation_actions.is_empty() {
        violations.push("the issue is active but no remediation actions were proposed".to_string());
    }
    if analysis.confidence < policy.confidence_threshold {
        violations.push(format!(
            "confidence {:.2} is below the threshold {:.2} (short by {:.2})",
            analysis.confidence,
            policy.confidence_threshold,
            policy.confidence_threshold - analysis.confidence
        ));
    }
    if analysis.risk > policy.max_risk {
        let levels = analysis.risk.rank() - policy.max_risk.rank();
        violations.push(format!(
            "risk {} exceeds the maximum {} (by {levels} level{})",
            analysis.risk,
            policy.max_risk,
            if levels == 1 { "" } else { "s" }
        ));
    }
    violations
}

/// The fixed approval menu, shaped the same for first and follow-up analyses.
#[must_use]
pub fn execution_choices(analysis: &Analysis) -> Vec<ExecutionChoice> {
    let count = analysis.remediation_actions.len();
    let plural = if count == 1 { "" } else { "s" };
    vec![
        ExecutionChoice {
            id: MenuChoice::Execute.id(),
            label: "Execute via remediate".to_string(),
            description: format!(
                "Run the {count} command{plural} now, in order, then validate the result"
            ),
            risk: analysis.risk,
        },
        ExecutionChoice {
            id: MenuChoice::ShowCommands.id(),
            label: "Get commands".to_string(),
            description: format!(
                "Return the {count} command{plural} to run manually, then report them back for validation"
            ),
            risk: analysis.risk,
        },
        ExecutionChoice {
            id: MenuChoice::Cancel.id(),
            label: "Cancel".to_string(),
            description: "Do not change the cluster".to_string(),
            risk: RiskLevel::Low,
        },
    ]
}

/// Whether a resolved or nonexistent issue ends the session successfully.
#[must_use]
pub fn is_settled(status: IssueStatus) -> bool {
    !status.needs_remediation()
}
