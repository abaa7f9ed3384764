//! Request/response facade over the investigation, decision and execution
//! components.
//!
//! [`Remediator::handle`] is the single entry point. A request either starts
//! a new session from an issue, or addresses a stored session to answer the
//! approval menu, report manually executed commands, or re-render its state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::ai::AIProvider;
use crate::budget::ContextBudgeter;
use crate::cluster::{ClusterClient, ClusterDataGatherer};
use crate::config::RemediateConfig;
use crate::decision::{decide, execution_choices, is_settled, Decision, DecisionPolicy, MenuChoice};
use crate::errors::{RemediateError, RemediateResult};
use crate::execution::ExecutionEngine;
use crate::investigation::{InvestigationController, LoopSettings};
use crate::safety::SafetyValidator;
use crate::session::{
    ExecutionChoice, ExecutionMode, ExecutionResult, InvestigationSession, IssueContext,
    IssueStatus, RemediationAction, RiskLevel, SessionStatus,
};
use crate::storage::SessionStore;

/// Input for one interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediateRequest {
    #[serde(default)]
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<IssueContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk_level: Option<RiskLevel>,
    /// Commands the caller ran itself, reported for validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_commands: Option<Vec<String>>,
    /// Answer to the approval menu of a stored session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_choice: Option<MenuChoice>,
}

impl RemediateRequest {
    /// Start a new investigation.
    pub fn new(issue: impl Into<String>) -> Self {
        Self {
            issue: issue.into(),
            ..Self::default()
        }
    }

    /// Address a stored session.
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Failed,
    AwaitingUserApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationSummary {
    pub iterations: usize,
    pub data_gathered: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub root_cause: String,
    pub confidence: f64,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationSummary {
    pub summary: String,
    pub actions: Vec<RemediationAction>,
    pub risk: RiskLevel,
}

/// Structured result of one interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediateResponse {
    pub status: ResponseStatus,
    pub session_id: String,
    pub investigation: InvestigationSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_status: Option<IssueStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_choices: Option<Vec<ExecutionChoice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ExecutionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RemediateResponse {
    /// Base response carrying the session's current analysis.
    fn from_session(session: &InvestigationSession, status: ResponseStatus) -> Self {
        let analysis = session.current_analysis();
        Self {
            status,
            session_id: session.id.clone(),
            investigation: InvestigationSummary {
                iterations: session.iterations.len(),
                data_gathered: session.data_gathered(),
            },
            analysis: analysis.map(|a| AnalysisSummary {
                root_cause: a.root_cause.clone(),
                confidence: a.confidence,
                factors: a.supporting_factors.clone(),
            }),
            remediation: analysis.map(|a| RemediationSummary {
                summary: a.summary.clone(),
                actions: a.remediation_actions.clone(),
                risk: a.risk,
            }),
            issue_status: analysis.map(|a| a.issue_status),
            validation_intent: analysis.and_then(|a| a.validation_intent.clone()),
            execution_choices: None,
            executed: None,
            results: None,
            fallback_reason: None,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_results(mut self, results: Vec<ExecutionResult>) -> Self {
        self.executed = Some(!results.is_empty());
        self.results = Some(results);
        self
    }
}

const APPROVAL_PROMPT: &str =
    "Review the remediation plan and reply with executeChoice: 1 to execute it, 2 to get the commands, 3 to cancel.";

/// Single entry point for remediation requests.
pub struct Remediator {
    store: Arc<dyn SessionStore>,
    controller: InvestigationController,
    engine: ExecutionEngine,
    defaults: DecisionPolicy,
    max_cascade_depth: usize,
}

impl Remediator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        controller: InvestigationController,
        engine: ExecutionEngine,
        config: &RemediateConfig,
    ) -> Self {
        Self {
            store,
            controller,
            engine,
            defaults: DecisionPolicy {
                mode: ExecutionMode::Manual,
                confidence_threshold: config.confidence_threshold,
                max_risk: config.max_risk_level,
            },
            max_cascade_depth: config.max_cascade_depth,
        }
    }

    /// Wire all components from configuration.
    pub fn from_config(
        config: &RemediateConfig,
        provider: Arc<dyn AIProvider>,
        client: Arc<dyn ClusterClient>,
        store: Arc<dyn SessionStore>,
    ) -> RemediateResult<Self> {
        config.validate()?;
        let validator = SafetyValidator::new().with_log_tail(config.log_tail);
        let gatherer = ClusterDataGatherer::new(client.clone(), validator.clone())
            .with_timeout(config.query_timeout())
            .with_concurrency(config.max_concurrent_requests)
            .with_max_output_chars(config.max_output_chars);
        let controller = InvestigationController::new(
            provider,
            store.clone(),
            gatherer,
            validator.clone(),
            ContextBudgeter::new(config.max_context_tokens, config.keep_recent_iterations),
            LoopSettings::from_config(config),
        )?;
        let engine = ExecutionEngine::new(client, validator).with_timeout(config.execution_timeout());
        Ok(Self::new(store, controller, engine, config))
    }

    /// Handle one request.
    ///
    /// Returns `Err` for infrastructure failures and for caller errors on
    /// stored sessions; every business outcome is a response.
    pub async fn handle(&self, request: RemediateRequest) -> RemediateResult<RemediateResponse> {
        if let Some(threshold) = request.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(RemediateError::InvalidArgument {
                    reason: format!("confidenceThreshold must be within [0, 1], got {threshold}"),
                });
            }
        }

        match request.session_id.clone() {
            Some(session_id) => self.continue_session(&session_id, request).await,
            None => self.start(request).await,
        }
    }

    async fn start(&self, request: RemediateRequest) -> RemediateResult<RemediateResponse> {
        let issue = request.issue.trim();
        if issue.is_empty() {
            return Err(RemediateError::InvalidArgument {
                reason: "issue must not be empty when no sessionId is given".to_string(),
            });
        }

        let mut session = InvestigationSession::new(issue, request.context.clone());
        session.mode = request.mode.unwrap_or(self.defaults.mode);
        self.store.save(&session).await?;
        info!("Created session {} ({:?} mode): {issue}", session.id, session.mode);

        let session = self.controller.investigate(&session.id).await?;
        let policy = self.policy(&request, &session);
        self.conclude(session, &policy, Vec::new()).await
    }

    async fn continue_session(
        &self,
        session_id: &str,
        request: RemediateRequest,
    ) -> RemediateResult<RemediateResponse> {
        let session = self.store.require(session_id).await?;
        let policy = self.policy(&request, &session);

        if let Some(commands) = request.executed_commands.as_ref().filter(|c| !c.is_empty()) {
            return self.report_executed(session, commands.clone(), &policy).await;
        }

        match request.execute_choice {
            Some(choice) => self.apply_choice(session, choice, &policy).await,
            None => Ok(self.render(&session, &policy)),
        }
    }

    /// Answer the approval menu.
    async fn apply_choice(
        &self,
        session: InvestigationSession,
        choice: MenuChoice,
        policy: &DecisionPolicy,
    ) -> RemediateResult<RemediateResponse> {
        if is_past_approval(session.status) {
            info!("Session {}: choice {} replayed after {}", session.id, choice.id(), session.status);
            return Ok(self.render(&session, policy));
        }
        if session.status != SessionStatus::AwaitingApproval {
            return Err(RemediateError::InvalidState {
                id: session.id.clone(),
                status: session.status.to_string(),
                operation: format!("apply execution choice {}", choice.id()),
            });
        }

        match choice {
            MenuChoice::Execute => {
                let report = self
                    .engine
                    .execute_session(self.store.as_ref(), &self.controller, &session.id)
                    .await?;
                self.conclude(report.session, policy, report.results).await
            }
            MenuChoice::ShowCommands => {
                let commands: Vec<String> = session
                    .current_analysis()
                    .map(|a| {
                        a.remediation_actions
                            .iter()
                            .enumerate()
                            .map(|(index, action)| format!("{}. {}", index + 1, action.command))
                            .collect()
                    })
                    .unwrap_or_default();
                let message = format!(
                    "Run these commands in order, then call again with this sessionId and executedCommands to validate the result:\n{}",
                    commands.join("\n")
                );
                Ok(RemediateResponse::from_session(&session, ResponseStatus::Success)
                    .with_results(Vec::new())
                    .with_message(message))
            }
            MenuChoice::Cancel => {
                info!("Session {}: remediation cancelled by caller", session.id);
                Ok(RemediateResponse::from_session(&session, ResponseStatus::Success)
                    .with_results(Vec::new())
                    .with_message("Remediation cancelled; no commands were executed."))
            }
        }
    }

    /// Validate commands the caller executed outside the engine.
    async fn report_executed(
        &self,
        session: InvestigationSession,
        commands: Vec<String>,
        policy: &DecisionPolicy,
    ) -> RemediateResult<RemediateResponse> {
        if is_past_approval(session.status) {
            info!("Session {}: executed commands replayed after {}", session.id, session.status);
            return Ok(self.render(&session, policy));
        }
        if !matches!(
            session.status,
            SessionStatus::AwaitingApproval | SessionStatus::Analyzed
        ) {
            return Err(RemediateError::InvalidState {
                id: session.id.clone(),
                status: session.status.to_string(),
                operation: "report executed commands".to_string(),
            });
        }
        let intent = session
            .current_analysis()
            .and_then(|a| a.validation_intent.clone())
            .unwrap_or_else(|| {
                format!(
                    "Confirm the original issue is resolved after the executed commands: {}",
                    session.issue
                )
            });
        info!(
            "Session {}: validating {} manually executed commands",
            session.id,
            commands.len()
        );
        let session = self.controller.validate(&session.id, &intent, commands).await?;
        self.conclude(session, policy, Vec::new()).await
    }

    /// Apply decisions until the session needs the caller or is finished.
    async fn conclude(
        &self,
        mut session: InvestigationSession,
        policy: &DecisionPolicy,
        mut results: Vec<ExecutionResult>,
    ) -> RemediateResult<RemediateResponse> {
        loop {
            match session.status {
                SessionStatus::Failed => {
                    let reason = session
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "Session failed".to_string());
                    return Ok(RemediateResponse::from_session(&session, ResponseStatus::Failed)
                        .with_results(results)
                        .with_message(reason));
                }
                SessionStatus::Succeeded => {
                    let message = settled_message(&session, results.len());
                    return Ok(RemediateResponse::from_session(&session, ResponseStatus::Success)
                        .with_results(results)
                        .with_message(message));
                }
                _ => {}
            }

            let Some(analysis) = session.current_analysis() else {
                return Err(RemediateError::InvalidState {
                    id: session.id.clone(),
                    status: session.status.to_string(),
                    operation: "decide without an analysis".to_string(),
                });
            };

            let decision = decide(analysis, policy);
            info!("Session {}: decision {}", session.id, decision.as_str());
            match decision {
                Decision::NoAction => {
                    session.transition(SessionStatus::Succeeded)?;
                    self.store.save(&session).await?;
                }
                Decision::AwaitingApproval { choices } => {
                    return self.await_approval(session, choices, None, results).await;
                }
                Decision::FallbackToManual { reason, choices } => {
                    return self
                        .await_approval(session, choices, Some(reason), results)
                        .await;
                }
                Decision::Execute if session.validations.len() >= self.max_cascade_depth => {
                    let reason = format!(
                        "Automatic execution skipped: the cascade limit of {} follow-up validation rounds was reached and the issue is still active",
                        self.max_cascade_depth
                    );
                    let choices = execution_choices(analysis);
                    return self
                        .await_approval(session, choices, Some(reason), results)
                        .await;
                }
                Decision::Execute => {
                    let report = self
                        .engine
                        .execute_session(self.store.as_ref(), &self.controller, &session.id)
                        .await?;
                    results.extend(report.results);
                    session = report.session;
                }
            }
        }
    }

    async fn await_approval(
        &self,
        mut session: InvestigationSession,
        choices: Vec<ExecutionChoice>,
        fallback_reason: Option<String>,
        results: Vec<ExecutionResult>,
    ) -> RemediateResult<RemediateResponse> {
        session.transition(SessionStatus::AwaitingApproval)?;
        self.store.save(&session).await?;

        let mut response =
            RemediateResponse::from_session(&session, ResponseStatus::AwaitingUserApproval)
                .with_results(results)
                .with_message(APPROVAL_PROMPT);
        response.execution_choices = Some(choices);
        response.fallback_reason = fallback_reason;
        Ok(response)
    }

    /// Describe a stored session without any model or cluster calls.
    fn render(&self, session: &InvestigationSession, policy: &DecisionPolicy) -> RemediateResponse {
        let results = session.execution_results.clone();
        match session.status {
            SessionStatus::Succeeded => {
                let message = settled_message(session, results.len());
                RemediateResponse::from_session(session, ResponseStatus::Success)
                    .with_results(results)
                    .with_message(message)
            }
            SessionStatus::Failed => {
                let reason = session
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "Session failed".to_string());
                RemediateResponse::from_session(session, ResponseStatus::Failed)
                    .with_results(results)
                    .with_message(reason)
            }
            SessionStatus::Analyzed | SessionStatus::AwaitingApproval => {
                let Some(analysis) = session.current_analysis() else {
                    return RemediateResponse::from_session(session, ResponseStatus::Failed)
                        .with_message("Session has no analysis");
                };
                if is_settled(analysis.issue_status) {
                    return RemediateResponse::from_session(session, ResponseStatus::Success)
                        .with_results(results)
                        .with_message(settled_message(session, 0));
                }
                let mut response = RemediateResponse::from_session(
                    session,
                    ResponseStatus::AwaitingUserApproval,
                )
                .with_results(results)
                .with_message(APPROVAL_PROMPT);
                response.execution_choices = Some(execution_choices(analysis));
                response.fallback_reason = decide(analysis, policy)
                    .fallback_reason()
                    .map(str::to_string);
                response
            }
            SessionStatus::Investigating | SessionStatus::Executing => {
                RemediateResponse::from_session(session, ResponseStatus::Failed)
                    .with_results(results)
                    .with_message(format!(
                        "Session was interrupted while {}; gathered evidence is retained. Start a new session to retry.",
                        session.status
                    ))
            }
        }
    }

    fn policy(&self, request: &RemediateRequest, session: &InvestigationSession) -> DecisionPolicy {
        DecisionPolicy {
            mode: session.mode,
            confidence_threshold: request
                .confidence_threshold
                .unwrap_or(self.defaults.confidence_threshold),
            max_risk: request.max_risk_level.unwrap_or(self.defaults.max_risk),
        }
    }
}

/// Statuses a retried approval answer can find; the original answer already
/// took effect, so the stored outcome is returned instead.
fn is_past_approval(status: SessionStatus) -> bool {
    matches!(
        status,
        SessionStatus::Executing | SessionStatus::Succeeded | SessionStatus::Failed
    )
}

fn settled_message(session: &InvestigationSession, executed: usize) -> String {
    let status = session
        .current_analysis()
        .map_or(IssueStatus::Active, |a| a.issue_status);
    match (status, executed) {
        (IssueStatus::Nonexistent, 0) => "The reported issue does not exist; no action needed.".to_string(),
        (IssueStatus::Resolved, 0) => "The issue is already resolved; no action needed.".to_string(),
        (IssueStatus::Active, n) if n > 0 => format!("Executed {n} remediation commands."),
        (_, n) if n > 0 => format!("Executed {n} remediation commands; validation confirmed the issue is resolved."),
        _ => "Remediation complete.".to_string(),
    }
}
