//! Investigation loop controller.
//!
//! Drives one session from `investigating` to `analyzed` or `failed`:
//! 1. Load the session and check the iteration ceiling
//! 2. Budget the context and ask the model for the next step
//! 3. Validate and gather the requested data, append the iteration, save
//! 4. Once the model reports completion, request the final analysis and
//!    dry-run every proposed command before accepting it
//!
//! The same loop runs post-execution validation phases, recorded in the same
//! session under a [`ValidationRun`](crate::session::ValidationRun).

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::ai::{
    correction_hint, parse_analysis, parse_investigation, AIMessage, AIProvider,
    GenerateOptions, PromptRenderer, RenderedPrompt,
};
use crate::budget::ContextBudgeter;
use crate::cluster::ClusterDataGatherer;
use crate::config::RemediateConfig;
use crate::errors::{RemediateError, RemediateResult};
use crate::safety::SafetyValidator;
use crate::session::{
    Analysis, DryRunOutcome, GatherOutcome, InvestigationSession, Iteration, SessionStatus,
    ValidationRun, ValidationStatus,
};
use crate::storage::SessionStore;

/// Model and loop limits.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub options: GenerateOptions,
}

impl LoopSettings {
    #[must_use]
    pub fn from_config(config: &RemediateConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_iterations: config.max_iterations,
            model_timeout: config.model_timeout(),
            options: GenerateOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
            },
        }
    }
}

/// Why a model exchange produced no usable result.
enum ModelFailure {
    /// Unparseable twice in a row; ends the session
    Malformed(RemediateError),
    /// Backend unreachable after the retry; ends the session and propagates
    Unavailable(RemediateError),
}

/// Runs the propose, validate, gather, record loop.
pub struct InvestigationController {
    provider: Arc<dyn AIProvider>,
    store: Arc<dyn SessionStore>,
    gatherer: ClusterDataGatherer,
    validator: SafetyValidator,
    budgeter: ContextBudgeter,
    prompts: PromptRenderer,
    settings: LoopSettings,
}

impl InvestigationController {
    pub fn new(
        provider: Arc<dyn AIProvider>,
        store: Arc<dyn SessionStore>,
        gatherer: ClusterDataGatherer,
        validator: SafetyValidator,
        budgeter: ContextBudgeter,
        settings: LoopSettings,
    ) -> RemediateResult<Self> {
        Ok(Self {
            provider,
            store,
            gatherer,
            validator,
            budgeter,
            prompts: PromptRenderer::new()?,
            settings,
        })
    }

    #[must_use]
    pub fn max_iterations(&self) -> usize {
        self.settings.max_iterations
    }

    /// Run the loop for a session until it is analyzed or failed.
    ///
    /// Returns `Err` only for infrastructure failures and invalid state; a
    /// session that fails for business reasons is returned with
    /// `status = failed`.
    pub async fn investigate(&self, session_id: &str) -> RemediateResult<InvestigationSession> {
        let mut session = self.store.require(session_id).await?;
        let phase = session.active_validation();
        let runnable = match phase {
            Some(_) => session.status == SessionStatus::Executing,
            None => session.status == SessionStatus::Investigating,
        };
        if !runnable {
            return Err(RemediateError::InvalidState {
                id: session.id.clone(),
                status: session.status.to_string(),
                operation: "continue the investigation".to_string(),
            });
        }

        info!(
            "Investigating session {} ({})",
            session.id,
            phase.map_or_else(|| "primary".to_string(), |v| format!("validation {v}"))
        );

        loop {
            if session.iterations.len() >= self.settings.max_iterations {
                let mut reason = format!(
                    "Iteration ceiling of {} reached without a conclusion; gathered evidence is retained for manual review",
                    self.settings.max_iterations
                );
                if !session.feedback.is_empty() {
                    reason.push_str(&format!(". Last feedback: {}", session.feedback.join("; ")));
                }
                warn!("Session {}: {reason}", session.id);
                return self.abort(session, phase, reason).await;
            }

            let step = session.next_step();
            let context = self.budgeter.prepare(&session, phase);
            let prompt = self.prompts.investigation(
                &context,
                step,
                self.settings.max_iterations,
                session.iterations.len(),
            )?;

            let response = match self.ask(&session.id, &prompt, parse_investigation).await {
                Ok(response) => response,
                Err(failure) => return self.fail_on(session, phase, failure).await,
            };

            let gathered = self.gatherer.gather(&response.data_requests).await;
            let rejected = gathered.iter().filter(|d| d.outcome.is_rejected()).count();
            info!(
                "Session {} step {step}: {} requests ({rejected} rejected), complete={}, confidence={:.2}",
                session.id,
                response.data_requests.len(),
                response.complete,
                response.confidence
            );

            let iteration = Iteration {
                step,
                validation: phase,
                data_requests: response.data_requests,
                gathered_data: gathered,
                complete: response.complete,
                confidence: response.confidence,
                rationale: response.rationale,
                created_at: Utc::now(),
            };
            session.append_iteration(iteration, self.settings.max_iterations)?;
            self.store.save(&session).await?;

            if !response.complete {
                continue;
            }

            let step = session.next_step();
            let context = self.budgeter.prepare(&session, phase);
            let prompt = self.prompts.analysis(
                &context,
                step,
                self.settings.max_iterations,
                session.iterations.len(),
            )?;
            let mut analysis = match self.ask(&session.id, &prompt, parse_analysis).await {
                Ok(analysis) => analysis,
                Err(failure) => return self.fail_on(session, phase, failure).await,
            };

            let feedback = self.dry_run(&mut analysis).await;
            if !feedback.is_empty() {
                warn!(
                    "Session {}: {} proposed commands failed validation, continuing investigation",
                    session.id,
                    feedback.len()
                );
                session.feedback = feedback;
                session.touch();
                self.store.save(&session).await?;
                continue;
            }

            self.accept(&mut session, phase, analysis)?;
            self.store.save(&session).await?;
            return Ok(session);
        }
    }

    /// Open a validation run on a session whose commands were executed, then
    /// run the loop for it.
    pub async fn validate(
        &self,
        session_id: &str,
        intent: &str,
        executed_commands: Vec<String>,
    ) -> RemediateResult<InvestigationSession> {
        let mut session = self.store.require(session_id).await?;
        if session.active_validation().is_some() {
            return Err(RemediateError::InvalidState {
                id: session.id.clone(),
                status: session.status.to_string(),
                operation: "start a second concurrent validation".to_string(),
            });
        }
        session.transition(SessionStatus::Executing)?;
        session.validations.push(ValidationRun {
            intent: intent.to_string(),
            executed_commands,
            first_step: session.next_step(),
            status: ValidationStatus::Investigating,
            analysis: None,
            failure_reason: None,
        });
        self.store.save(&session).await?;
        info!(
            "Session {}: validation run {} started: {intent}",
            session.id,
            session.validations.len()
        );
        self.investigate(session_id).await
    }

    /// Record an accepted analysis for the current phase.
    fn accept(
        &self,
        session: &mut InvestigationSession,
        phase: Option<usize>,
        analysis: Analysis,
    ) -> RemediateResult<()> {
        info!(
            "Session {}: analysis ready (issue {:?}, confidence {:.2}, risk {}, {} actions)",
            session.id,
            analysis.issue_status,
            analysis.confidence,
            analysis.risk,
            analysis.remediation_actions.len()
        );
        match phase {
            None => session.set_final_analysis(analysis),
            Some(index) => {
                let settled = !analysis.issue_status.needs_remediation();
                if let Some(run) = session.validations.get_mut(index) {
                    run.status = ValidationStatus::Completed;
                    run.analysis = Some(analysis);
                }
                session.transition(if settled {
                    SessionStatus::Succeeded
                } else {
                    SessionStatus::Analyzed
                })
            }
        }
    }

    /// Dry-run each proposed command, returning feedback for failures.
    async fn dry_run(&self, analysis: &mut Analysis) -> Vec<String> {
        let mut feedback = Vec::new();
        for action in &mut analysis.remediation_actions {
            let invocation = match self.validator.dry_run(action) {
                Ok(Some(invocation)) => invocation,
                Ok(None) => {
                    debug!("No server-side dry-run for: {}", action.command);
                    continue;
                }
                Err(rejection) => {
                    feedback.push(format!(
                        "Command `{}` was rejected: {}. Propose a single plain kubectl command.",
                        action.command, rejection.message
                    ));
                    action.dry_run = Some(DryRunOutcome {
                        success: false,
                        output: rejection.message,
                    });
                    continue;
                }
            };

            let outcome = match self.gatherer.execute(&invocation).await {
                GatherOutcome::Output { output, .. } => DryRunOutcome {
                    success: true,
                    output,
                },
                GatherOutcome::Error { error, .. } => {
                    feedback.push(format!(
                        "Dry-run of `{}` failed: {error}. Revise the remediation plan.",
                        action.command
                    ));
                    DryRunOutcome {
                        success: false,
                        output: error,
                    }
                }
                GatherOutcome::Rejected { message, .. } => {
                    feedback.push(format!("Command `{}` was rejected: {message}", action.command));
                    DryRunOutcome {
                        success: false,
                        output: message,
                    }
                }
            };
            action.dry_run = Some(outcome);
        }
        feedback
    }

    /// One model exchange with a single retry for malformed output and a
    /// single retry for transport failure.
    async fn ask<T>(
        &self,
        session_id: &str,
        prompt: &RenderedPrompt,
        parse: fn(&str) -> RemediateResult<T>,
    ) -> Result<T, ModelFailure> {
        let mut messages = vec![
            AIMessage::system(prompt.system.clone()),
            AIMessage::user(prompt.user.clone()),
        ];
        let mut corrected = false;
        let mut retried = false;

        loop {
            let text = match self.call_model(&messages).await {
                Ok(text) => text,
                Err(e) if e.is_retryable_model_failure() && !retried => {
                    warn!("Session {session_id}: model call failed, retrying once: {e}");
                    retried = true;
                    continue;
                }
                Err(e) => {
                    error!("Session {session_id}: model backend unavailable: {e}");
                    let e = match e {
                        RemediateError::InfrastructureUnavailable { .. } => e,
                        other => RemediateError::InfrastructureUnavailable {
                            component: "model backend".to_string(),
                            reason: other.to_string(),
                        },
                    };
                    return Err(ModelFailure::Unavailable(e));
                }
            };

            match parse(&text) {
                Ok(parsed) => return Ok(parsed),
                Err(e) if !corrected => {
                    warn!("Session {session_id}: malformed model response, asking for a correction: {e}");
                    corrected = true;
                    messages.push(AIMessage::assistant(text));
                    messages.push(AIMessage::user(correction_hint(&e)));
                }
                Err(e) => return Err(ModelFailure::Malformed(e)),
            }
        }
    }

    async fn call_model(&self, messages: &[AIMessage]) -> RemediateResult<String> {
        let call = self
            .provider
            .generate_text(&self.settings.model, messages, &self.settings.options);
        match tokio::time::timeout(self.settings.model_timeout, call).await {
            Ok(response) => {
                let response = response?;
                debug!(
                    "{} {} replied using {} input / {} output tokens",
                    self.provider.name(),
                    response.model,
                    response.input_tokens,
                    response.output_tokens
                );
                Ok(response.text)
            }
            Err(_) => Err(RemediateError::AiTimeout {
                secs: self.settings.model_timeout.as_secs(),
            }),
        }
    }

    async fn fail_on(
        &self,
        session: InvestigationSession,
        phase: Option<usize>,
        failure: ModelFailure,
    ) -> RemediateResult<InvestigationSession> {
        match failure {
            ModelFailure::Malformed(e) => {
                let reason = format!("Model response could not be parsed after a correction attempt: {e}");
                self.abort(session, phase, reason).await
            }
            ModelFailure::Unavailable(e) => {
                let session = self.abort(session, phase, e.to_string()).await?;
                debug!("Session {} marked failed before propagating", session.id);
                Err(e)
            }
        }
    }

    /// Mark the session (and the running validation, if any) failed and save.
    async fn abort(
        &self,
        mut session: InvestigationSession,
        phase: Option<usize>,
        reason: String,
    ) -> RemediateResult<InvestigationSession> {
        if let Some(run) = phase.and_then(|index| session.validations.get_mut(index)) {
            run.status = ValidationStatus::Failed;
            run.failure_reason = Some(reason.clone());
        }
        session.fail(reason);
        self.store.save(&session).await?;
        Ok(session)
    }
}
