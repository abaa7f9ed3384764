//! Execution engine for approved remediation plans.
//!
//! Commands run strictly in the order the analysis lists them. A failing or
//! rejected command is recorded and the batch continues, so the result list
//! always has one entry per action. Afterwards the session re-enters the
//! investigation loop to check the analysis' validation intent.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::errors::{RemediateError, RemediateResult};
use crate::investigation::InvestigationController;
use crate::safety::{ApprovedCommands, SafetyValidator};
use crate::session::{ExecutionResult, InvestigationSession, RemediationAction, SessionStatus};
use crate::storage::SessionStore;

/// Default timeout for one mutating command.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of running a session's plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Session after execution and any validation run
    pub session: InvestigationSession,
    /// Results of this batch only
    pub results: Vec<ExecutionResult>,
}

/// Runs approved mutating commands.
pub struct ExecutionEngine {
    client: Arc<dyn ClusterClient>,
    validator: SafetyValidator,
    timeout: Duration,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, validator: SafetyValidator) -> Self {
        Self {
            client,
            validator,
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute actions in order, continuing past failures.
    pub async fn execute(
        &self,
        actions: &[RemediationAction],
        approved: &ApprovedCommands,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            let result = self.execute_one(action, approved).await;
            if result.success {
                info!("Command {} of {} succeeded: {}", index + 1, actions.len(), action.command);
            } else {
                warn!(
                    "Command {} of {} failed: {} ({})",
                    index + 1,
                    actions.len(),
                    action.command,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }
        results
    }

    async fn execute_one(
        &self,
        action: &RemediationAction,
        approved: &ApprovedCommands,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let failed = |error: String, start: Instant| ExecutionResult {
            command: action.command.clone(),
            success: false,
            output: None,
            error: Some(error),
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let invocation = match self.validator.authorize(action, approved) {
            Ok(invocation) => invocation,
            Err(rejection) => return failed(format!("rejected: {rejection}"), start),
        };

        match self.client.run(&invocation, self.timeout).await {
            Ok(output) if output.is_success() => ExecutionResult {
                command: action.command.clone(),
                success: true,
                output: Some(output.stdout.trim().to_string()),
                error: None,
                started_at,
                duration_ms: start.elapsed().as_millis() as u64,
            },
            Ok(output) if output.timed_out => failed(
                format!("timed out after {}s", self.timeout.as_secs()),
                start,
            ),
            Ok(output) => {
                let error = if output.stderr.trim().is_empty() {
                    format!("exit code {}", output.exit_code)
                } else {
                    output.stderr.trim().to_string()
                };
                failed(error, start)
            }
            Err(e) => failed(e.to_string(), start),
        }
    }

    /// Run the plan of the session's current analysis, then validate it.
    ///
    /// The approved set is exactly the actions of the analysis the caller
    /// was shown. Without a validation intent the session ends `succeeded`
    /// when every command succeeded and `failed` otherwise.
    pub async fn execute_session(
        &self,
        store: &dyn SessionStore,
        controller: &InvestigationController,
        session_id: &str,
    ) -> RemediateResult<ExecutionReport> {
        let mut session = store.require(session_id).await?;
        let analysis = session
            .current_analysis()
            .cloned()
            .ok_or_else(|| RemediateError::InvalidState {
                id: session.id.clone(),
                status: session.status.to_string(),
                operation: "execute without an analysis".to_string(),
            })?;
        if !matches!(
            session.status,
            SessionStatus::Analyzed | SessionStatus::AwaitingApproval
        ) {
            return Err(RemediateError::InvalidState {
                id: session.id.clone(),
                status: session.status.to_string(),
                operation: "execute the remediation plan".to_string(),
            });
        }

        session.transition(SessionStatus::Executing)?;
        store.save(&session).await?;

        let approved = ApprovedCommands::from_actions(&analysis.remediation_actions);
        info!(
            "Session {}: executing {} approved commands",
            session.id,
            approved.len()
        );
        let results = self.execute(&analysis.remediation_actions, &approved).await;
        session.execution_results.extend(results.iter().cloned());
        session.touch();
        store.save(&session).await?;

        let executed: Vec<String> = results.iter().map(|r| r.command.clone()).collect();
        let failures = results.iter().filter(|r| !r.success).count();

        let session = match analysis.validation_intent.as_deref() {
            Some(intent) => controller.validate(session_id, intent, executed).await?,
            None if failures == 0 => {
                session.transition(SessionStatus::Succeeded)?;
                store.save(&session).await?;
                session
            }
            None => {
                session.fail(format!(
                    "{failures} of {} remediation commands failed",
                    results.len()
                ));
                store.save(&session).await?;
                session
            }
        };

        Ok(ExecutionReport { session, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::client::{CommandOutput, MockClusterClient};
    use crate::safety::InvocationKind;
    use crate::session::RiskLevel;

    fn action(command: &str) -> RemediationAction {
        RemediationAction {
            description: command.to_string(),
            command: command.to_string(),
            risk: RiskLevel::Low,
            rationale: String::new(),
            full_resource_definition: None,
            dry_run: None,
        }
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_order() {
        let mut client = MockClusterClient::new();
        client.expect_run().times(3).returning(|inv, _| {
            if inv.args().iter().any(|a| a == "broken") {
                Ok(CommandOutput::failure(1, "Error from server (NotFound): deployments.apps \"broken\" not found"))
            } else {
                Ok(CommandOutput::success("done"))
            }
        });
        let engine = ExecutionEngine::new(Arc::new(client), SafetyValidator::new());
        let actions = vec![
            action("kubectl rollout restart deployment/web -n shop"),
            action("kubectl rollout restart deployment/broken -n shop"),
            action("kubectl scale deployment/api -n shop --replicas=2"),
        ];

        let results = engine
            .execute(&actions, &ApprovedCommands::from_actions(&actions))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("NotFound"));
        assert!(results[2].success);
        assert_eq!(results[2].command, actions[2].command);
    }

    #[tokio::test]
    async fn test_unapproved_command_never_reaches_client() {
        let mut client = MockClusterClient::new();
        client.expect_run().times(1).returning(|inv, _| {
            assert_eq!(inv.kind(), InvocationKind::Mutation);
            Ok(CommandOutput::success("ok"))
        });
        let engine = ExecutionEngine::new(Arc::new(client), SafetyValidator::new());
        let reviewed = vec![action("kubectl delete pod web-0 -n shop")];
        let actions = vec![
            action("kubectl delete pod web-0 -n shop"),
            action("kubectl delete namespace shop"),
        ];

        let results = engine
            .execute(&actions, &ApprovedCommands::from_actions(&reviewed))
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(results[1].error.as_deref().unwrap().starts_with("rejected"));
    }

    #[tokio::test]
    async fn test_manifest_is_passed_on_stdin() {
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\n";
        let mut client = MockClusterClient::new();
        client
            .expect_run()
            .withf(move |inv, _| {
                inv.stdin() == Some(manifest) && inv.args() == ["apply", "-f", "-"]
            })
            .times(1)
            .returning(|_, _| Ok(CommandOutput::success("configmap/web configured")));
        let engine = ExecutionEngine::new(Arc::new(client), SafetyValidator::new());
        let mut apply = action("kubectl apply -f -");
        apply.full_resource_definition = Some(manifest.to_string());

        let results = engine
            .execute(
                std::slice::from_ref(&apply),
                &ApprovedCommands::from_actions(std::slice::from_ref(&apply)),
            )
            .await;
        assert!(results[0].success);
        assert_eq!(results[0].output.as_deref(), Some("configmap/web configured"));
    }

    #[tokio::test]
    async fn test_changed_manifest_is_rejected() {
        let mut client = MockClusterClient::new();
        client.expect_run().times(0);
        let engine = ExecutionEngine::new(Arc::new(client), SafetyValidator::new());

        let mut reviewed = action("kubectl apply -f -");
        reviewed.full_resource_definition = Some("kind: ConfigMap\n".into());
        let mut swapped = reviewed.clone();
        swapped.full_resource_definition = Some("kind: ClusterRoleBinding\n".into());

        let results = engine
            .execute(&[swapped], &ApprovedCommands::from_actions(&[reviewed]))
            .await;
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let mut client = MockClusterClient::new();
        client.expect_run().returning(|_, _| {
            Ok(CommandOutput {
                timed_out: true,
                exit_code: -1,
                ..CommandOutput::default()
            })
        });
        let engine = ExecutionEngine::new(Arc::new(client), SafetyValidator::new())
            .with_timeout(Duration::from_secs(7));
        let drain = action("kubectl drain node-1 --ignore-daemonsets");
        let results = engine
            .execute(
                std::slice::from_ref(&drain),
                &ApprovedCommands::from_actions(std::slice::from_ref(&drain)),
            )
            .await;
        assert_eq!(results[0].error.as_deref(), Some("timed out after 7s"));
    }
}
