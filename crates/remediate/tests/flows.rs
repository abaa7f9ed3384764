//! Multi-call flows: approval menu, manual execution reports, validation
//! runs and re-rendering of stored sessions.

mod common;

use std::sync::Arc;

use common::*;
use remediate::safety::InvocationKind;
use remediate::session::{ExecutionMode, IssueStatus, RiskLevel, ValidationStatus};
use remediate::{
    FileSessionStore, InvestigationSession, MenuChoice, RemediateConfig, RemediateError, RemediateRequest,
    ResponseStatus, Remediator, SessionStatus, SessionStore,
};
use tempfile::TempDir;

fn choose(session_id: &str, choice: MenuChoice) -> RemediateRequest {
    RemediateRequest {
        execute_choice: Some(choice),
        ..RemediateRequest::for_session(session_id)
    }
}

#[tokio::test]
async fn test_manual_mode_awaits_approval_even_when_confident() {
    let h = harness(
        ScriptedProvider::new([done(), analysis(0.99, "low", PATCH, None)]),
        FakeCluster::new(),
    );

    let response = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::AwaitingUserApproval);
    assert!(response.fallback_reason.is_none());
    let choices = response.execution_choices.unwrap();
    assert_eq!(choices.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(choices[0].risk, RiskLevel::Low);
    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 0);

    let session = h.store.require(&response.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::AwaitingApproval);
    assert_eq!(session.mode, ExecutionMode::Manual);
}

#[tokio::test]
async fn test_choice_execute_runs_plan_and_validates() {
    let h = harness(
        ScriptedProvider::new([
            done(),
            analysis(0.9, "medium", PATCH, Some("web-0 is Running")),
            final_step("get", "pod/web-0"),
            settled("resolved"),
        ]),
        FakeCluster::new(),
    );

    let first = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();
    assert_eq!(first.validation_intent.as_deref(), Some("web-0 is Running"));

    let response = h
        .remediator
        .handle(choose(&first.session_id, MenuChoice::Execute))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.executed, Some(true));
    assert_eq!(response.results.as_ref().unwrap().len(), 1);
    assert_eq!(response.issue_status, Some(IssueStatus::Resolved));

    let session = h.store.require(&first.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Succeeded);
    assert_eq!(session.validations.len(), 1);
    assert_eq!(session.validations[0].status, ValidationStatus::Completed);
    assert_eq!(session.validations[0].executed_commands, vec![PATCH.to_string()]);
    assert_eq!(session.iterations.len(), 2);
    assert_eq!(session.iterations[1].validation, Some(0));
}

#[tokio::test]
async fn test_cascading_fault_is_presented_with_the_same_menu() {
    let follow_up = "kubectl rollout restart deployment/web -n default";
    let h = harness(
        ScriptedProvider::new([
            done(),
            analysis(0.9, "low", PATCH, Some("web-0 is Running")),
            done(),
            analysis(0.8, "high", follow_up, Some("web pods are Ready")),
        ]),
        FakeCluster::new(),
    );

    let first = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();
    let response = h
        .remediator
        .handle(choose(&first.session_id, MenuChoice::Execute))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::AwaitingUserApproval);
    assert_eq!(response.executed, Some(true));
    let choices = response.execution_choices.unwrap();
    assert_eq!(choices.len(), 3);
    assert_eq!(choices[0].risk, RiskLevel::High);
    let remediation = response.remediation.unwrap();
    assert_eq!(remediation.actions[0].command, follow_up);
}

#[tokio::test]
async fn test_replayed_answers_return_the_stored_outcome() {
    let h = harness(
        ScriptedProvider::new([
            done(),
            analysis(0.9, "low", PATCH, Some("web-0 is Running")),
            done(),
            settled("resolved"),
        ]),
        FakeCluster::new(),
    );
    let first = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();
    let executed = h
        .remediator
        .handle(choose(&first.session_id, MenuChoice::Execute))
        .await
        .unwrap();
    assert_eq!(executed.status, ResponseStatus::Success);
    let provider_calls = h.provider.calls();

    let replayed = h
        .remediator
        .handle(choose(&first.session_id, MenuChoice::Execute))
        .await
        .unwrap();
    assert_eq!(replayed.status, ResponseStatus::Success);
    assert_eq!(replayed.results, executed.results);

    let reported = h
        .remediator
        .handle(RemediateRequest {
            executed_commands: Some(vec![PATCH.to_string()]),
            ..RemediateRequest::for_session(&first.session_id)
        })
        .await
        .unwrap();
    assert_eq!(reported.status, ResponseStatus::Success);
    assert_eq!(reported.issue_status, Some(IssueStatus::Resolved));

    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 1);
    assert_eq!(h.provider.calls(), provider_calls);
    let session = h.store.require(&first.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Succeeded);
    assert_eq!(session.validations.len(), 1);
}

#[tokio::test]
async fn test_automatic_cascade_executes_follow_up_until_resolved() {
    let follow_up = "kubectl rollout restart deployment/web -n default";
    let h = harness(
        ScriptedProvider::new([
            done(),
            analysis(0.95, "low", PATCH, Some("web-0 is Running")),
            done(),
            analysis(0.95, "low", follow_up, Some("web pods are Ready")),
            done(),
            settled("resolved"),
        ]),
        FakeCluster::new(),
    );

    let response = h
        .remediator
        .handle(RemediateRequest {
            mode: Some(ExecutionMode::Automatic),
            ..RemediateRequest::new("pod web-0 pending")
        })
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    let executed: Vec<String> = response
        .results
        .unwrap()
        .into_iter()
        .map(|r| r.command)
        .collect();
    assert_eq!(executed, vec![PATCH.to_string(), follow_up.to_string()]);
    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 2);
    // both commands were previewed server-side first
    assert_eq!(h.cluster.calls_of(InvocationKind::DryRun), 2);

    let session = h.store.require(&response.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Succeeded);
    assert_eq!(session.validations.len(), 2);
}

#[tokio::test]
async fn test_cascade_limit_falls_back_to_manual() {
    let follow_up = "kubectl rollout restart deployment/web -n default";
    let h = harness_with(
        ScriptedProvider::new([
            done(),
            analysis(0.95, "low", PATCH, Some("web-0 is Running")),
            done(),
            analysis(0.95, "low", follow_up, Some("web pods are Ready")),
        ]),
        FakeCluster::new(),
        RemediateConfig {
            max_cascade_depth: 1,
            ..RemediateConfig::default()
        },
    );

    let response = h
        .remediator
        .handle(RemediateRequest {
            mode: Some(ExecutionMode::Automatic),
            ..RemediateRequest::new("pod web-0 pending")
        })
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::AwaitingUserApproval);
    assert_eq!(response.executed, Some(true));
    assert_eq!(response.results.as_ref().unwrap().len(), 1);
    let reason = response.fallback_reason.unwrap();
    assert!(reason.contains("cascade limit of 1"), "{reason}");
    assert_eq!(response.remediation.unwrap().actions[0].command, follow_up);
    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 1);
    assert_eq!(h.provider.remaining(), 0);

    let session = h.store.require(&response.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::AwaitingApproval);
}

#[tokio::test]
async fn test_choice_show_commands_and_cancel_leave_cluster_untouched() {
    let h = harness(
        ScriptedProvider::new([done(), analysis(0.9, "low", PATCH, None)]),
        FakeCluster::new(),
    );
    let first = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();

    let commands = h
        .remediator
        .handle(choose(&first.session_id, MenuChoice::ShowCommands))
        .await
        .unwrap();
    assert_eq!(commands.executed, Some(false));
    assert!(commands.message.unwrap().contains(PATCH));

    let cancelled = h
        .remediator
        .handle(choose(&first.session_id, MenuChoice::Cancel))
        .await
        .unwrap();
    assert_eq!(cancelled.status, ResponseStatus::Success);
    assert!(cancelled.message.unwrap().contains("cancelled"));

    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 0);
    let session = h.store.require(&first.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::AwaitingApproval);
}

#[tokio::test]
async fn test_manually_executed_commands_are_validated() {
    let h = harness(
        ScriptedProvider::new([
            done(),
            analysis(0.9, "low", PATCH, None),
            final_step("get", "pod/web-0"),
            settled("resolved"),
        ]),
        FakeCluster::new(),
    );
    let first = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();

    let response = h
        .remediator
        .handle(RemediateRequest {
            executed_commands: Some(vec![PATCH.to_string()]),
            ..RemediateRequest::for_session(&first.session_id)
        })
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 0);
    let session = h.store.require(&first.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Succeeded);
    assert!(session.validations[0].intent.contains("pod web-0 pending"));
}

#[tokio::test]
async fn test_session_id_only_rerenders_without_new_calls() {
    let h = harness(
        ScriptedProvider::new([done(), analysis(0.9, "low", PATCH, None)]),
        FakeCluster::new(),
    );
    let first = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();
    let provider_calls = h.provider.calls();
    let cluster_calls = h.cluster.calls().len();

    let again = h
        .remediator
        .handle(RemediateRequest::for_session(&first.session_id))
        .await
        .unwrap();

    assert_eq!(h.provider.calls(), provider_calls);
    assert_eq!(h.cluster.calls().len(), cluster_calls);
    assert_eq!(again.status, first.status);
    assert_eq!(again.analysis, first.analysis);
    assert_eq!(again.execution_choices, first.execution_choices);
}

#[tokio::test]
async fn test_caller_errors_on_stored_sessions() {
    let h = harness(
        ScriptedProvider::new(Vec::<String>::new()),
        FakeCluster::new(),
    );

    let missing = h
        .remediator
        .handle(RemediateRequest::for_session("rem-20260101000000-deadbeef"))
        .await;
    assert!(matches!(missing, Err(RemediateError::SessionNotFound { .. })));

    let investigating = InvestigationSession::new("pod web-0 pending", None);
    h.store.save(&investigating).await.unwrap();
    let choice = h
        .remediator
        .handle(choose(&investigating.id, MenuChoice::Execute))
        .await;
    assert!(matches!(choice, Err(RemediateError::InvalidState { .. })));

    let empty = h.remediator.handle(RemediateRequest::new("  ")).await;
    assert!(matches!(empty, Err(RemediateError::InvalidArgument { .. })));
}

#[tokio::test]
async fn test_failed_dry_run_is_never_surfaced() {
    let broken = "kubectl scale deployment/missing -n default --replicas=2";
    let h = harness(
        ScriptedProvider::new([
            done(),
            analysis(0.95, "low", broken, None),
            done(),
            analysis(0.95, "low", PATCH, None),
        ]),
        FakeCluster::failing_on("deployment/missing", "Error from server (NotFound): deployments.apps \"missing\" not found"),
    );

    let response = h
        .remediator
        .handle(RemediateRequest {
            mode: Some(ExecutionMode::Automatic),
            ..RemediateRequest::new("pod web-0 pending")
        })
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    let executed: Vec<String> = response
        .results
        .unwrap()
        .into_iter()
        .map(|r| r.command)
        .collect();
    assert_eq!(executed, vec![PATCH.to_string()]);
    assert_eq!(response.investigation.iterations, 2);
}

#[tokio::test]
async fn test_sessions_persist_across_remediators() {
    let dir = TempDir::new().unwrap();
    let config = RemediateConfig {
        session_dir: dir.path().to_path_buf(),
        ..RemediateConfig::default()
    };
    let provider = ScriptedProvider::new([done(), analysis(0.9, "low", PATCH, None)]);
    let cluster = FakeCluster::new();

    let build = || {
        Remediator::from_config(
            &config,
            provider.clone(),
            cluster.clone(),
            Arc::new(FileSessionStore::new(&config.session_dir)),
        )
        .unwrap()
    };

    let first = build()
        .handle(RemediateRequest::new("pod web-0 pending"))
        .await
        .unwrap();
    let again = build()
        .handle(RemediateRequest::for_session(&first.session_id))
        .await
        .unwrap();

    assert_eq!(again.status, ResponseStatus::AwaitingUserApproval);
    assert_eq!(again.remediation, first.remediation);
    assert!(dir
        .path()
        .join(format!("{}.json", first.session_id))
        .exists());
}
