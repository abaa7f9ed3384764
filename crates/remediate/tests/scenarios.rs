//! End-to-end remediation scenarios.
//!
//! Each test drives `Remediator::handle` with a scripted model backend and a
//! recording fake cluster.

mod common;

use common::*;
use remediate::safety::{InvocationKind, RejectionReason};
use remediate::session::{ExecutionMode, GatherOutcome, IssueStatus};
use remediate::{RemediateRequest, ResponseStatus, SessionStatus, SessionStore};

fn automatic(issue: &str, threshold: f64) -> RemediateRequest {
    RemediateRequest {
        mode: Some(ExecutionMode::Automatic),
        confidence_threshold: Some(threshold),
        ..RemediateRequest::new(issue)
    }
}

#[tokio::test]
async fn test_pending_pod_executes_automatically() {
    let h = harness(
        ScriptedProvider::new([
            final_step("describe", "pod/web-0"),
            analysis(0.95, "low", PATCH, None),
        ]),
        FakeCluster::new(),
    );

    let response = h
        .remediator
        .handle(automatic("pod web-0 pending", 0.8))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.executed, Some(true));
    let results = response.results.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(response.investigation.iterations, 1);
    assert_eq!(response.investigation.data_gathered, 1);
    assert!(response.fallback_reason.is_none());

    assert_eq!(h.cluster.calls_of(InvocationKind::DryRun), 1);
    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 1);
    let session = h.store.require(&response.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Succeeded);
    assert_eq!(session.execution_results.len(), 1);
}

#[tokio::test]
async fn test_low_confidence_falls_back_to_manual() {
    let h = harness(
        ScriptedProvider::new([
            final_step("describe", "pod/web-0"),
            analysis(0.5, "low", PATCH, None),
        ]),
        FakeCluster::new(),
    );

    let response = h
        .remediator
        .handle(automatic("pod web-0 pending", 0.8))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::AwaitingUserApproval);
    let reason = response.fallback_reason.unwrap();
    assert!(reason.contains("confidence 0.50"), "{reason}");
    assert_eq!(response.executed, Some(false));
    assert_eq!(response.execution_choices.unwrap().len(), 3);
    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 0);
}

#[tokio::test]
async fn test_resolved_issue_needs_no_action() {
    let h = harness(
        ScriptedProvider::new([final_step("get", "pods -l app=db"), settled("resolved")]),
        FakeCluster::new(),
    );

    let response = h
        .remediator
        .handle(automatic("db connection refused", 0.8))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.issue_status, Some(IssueStatus::Resolved));
    assert!(response.execution_choices.is_none());
    assert_eq!(response.executed, Some(false));
    assert!(response.remediation.unwrap().actions.is_empty());
    assert_eq!(h.cluster.calls_of(InvocationKind::Mutation), 0);
}

#[tokio::test]
async fn test_non_converging_investigation_fails_at_ceiling() {
    let provider = ScriptedProvider::new((0..25).map(|i| step("get", &format!("pod/web-{i}"))));
    let h = harness(provider, FakeCluster::new());

    let response = h
        .remediator
        .handle(RemediateRequest::new("web is slow"))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.investigation.iterations, 20);
    assert_eq!(h.provider.calls(), 20);
    assert_eq!(h.provider.remaining(), 5);
    assert!(response.analysis.is_none());
    assert!(response.message.unwrap().contains("ceiling of 20"));

    let session = h.store.require(&response.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.data_gathered(), 20);
    assert!(session.final_analysis.is_none());
}

#[tokio::test]
async fn test_unsupported_operation_is_rejected_before_the_cluster() {
    let h = harness(
        ScriptedProvider::new([
            step("delete", "pod/web-0"),
            done(),
            settled("nonexistent"),
        ]),
        FakeCluster::new(),
    );

    let response = h
        .remediator
        .handle(RemediateRequest::new("pod web-0 is stuck"))
        .await
        .unwrap();

    assert!(h.cluster.calls().is_empty());
    assert_eq!(response.issue_status, Some(IssueStatus::Nonexistent));

    let session = h.store.require(&response.session_id).await.unwrap();
    let gathered = &session.iterations[0].gathered_data;
    assert_eq!(gathered.len(), 1);
    match &gathered[0].outcome {
        GatherOutcome::Rejected { reason, message } => {
            assert_eq!(*reason, RejectionReason::UnsupportedOperation);
            assert!(message.contains("delete"));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}
