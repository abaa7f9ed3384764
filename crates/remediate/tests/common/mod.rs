//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remediate::ai::{AIMessage, AIProvider, AIResponse, GenerateOptions};
use remediate::cluster::{ClusterClient, CommandOutput};
use remediate::safety::{InvocationKind, SafeInvocation};
use remediate::{
    MemorySessionStore, RemediateConfig, RemediateError, RemediateResult, Remediator,
};

/// Model backend replaying canned replies in order.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl AIProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn generate_text(
        &self,
        _model: &str,
        _messages: &[AIMessage],
        _options: &GenerateOptions,
    ) -> RemediateResult<AIResponse> {
        *self.calls.lock().unwrap() += 1;
        let reply = self.replies.lock().unwrap().pop_front();
        reply
            .map(AIResponse::from_text)
            .ok_or_else(|| RemediateError::Ai("no scripted reply left".into()))
    }
}

/// One call seen by the fake cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: InvocationKind,
    pub args: Vec<String>,
}

/// Cluster client that records calls and answers from simple rules.
#[derive(Default)]
pub struct FakeCluster {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Vec<(String, String)>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail any invocation whose arguments contain `needle`.
    pub fn failing_on(needle: &str, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures: vec![(needle.to_string(), stderr.to_string())],
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: InvocationKind) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn run(
        &self,
        invocation: &SafeInvocation,
        _timeout: Duration,
    ) -> RemediateResult<CommandOutput> {
        self.calls.lock().unwrap().push(RecordedCall {
            kind: invocation.kind(),
            args: invocation.args().to_vec(),
        });
        for (needle, stderr) in &self.failures {
            if invocation.args().iter().any(|a| a.contains(needle.as_str())) {
                return Ok(CommandOutput::failure(1, stderr.clone()));
            }
        }
        let stdout = match invocation.kind() {
            InvocationKind::Read(_) => format!("output of {}", invocation.args().join(" ")),
            InvocationKind::DryRun => "configured (server dry run)".to_string(),
            InvocationKind::Mutation => "configured".to_string(),
        };
        Ok(CommandOutput::success(stdout))
    }
}

pub struct Harness {
    pub remediator: Remediator,
    pub provider: Arc<ScriptedProvider>,
    pub cluster: Arc<FakeCluster>,
    pub store: Arc<MemorySessionStore>,
}

pub fn harness(provider: Arc<ScriptedProvider>, cluster: Arc<FakeCluster>) -> Harness {
    harness_with(provider, cluster, RemediateConfig::default())
}

pub fn harness_with(
    provider: Arc<ScriptedProvider>,
    cluster: Arc<FakeCluster>,
    config: RemediateConfig,
) -> Harness {
    let store = Arc::new(MemorySessionStore::new());
    let remediator =
        Remediator::from_config(&config, provider.clone(), cluster.clone(), store.clone())
            .unwrap();
    Harness {
        remediator,
        provider,
        cluster,
        store,
    }
}

/// Investigation step that requests one read and is not complete.
pub fn step(operation: &str, resource: &str) -> String {
    serde_json::json!({
        "rationale": format!("check {resource}"),
        "dataRequests": [{"type": operation, "resource": resource, "namespace": "default", "rationale": "evidence"}],
        "complete": false,
        "confidence": 0.3
    })
    .to_string()
}

/// Investigation step that requests one read and completes.
pub fn final_step(operation: &str, resource: &str) -> String {
    serde_json::json!({
        "rationale": "root cause is clear",
        "dataRequests": [{"type": operation, "resource": resource, "namespace": "default"}],
        "complete": true,
        "confidence": 0.9
    })
    .to_string()
}

pub fn done() -> String {
    r#"{"rationale": "enough evidence", "dataRequests": [], "complete": true, "confidence": 0.9}"#
        .to_string()
}

/// Final analysis with one action.
pub fn analysis(confidence: f64, risk: &str, command: &str, validation_intent: Option<&str>) -> String {
    let mut value = serde_json::json!({
        "issueStatus": "active",
        "rootCause": "Pod requests more memory than any node can allocate",
        "confidence": confidence,
        "factors": ["0/3 nodes are available: 3 Insufficient memory"],
        "remediation": {
            "summary": "Lower the memory request",
            "actions": [{
                "description": "Patch the memory request",
                "command": command,
                "risk": risk,
                "rationale": "fits the largest node"
            }],
            "risk": risk
        }
    });
    if let Some(intent) = validation_intent {
        value["validationIntent"] = serde_json::Value::String(intent.to_string());
    }
    value.to_string()
}

pub fn settled(status: &str) -> String {
    serde_json::json!({
        "issueStatus": status,
        "rootCause": "The database pod restarted and is accepting connections again",
        "confidence": 0.9,
        "factors": ["db-0 Ready since 5m"]
    })
    .to_string()
}

pub const PATCH: &str =
    r#"kubectl patch deployment web -n default -p '{"spec":{"template":{"spec":{"containers":[{"name":"web","resources":{"requests":{"memory":"256Mi"}}}]}}}}'"#;
