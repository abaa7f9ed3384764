//! Cluster data gathering for investigations.
//!
//! Runs the model's read-only requests against the cluster:
//! - Every request goes through the safety validator first
//! - Valid requests run concurrently, bounded by a small worker limit
//! - Failures are captured with a hint instead of aborting the iteration

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::ClusterClient;
use crate::safety::{InvocationKind, OperationType, SafeInvocation, SafetyValidator};
use crate::session::{DataRequest, GatherOutcome, GatheredData};

/// Default per-query timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of queries in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default cap on stored output per query.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 20_000;

/// Executes validated read requests and records their outcomes.
pub struct ClusterDataGatherer {
    client: Arc<dyn ClusterClient>,
    validator: SafetyValidator,
    timeout: Duration,
    concurrency: usize,
    max_output_chars: usize,
}

impl ClusterDataGatherer {
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, validator: SafetyValidator) -> Self {
        Self {
            client,
            validator,
            timeout: DEFAULT_QUERY_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_max_output_chars(mut self, max_output_chars: usize) -> Self {
        self.max_output_chars = max_output_chars.max(1);
        self
    }

    /// Process one iteration's requests, returning one entry per request in
    /// request order. Rejected requests never reach the cluster client.
    pub async fn gather(&self, requests: &[DataRequest]) -> Vec<GatheredData> {
        let mut outcomes: Vec<Option<GatherOutcome>> = vec![None; requests.len()];
        let mut pending = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            match self.validator.validate(request) {
                Ok(invocation) => pending.push((index, invocation)),
                Err(rejection) => {
                    warn!(
                        "Rejected data request {}: {rejection}",
                        request.label()
                    );
                    outcomes[index] = Some(GatherOutcome::Rejected {
                        reason: rejection.reason,
                        message: rejection.message,
                    });
                }
            }
        }

        info!(
            "Gathering {} data requests ({} rejected)",
            pending.len(),
            requests.len() - pending.len()
        );

        let executed: Vec<(usize, GatherOutcome)> = stream::iter(pending)
            .map(|(index, invocation)| async move { (index, self.execute(&invocation).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (index, outcome) in executed {
            outcomes[index] = Some(outcome);
        }

        requests
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (request, outcome))| GatheredData {
                key: format!("{index}:{} {}", request.operation_type, request.resource),
                request: request.clone(),
                outcome: outcome.unwrap_or_else(|| GatherOutcome::Error {
                    error: "request was not processed".to_string(),
                    suggestion: "retry the request".to_string(),
                }),
            })
            .collect()
    }

    /// Run one validated invocation, capturing failures as evidence.
    pub async fn execute(&self, invocation: &SafeInvocation) -> GatherOutcome {
        debug!("Gathering: {invocation}");
        match self.client.run(invocation, self.timeout).await {
            Ok(output) if output.is_success() => {
                let keep_tail = invocation.kind() == InvocationKind::Read(OperationType::Logs);
                let (output, truncated) = cap(&output.stdout, self.max_output_chars, keep_tail);
                GatherOutcome::Output { output, truncated }
            }
            Ok(output) => {
                let error = if output.stderr.trim().is_empty() {
                    format!("exit code {}", output.exit_code)
                } else {
                    output.stderr.trim().to_string()
                };
                let suggestion = if output.timed_out {
                    "The query timed out; narrow it to one namespace, a label selector or a single object."
                        .to_string()
                } else {
                    suggest(&error).to_string()
                };
                GatherOutcome::Error { error, suggestion }
            }
            Err(e) => GatherOutcome::Error {
                error: e.to_string(),
                suggestion: "The cluster CLI could not be started; cluster data is unavailable for this request.".to_string(),
            },
        }
    }
}

/// Heuristic next step for a failed query.
fn suggest(error: &str) -> &'static str {
    let lower = error.to_lowercase();
    if lower.contains("forbidden") || lower.contains("unauthorized") {
        "Permission denied; the investigation identity cannot read this resource. Try a related resource or namespace-scoped query."
    } else if lower.contains("doesn't have a resource type") || lower.contains("no matches for kind") {
        "Unknown resource type; use 'explain' or a standard kind such as pods, deployments or services."
    } else if lower.contains("notfound") || lower.contains("not found") {
        "Resource not found; list the resource type in the namespace to confirm the exact name, or check the namespace."
    } else if lower.contains("previous terminated container") {
        "The container has not restarted; request logs without --previous."
    } else if lower.contains("connection refused") || lower.contains("unable to connect") {
        "The API server is unreachable; cluster connectivity itself may be the problem."
    } else if lower.contains("metrics api not available") || lower.contains("metrics not available") {
        "Resource metrics are unavailable; metrics-server may not be installed."
    } else {
        "Review the error and adjust the request."
    }
}

fn cap(text: &str, max_chars: usize, keep_tail: bool) -> (String, bool) {
    let count = text.chars().count();
    if count <= max_chars {
        return (text.to_string(), false);
    }
    let kept: String = if keep_tail {
        text.chars().skip(count - max_chars).collect()
    } else {
        text.chars().take(max_chars).collect()
    };
    (kept, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::client::{CommandOutput, MockClusterClient};
    use crate::errors::{RemediateError, RemediateResult};
    use crate::safety::RejectionReason;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gatherer(mock: MockClusterClient) -> ClusterDataGatherer {
        ClusterDataGatherer::new(Arc::new(mock), SafetyValidator::new())
    }

    #[tokio::test]
    async fn test_rejected_request_never_reaches_client() {
        let mut mock = MockClusterClient::new();
        mock.expect_run().times(0);

        let results = gatherer(mock)
            .gather(&[DataRequest::new("delete", "pod/web-0", Some("shop"))])
            .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].outcome,
            GatherOutcome::Rejected {
                reason: RejectionReason::UnsupportedOperation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let mut mock = MockClusterClient::new();
        mock.expect_run()
            .times(2)
            .returning(|inv, _| Ok(CommandOutput::success(inv.args().join(" "))));

        let requests = vec![
            DataRequest::new("get", "pods", Some("shop")),
            DataRequest::new("exec", "web-0", Some("shop")),
            DataRequest::new("describe", "pod/web-0", Some("shop")),
        ];
        let results = gatherer(mock).gather(&requests).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].key, "0:get pods");
        assert_eq!(results[1].key, "1:exec web-0");
        assert!(results[1].outcome.is_rejected());
        match &results[2].outcome {
            GatherOutcome::Output { output, .. } => assert!(output.starts_with("describe pod/web-0")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    /// Earlier pods answer slower, so completions arrive in reverse order.
    #[derive(Default)]
    struct SlowCluster {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ClusterClient for SlowCluster {
        async fn run(
            &self,
            invocation: &SafeInvocation,
            _timeout: Duration,
        ) -> RemediateResult<CommandOutput> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            let pod: u64 = invocation.args()[1]
                .trim_start_matches("pod/web-")
                .parse()
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(20 * 5_u64.saturating_sub(pod))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CommandOutput::success(invocation.args().join(" ")))
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_results_merge_in_order() {
        let client = Arc::new(SlowCluster::default());
        let gatherer =
            ClusterDataGatherer::new(client.clone(), SafetyValidator::new()).with_concurrency(2);
        let requests: Vec<DataRequest> = (0..5)
            .map(|i| DataRequest::new("get", &format!("pod/web-{i}"), Some("shop")))
            .collect();

        let results = gatherer.gather(&requests).await;

        assert_eq!(client.peak.load(Ordering::SeqCst), 2);
        assert_eq!(client.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 5);
        for (i, data) in results.iter().enumerate() {
            assert_eq!(data.key, format!("{i}:get pod/web-{i}"));
            match &data.outcome {
                GatherOutcome::Output { output, .. } => {
                    assert_eq!(output, &format!("get pod/web-{i} -n shop -o yaml"));
                }
                other => panic!("unexpected outcome for web-{i}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_failures_are_captured_with_suggestion() {
        let mut mock = MockClusterClient::new();
        mock.expect_run().times(1).returning(|_, _| {
            Ok(CommandOutput::failure(
                1,
                "Error from server (NotFound): pods \"web-9\" not found",
            ))
        });

        let results = gatherer(mock)
            .gather(&[DataRequest::new("describe", "pod/web-9", Some("shop"))])
            .await;

        match &results[0].outcome {
            GatherOutcome::Error { error, suggestion } => {
                assert!(error.contains("NotFound"));
                assert!(suggestion.contains("not found"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_error_is_captured() {
        let mut mock = MockClusterClient::new();
        mock.expect_run().times(1).returning(|_, _| {
            Err(RemediateError::ClusterCommand {
                reason: "failed to start kubectl".into(),
            })
        });

        let results = gatherer(mock)
            .gather(&[DataRequest::new("get", "nodes", None)])
            .await;
        assert!(matches!(results[0].outcome, GatherOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn test_large_output_truncated() {
        let mut mock = MockClusterClient::new();
        mock.expect_run()
            .returning(|_, _| Ok(CommandOutput::success("line\n".repeat(100))));

        let results = gatherer(mock)
            .with_max_output_chars(50)
            .gather(&[DataRequest::new("logs", "web-0", Some("shop"))])
            .await;
        match &results[0].outcome {
            GatherOutcome::Output { output, truncated } => {
                assert!(*truncated);
                assert_eq!(output.chars().count(), 50);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_suggestions() {
        assert!(suggest("Error from server (Forbidden): pods is forbidden").contains("Permission"));
        assert!(suggest("error: the server doesn't have a resource type \"foos\"").contains("explain"));
        assert!(suggest("The connection to the server was refused: connection refused").contains("unreachable"));
        assert_eq!(suggest("weird"), "Review the error and adjust the request.");
    }
}
