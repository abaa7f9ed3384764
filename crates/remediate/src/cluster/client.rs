//! Cluster CLI execution.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::errors::{RemediateError, RemediateResult};
use crate::safety::{SafeInvocation, CLUSTER_CLI};

/// Raw result of one cluster CLI call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandOutput {
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Executes validated invocations against the cluster.
///
/// Only a [`SafeInvocation`] can be run, so every call has passed the
/// safety validator first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Run one invocation. `Err` means the CLI could not be started at all.
    async fn run(
        &self,
        invocation: &SafeInvocation,
        timeout: Duration,
    ) -> RemediateResult<CommandOutput>;
}

/// `kubectl` subprocess client.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self {
            binary: CLUSTER_CLI.to_string(),
            kubeconfig: None,
            context: None,
        }
    }
}

impl KubectlClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific kubectl binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_kubeconfig(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig = path;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    fn command(&self, invocation: &SafeInvocation) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.args(invocation.args())
            .stdin(if invocation.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn run(
        &self,
        invocation: &SafeInvocation,
        limit: Duration,
    ) -> RemediateResult<CommandOutput> {
        debug!("Running: {invocation}");

        let mut child = self
            .command(invocation)
            .spawn()
            .map_err(|e| RemediateError::ClusterCommand {
                reason: format!("failed to start {}: {e}", self.binary),
            })?;

        // A child that never drains stdin must not outlive the limit, so the
        // manifest write shares the timeout with the wait.
        let stdin = child.stdin.take();
        let binary = &self.binary;
        let completion = async move {
            if let (Some(input), Some(mut pipe)) = (invocation.stdin(), stdin) {
                pipe.write_all(input.as_bytes())
                    .await
                    .map_err(|e| RemediateError::ClusterCommand {
                        reason: format!("failed to write manifest to {binary}: {e}"),
                    })?;
                // EOF for the reader
                drop(pipe);
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| RemediateError::ClusterCommand {
                    reason: format!("failed to wait for {binary}: {e}"),
                })
        };

        match timeout(limit, completion).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(e),
            // the child is killed when its handle drops
            Err(_) => Ok(CommandOutput {
                stderr: format!("timed out after {}s", limit.as_secs()),
                exit_code: -1,
                timed_out: true,
                ..CommandOutput::default()
            }),
        }
    }
}
