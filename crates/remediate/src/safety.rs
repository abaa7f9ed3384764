//! Safety validation for every cluster-facing call.
//!
//! [`SafetyValidator`] is the only constructor of [`SafeInvocation`], and the
//! cluster client only accepts a `SafeInvocation`, so nothing reaches kubectl
//! without passing through here:
//! - Read requests must use a whitelisted operation type and plain arguments
//! - Mutating commands must match the approved plan exactly
//! - Dry-runs are only built for verbs that honor `--dry-run=server`
//!
//! Arguments are always bound as an argv vector; no shell is involved.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::session::{DataRequest, RemediationAction};

/// Binary name a remediation command must start with.
pub const CLUSTER_CLI: &str = "kubectl";

/// Default `--tail` for log requests.
pub const DEFAULT_LOG_TAIL: u32 = 200;

/// Read-only flags a model may pass inside `resource`.
const ALLOWED_READ_FLAGS: &[&str] = &[
    "-l",
    "--selector",
    "--field-selector",
    "-c",
    "--container",
    "-p",
    "--previous",
    "--all-containers",
    "--containers",
    "--recursive",
    "--sort-by",
];

/// Flags that would redirect a command to other credentials or clusters.
const CONNECTION_FLAGS: &[&str] = &[
    "--kubeconfig",
    "--context",
    "--cluster",
    "--server",
    "-s",
    "--token",
    "--user",
    "--as",
    "--as-group",
    "--as-uid",
    "--insecure-skip-tls-verify",
];

/// Tokens that only make sense to a shell.
const SHELL_OPERATORS: &[&str] = &["|", "||", "&", "&&", ";", ">", ">>", "<", "<<"];

/// Verbs that accept `--dry-run=server`.
const DRY_RUN_VERBS: &[&str] = &[
    "apply",
    "create",
    "patch",
    "replace",
    "delete",
    "scale",
    "label",
    "annotate",
    "set",
    "expose",
    "autoscale",
    "cordon",
    "uncordon",
    "drain",
];

/// `kubectl rollout` subcommands that accept `--dry-run=server`.
const ROLLOUT_DRY_RUN: &[&str] = &["restart", "undo"];

/// Whitelisted read-only operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Get,
    Describe,
    Logs,
    Events,
    /// Resource usage (`kubectl top`)
    Top,
    /// Schema lookup (`kubectl explain`)
    Explain,
}

impl OperationType {
    /// All whitelisted operations, in the order shown to the model.
    pub const ALL: [Self; 6] = [
        Self::Get,
        Self::Describe,
        Self::Logs,
        Self::Events,
        Self::Top,
        Self::Explain,
    ];

    /// Parse a model-supplied operation name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "get" => Some(Self::Get),
            "describe" => Some(Self::Describe),
            "logs" | "log" => Some(Self::Logs),
            "events" | "event" => Some(Self::Events),
            "top" | "resource-usage" | "resource_usage" | "usage" => Some(Self::Top),
            "explain" | "explain-schema" | "explain_schema" => Some(Self::Explain),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Describe => "describe",
            Self::Logs => "logs",
            Self::Events => "events",
            Self::Top => "top",
            Self::Explain => "explain",
        }
    }
}

/// Machine-readable reason a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    UnsupportedOperation,
    UnapprovedCommand,
    InvalidArgument,
}

impl RejectionReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedOperation => "unsupported_operation",
            Self::UnapprovedCommand => "unapproved_command",
            Self::InvalidArgument => "invalid_argument",
        }
    }
}

/// A refused request, fed back to the model as learning signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub message: String,
}

impl Rejection {
    fn new(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(RejectionReason::InvalidArgument, message)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason.as_str(), self.message)
    }
}

/// What a validated invocation is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Read(OperationType),
    DryRun,
    Mutation,
}

/// Pre-bound, validated arguments for one cluster CLI call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeInvocation {
    kind: InvocationKind,
    args: Vec<String>,
    stdin: Option<String>,
}

impl SafeInvocation {
    #[must_use]
    pub fn kind(&self) -> InvocationKind {
        self.kind
    }

    /// Arguments after the binary name.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Manifest piped to the command, for declarative applies.
    #[must_use]
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.kind == InvocationKind::Mutation
    }
}

impl fmt::Display for SafeInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CLUSTER_CLI} {}", self.args.join(" "))
    }
}

/// The remediation plan the caller reviewed.
///
/// Built from the actions surfaced in an analysis; the execution engine may
/// only run actions whose command (and manifest, if any) appear here verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovedCommands {
    entries: Vec<(String, Option<String>)>,
}

impl ApprovedCommands {
    #[must_use]
    pub fn from_actions(actions: &[RemediationAction]) -> Self {
        Self {
            entries: actions
                .iter()
                .map(|a| (a.command.clone(), a.full_resource_definition.clone()))
                .collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, action: &RemediationAction) -> bool {
        self.entries.iter().any(|(command, definition)| {
            *command == action.command && *definition == action.full_resource_definition
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Gate for all cluster-facing requests and commands. Pure, no I/O.
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    log_tail: u32,
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self {
            log_tail: DEFAULT_LOG_TAIL,
        }
    }
}

impl SafetyValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of log lines requested by `logs` queries.
    #[must_use]
    pub fn with_log_tail(mut self, log_tail: u32) -> Self {
        self.log_tail = log_tail.max(1);
        self
    }

    /// Validate a model-proposed read request.
    pub fn validate(&self, request: &DataRequest) -> Result<SafeInvocation, Rejection> {
        let Some(operation) = OperationType::parse(&request.operation_type) else {
            return Err(Rejection::new(
                RejectionReason::UnsupportedOperation,
                format!(
                    "operation '{}' is not allowed; use one of: {}",
                    request.operation_type,
                    OperationType::ALL.map(OperationType::as_str).join(", ")
                ),
            ));
        };

        let tokens = split_tokens(&request.resource)?;
        check_read_tokens(&tokens)?;
        let namespace = namespace_args(request.namespace.as_deref())?;

        let mut args: Vec<String> = Vec::new();
        match operation {
            OperationType::Get => {
                require_resource(&tokens, operation)?;
                args.push("get".into());
                // Secret payloads never reach the model; wide output shows type and key count only.
                let full_object = names_single_object(&tokens) && !names_secret(&tokens);
                args.extend(tokens);
                args.extend(namespace);
                args.push("-o".into());
                args.push(if full_object { "yaml" } else { "wide" }.into());
            }
            OperationType::Describe => {
                require_resource(&tokens, operation)?;
                args.push("describe".into());
                args.extend(tokens);
                args.extend(namespace);
            }
            OperationType::Logs => {
                require_resource(&tokens, operation)?;
                args.push("logs".into());
                args.extend(tokens);
                args.extend(namespace);
                args.push(format!("--tail={}", self.log_tail));
            }
            OperationType::Events => {
                args.push("get".into());
                args.push("events".into());
                args.extend(namespace);
                args.push("--sort-by=.lastTimestamp".into());
                if let Some(name) = object_name(&tokens) {
                    args.push("--field-selector".into());
                    args.push(format!("involvedObject.name={name}"));
                }
            }
            OperationType::Top => {
                let target = tokens.first().map_or("pods", String::as_str);
                let nodes = matches!(target, "node" | "nodes" | "no");
                if !nodes && !matches!(target, "pod" | "pods" | "po") {
                    return Err(Rejection::invalid(format!(
                        "top only supports pods or nodes, got '{target}'"
                    )));
                }
                args.push("top".into());
                if tokens.is_empty() {
                    args.push("pods".into());
                } else {
                    args.extend(tokens);
                }
                if !nodes {
                    args.extend(namespace);
                }
            }
            OperationType::Explain => {
                require_resource(&tokens, operation)?;
                args.push("explain".into());
                args.extend(tokens);
            }
        }

        Ok(SafeInvocation {
            kind: InvocationKind::Read(operation),
            args,
            stdin: None,
        })
    }

    /// Authorize an approved remediation action for execution.
    pub fn authorize(
        &self,
        action: &RemediationAction,
        approved: &ApprovedCommands,
    ) -> Result<SafeInvocation, Rejection> {
        if !approved.contains(action) {
            return Err(Rejection::new(
                RejectionReason::UnapprovedCommand,
                format!(
                    "command '{}' was not part of the reviewed plan",
                    action.command
                ),
            ));
        }
        let (args, stdin) = bind_command(action)?;
        Ok(SafeInvocation {
            kind: InvocationKind::Mutation,
            args,
            stdin,
        })
    }

    /// Build a server-side dry-run for an action before it is surfaced.
    ///
    /// Returns `Ok(None)` when the verb has no dry-run mode.
    pub fn dry_run(&self, action: &RemediationAction) -> Result<Option<SafeInvocation>, Rejection> {
        let (mut args, stdin) = bind_command(action)?;
        if !supports_server_dry_run(&args) {
            return Ok(None);
        }
        args.push("--dry-run=server".into());
        Ok(Some(SafeInvocation {
            kind: InvocationKind::DryRun,
            args,
            stdin,
        }))
    }
}

/// Tokenize and check a remediation command, binding its manifest if any.
fn bind_command(action: &RemediationAction) -> Result<(Vec<String>, Option<String>), Rejection> {
    let tokens = split_tokens(&action.command)?;
    let Some((binary, rest)) = tokens.split_first() else {
        return Err(Rejection::invalid("command is empty"));
    };
    if binary != CLUSTER_CLI {
        return Err(Rejection::invalid(format!(
            "command must start with '{CLUSTER_CLI}', got '{binary}'"
        )));
    }
    if rest.is_empty() {
        return Err(Rejection::invalid("command has no arguments"));
    }
    for token in rest {
        check_connection_flag(token)?;
        if flag_name(token) == "--dry-run" {
            return Err(Rejection::invalid(
                "commands must not carry --dry-run; previews are added before the plan is shown",
            ));
        }
    }

    let stdin = match &action.full_resource_definition {
        Some(definition) => {
            check_manifest(definition)?;
            let verb = rest[0].as_str();
            let reads_stdin = rest.windows(2).any(|w| w[0] == "-f" && w[1] == "-")
                || rest.iter().any(|t| t == "--filename=-" || t == "-f=-");
            if !matches!(verb, "apply" | "create" | "replace") || !reads_stdin {
                return Err(Rejection::invalid(
                    "a resource definition must be applied with 'kubectl apply -f -'",
                ));
            }
            Some(definition.clone())
        }
        None => None,
    };

    Ok((rest.to_vec(), stdin))
}

fn supports_server_dry_run(args: &[String]) -> bool {
    match args {
        [verb, ..] if DRY_RUN_VERBS.contains(&verb.as_str()) => true,
        [verb, sub, ..] if verb == "rollout" => ROLLOUT_DRY_RUN.contains(&sub.as_str()),
        _ => false,
    }
}

fn check_manifest(definition: &str) -> Result<(), Rejection> {
    let value: serde_yaml::Value = serde_yaml::from_str(definition)
        .map_err(|e| Rejection::invalid(format!("resource definition is not valid YAML: {e}")))?;
    let has_kind = value
        .as_mapping()
        .and_then(|m| m.get("kind"))
        .and_then(serde_yaml::Value::as_str)
        .is_some();
    if has_kind {
        Ok(())
    } else {
        Err(Rejection::invalid("resource definition has no 'kind'"))
    }
}

fn split_tokens(text: &str) -> Result<Vec<String>, Rejection> {
    let tokens = shlex::split(text)
        .ok_or_else(|| Rejection::invalid(format!("cannot tokenize '{text}': unbalanced quotes")))?;
    for token in &tokens {
        if SHELL_OPERATORS.contains(&token.as_str())
            || token.contains(&[';', '|', '&', '<', '>', '`'][..])
            || token.contains("$(")
        {
            return Err(Rejection::invalid(format!(
                "shell syntax '{token}' is not supported; issue one command per request"
            )));
        }
    }
    Ok(tokens)
}

fn flag_name(token: &str) -> &str {
    token.split_once('=').map_or(token, |(name, _)| name)
}

fn check_connection_flag(token: &str) -> Result<(), Rejection> {
    if CONNECTION_FLAGS.contains(&flag_name(token)) {
        return Err(Rejection::invalid(format!(
            "flag '{}' would change cluster credentials",
            flag_name(token)
        )));
    }
    Ok(())
}

fn check_read_tokens(tokens: &[String]) -> Result<(), Rejection> {
    let mut expects_value = false;
    for token in tokens {
        if expects_value {
            expects_value = false;
            continue;
        }
        if token.starts_with('-') {
            check_connection_flag(token)?;
            let name = flag_name(token);
            if !ALLOWED_READ_FLAGS.contains(&name) {
                return Err(Rejection::invalid(format!(
                    "flag '{name}' is not allowed in read requests"
                )));
            }
            let boolean = matches!(name, "-p" | "--previous" | "--all-containers" | "--recursive");
            expects_value = !token.contains('=') && !boolean && name != "--containers";
        }
    }
    if expects_value {
        return Err(Rejection::invalid("flag is missing its value"));
    }
    Ok(())
}

fn require_resource(tokens: &[String], operation: OperationType) -> Result<(), Rejection> {
    if positional(tokens).is_empty() {
        Err(Rejection::invalid(format!(
            "{} requires a resource",
            operation.as_str()
        )))
    } else {
        Ok(())
    }
}

fn namespace_args(namespace: Option<&str>) -> Result<Vec<String>, Rejection> {
    static DNS_LABEL: OnceLock<Regex> = OnceLock::new();
    let Some(ns) = namespace.map(str::trim).filter(|ns| !ns.is_empty()) else {
        return Ok(Vec::new());
    };
    if matches!(ns, "all" | "*" | "all-namespaces" | "--all-namespaces" | "-A") {
        return Ok(vec!["--all-namespaces".into()]);
    }
    let re = DNS_LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("namespace pattern is valid")
    });
    if ns.len() <= 63 && re.is_match(ns) {
        Ok(vec!["-n".into(), ns.to_string()])
    } else {
        Err(Rejection::invalid(format!("invalid namespace '{ns}'")))
    }
}

/// Positional (non-flag) tokens, skipping values of flags that take one.
fn positional(tokens: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip = false;
    for token in tokens {
        if skip {
            skip = false;
            continue;
        }
        if token.starts_with('-') {
            let name = flag_name(token);
            skip = !token.contains('=')
                && !matches!(name, "-p" | "--previous" | "--all-containers" | "--recursive" | "--containers");
            continue;
        }
        out.push(token.as_str());
    }
    out
}

fn names_single_object(tokens: &[String]) -> bool {
    if tokens.iter().any(|t| matches!(flag_name(t), "-l" | "--selector")) {
        return false;
    }
    match positional(tokens).as_slice() {
        [one] => one.contains('/') && !one.contains(','),
        [kind, _name] => !kind.contains(',') && !kind.contains('/'),
        _ => false,
    }
}

/// Whether a `get` targets Secrets, by kind list or `kind/name` form.
fn names_secret(tokens: &[String]) -> bool {
    let is_secret_kind = |kind: &str| {
        kind.split(',').any(|k| {
            let k = k.to_ascii_lowercase();
            let base = k.split('.').next().unwrap_or_default();
            matches!(base, "secret" | "secrets")
        })
    };
    let positional = positional(tokens);
    positional.first().is_some_and(|first| is_secret_kind(first.split('/').next().unwrap_or_default()))
        || positional
            .iter()
            .filter_map(|t| t.split_once('/'))
            .any(|(kind, _)| is_secret_kind(kind))
}

fn object_name(tokens: &[String]) -> Option<String> {
    match positional(tokens).as_slice() {
        [one] => one.split_once('/').map(|(_, name)| name.to_string()),
        [_, name] => Some((*name).to_string()),
        _ => None,
    }
}
