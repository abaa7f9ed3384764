//! Remediate CLI - investigate cluster issues and plan gated remediation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use remediate::ai::AIProvider;
use remediate::session::{ExecutionMode, IssueContext, RiskLevel};
use remediate::{
    AnthropicProvider, FileSessionStore, KubectlClient, MenuChoice, RemediateConfig,
    RemediateRequest, Remediator, SessionStore,
};

/// Remediate CLI - AI-directed Kubernetes diagnosis and remediation.
#[derive(Parser)]
#[command(name = "remediate")]
#[command(about = "Investigate Kubernetes issues and plan gated remediation")]
#[command(version)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true, env = "REMEDIATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding session files
    #[arg(long, global = true)]
    session_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or continue a remediation session and print the JSON response
    Investigate {
        /// Free-text description of the issue (omit when continuing a session)
        issue: Option<String>,

        /// Continue a stored session
        #[arg(long)]
        session_id: Option<String>,

        /// Execution mode: manual or automatic
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Minimum analysis confidence for automatic execution (0.0-1.0)
        #[arg(long)]
        confidence_threshold: Option<f64>,

        /// Highest risk level executed automatically: low, medium or high
        #[arg(long)]
        max_risk: Option<RiskLevel>,

        /// Event that triggered the report
        #[arg(long)]
        prior_event: Option<String>,

        /// File with a log excerpt to include as context
        #[arg(long)]
        logs_file: Option<PathBuf>,

        /// Command already executed manually (repeatable)
        #[arg(long = "executed-command")]
        executed_commands: Vec<String>,

        /// Answer to the approval menu: 1 execute, 2 get commands, 3 cancel
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
        choice: Option<u8>,

        /// Model id
        #[arg(long)]
        model: Option<String>,

        /// kubectl context to use
        #[arg(long)]
        context: Option<String>,
    },

    /// Print a stored session
    Show {
        /// Session id
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the JSON response, so logs go to stderr
    let default_filter = if cli.verbose {
        "remediate=debug,info"
    } else {
        "remediate=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = RemediateConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = cli.session_dir {
        config.session_dir = dir;
    }

    match cli.command {
        Commands::Investigate {
            issue,
            session_id,
            mode,
            confidence_threshold,
            max_risk,
            prior_event,
            logs_file,
            executed_commands,
            choice,
            model,
            context,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            if context.is_some() {
                config.kube_context = context;
            }

            let logs = match logs_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                ),
                None => None,
            };
            let issue_context = (prior_event.is_some() || logs.is_some()).then(|| IssueContext {
                prior_event,
                logs,
                interactive: Some(false),
            });

            let request = RemediateRequest {
                issue: issue.unwrap_or_default(),
                context: issue_context,
                session_id,
                mode,
                confidence_threshold,
                max_risk_level: max_risk,
                executed_commands: (!executed_commands.is_empty()).then_some(executed_commands),
                execute_choice: choice.map(MenuChoice::try_from).transpose()?,
            };
            run_investigate(&config, request).await
        }
        Commands::Show { session_id } => {
            let store = FileSessionStore::new(&config.session_dir);
            let session = store
                .require(&session_id)
                .await
                .with_context(|| format!("Failed to load session {session_id}"))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(())
        }
    }
}

async fn run_investigate(config: &RemediateConfig, request: RemediateRequest) -> Result<()> {
    let provider = AnthropicProvider::from_env();
    if !provider.is_configured() {
        tracing::warn!(
            "{} is not set; model calls will fail",
            remediate::ai::anthropic::API_KEY_ENV
        );
    }
    let client = KubectlClient::new()
        .with_binary(config.kubectl.clone())
        .with_kubeconfig(config.kubeconfig.clone())
        .with_context(config.kube_context.clone());
    let store = FileSessionStore::new(&config.session_dir);

    let remediator = Remediator::from_config(
        config,
        Arc::new(provider),
        Arc::new(client),
        Arc::new(store),
    )
    .context("Failed to initialize remediation engine")?;

    let response = remediator
        .handle(request)
        .await
        .context("Remediation request failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
