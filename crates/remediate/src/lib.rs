#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_self)]
#![allow(clippy::map_unwrap_or)]

//! # Remediate
//!
//! AI-directed diagnosis and remediation of Kubernetes issues.
//!
//! This crate provides:
//! - A bounded investigation loop in which a model proposes read-only cluster
//!   queries and converges on a root cause
//! - A safety validator that every cluster-facing call passes through
//! - Context budgeting so long investigations fit the model's window
//! - A pure decision engine gating execution on confidence, risk and mode
//! - Sequential, continue-on-error execution with follow-up validation
//! - Atomic file-based session persistence
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use remediate::{
//!     AnthropicProvider, FileSessionStore, KubectlClient, RemediateConfig,
//!     RemediateRequest, Remediator,
//! };
//!
//! let config = RemediateConfig::load(None)?;
//! let remediator = Remediator::from_config(
//!     &config,
//!     Arc::new(AnthropicProvider::from_env()),
//!     Arc::new(KubectlClient::new()),
//!     Arc::new(FileSessionStore::new(&config.session_dir)),
//! )?;
//!
//! let response = remediator
//!     .handle(RemediateRequest::new("pods in namespace shop are Pending"))
//!     .await?;
//! ```

// Error types
pub mod errors;

// Configuration
pub mod config;

// Session records
pub mod session;

// Safety gate
pub mod safety;

// Cluster access
pub mod cluster;

// Context budgeting
pub mod budget;

// Storage layer
pub mod storage;

// Model backend
pub mod ai;

// Engine
pub mod decision;
pub mod execution;
pub mod investigation;
pub mod remediate;

// Re-export key types for convenience
pub use ai::{AIProvider, AnthropicProvider};
pub use cluster::{ClusterClient, KubectlClient};
pub use config::RemediateConfig;
pub use decision::{decide, Decision, DecisionPolicy, MenuChoice};
pub use errors::{RemediateError, RemediateResult};
pub use remediate::{RemediateRequest, RemediateResponse, Remediator, ResponseStatus};
pub use session::{InvestigationSession, SessionStatus};
pub use storage::{FileSessionStore, MemorySessionStore, SessionStore};
