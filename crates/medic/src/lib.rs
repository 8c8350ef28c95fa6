//! # Medic
//!
//! AI-assisted Kubernetes incident investigation and remediation engine.
//!
//! The core is a bounded investigation loop that alternates reasoning-service
//! calls with whitelisted read-only cluster diagnostics, classifies failures
//! into actionable guidance, persists crash-safe resumable session state,
//! and gates any cluster-mutating action behind explicit risk/confidence
//! thresholds or human approval.
//!
//! ## Example
//!
//! ```rust,ignore
//! use medic::{MedicConfig, MedicEngine, MedicRequest};
//!
//! let engine = /* wire reasoning client, runners and store */;
//! let response = engine.handle(MedicRequest {
//!     issue: Some("pod stuck pending, PVC missing".to_string()),
//!     ..MedicRequest::default()
//! }).await?;
//! ```

// Error types
pub mod errors;

// Failure classification
pub mod classifier;

// Session data model
pub mod session;

// Durable session persistence
pub mod store;

// Reasoning service client
pub mod reasoning;

// Parsing of reasoning output
pub mod decision;

// Prompt composition
pub mod prompt;

// Read-only cluster inspection
pub mod inspector;

// Investigation loop controller
pub mod investigator;

// Remediation planning and execution
pub mod remediation;

// Engine facade
pub mod engine;

// Configuration
pub mod config;

// Re-export key types for convenience
pub use classifier::{classify, ClassifiedError, ErrorCategory};
pub use config::MedicConfig;
pub use engine::{MedicEngine, MedicRequest, MedicResponse};
pub use errors::{MedicError, MedicResult};
pub use inspector::{ClusterInspector, CommandOutput, CommandRunner, KubectlRunner};
pub use investigator::Investigator;
pub use reasoning::{AnthropicClient, ReasoningClient, ReasoningConfig};
pub use remediation::{CommandExecutor, KubectlExecutor, RemediationEngine};
pub use session::{
    DataRequest, ExecutionMode, Gathered, IssueContext, Iteration, RemediationAction,
    RemediationPlan, RiskLevel, SafeOperation, Session, SessionStatus, MAX_ITERATIONS,
};
pub use store::{FileSessionStore, SessionStore};
