//! Error types for the investigation and remediation engine.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type MedicResult<T> = Result<T, MedicError>;

/// Engine errors.
///
/// Fatality is decided once, on the variant, never by inspecting message
/// contents downstream. Recoverable variants are consumed inside the
/// investigation loop (a failed reasoning call or cluster command becomes
/// data for the next step); fatal variants propagate to the caller.
#[derive(Debug, Error)]
pub enum MedicError {
    /// Malformed caller input, rejected before any loop work begins.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The reasoning step concluded remediation is impossible with the
    /// operations available. Always propagated, never downgraded.
    #[error("capability gap: {reason}")]
    CapabilityGap { reason: String },

    /// Session storage is unusable. Fatal: without durable state the loop
    /// cannot guarantee crash-safe resumption.
    #[error("session storage error at {path}: {reason}")]
    Storage { path: String, reason: String },

    /// The reasoning service call itself failed (transport, timeout, API
    /// error). Recovered inside the loop as an inconclusive step.
    #[error("reasoning service error: {0}")]
    Reasoning(String),

    /// A mutating command could not be spawned or completed.
    #[error("command execution error: {0}")]
    Execution(String),

    /// A session record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MedicError {
    /// Shorthand for a validation failure.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the current operation entirely.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::CapabilityGap { .. }
                | Self::Storage { .. }
                | Self::Serialization(_)
        )
    }
}
