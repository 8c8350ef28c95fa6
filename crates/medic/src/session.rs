//! Session data model: the durable record of one investigation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifiedError;
use crate::errors::{MedicError, MedicResult};

/// Fixed iteration cap. Not tunable per deployment, so worst-case cost and
/// latency stay deterministic.
pub const MAX_ITERATIONS: usize = 20;

const SAFE_OPERATION_VARIANTS: &[&str] = &["get", "describe", "logs", "events", "top"];

/// The whitelist of permitted read-only diagnostic operation types.
///
/// Anything else is invalid by construction and never reaches the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeOperation {
    Get,
    Describe,
    Logs,
    Events,
    Top,
}

impl SafeOperation {
    /// Parse an operation type, ignoring case. Returns `None` for anything
    /// outside the whitelist.
    #[must_use]
    pub fn from_str_ci(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "get" => Some(Self::Get),
            "describe" => Some(Self::Describe),
            "logs" => Some(Self::Logs),
            "events" => Some(Self::Events),
            "top" => Some(Self::Top),
            _ => None,
        }
    }

    /// Whether this operation is dispatched with machine-parseable output.
    /// `describe`, `logs` and `top` only produce plain text.
    #[must_use]
    pub fn structured_output(self) -> bool {
        matches!(self, Self::Get | Self::Events)
    }
}

impl std::fmt::Display for SafeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Describe => write!(f, "describe"),
            Self::Logs => write!(f, "logs"),
            Self::Events => write!(f, "events"),
            Self::Top => write!(f, "top"),
        }
    }
}

impl<'de> Deserialize<'de> for SafeOperation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        SafeOperation::from_str_ci(&value)
            .ok_or_else(|| serde::de::Error::unknown_variant(&value, SAFE_OPERATION_VARIANTS))
    }
}

/// One proposed read-only diagnostic operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    #[serde(rename = "type")]
    pub op: SafeOperation,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

impl DataRequest {
    /// Normalized `{type}_{resource}` key under which gathered output is
    /// recorded for this request.
    #[must_use]
    pub fn key(&self) -> String {
        normalized_key(&self.op.to_string(), &self.resource)
    }
}

/// Normalize an operation/resource pair into a stable map key.
#[must_use]
pub fn normalized_key(op: &str, resource: &str) -> String {
    let resource: String = resource
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let resource = if resource.is_empty() {
        "unspecified".to_string()
    } else {
        resource
    };
    format!("{}_{}", op.trim().to_lowercase(), resource)
}

/// Outcome of gathering data for one request: raw text, or the classified
/// failure that took its place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Gathered {
    Success {
        output: String,
    },
    Failed {
        #[serde(flatten)]
        error: ClassifiedError,
    },
}

impl Gathered {
    /// Render for inclusion in the next iteration's prompt context.
    #[must_use]
    pub fn as_context(&self) -> String {
        match self {
            Self::Success { output } => output.clone(),
            Self::Failed { error } => {
                format!("ERROR [{}]: {}", error.category, error.enhanced_message)
            }
        }
    }
}

/// One pass of the investigation loop. Append-only: never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    /// 1-based step number.
    pub step: u32,
    /// The reasoning service's free-text analysis for this step.
    pub analysis: String,
    /// Data requests the step proposed (valid ones only).
    pub data_requests: Vec<DataRequest>,
    /// Gathered output keyed by normalized `{type}_{resource}`.
    pub data_gathered: BTreeMap<String, Gathered>,
    /// Whether the reasoning step declared the investigation complete.
    pub complete: bool,
    pub timestamp: DateTime<Utc>,
}

/// Session lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Investigating,
    AnalysisComplete,
    Executed,
    Failed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Investigating => 0,
            Self::AnalysisComplete => 1,
            Self::Executed | Self::Failed => 2,
        }
    }

    /// Whether a transition to `next` moves the lifecycle forward.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Investigating => write!(f, "investigating"),
            Self::AnalysisComplete => write!(f, "analysis_complete"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Manual or automatic execution policy for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Automatic,
}

impl ExecutionMode {
    /// Parse a mode, ignoring case. Empty input falls back to manual.
    #[must_use]
    pub fn from_str_ci(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "manual" => Some(Self::Manual),
            "automatic" | "auto" => Some(Self::Automatic),
            _ => None,
        }
    }
}

/// Planner-assigned severity of a proposed mutating action.
///
/// Variant order gives `low < medium < high`; the execution gate compares
/// inclusively.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parse a risk level, ignoring case.
    #[must_use]
    pub fn from_str_ci(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// One proposed mutating remediation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationAction {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub risk: RiskLevel,
    #[serde(default)]
    pub rationale: String,
}

/// Structured remediation plan derived from the finalized analysis.
/// Actions are ordered highest priority first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPlan {
    pub root_cause: String,
    pub confidence: f64,
    #[serde(default)]
    pub factors: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub actions: Vec<RemediationAction>,
    /// Only present on validation-run plans: whether the original issue is
    /// resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
}

impl RemediationPlan {
    /// Highest risk across all proposed actions.
    #[must_use]
    pub fn aggregate_risk(&self) -> RiskLevel {
        self.actions
            .iter()
            .map(|a| a.risk)
            .max()
            .unwrap_or_default()
    }
}

/// A command that was run (by the engine or reported by the caller).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedCommand {
    pub command: String,
    pub output: String,
    pub success: bool,
}

/// Record of a completed execution phase, attached to the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub executed_commands: Vec<ExecutedCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_session_id: Option<String>,
    /// Set when the validation run surfaced an unresolved or new issue that
    /// must not be auto-executed.
    pub requires_manual_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_root_cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Structured hints supplied alongside the issue text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_events: Vec<String>,
}

impl IssueContext {
    /// Whether any hint is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event.is_none()
            && self.logs.is_none()
            && self.metrics.is_none()
            && self.pod_spec.is_none()
            && self.related_events.is_empty()
    }
}

/// The durable record of one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<IssueContext>,
    pub mode: ExecutionMode,
    pub iterations: Vec<Iteration>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<RemediationPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session with a generated id.
    #[must_use]
    pub fn new(issue: impl Into<String>, context: Option<IssueContext>, mode: ExecutionMode) -> Self {
        let uid = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let now = Utc::now();
        Self {
            id: format!("med-{uid}"),
            issue: issue.into(),
            context: context.filter(|c| !c.is_empty()),
            mode,
            iterations: Vec::new(),
            status: SessionStatus::Investigating,
            final_analysis: None,
            plan: None,
            execution: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a completed iteration and bump the update timestamp.
    pub fn push_iteration(&mut self, iteration: Iteration) {
        self.iterations.push(iteration);
        self.updated_at = Utc::now();
    }

    /// Advance the lifecycle. Backward transitions are rejected.
    pub fn advance(&mut self, next: SessionStatus) -> MedicResult<()> {
        if !self.status.can_advance_to(next) {
            return Err(MedicError::validation(format!(
                "session {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Last non-empty analysis across all iterations, used as the capped
    /// best-effort result when the loop exhausts its budget.
    #[must_use]
    pub fn last_analysis(&self) -> Option<&str> {
        self.iterations
            .iter()
            .rev()
            .map(|i| i.analysis.as_str())
            .find(|a| !a.trim().is_empty())
    }

    /// Merged view of everything gathered so far, later steps overriding
    /// earlier ones for the same key.
    #[must_use]
    pub fn data_gathered(&self) -> BTreeMap<String, Gathered> {
        let mut merged = BTreeMap::new();
        for iteration in &self.iterations {
            for (key, value) in &iteration.data_gathered {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}
