//! The engine facade: one logical operation, invoked repeatedly to drive
//! and later execute an investigation.
//!
//! Routes fresh issues into the investigation loop, resumes persisted
//! sessions, handles execution choices, and assembles the single output
//! document callers consume.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MedicConfig;
use crate::errors::{MedicError, MedicResult};
use crate::investigator::Investigator;
use crate::remediation::{ExecutionOutcome, RemediationEngine};
use crate::session::{
    ExecutedCommand, ExecutionMode, Gathered, IssueContext, RemediationAction, RemediationPlan,
    RiskLevel, Session, SessionStatus,
};
use crate::store::{validate_session_id, SessionStore};

/// Maximum issue length accepted from callers.
const MAX_ISSUE_CHARS: usize = 2000;

/// Input document for the engine operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicRequest {
    /// Issue text, required unless resuming an existing session.
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub context: Option<IssueContext>,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// Free-form identifier, passed through untouched.
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// `1`: the engine executes the planned action itself. `2`: the caller
    /// executed externally and reports `executedCommands` for validation.
    #[serde(default)]
    pub execute_choice: Option<u8>,
    #[serde(default)]
    pub executed_commands: Vec<String>,
    #[serde(default)]
    pub max_risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

/// Investigation section of the output document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationReport {
    pub iterations: u32,
    pub data_gathered: BTreeMap<String, Gathered>,
    pub analysis_path: Vec<String>,
}

/// Analysis section of the output document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub root_cause: String,
    pub confidence: f64,
    pub factors: Vec<String>,
}

/// Remediation section of the output document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationReport {
    pub summary: String,
    pub actions: Vec<RemediationAction>,
    pub risk: RiskLevel,
}

/// The single output document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicResponse {
    pub status: SessionStatus,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    pub investigation: InvestigationReport,
    pub analysis: AnalysisReport,
    pub remediation: RemediationReport,
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ExecutedCommand>>,
    /// Set when a follow-up needs explicit human approval (unresolved
    /// validation, or a newly surfaced issue).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_approval: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_session_id: Option<String>,
}

/// Top-level engine wiring the loop controller, planner/executor and store.
pub struct MedicEngine {
    config: MedicConfig,
    store: Arc<dyn SessionStore>,
    investigator: Investigator,
    remediation: RemediationEngine,
}

impl MedicEngine {
    #[must_use]
    pub fn new(
        config: MedicConfig,
        store: Arc<dyn SessionStore>,
        investigator: Investigator,
        remediation: RemediationEngine,
    ) -> Self {
        Self {
            config,
            store,
            investigator,
            remediation,
        }
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: MedicRequest) -> MedicResult<MedicResponse> {
        self.validate_request(&request)?;

        match request.session_id.clone() {
            None => self.handle_new(request).await,
            Some(id) => {
                let session = self.store.load(&id).await?.ok_or_else(|| {
                    MedicError::validation(format!("unknown session: {id}"))
                })?;
                if request.execute_choice.is_some() || !request.executed_commands.is_empty() {
                    self.handle_execute(session, request).await
                } else {
                    self.handle_resume(session, request).await
                }
            }
        }
    }

    fn validate_request(&self, request: &MedicRequest) -> MedicResult<()> {
        match (&request.session_id, &request.issue) {
            (None, None) => {
                return Err(MedicError::validation(
                    "issue is required when no session id is given",
                ));
            }
            (None, Some(issue)) => {
                let chars = issue.trim().chars().count();
                if chars == 0 {
                    return Err(MedicError::validation("issue must not be empty"));
                }
                if chars > MAX_ISSUE_CHARS {
                    return Err(MedicError::validation(format!(
                        "issue exceeds {MAX_ISSUE_CHARS} characters"
                    )));
                }
            }
            (Some(id), _) => validate_session_id(id)?,
        }

        if let Some(choice) = request.execute_choice {
            if choice != 1 && choice != 2 {
                return Err(MedicError::validation(format!(
                    "executeChoice must be 1 or 2, got {choice}"
                )));
            }
            if choice == 2 && request.executed_commands.is_empty() {
                return Err(MedicError::validation(
                    "executeChoice 2 requires executedCommands",
                ));
            }
        }

        if let Some(threshold) = request.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) || !threshold.is_finite() {
                return Err(MedicError::validation(format!(
                    "confidenceThreshold {threshold} outside [0, 1]"
                )));
            }
        }

        Ok(())
    }

    async fn handle_new(&self, request: MedicRequest) -> MedicResult<MedicResponse> {
        let issue = request.issue.clone().unwrap_or_default();
        let mode = request.mode.unwrap_or(self.config.default_mode);
        let session = Session::new(issue.trim(), request.context.clone(), mode);
        info!(session_id = %session.id, ?mode, "Starting investigation");

        let session = self.investigator.investigate(session).await?;
        self.finalize(session, request).await
    }

    async fn handle_resume(
        &self,
        session: Session,
        request: MedicRequest,
    ) -> MedicResult<MedicResponse> {
        match session.status {
            SessionStatus::Investigating => {
                info!(session_id = %session.id, "Resuming investigation");
                let session = self.investigator.investigate(session).await?;
                self.finalize(session, request).await
            }
            SessionStatus::AnalysisComplete => self.finalize(session, request).await,
            SessionStatus::Executed | SessionStatus::Failed => {
                // Terminal: report the stored record as-is.
                let plan = session.plan.clone().unwrap_or_else(|| empty_plan(&session));
                Ok(build_response(&session, &plan, None, request.policy))
            }
        }
    }

    /// Ensure a plan exists for a finalized analysis and apply the
    /// automatic-mode policy.
    async fn finalize(
        &self,
        mut session: Session,
        request: MedicRequest,
    ) -> MedicResult<MedicResponse> {
        let plan = match session.plan.clone() {
            Some(plan) => plan,
            None => {
                let plan = self.remediation.plan(&session).await?;
                session.plan = Some(plan.clone());
                self.store.save(&session).await?;
                plan
            }
        };

        if session.mode == ExecutionMode::Automatic
            && session.status == SessionStatus::AnalysisComplete
        {
            let max_risk = request.max_risk_level.unwrap_or(self.config.max_risk_level);
            let threshold = request
                .confidence_threshold
                .unwrap_or(self.config.confidence_threshold);

            let outcome = self
                .remediation
                .run_automatic(&self.investigator, &mut session, &plan, max_risk, threshold)
                .await?;

            if outcome.executed {
                session.advance(SessionStatus::Executed)?;
            }
            self.store.save(&session).await?;
            return Ok(build_response(
                &session,
                &plan,
                Some(&outcome),
                request.policy,
            ));
        }

        Ok(build_response(&session, &plan, None, request.policy))
    }

    async fn handle_execute(
        &self,
        mut session: Session,
        request: MedicRequest,
    ) -> MedicResult<MedicResponse> {
        if session.status != SessionStatus::AnalysisComplete {
            return Err(MedicError::validation(format!(
                "session {} is {} and not awaiting an execution choice",
                session.id, session.status
            )));
        }

        let plan = match session.plan.clone() {
            Some(plan) => plan,
            None => {
                let plan = self.remediation.plan(&session).await?;
                session.plan = Some(plan.clone());
                self.store.save(&session).await?;
                plan
            }
        };

        let outcome = match request.execute_choice {
            Some(1) => {
                info!(session_id = %session.id, "Executing planned action (choice 1)");
                self.remediation
                    .run_manual_choice(&self.investigator, &mut session, &plan)
                    .await?
            }
            // Choice 2, or bare executedCommands on a resumed session.
            _ => {
                info!(session_id = %session.id, "Validating external execution (choice 2)");
                self.remediation
                    .run_external_validation(
                        &self.investigator,
                        &mut session,
                        &plan,
                        &request.executed_commands,
                    )
                    .await?
            }
        };

        session.advance(SessionStatus::Executed)?;
        self.store.save(&session).await?;

        Ok(build_response(
            &session,
            &plan,
            Some(&outcome),
            request.policy,
        ))
    }
}

/// Plan used when a terminal session carries none (failed before planning).
fn empty_plan(session: &Session) -> RemediationPlan {
    RemediationPlan {
        root_cause: session.final_analysis.clone().unwrap_or_default(),
        confidence: 0.0,
        factors: Vec::new(),
        summary: String::new(),
        actions: Vec::new(),
        resolved: None,
    }
}

fn build_response(
    session: &Session,
    plan: &RemediationPlan,
    outcome: Option<&ExecutionOutcome>,
    policy: Option<String>,
) -> MedicResponse {
    let investigation = InvestigationReport {
        iterations: session.iterations.len() as u32,
        data_gathered: session.data_gathered(),
        analysis_path: session
            .iterations
            .iter()
            .map(|i| i.analysis.clone())
            .collect(),
    };

    // When validation surfaced a distinct root cause, the response carries
    // the new issue's analysis and remediation for manual approval.
    let downgraded = outcome
        .and_then(|o| o.validation.as_ref())
        .filter(|v| v.new_root_cause.is_some());
    let report_plan = downgraded.map_or(plan, |v| &v.plan);

    let (executed, results, requires_approval, new_root_cause, validation_session_id, gate_reason) =
        match outcome {
            Some(outcome) => (
                outcome.executed,
                (!outcome.results.is_empty()).then(|| outcome.results.clone()),
                outcome
                    .validation
                    .as_ref()
                    .map(|v| !v.resolved)
                    .filter(|_| outcome.executed),
                outcome
                    .validation
                    .as_ref()
                    .and_then(|v| v.new_root_cause.clone()),
                outcome.validation.as_ref().map(|v| v.session_id.clone()),
                outcome.gate_reason.clone(),
            ),
            None => match &session.execution {
                Some(record) => (
                    true,
                    Some(record.executed_commands.clone()),
                    Some(record.requires_manual_approval),
                    record.new_root_cause.clone(),
                    record.validation_session_id.clone(),
                    None,
                ),
                None => (false, None, None, None, None, None),
            },
        };

    MedicResponse {
        status: session.status,
        session_id: session.id.clone(),
        policy,
        investigation,
        analysis: AnalysisReport {
            root_cause: report_plan.root_cause.clone(),
            confidence: report_plan.confidence,
            factors: report_plan.factors.clone(),
        },
        remediation: RemediationReport {
            summary: report_plan.summary.clone(),
            actions: report_plan.actions.clone(),
            risk: report_plan.aggregate_risk(),
        },
        executed,
        results,
        requires_approval,
        new_root_cause,
        gate_reason,
        validation_session_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(issue: Option<&str>, session_id: Option<&str>) -> MedicRequest {
        MedicRequest {
            issue: issue.map(str::to_string),
            session_id: session_id.map(str::to_string),
            ..MedicRequest::default()
        }
    }

    fn engine_for_validation() -> MedicEngine {
        use crate::inspector::{ClusterInspector, KubectlRunner};
        use crate::reasoning::{AnthropicClient, ReasoningConfig};
        use crate::remediation::KubectlExecutor;
        use crate::store::FileSessionStore;

        let store: Arc<dyn SessionStore> =
            Arc::new(FileSessionStore::new(std::env::temp_dir().join("medic-test")));
        let reasoning: Arc<dyn crate::reasoning::ReasoningClient> = Arc::new(
            AnthropicClient::new(ReasoningConfig::default(), "test-key").unwrap(),
        );
        MedicEngine::new(
            MedicConfig::default(),
            store.clone(),
            Investigator::new(
                reasoning.clone(),
                ClusterInspector::new(Arc::new(KubectlRunner::default())),
                store,
            ),
            RemediationEngine::new(reasoning, Arc::new(KubectlExecutor::default())),
        )
    }

    #[test]
    fn empty_issue_is_rejected() {
        let engine = engine_for_validation();
        assert!(engine.validate_request(&request(Some("   "), None)).is_err());
        assert!(engine.validate_request(&request(None, None)).is_err());
        assert!(engine
            .validate_request(&request(Some("pod stuck pending"), None))
            .is_ok());
    }

    #[test]
    fn oversized_issue_is_rejected() {
        let engine = engine_for_validation();
        let long = "x".repeat(2001);
        assert!(engine.validate_request(&request(Some(&long), None)).is_err());
    }

    #[test]
    fn execute_choice_must_be_one_or_two() {
        let engine = engine_for_validation();
        let mut req = request(None, Some("med-12345678"));
        req.execute_choice = Some(3);
        assert!(engine.validate_request(&req).is_err());

        req.execute_choice = Some(2);
        assert!(engine.validate_request(&req).is_err(), "choice 2 needs commands");

        req.executed_commands = vec!["kubectl apply -f pvc.yaml".to_string()];
        assert!(engine.validate_request(&req).is_ok());
    }

    #[test]
    fn threshold_range_is_enforced() {
        let engine = engine_for_validation();
        let mut req = request(Some("issue"), None);
        req.confidence_threshold = Some(1.2);
        assert!(engine.validate_request(&req).is_err());
        req.confidence_threshold = Some(0.7);
        assert!(engine.validate_request(&req).is_ok());
    }

    #[test]
    fn request_parses_camel_case_documents() {
        let req: MedicRequest = serde_json::from_str(
            r#"{
                "issue": "pod stuck pending, PVC missing",
                "mode": "automatic",
                "maxRiskLevel": "low",
                "confidenceThreshold": 0.7,
                "executedCommands": []
            }"#,
        )
        .unwrap();
        assert_eq!(req.mode, Some(ExecutionMode::Automatic));
        assert_eq!(req.max_risk_level, Some(RiskLevel::Low));
    }
}
