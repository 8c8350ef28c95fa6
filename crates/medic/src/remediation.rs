//! Remediation planning and dual-mode execution.
//!
//! The planner turns a finalized analysis into a structured plan; the
//! executor runs planner-authored kubectl commands only, gated in automatic
//! mode by inclusive risk and confidence thresholds. Every execution is
//! followed by a bounded validation sub-investigation, and a validation run
//! that surfaces a new, distinct root cause forces manual approval instead
//! of chaining another automatic repair.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{info, warn};

use crate::decision::parse_plan;
use crate::errors::{MedicError, MedicResult};
use crate::investigator::Investigator;
use crate::prompt::{planning_prompt, validation_issue};
use crate::reasoning::ReasoningClient;
use crate::session::{
    ExecutedCommand, ExecutionMode, ExecutionRecord, RemediationAction, RemediationPlan,
    RiskLevel, Session,
};

/// Runner for mutating commands. Only ever invoked with planner-authored
/// commands from the finalized analysis.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> MedicResult<ExecutedCommand>;
}

/// Executor shelling out to kubectl. Anything that is not a kubectl
/// invocation is rejected before spawning.
pub struct KubectlExecutor {
    kubectl: String,
    timeout: Duration,
}

impl KubectlExecutor {
    #[must_use]
    pub fn new(kubectl: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kubectl: kubectl.into(),
            timeout,
        }
    }
}

impl Default for KubectlExecutor {
    fn default() -> Self {
        Self::new("kubectl", Duration::from_secs(60))
    }
}

#[async_trait]
impl CommandExecutor for KubectlExecutor {
    async fn execute(&self, command: &str) -> MedicResult<ExecutedCommand> {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        match tokens.first() {
            Some(&"kubectl") => {}
            _ => {
                return Err(MedicError::validation(format!(
                    "refusing non-kubectl remediation command: {command:?}"
                )));
            }
        }

        info!(command = %command, "Executing remediation command");

        let child = Command::new(&self.kubectl)
            .args(&tokens[1..])
            .stdin(Stdio::null())
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Ok(ExecutedCommand {
                    command: command.to_string(),
                    output: format!("timed out after {}s", self.timeout.as_secs()),
                    success: false,
                });
            }
            Ok(Err(e)) => {
                return Err(MedicError::Execution(format!(
                    "failed to spawn {}: {e}",
                    self.kubectl
                )));
            }
            Ok(Ok(output)) => output,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(ExecutedCommand {
            command: command.to_string(),
            output: text,
            success: output.status.success(),
        })
    }
}

/// Whether an action may execute automatically under the caller's limits.
/// Both comparisons are inclusive.
#[must_use]
pub fn authorized_automatically(
    action_risk: RiskLevel,
    confidence: f64,
    max_risk: RiskLevel,
    confidence_threshold: f64,
) -> bool {
    action_risk <= max_risk && confidence >= confidence_threshold
}

fn normalize_root_cause(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

/// Outcome of a post-execution validation run.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub session_id: String,
    pub resolved: bool,
    /// Present when validation surfaced a distinct root cause; the new
    /// issue requires manual approval.
    pub new_root_cause: Option<String>,
    /// The validation run's plan, presented to the caller for the follow-up
    /// decision.
    pub plan: RemediationPlan,
}

/// Outcome of an execution attempt (manual choice or automatic).
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub executed: bool,
    /// Why automatic execution was withheld, when it was.
    pub gate_reason: Option<String>,
    pub results: Vec<ExecutedCommand>,
    pub validation: Option<ValidationOutcome>,
}

/// Plans remediations and runs the dual-mode executor.
pub struct RemediationEngine {
    reasoning: Arc<dyn ReasoningClient>,
    executor: Arc<dyn CommandExecutor>,
}

impl RemediationEngine {
    #[must_use]
    pub fn new(reasoning: Arc<dyn ReasoningClient>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            reasoning,
            executor,
        }
    }

    /// Derive the structured plan from a finalized investigation.
    pub async fn plan(&self, session: &Session) -> MedicResult<RemediationPlan> {
        let final_analysis = session.final_analysis.as_deref().ok_or_else(|| {
            MedicError::validation(format!(
                "session {} has no finalized analysis to plan from",
                session.id
            ))
        })?;

        let prompt = planning_prompt(session, final_analysis, false);
        let response = self.reasoning.complete(&prompt).await?;
        let plan = parse_plan(&response)?;

        info!(
            session_id = %session.id,
            actions = plan.actions.len(),
            risk = %plan.aggregate_risk(),
            confidence = plan.confidence,
            "Planned remediation"
        );
        Ok(plan)
    }

    /// Derive the resolution verdict from a finalized validation run.
    pub async fn plan_validation(&self, session: &Session) -> MedicResult<RemediationPlan> {
        let final_analysis = session.final_analysis.as_deref().unwrap_or_default();
        let prompt = planning_prompt(session, final_analysis, true);
        let response = self.reasoning.complete(&prompt).await?;
        parse_plan(&response)
    }

    /// Execute one planner-authored action.
    pub async fn execute_action(&self, action: &RemediationAction) -> MedicResult<ExecutedCommand> {
        let command = action.command.as_deref().ok_or_else(|| {
            MedicError::validation(format!(
                "action {:?} has no executable command",
                action.description
            ))
        })?;
        self.executor.execute(command).await
    }

    /// Run the validation sub-investigation for a set of executed commands
    /// and decide whether the issue is resolved or a new one surfaced.
    pub async fn validate(
        &self,
        investigator: &Investigator,
        parent: &Session,
        original_plan: &RemediationPlan,
        executed: &[ExecutedCommand],
    ) -> MedicResult<ValidationOutcome> {
        let issue = validation_issue(&parent.issue, executed);
        let vsession = Session::new(issue, None, ExecutionMode::Manual);
        let vsession = investigator.investigate(vsession).await?;
        let vplan = self.plan_validation(&vsession).await?;

        let resolved = vplan.resolved.unwrap_or(false);
        let original = normalize_root_cause(&original_plan.root_cause);
        let found = normalize_root_cause(&vplan.root_cause);
        let new_root_cause = if !resolved && !found.is_empty() && found != original {
            warn!(
                session_id = %parent.id,
                validation_session_id = %vsession.id,
                new_root_cause = %vplan.root_cause,
                "Validation surfaced a distinct root cause; forcing manual approval"
            );
            Some(vplan.root_cause.clone())
        } else {
            None
        };

        Ok(ValidationOutcome {
            session_id: vsession.id,
            resolved,
            new_root_cause,
            plan: vplan,
        })
    }

    /// Automatic mode: execute the single highest-priority action iff the
    /// risk and confidence gate passes, then validate. Never executes a
    /// second time, whatever validation finds.
    pub async fn run_automatic(
        &self,
        investigator: &Investigator,
        session: &mut Session,
        plan: &RemediationPlan,
        max_risk: RiskLevel,
        confidence_threshold: f64,
    ) -> MedicResult<ExecutionOutcome> {
        let Some(action) = plan.actions.first() else {
            return Ok(ExecutionOutcome {
                executed: false,
                gate_reason: Some("the plan proposed no executable actions".to_string()),
                results: Vec::new(),
                validation: None,
            });
        };

        if !authorized_automatically(action.risk, plan.confidence, max_risk, confidence_threshold)
        {
            let reason = format!(
                "automatic execution withheld: action risk {} vs limit {}, confidence {:.2} vs threshold {:.2}",
                action.risk, max_risk, plan.confidence, confidence_threshold
            );
            info!(session_id = %session.id, %reason, "Falling back to manual approval");
            return Ok(ExecutionOutcome {
                executed: false,
                gate_reason: Some(reason),
                results: Vec::new(),
                validation: None,
            });
        }

        let result = self.execute_action(action).await?;
        let results = vec![result];

        let validation = self
            .validate(investigator, session, plan, &results)
            .await?;

        session.execution = Some(ExecutionRecord {
            executed_commands: results.clone(),
            validation_session_id: Some(validation.session_id.clone()),
            requires_manual_approval: !validation.resolved,
            new_root_cause: validation.new_root_cause.clone(),
            timestamp: Utc::now(),
        });

        Ok(ExecutionOutcome {
            executed: true,
            gate_reason: None,
            results,
            validation: Some(validation),
        })
    }

    /// Manual mode, choice 1: the engine executes the highest-priority
    /// action itself, then validates.
    pub async fn run_manual_choice(
        &self,
        investigator: &Investigator,
        session: &mut Session,
        plan: &RemediationPlan,
    ) -> MedicResult<ExecutionOutcome> {
        let action = plan
            .actions
            .iter()
            .find(|a| a.command.is_some())
            .ok_or_else(|| {
                MedicError::validation(format!(
                    "session {} has no action with an executable command",
                    session.id
                ))
            })?;

        let result = self.execute_action(action).await?;
        let results = vec![result];

        let validation = self
            .validate(investigator, session, plan, &results)
            .await?;

        session.execution = Some(ExecutionRecord {
            executed_commands: results.clone(),
            validation_session_id: Some(validation.session_id.clone()),
            requires_manual_approval: !validation.resolved,
            new_root_cause: validation.new_root_cause.clone(),
            timestamp: Utc::now(),
        });

        Ok(ExecutionOutcome {
            executed: true,
            gate_reason: None,
            results,
            validation: Some(validation),
        })
    }

    /// Manual mode, choice 2: the caller executed externally; record the
    /// reported commands and run the validation-only investigation.
    pub async fn run_external_validation(
        &self,
        investigator: &Investigator,
        session: &mut Session,
        plan: &RemediationPlan,
        executed_commands: &[String],
    ) -> MedicResult<ExecutionOutcome> {
        if executed_commands.is_empty() {
            return Err(MedicError::validation(
                "external execution reported no commands to validate",
            ));
        }

        let results: Vec<ExecutedCommand> = executed_commands
            .iter()
            .map(|c| ExecutedCommand {
                command: c.clone(),
                output: "(executed externally by the caller)".to_string(),
                success: true,
            })
            .collect();

        let validation = self
            .validate(investigator, session, plan, &results)
            .await?;

        session.execution = Some(ExecutionRecord {
            executed_commands: results.clone(),
            validation_session_id: Some(validation.session_id.clone()),
            requires_manual_approval: !validation.resolved,
            new_root_cause: validation.new_root_cause.clone(),
            timestamp: Utc::now(),
        });

        Ok(ExecutionOutcome {
            executed: true,
            gate_reason: None,
            results,
            validation: Some(validation),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_is_inclusive_on_both_limits() {
        // Exactly at the limits: authorized.
        assert!(authorized_automatically(
            RiskLevel::Low,
            0.8,
            RiskLevel::Low,
            0.8
        ));
        assert!(authorized_automatically(
            RiskLevel::Medium,
            0.9,
            RiskLevel::Medium,
            0.8
        ));
    }

    #[test]
    fn gate_truth_table() {
        let risks = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];
        for action_risk in risks {
            for max_risk in risks {
                for (confidence, threshold) in
                    [(0.5, 0.8), (0.8, 0.8), (0.95, 0.8), (0.79, 0.8)]
                {
                    let expected = action_risk <= max_risk && confidence >= threshold;
                    assert_eq!(
                        authorized_automatically(action_risk, confidence, max_risk, threshold),
                        expected,
                        "risk {action_risk} vs {max_risk}, confidence {confidence} vs {threshold}"
                    );
                }
            }
        }
    }

    #[test]
    fn root_cause_comparison_normalizes_case_and_whitespace() {
        assert_eq!(
            normalize_root_cause("PVC  data-claim   is missing."),
            normalize_root_cause("pvc data-claim is missing")
        );
        assert_ne!(
            normalize_root_cause("PVC data-claim is missing"),
            normalize_root_cause("node disk pressure is evicting pods")
        );
    }

    #[tokio::test]
    async fn executor_refuses_non_kubectl_commands() {
        let executor = KubectlExecutor::default();
        let err = executor.execute("rm -rf /var/lib").await.unwrap_err();
        assert!(matches!(err, MedicError::Validation { .. }));

        let err = executor.execute("").await.unwrap_err();
        assert!(matches!(err, MedicError::Validation { .. }));
    }
}
