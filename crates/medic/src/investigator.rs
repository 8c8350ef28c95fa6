//! The bounded investigation loop.
//!
//! Alternates reasoning calls with whitelisted cluster inspections, appends
//! one iteration per pass, and persists the session after every step so a
//! crash loses at most the in-flight iteration. Malformed reasoning output
//! and individual command failures are always recovered locally; only
//! capability gaps and storage failures abort the loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::classifier::classify;
use crate::decision::{parse_step, ParsedStep, StepDecision};
use crate::errors::{MedicError, MedicResult};
use crate::inspector::ClusterInspector;
use crate::prompt::investigation_prompt;
use crate::reasoning::ReasoningClient;
use crate::session::{Gathered, Iteration, Session, SessionStatus, MAX_ITERATIONS};
use crate::store::SessionStore;

/// Orchestrates reasoning and inspection across bounded iterations.
pub struct Investigator {
    reasoning: Arc<dyn ReasoningClient>,
    inspector: ClusterInspector,
    store: Arc<dyn SessionStore>,
}

impl Investigator {
    #[must_use]
    pub fn new(
        reasoning: Arc<dyn ReasoningClient>,
        inspector: ClusterInspector,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            reasoning,
            inspector,
            store,
        }
    }

    /// Drive the session to a finalized state.
    ///
    /// Resumes at `len(iterations) + 1` for an existing session. Returns
    /// the session with status `analysis_complete` (possibly as a capped,
    /// best-effort result) or propagates a fatal error after persisting the
    /// session as `failed` where possible.
    pub async fn investigate(&self, mut session: Session) -> MedicResult<Session> {
        if session.status != SessionStatus::Investigating {
            return Ok(session);
        }

        let mut step = session.iterations.len() + 1;
        while step <= MAX_ITERATIONS {
            let prompt = investigation_prompt(&session);

            let parsed = match self.reasoning.complete(&prompt).await {
                Ok(text) => parse_step(&text),
                Err(e) => {
                    // A hard service failure consumes one iteration, same
                    // as any classified infrastructure error.
                    let classified = classify(&e.to_string());
                    warn!(session_id = %session.id, step, error = %e, "Reasoning call failed");
                    ParsedStep::Inconclusive {
                        reason: format!(
                            "Reasoning service unavailable this step. {}",
                            classified.enhanced_message
                        ),
                    }
                }
            };

            match parsed {
                ParsedStep::Inconclusive { reason } => {
                    info!(session_id = %session.id, step, "Inconclusive step");
                    session.push_iteration(Iteration {
                        step: step as u32,
                        analysis: reason,
                        data_requests: Vec::new(),
                        data_gathered: BTreeMap::new(),
                        complete: false,
                        timestamp: Utc::now(),
                    });
                    self.store.save(&session).await?;
                }
                ParsedStep::Decision(decision) => {
                    let done = self.apply_decision(&mut session, step, decision).await?;
                    if done {
                        return Ok(session);
                    }
                }
            }

            step += 1;
        }

        // Budget exhausted: a capped, best-effort result, not an error.
        info!(session_id = %session.id, "Iteration cap reached, finalizing with last analysis");
        session.final_analysis = Some(
            session
                .last_analysis()
                .unwrap_or("Investigation exhausted its iteration budget without a conclusive analysis.")
                .to_string(),
        );
        session.advance(SessionStatus::AnalysisComplete)?;
        self.store.save(&session).await?;
        Ok(session)
    }

    /// Gather data for one validated decision and record the iteration.
    /// Returns `true` when the investigation finished on this step.
    async fn apply_decision(
        &self,
        session: &mut Session,
        step: usize,
        decision: StepDecision,
    ) -> MedicResult<bool> {
        let mut gathered = BTreeMap::new();

        for (key, error) in decision.rejected {
            warn!(session_id = %session.id, step, key = %key, "Rejected data request");
            gathered.insert(key, Gathered::Failed { error });
        }

        // Strictly sequential: ordering of gathered data matches request
        // order, and iteration n+1's prompt depends on everything here.
        for request in &decision.requests {
            let outcome = match self.inspector.inspect(request).await {
                Ok(output) => Gathered::Success { output },
                Err(error) => Gathered::Failed { error },
            };
            gathered.insert(request.key(), outcome);
        }

        info!(
            session_id = %session.id,
            step,
            requests = decision.requests.len(),
            complete = decision.complete,
            confidence = decision.confidence,
            "Recorded iteration"
        );

        session.push_iteration(Iteration {
            step: step as u32,
            analysis: decision.analysis.clone(),
            data_requests: decision.requests,
            data_gathered: gathered,
            complete: decision.complete,
            timestamp: Utc::now(),
        });

        if decision.capability_gap {
            session.final_analysis = Some(decision.analysis.clone());
            session.advance(SessionStatus::Failed)?;
            self.store.save(session).await?;
            return Err(MedicError::CapabilityGap {
                reason: decision.analysis,
            });
        }

        if decision.complete {
            session.final_analysis = Some(decision.analysis);
            session.advance(SessionStatus::AnalysisComplete)?;
        }
        self.store.save(session).await?;

        Ok(decision.complete)
    }
}
