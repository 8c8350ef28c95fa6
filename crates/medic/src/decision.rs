//! Parsing and validation of reasoning-service output.
//!
//! The parse result is a tagged outcome: either a fully-validated structured
//! decision or an explicit inconclusive marker. Every field's type and range
//! is checked before it is trusted; a missing or garbled field never
//! propagates silently.

use serde::Deserialize;
use serde_json::Value;

use crate::classifier::{ClassifiedError, ErrorCategory};
use crate::errors::{MedicError, MedicResult};
use crate::session::{normalized_key, DataRequest, RemediationPlan, SafeOperation};

/// A validated per-step decision from the reasoning service.
#[derive(Debug, Clone)]
pub struct StepDecision {
    pub analysis: String,
    /// Requests that passed validation and may be dispatched.
    pub requests: Vec<DataRequest>,
    /// Requests rejected before dispatch, keyed like gathered data, with the
    /// classified validation error recorded in their place.
    pub rejected: Vec<(String, ClassifiedError)>,
    pub complete: bool,
    pub confidence: f64,
    pub reasoning: String,
    /// Set when the reasoning step concluded that no available safe
    /// operation can resolve the issue.
    pub capability_gap: bool,
}

/// Tagged outcome of parsing one reasoning response.
#[derive(Debug, Clone)]
pub enum ParsedStep {
    Decision(StepDecision),
    Inconclusive { reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDecision {
    analysis: String,
    #[serde(default)]
    data_requests: Vec<Value>,
    investigation_complete: bool,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    capability_gap: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    #[serde(rename = "type")]
    op: String,
    #[serde(default)]
    resource: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    rationale: String,
}

/// Extract the JSON object from a response that may wrap it in markdown
/// fences or surrounding prose.
fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();

    let candidate = if trimmed.starts_with("```json") {
        trimmed
            .strip_prefix("```json")
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim()
    } else if trimmed.starts_with("```") {
        trimmed
            .strip_prefix("```")
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim()
    } else {
        trimmed
    };

    if candidate.starts_with('{') && serde_json::from_str::<Value>(candidate).is_ok() {
        return Some(candidate.to_string());
    }

    // Prose around the object: take the outermost brace span that parses.
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    let span = &candidate[start..=end];
    serde_json::from_str::<Value>(span).ok()?;
    Some(span.to_string())
}

fn reject_request(op: &str, resource: &str, message: String) -> (String, ClassifiedError) {
    (
        normalized_key(op, resource),
        ClassifiedError {
            category: ErrorCategory::Unknown,
            enhanced_message: message,
        },
    )
}

/// Parse one reasoning response into a tagged step outcome.
///
/// A structurally invalid response (no JSON object, missing fields,
/// confidence outside [0, 1]) voids the whole step. A valid decision that
/// carries individual requests outside the whitelist has those requests
/// rejected pre-dispatch and recorded alongside the valid ones.
#[must_use]
pub fn parse_step(text: &str) -> ParsedStep {
    let Some(json) = extract_json(text) else {
        return ParsedStep::Inconclusive {
            reason: "reasoning response contained no parseable JSON decision".to_string(),
        };
    };

    let raw: RawDecision = match serde_json::from_str(&json) {
        Ok(raw) => raw,
        Err(e) => {
            return ParsedStep::Inconclusive {
                reason: format!("reasoning decision failed validation: {e}"),
            };
        }
    };

    if !(0.0..=1.0).contains(&raw.confidence) || !raw.confidence.is_finite() {
        return ParsedStep::Inconclusive {
            reason: format!(
                "reasoning decision reported confidence {} outside [0, 1]",
                raw.confidence
            ),
        };
    }

    let mut requests = Vec::new();
    let mut rejected = Vec::new();
    for value in raw.data_requests {
        let parsed: RawRequest = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                rejected.push(reject_request(
                    "invalid",
                    "request",
                    format!("malformed data request was not executed: {e}"),
                ));
                continue;
            }
        };

        let Some(op) = SafeOperation::from_str_ci(&parsed.op) else {
            rejected.push(reject_request(
                &parsed.op,
                &parsed.resource,
                format!(
                    "operation type {:?} is not in the read-only whitelist (get, describe, \
                     logs, events, top); the request was rejected before dispatch",
                    parsed.op
                ),
            ));
            continue;
        };

        if parsed.resource.trim().is_empty() {
            rejected.push(reject_request(
                &parsed.op,
                "",
                format!("{op} request named no resource and was not executed"),
            ));
            continue;
        }

        requests.push(DataRequest {
            op,
            resource: parsed.resource.trim().to_string(),
            namespace: parsed
                .namespace
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            rationale: parsed.rationale,
        });
    }

    ParsedStep::Decision(StepDecision {
        analysis: raw.analysis,
        requests,
        rejected,
        complete: raw.investigation_complete,
        confidence: raw.confidence,
        reasoning: raw.reasoning,
        capability_gap: raw.capability_gap,
    })
}

/// Parse a planner response into a validated remediation plan.
///
/// Unlike per-step decisions, the planner runs outside the iteration budget,
/// so a malformed plan is surfaced to the caller instead of being absorbed.
pub fn parse_plan(text: &str) -> MedicResult<RemediationPlan> {
    let json = extract_json(text).ok_or_else(|| {
        MedicError::Reasoning("planner response contained no parseable JSON plan".to_string())
    })?;

    let plan: RemediationPlan = serde_json::from_str(&json)
        .map_err(|e| MedicError::Reasoning(format!("planner returned a malformed plan: {e}")))?;

    if !(0.0..=1.0).contains(&plan.confidence) || !plan.confidence.is_finite() {
        return Err(MedicError::Reasoning(format!(
            "planner reported confidence {} outside [0, 1]",
            plan.confidence
        )));
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"{
        "analysis": "The pod references a PVC that does not exist",
        "dataRequests": [
            {"type": "get", "resource": "pvc data-claim", "namespace": "default", "rationale": "confirm the claim is missing"}
        ],
        "investigationComplete": false,
        "confidence": 0.7,
        "reasoning": "scheduling events point at an unbound claim"
    }"#;

    #[test]
    fn parses_a_plain_json_decision() {
        let ParsedStep::Decision(d) = parse_step(WELL_FORMED) else {
            panic!("expected a decision");
        };
        assert_eq!(d.requests.len(), 1);
        assert_eq!(d.requests[0].op, SafeOperation::Get);
        assert_eq!(d.requests[0].namespace.as_deref(), Some("default"));
        assert!(!d.complete);
        assert!(d.rejected.is_empty());
        assert!(!d.capability_gap);
    }

    #[test]
    fn parses_a_fenced_decision() {
        let fenced = format!("```json\n{WELL_FORMED}\n```");
        assert!(matches!(parse_step(&fenced), ParsedStep::Decision(_)));
    }

    #[test]
    fn parses_a_decision_embedded_in_prose() {
        let wrapped = format!("Here is my assessment:\n{WELL_FORMED}\nLet me know.");
        assert!(matches!(parse_step(&wrapped), ParsedStep::Decision(_)));
    }

    #[test]
    fn non_json_text_is_inconclusive() {
        let parsed = parse_step("I could not determine anything useful this time.");
        assert!(matches!(parsed, ParsedStep::Inconclusive { .. }));
    }

    #[test]
    fn missing_required_fields_is_inconclusive() {
        let parsed = parse_step(r#"{"analysis": "partial thought"}"#);
        assert!(matches!(parsed, ParsedStep::Inconclusive { .. }));
    }

    #[test]
    fn out_of_range_confidence_is_inconclusive() {
        let parsed = parse_step(
            r#"{"analysis": "x", "dataRequests": [], "investigationComplete": true, "confidence": 1.7, "reasoning": ""}"#,
        );
        let ParsedStep::Inconclusive { reason } = parsed else {
            panic!("expected inconclusive");
        };
        assert!(reason.contains("confidence"));
    }

    #[test]
    fn whitelisted_types_only_reach_the_request_list() {
        let parsed = parse_step(
            r#"{
                "analysis": "mixed requests",
                "dataRequests": [
                    {"type": "get", "resource": "pods"},
                    {"type": "exec", "resource": "pod app-1", "rationale": "poke it"},
                    {"type": "delete", "resource": "pod app-1"}
                ],
                "investigationComplete": false,
                "confidence": 0.5,
                "reasoning": ""
            }"#,
        );
        let ParsedStep::Decision(d) = parsed else {
            panic!("expected a decision");
        };
        assert_eq!(d.requests.len(), 1);
        assert_eq!(d.requests[0].op, SafeOperation::Get);
        assert_eq!(d.rejected.len(), 2);
        assert!(d.rejected[0].1.enhanced_message.contains("whitelist"));
        assert!(d.rejected[0].0.starts_with("exec_"));
    }

    #[test]
    fn requests_without_a_resource_are_rejected() {
        let parsed = parse_step(
            r#"{
                "analysis": "x",
                "dataRequests": [{"type": "logs", "resource": "  "}],
                "investigationComplete": false,
                "confidence": 0.4,
                "reasoning": ""
            }"#,
        );
        let ParsedStep::Decision(d) = parsed else {
            panic!("expected a decision");
        };
        assert!(d.requests.is_empty());
        assert_eq!(d.rejected.len(), 1);
    }

    #[test]
    fn parses_a_remediation_plan() {
        let plan = parse_plan(
            r#"```json
            {
                "rootCause": "PVC data-claim does not exist",
                "confidence": 0.95,
                "factors": ["pod events show FailedScheduling", "claim absent from namespace"],
                "summary": "Create the missing claim so the pod can schedule",
                "actions": [
                    {"description": "Create the PVC", "command": "kubectl apply -f pvc.yaml", "risk": "low", "rationale": "additive change"}
                ]
            }
            ```"#,
        )
        .unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].risk, crate::session::RiskLevel::Low);
        assert!((plan.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn plan_with_bad_risk_or_confidence_is_an_error() {
        let bad_risk = parse_plan(
            r#"{"rootCause": "x", "confidence": 0.9, "summary": "s", "actions": [{"description": "d", "risk": "catastrophic"}]}"#,
        );
        assert!(bad_risk.is_err());

        let bad_confidence = parse_plan(
            r#"{"rootCause": "x", "confidence": 2.0, "summary": "s", "actions": []}"#,
        );
        assert!(bad_confidence.is_err());
    }

    #[test]
    fn capability_gap_flag_is_carried_through() {
        let parsed = parse_step(
            r#"{
                "analysis": "the volume plugin is missing from every node",
                "dataRequests": [],
                "investigationComplete": true,
                "confidence": 0.9,
                "reasoning": "no read-only operation can install a CSI driver",
                "capabilityGap": true
            }"#,
        );
        let ParsedStep::Decision(d) = parsed else {
            panic!("expected a decision");
        };
        assert!(d.capability_gap);
    }
}
