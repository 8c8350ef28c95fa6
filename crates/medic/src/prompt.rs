//! Prompt composition for the reasoning service.
//!
//! Prompts carry the issue, any structured context hints, and the full
//! iteration history, so the reasoning service always sees its own prior
//! analysis and the data (or classified failures) each step gathered.

use std::fmt::Write as _;

use crate::session::{ExecutedCommand, IssueContext, Iteration, Session};

/// Cap applied to each gathered output embedded in a prompt.
const MAX_CONTEXT_CHARS: usize = 6000;

/// Line prefixes whose remainder is masked before output reaches a prompt
/// or the session record.
const SECRET_MARKERS: &[&str] = &[
    "authorization:",
    "x-api-key:",
    "bearer ",
    "token:",
    "password:",
    "client-key-data:",
    "client-certificate-data:",
];

/// Byte offset just past the earliest secret marker on a line, matched
/// ASCII-case-insensitively. Markers are pure ASCII, so the offset is
/// always a char boundary.
fn find_marker_end(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    SECRET_MARKERS
        .iter()
        .filter_map(|marker| {
            let m = marker.as_bytes();
            (0..bytes.len().checked_sub(m.len())? + 1)
                .find(|&i| bytes[i..i + m.len()].eq_ignore_ascii_case(m))
                .map(|i| i + m.len())
        })
        .min()
}

/// Mask obvious credentials in raw command output.
#[must_use]
pub fn redact_secrets(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        match find_marker_end(line) {
            Some(end) if line[end..].trim().len() > 2 => {
                out.push_str(&line[..end]);
                out.push_str(" [redacted]");
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn truncated(text: &str) -> String {
    if text.len() <= MAX_CONTEXT_CHARS {
        text.to_string()
    } else {
        let mut cut = MAX_CONTEXT_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}\n... (truncated)", &text[..cut])
    }
}

fn render_context(context: &IssueContext) -> String {
    let mut section = String::new();
    section.push_str("## Provided Context\n\n");
    if let Some(event) = &context.event {
        let _ = writeln!(section, "### Event\n{}\n", truncated(event));
    }
    if let Some(logs) = &context.logs {
        let _ = writeln!(section, "### Logs\n{}\n", truncated(logs));
    }
    if let Some(metrics) = &context.metrics {
        let _ = writeln!(section, "### Metrics\n{}\n", truncated(metrics));
    }
    if let Some(pod_spec) = &context.pod_spec {
        let _ = writeln!(section, "### Pod Spec\n{}\n", truncated(pod_spec));
    }
    if !context.related_events.is_empty() {
        section.push_str("### Related Events\n");
        for event in &context.related_events {
            let _ = writeln!(section, "- {event}");
        }
        section.push('\n');
    }
    section
}

fn render_history(iterations: &[Iteration]) -> String {
    let mut section = String::new();
    for iteration in iterations {
        let _ = writeln!(section, "### Step {}\n", iteration.step);
        let _ = writeln!(section, "Analysis: {}\n", iteration.analysis);
        for (key, gathered) in &iteration.data_gathered {
            let _ = writeln!(section, "Data `{key}`:");
            let _ = writeln!(section, "{}\n", truncated(&gathered.as_context()));
        }
    }
    section
}

const DECISION_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:

{
  "analysis": "your current analysis of the issue",
  "dataRequests": [
    {"type": "get|describe|logs|events|top", "resource": "<resource or resource name>", "namespace": "<optional>", "rationale": "why this data helps"}
  ],
  "investigationComplete": false,
  "confidence": 0.0,
  "reasoning": "why you are or are not done",
  "capabilityGap": false
}

Rules:
- Only the read-only operation types get, describe, logs, events and top are available. Never request anything else.
- Set investigationComplete to true only when you can name the root cause, and put the full root-cause analysis in "analysis".
- confidence is your certainty in the root cause, between 0.0 and 1.0.
- Set capabilityGap to true only if no available read-only operation can make progress on this issue."#;

/// Compose the per-iteration investigation prompt.
#[must_use]
pub fn investigation_prompt(session: &Session) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are diagnosing a live Kubernetes issue. You may request read-only diagnostic \
         data; each requested item is gathered for you and shown in the next step.\n\n",
    );
    let _ = writeln!(prompt, "## Issue\n\n{}\n", session.issue);

    if let Some(context) = &session.context {
        prompt.push_str(&render_context(context));
    }

    if session.iterations.is_empty() {
        prompt.push_str("No data has been gathered yet.\n\n");
    } else {
        prompt.push_str("## Investigation So Far\n\n");
        prompt.push_str(&render_history(&session.iterations));
        prompt.push_str(
            "Failed commands above carry guidance; adapt your next requests accordingly \
             (for example, list resources before re-targeting a name).\n\n",
        );
    }

    prompt.push_str(DECISION_CONTRACT);
    prompt
}

/// Frame the issue text for a post-execution validation session.
#[must_use]
pub fn validation_issue(original_issue: &str, executed: &[ExecutedCommand]) -> String {
    let mut issue = String::from(
        "Post-remediation validation: verify whether the issue is resolved. Do not propose \
         further fixes here; determine the current state.\n\n",
    );
    let _ = writeln!(issue, "Original issue: {original_issue}\n");
    issue.push_str("Remediation commands that were executed:\n");
    for cmd in executed {
        let _ = writeln!(
            issue,
            "- `{}` ({})",
            cmd.command,
            if cmd.success { "succeeded" } else { "FAILED" }
        );
    }
    issue
}

const PLAN_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:

{
  "rootCause": "one-line root cause",
  "confidence": 0.0,
  "factors": ["contributing factor"],
  "summary": "what the remediation does",
  "actions": [
    {"description": "what this action does", "command": "kubectl ...", "risk": "low|medium|high", "rationale": "why this fixes it"}
  ]
}

Rules:
- Order actions highest priority first.
- Every command must be a complete kubectl invocation; omit "command" for actions a human must perform out of band.
- risk reflects blast radius: low for additive changes, medium for restarts/rescheduling, high for anything destructive."#;

const VALIDATION_PLAN_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:

{
  "resolved": false,
  "rootCause": "root cause of whatever issue remains; empty string if resolved",
  "confidence": 0.0,
  "factors": [],
  "summary": "current state of the cluster with respect to the original issue",
  "actions": []
}

Rules:
- Set resolved to true only if the gathered data shows the original issue no longer occurs.
- If a different problem surfaced, describe it in rootCause and propose actions for it; it will require manual approval."#;

/// Compose the planning prompt over a finalized analysis.
#[must_use]
pub fn planning_prompt(session: &Session, final_analysis: &str, validation: bool) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are turning a completed Kubernetes investigation into a structured remediation \
         decision.\n\n",
    );
    let _ = writeln!(prompt, "## Issue\n\n{}\n", session.issue);
    let _ = writeln!(prompt, "## Final Analysis\n\n{final_analysis}\n");

    let gathered = session.data_gathered();
    if !gathered.is_empty() {
        prompt.push_str("## Evidence Gathered\n\n");
        for (key, value) in &gathered {
            let _ = writeln!(prompt, "`{key}`:\n{}\n", truncated(&value.as_context()));
        }
    }

    prompt.push_str(if validation {
        VALIDATION_PLAN_CONTRACT
    } else {
        PLAN_CONTRACT
    });
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifiedError, ErrorCategory};
    use crate::session::{
        DataRequest, ExecutionMode, Gathered, SafeOperation, Session,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn session_with_failed_gather(message: &str) -> Session {
        let mut session = Session::new("pod stuck pending, PVC missing", None, ExecutionMode::Manual);
        let mut gathered = BTreeMap::new();
        gathered.insert(
            "get_pvc-data-claim".to_string(),
            Gathered::Failed {
                error: ClassifiedError {
                    category: ErrorCategory::Unknown,
                    enhanced_message: message.to_string(),
                },
            },
        );
        session.push_iteration(crate::session::Iteration {
            step: 1,
            analysis: "claim looks missing".to_string(),
            data_requests: vec![DataRequest {
                op: SafeOperation::Get,
                resource: "pvc data-claim".to_string(),
                namespace: None,
                rationale: String::new(),
            }],
            data_gathered: gathered,
            complete: false,
            timestamp: Utc::now(),
        });
        session
    }

    #[test]
    fn prompt_carries_issue_history_and_contract() {
        let session = session_with_failed_gather("list available resources first");
        let prompt = investigation_prompt(&session);

        assert!(prompt.contains("pod stuck pending, PVC missing"));
        assert!(prompt.contains("### Step 1"));
        assert!(prompt.contains("investigationComplete"));
        assert!(prompt.contains("capabilityGap"));
    }

    #[test]
    fn classified_guidance_appears_verbatim_in_the_next_prompt() {
        let session = session_with_failed_gather(
            "The named resource may not exist; list available resources first with `kubectl get pvc -A`.",
        );
        let prompt = investigation_prompt(&session);
        assert!(prompt.contains("list available resources first"));
        assert!(prompt.contains("ERROR [unknown]"));
    }

    #[test]
    fn redaction_masks_credential_lines_only() {
        let raw = "name: app\nAuthorization: Bearer abc123def\ntoken: s3cr3t\nphase: Running";
        let scrubbed = redact_secrets(raw);
        assert!(!scrubbed.contains("abc123def"));
        assert!(!scrubbed.contains("s3cr3t"));
        assert!(scrubbed.contains("[redacted]"));
        assert!(scrubbed.contains("phase: Running"));
    }

    #[test]
    fn long_outputs_are_truncated() {
        let mut session = session_with_failed_gather("x");
        if let Some(iteration) = session.iterations.last_mut() {
            iteration.data_gathered.insert(
                "logs_app".to_string(),
                Gathered::Success {
                    output: "y".repeat(20_000),
                },
            );
        }
        let prompt = investigation_prompt(&session);
        assert!(prompt.contains("... (truncated)"));
        assert!(prompt.len() < 20_000);
    }

    #[test]
    fn validation_issue_names_the_executed_commands() {
        let issue = validation_issue(
            "pod stuck pending",
            &[ExecutedCommand {
                command: "kubectl apply -f pvc.yaml".to_string(),
                output: String::new(),
                success: true,
            }],
        );
        assert!(issue.contains("verify whether the issue is resolved"));
        assert!(issue.contains("kubectl apply -f pvc.yaml"));
    }

    #[test]
    fn planning_prompt_switches_contract_for_validation() {
        let session = session_with_failed_gather("x");
        let plan = planning_prompt(&session, "PVC missing", false);
        assert!(plan.contains("\"actions\""));
        assert!(!plan.contains("\"resolved\""));

        let validation = planning_prompt(&session, "claim bound", true);
        assert!(validation.contains("\"resolved\""));
    }
}
