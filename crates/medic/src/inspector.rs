//! Read-only cluster inspection.
//!
//! Executes one whitelisted diagnostic operation per request, bounded by a
//! fixed wall-clock timeout. Failures are classified and returned as data,
//! never raised past the investigation loop: a failed command becomes the
//! next reasoning step's context.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::classifier::{classify, ClassifiedError};
use crate::errors::{MedicError, MedicResult};
use crate::prompt::redact_secrets;
use crate::session::{DataRequest, SafeOperation};

/// Fixed ceiling for one inspection command.
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tail limit applied to log requests so one noisy pod cannot flood an
/// iteration.
const LOG_TAIL_LINES: u32 = 200;

/// Captured output of one cluster command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Read-only cluster command runner.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one command with the given argument list under `timeout`.
    async fn run(&self, args: &[String], timeout: Duration) -> MedicResult<CommandOutput>;
}

/// Runner shelling out to kubectl.
pub struct KubectlRunner {
    kubectl: String,
}

impl KubectlRunner {
    #[must_use]
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }
}

impl Default for KubectlRunner {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl CommandRunner for KubectlRunner {
    async fn run(&self, args: &[String], timeout: Duration) -> MedicResult<CommandOutput> {
        debug!(kubectl = %self.kubectl, ?args, "Running inspection command");

        let child = Command::new(&self.kubectl)
            .args(args)
            .stdin(Stdio::null())
            .output();

        match tokio::time::timeout(timeout, child).await {
            Err(_) => Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!(
                    "kubectl {} timed out after {}s",
                    args.join(" "),
                    timeout.as_secs()
                ),
                success: false,
            }),
            Ok(Err(e)) => Err(MedicError::Execution(format!(
                "failed to spawn {}: {e}",
                self.kubectl
            ))),
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                success: output.status.success(),
            }),
        }
    }
}

/// Build the kubectl argument list for one request.
///
/// `get` and `events` ask for machine-parseable output; `describe`, `logs`
/// and `top` are plain text.
#[must_use]
pub fn build_args(request: &DataRequest) -> Vec<String> {
    let resource_tokens = request.resource.split_whitespace().map(str::to_string);
    let mut args: Vec<String> = match request.op {
        SafeOperation::Get => {
            let mut args = vec!["get".to_string()];
            args.extend(resource_tokens);
            args.extend(["-o".to_string(), "json".to_string()]);
            args
        }
        SafeOperation::Describe => {
            let mut args = vec!["describe".to_string()];
            args.extend(resource_tokens);
            args
        }
        SafeOperation::Logs => {
            let mut args = vec!["logs".to_string()];
            args.extend(resource_tokens);
            args.push(format!("--tail={LOG_TAIL_LINES}"));
            args
        }
        SafeOperation::Events => {
            let mut args = vec!["get".to_string(), "events".to_string()];
            if !request.resource.trim().is_empty() && request.resource.trim() != "all" {
                args.extend([
                    "--field-selector".to_string(),
                    format!("involvedObject.name={}", request.resource.trim()),
                ]);
            }
            args.extend(["-o".to_string(), "json".to_string()]);
            args
        }
        SafeOperation::Top => {
            let mut args = vec!["top".to_string()];
            args.extend(resource_tokens);
            args
        }
    };

    if let Some(namespace) = &request.namespace {
        args.extend(["-n".to_string(), namespace.clone()]);
    }
    args
}

/// Executes whitelisted read-only diagnostics against the cluster.
pub struct ClusterInspector {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ClusterInspector {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: INSPECT_TIMEOUT,
        }
    }

    /// Run one inspection. The operation type is whitelisted by
    /// construction (`DataRequest` only holds [`SafeOperation`]); anything
    /// that failed that validation was rejected before reaching here.
    ///
    /// Returns the (redacted) raw text on success, or the classified
    /// failure for the next iteration's context.
    pub async fn inspect(&self, request: &DataRequest) -> Result<String, ClassifiedError> {
        let args = build_args(request);

        let output = match self.runner.run(&args, self.timeout).await {
            Ok(output) => output,
            Err(e) => return Err(classify(&e.to_string())),
        };

        if output.success {
            let text = if output.stdout.trim().is_empty() {
                "(command produced no output)".to_string()
            } else {
                output.stdout
            };
            Ok(redact_secrets(&text))
        } else {
            let raw = if output.stderr.trim().is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            debug!(key = %request.key(), "Inspection failed, classifying");
            Err(classify(&raw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorCategory;

    fn request(op: SafeOperation, resource: &str, namespace: Option<&str>) -> DataRequest {
        DataRequest {
            op,
            resource: resource.to_string(),
            namespace: namespace.map(str::to_string),
            rationale: String::new(),
        }
    }

    #[test]
    fn get_requests_structured_output() {
        let args = build_args(&request(SafeOperation::Get, "pvc data-claim", Some("default")));
        assert_eq!(
            args,
            vec!["get", "pvc", "data-claim", "-o", "json", "-n", "default"]
        );
    }

    #[test]
    fn describe_is_plain_text() {
        let args = build_args(&request(SafeOperation::Describe, "pod app-1", None));
        assert_eq!(args, vec!["describe", "pod", "app-1"]);
    }

    #[test]
    fn logs_are_tail_limited() {
        let args = build_args(&request(SafeOperation::Logs, "app-1", Some("prod")));
        assert_eq!(args, vec!["logs", "app-1", "--tail=200", "-n", "prod"]);
    }

    #[test]
    fn events_filter_on_the_named_resource() {
        let args = build_args(&request(SafeOperation::Events, "app-1", None));
        assert_eq!(
            args,
            vec![
                "get",
                "events",
                "--field-selector",
                "involvedObject.name=app-1",
                "-o",
                "json"
            ]
        );

        let all = build_args(&request(SafeOperation::Events, "all", Some("default")));
        assert_eq!(all, vec!["get", "events", "-o", "json", "-n", "default"]);
    }

    #[test]
    fn top_passes_resource_tokens_through() {
        let args = build_args(&request(SafeOperation::Top, "pods", None));
        assert_eq!(args, vec!["top", "pods"]);
    }

    struct ScriptedRunner {
        output: CommandOutput,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, _args: &[String], _timeout: Duration) -> MedicResult<CommandOutput> {
            Ok(CommandOutput {
                stdout: self.output.stdout.clone(),
                stderr: self.output.stderr.clone(),
                success: self.output.success,
            })
        }
    }

    #[tokio::test]
    async fn failures_come_back_classified() {
        let inspector = ClusterInspector::new(Arc::new(ScriptedRunner {
            output: CommandOutput {
                stdout: String::new(),
                stderr: "Error from server (NotFound): persistentvolumeclaims \"data\" not found"
                    .to_string(),
                success: false,
            },
        }));
        let err = inspector
            .inspect(&request(SafeOperation::Get, "pvc data", None))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Unknown);
        assert!(err.enhanced_message.contains("list available resources first"));
    }

    #[tokio::test]
    async fn successful_output_is_redacted() {
        let inspector = ClusterInspector::new(Arc::new(ScriptedRunner {
            output: CommandOutput {
                stdout: "kind: Secret\ntoken: super-secret-value".to_string(),
                stderr: String::new(),
                success: true,
            },
        }));
        let text = inspector
            .inspect(&request(SafeOperation::Get, "secret app", None))
            .await
            .unwrap();
        assert!(!text.contains("super-secret-value"));
    }
}
