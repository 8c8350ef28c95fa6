//! Classification of raw cluster-command failures into actionable guidance.
//!
//! Pure, ordered rule matching: the first matching rule wins and `unknown`
//! is the fallback. Every enhanced message carries a one-line diagnosis, a
//! concrete read-only command to run next, and a remediation-oriented
//! suggestion, so a failed command becomes useful context for the next
//! investigation step instead of a dead end.

use serde::{Deserialize, Serialize};

/// Failure category assigned by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Authorization,
    ApiAvailability,
    Kubeconfig,
    Version,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::ApiAvailability => write!(f, "api-availability"),
            Self::Kubeconfig => write!(f, "kubeconfig"),
            Self::Version => write!(f, "version"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified failure: category plus human-actionable guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub enhanced_message: String,
}

/// First line of a raw error, bounded so huge stderr dumps stay readable.
fn excerpt(raw: &str) -> String {
    let line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut line = line.trim().to_string();
    if line.len() > 200 {
        line.truncate(200);
        line.push_str("...");
    }
    line
}

/// Classify a raw failure message.
///
/// Ordered first-match rules; `unknown` is the default. The match is
/// case-insensitive over the whole message.
#[must_use]
pub fn classify(raw: &str) -> ClassifiedError {
    let msg = raw.to_lowercase();
    let excerpt = excerpt(raw);

    let (category, enhanced_message) = if msg.contains("no such host")
        || msg.contains("dial tcp")
        || msg.contains("connection refused")
        || msg.contains("i/o timeout")
        || msg.contains("network is unreachable")
        || msg.contains("unable to connect to the server")
        || msg.contains("timed out")
    {
        (
            ErrorCategory::Network,
            format!(
                "Cluster endpoint is unreachable ({excerpt}). Run `kubectl cluster-info` to \
                 confirm the API server address, and verify DNS/endpoint configuration for the \
                 kubeconfig server entry."
            ),
        )
    } else if msg.contains("unauthorized")
        || msg.contains("401")
        || msg.contains("invalid bearer token")
        || msg.contains("token has expired")
        || msg.contains("you must be logged in")
    {
        (
            ErrorCategory::Authentication,
            format!(
                "Credentials were rejected ({excerpt}). Run `kubectl auth whoami` to see the \
                 active identity, then refresh the expired token or client certificate in the \
                 kubeconfig."
            ),
        )
    } else if msg.contains("forbidden") || msg.contains("403") || msg.contains("rbac") {
        (
            ErrorCategory::Authorization,
            format!(
                "The operation is forbidden for the current identity ({excerpt}). Check RBAC, \
                 verify with `kubectl auth can-i <verb> <resource> -n <namespace>`, and request \
                 a role binding if access is expected."
            ),
        )
    } else if msg.contains("the server is currently unable to handle the request")
        || msg.contains("service unavailable")
        || msg.contains("503")
        || msg.contains("apiservice")
        || msg.contains("etcdserver")
    {
        (
            ErrorCategory::ApiAvailability,
            format!(
                "The API server or an aggregated API is degraded ({excerpt}). Run `kubectl get \
                 apiservices` and `kubectl get --raw /readyz?verbose` to find the unhealthy \
                 component before retrying."
            ),
        )
    } else if msg.contains("kubeconfig")
        || msg.contains("no configuration has been provided")
        || msg.contains("context was not found")
        || msg.contains("cluster has no server defined")
    {
        (
            ErrorCategory::Kubeconfig,
            format!(
                "Client configuration is missing or broken ({excerpt}). Run `kubectl config \
                 current-context` and `kubectl config view --minify` to inspect the active \
                 context, then point KUBECONFIG at a valid file."
            ),
        )
    } else if msg.contains("no matches for kind")
        || msg.contains("unsupported api version")
        || msg.contains("could not find the requested version")
        || msg.contains("doesn't have a resource type")
    {
        (
            ErrorCategory::Version,
            format!(
                "The requested kind or version is not served by this cluster ({excerpt}). Run \
                 `kubectl api-resources` and `kubectl api-versions` to see what the server \
                 supports, then re-issue with a served version."
            ),
        )
    } else if msg.contains("notfound") || msg.contains("not found") {
        (
            ErrorCategory::Unknown,
            format!(
                "The named resource may not exist ({excerpt}); list available resources first \
                 with `kubectl get <resource-type> -A` and re-target the exact name."
            ),
        )
    } else {
        (
            ErrorCategory::Unknown,
            format!(
                "Unclassified failure ({excerpt}). Run `kubectl get events -A \
                 --sort-by=.lastTimestamp` to inspect recent cluster activity, then narrow the \
                 investigation from there."
            ),
        )
    };

    ClassifiedError {
        category,
        enhanced_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_failures() {
        let c = classify("dial tcp 10.0.0.1:6443: connect: connection refused");
        assert_eq!(c.category, ErrorCategory::Network);
        assert!(c.enhanced_message.contains("kubectl cluster-info"));
        assert!(c.enhanced_message.contains("DNS/endpoint configuration"));
    }

    #[test]
    fn classifies_unresolved_host_as_network() {
        let c = classify("dial tcp: lookup api.cluster.internal: no such host");
        assert_eq!(c.category, ErrorCategory::Network);
    }

    #[test]
    fn classifies_authentication() {
        let c = classify("error: You must be logged in to the server (Unauthorized)");
        assert_eq!(c.category, ErrorCategory::Authentication);
        assert!(c.enhanced_message.contains("kubectl auth whoami"));
    }

    #[test]
    fn classifies_authorization_with_rbac_guidance() {
        let c = classify(
            "Error from server (Forbidden): pods is forbidden: User \"dev\" cannot list resource",
        );
        assert_eq!(c.category, ErrorCategory::Authorization);
        assert!(c.enhanced_message.contains("RBAC"));
        assert!(c.enhanced_message.contains("kubectl auth can-i"));
    }

    #[test]
    fn classifies_api_availability() {
        let c = classify("Error from server (ServiceUnavailable): the server is currently unable to handle the request");
        assert_eq!(c.category, ErrorCategory::ApiAvailability);
    }

    #[test]
    fn classifies_kubeconfig() {
        let c = classify("error: no configuration has been provided, try setting KUBECONFIG");
        assert_eq!(c.category, ErrorCategory::Kubeconfig);
    }

    #[test]
    fn classifies_version() {
        let c = classify("error: unable to recognize \"m.yaml\": no matches for kind \"Foo\" in version \"v2\"");
        assert_eq!(c.category, ErrorCategory::Version);
    }

    #[test]
    fn not_found_suggests_listing_resources_first() {
        let c = classify(
            "Error from server (NotFound): persistentvolumeclaims \"data-claim\" not found",
        );
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(c
            .enhanced_message
            .contains("list available resources first"));
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        // Mentions both a network symptom and "not found": network rule is
        // earlier in the chain and must win.
        let c = classify("dial tcp: lookup host not found");
        assert_eq!(c.category, ErrorCategory::Network);
    }

    #[test]
    fn unknown_is_the_default() {
        let c = classify("something entirely unexpected happened");
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(c.enhanced_message.contains("kubectl get events"));
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = format!("boom {}", "x".repeat(500));
        let c = classify(&long);
        assert!(c.enhanced_message.len() < 500);
    }
}
