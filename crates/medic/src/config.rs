//! Engine configuration, loaded from `medic-config.json`.
//!
//! All configuration is passed explicitly into construction; the engine
//! never reads process-wide environment state itself.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{MedicError, MedicResult};
use crate::reasoning::ReasoningConfig;
use crate::session::{ExecutionMode, RiskLevel};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicConfig {
    /// Directory holding one JSON record per session.
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
    /// Reasoning service settings.
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    /// kubectl binary used for inspections and remediations.
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    /// Wall-clock ceiling for one mutating command, in seconds.
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    /// Default execution mode when the caller does not specify one.
    #[serde(default)]
    pub default_mode: ExecutionMode,
    /// Default automatic-execution risk ceiling.
    #[serde(default)]
    pub max_risk_level: RiskLevel,
    /// Default automatic-execution confidence threshold.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_session_dir() -> PathBuf {
    PathBuf::from(".medic/sessions")
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_exec_timeout_secs() -> u64 {
    60
}

fn default_confidence_threshold() -> f64 {
    0.8
}

impl Default for MedicConfig {
    fn default() -> Self {
        Self {
            session_dir: default_session_dir(),
            reasoning: ReasoningConfig::default(),
            kubectl: default_kubectl(),
            exec_timeout_secs: default_exec_timeout_secs(),
            default_mode: ExecutionMode::default(),
            max_risk_level: RiskLevel::default(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl MedicConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> MedicResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| MedicError::Storage {
            path: path.display().to_string(),
            reason: format!("failed to read config: {e}"),
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file if it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> MedicResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> MedicResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MedicError::validation(format!(
                "confidenceThreshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = MedicConfig::default();
        assert_eq!(config.default_mode, ExecutionMode::Manual);
        assert_eq!(config.max_risk_level, RiskLevel::Low);
        assert!((config.confidence_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.session_dir, PathBuf::from(".medic/sessions"));
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let config: MedicConfig = serde_json::from_str(
            r#"{"sessionDir": "/var/lib/medic", "maxRiskLevel": "medium"}"#,
        )
        .unwrap();
        assert_eq!(config.session_dir, PathBuf::from("/var/lib/medic"));
        assert_eq!(config.max_risk_level, RiskLevel::Medium);
        assert_eq!(config.kubectl, "kubectl");
    }

    #[test]
    fn out_of_range_threshold_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medic-config.json");
        std::fs::write(&path, r#"{"confidenceThreshold": 1.5}"#).unwrap();
        assert!(MedicConfig::load(&path).is_err());
    }
}
