use std::path::Path;

use serde::{Deserialize, Serialize};

use crew_types::{PersonaDefaults, PersonaDefinition};

use crate::error::SchedulerError;

/// Run-time tuning knobs for [`crate::round::run`], layered
/// flag > file > env > default, mirroring `OrchestratorConfig` plus the
/// CLI's `resolve_state_dir`-style layered resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub lead_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teammate_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personas: Option<Vec<PersonaDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_defaults: Option<PersonaDefaults>,
    pub max_rounds: u64,
    pub max_idle_rounds: u64,
    pub max_idle_seconds: u64,
    pub no_progress_event_interval: u64,
    pub task_progress_log_limit: usize,
    pub tick_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve_fallback: Option<bool>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lead_id: "lead".to_string(),
            teammate_ids: None,
            personas: None,
            persona_defaults: None,
            max_rounds: 200,
            max_idle_rounds: 20,
            max_idle_seconds: 120,
            no_progress_event_interval: 3,
            task_progress_log_limit: crew_types::DEFAULT_PROGRESS_LOG_CAP,
            tick_seconds: 0.0,
            human_approval: None,
            auto_approve_fallback: None,
        }
    }
}

impl RunConfig {
    /// Loads a config file layer, dispatching on extension. Only the
    /// fields present in the file are set; absent fields stay at whatever
    /// the caller's base (usually `RunConfig::default()`) already had
    /// since every field carries a `#[serde(default)]`.
    pub fn load_file(path: &Path) -> Result<RunConfig, SchedulerError> {
        let text = std::fs::read_to_string(path).map_err(|e| SchedulerError::Config(e.to_string()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|e| SchedulerError::Config(e.to_string())),
            Some("yaml") | Some("yml") => {
                serde_yaml_value_to_config(&text).map_err(|e| SchedulerError::Config(e.to_string()))
            }
            other => Err(SchedulerError::Config(format!(
                "unrecognized config file extension: {:?} ({})",
                other,
                path.display()
            ))),
        }
    }

    pub fn resolved_teammates(&self) -> Vec<String> {
        self.teammate_ids
            .clone()
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| vec!["teammate-1".to_string(), "teammate-2".to_string()])
    }

    pub fn resolved_execution_personas(&self) -> Vec<String> {
        let Some(personas) = &self.personas else {
            return Vec::new();
        };
        personas
            .iter()
            .filter(|p| p.enabled && p.executes())
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn resolved_human_approval(&self) -> bool {
        if let Some(flag) = self.human_approval {
            return flag;
        }
        std::env::var("HUMAN_APPROVAL").map(|v| v.trim() == "1").unwrap_or(false)
    }

    pub fn resolved_auto_approve_fallback(&self) -> bool {
        if let Some(flag) = self.auto_approve_fallback {
            return flag;
        }
        std::env::var("ORCHESTRATOR_AUTO_APPROVE_FALLBACK")
            .map(|v| v.trim() == "1")
            .unwrap_or(true)
    }
}

fn serde_yaml_value_to_config(text: &str) -> Result<RunConfig, serde_yaml::Error> {
    serde_yaml::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_thresholds() {
        let config = RunConfig::default();
        assert_eq!(config.max_rounds, 200);
        assert_eq!(config.max_idle_rounds, 20);
        assert_eq!(config.max_idle_seconds, 120);
        assert!(config.resolved_auto_approve_fallback());
        assert!(!config.resolved_human_approval());
    }

    #[test]
    fn empty_teammate_ids_falls_back_to_defaults() {
        let mut config = RunConfig::default();
        config.teammate_ids = Some(Vec::new());
        assert_eq!(
            config.resolved_teammates(),
            vec!["teammate-1".to_string(), "teammate-2".to_string()]
        );
    }

    #[test]
    fn loads_json_file_layer() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.json");
        std::fs::write(&path, r#"{"max_rounds": 5, "lead_id": "captain"}"#).unwrap();
        let config = RunConfig::load_file(&path).unwrap();
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.lead_id, "captain");
        assert_eq!(config.max_idle_rounds, 20);
    }

    #[test]
    fn unrecognized_extension_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.toml");
        std::fs::write(&path, "max_rounds = 5").unwrap();
        assert!(RunConfig::load_file(&path).is_err());
    }
}
