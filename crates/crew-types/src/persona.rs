use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRole {
    Implementer,
    Reviewer,
    SpecGuard,
    TestGuard,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaExecutionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_command_ref")]
    pub command_ref: String,
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
    pub timeout_sec: u64,
}

fn default_command_ref() -> String {
    "default".to_string()
}

fn default_sandbox() -> String {
    "workspace-write".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDefinition {
    pub id: String,
    pub role: PersonaRole,
    pub focus: String,
    #[serde(default)]
    pub can_block: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<PersonaExecutionConfig>,
}

fn default_true() -> bool {
    true
}

impl PersonaDefinition {
    pub fn executes(&self) -> bool {
        self.execution.as_ref().map(|e| e.enabled).unwrap_or(false)
    }
}

/// Global persona configuration shared across all tasks: the canonical
/// phase ordering and the per-phase policy map that task-local
/// `persona_policy.phase_overrides` merge over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaDefaults {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_order: Vec<String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub phase_policies: std::collections::BTreeMap<String, crate::task::PhasePolicy>,
}

pub const DEFAULT_PHASE_ORDER: [&str; 4] = ["implement", "review", "spec_check", "test"];

/// The four personas the original catalog shipped with, used as the
/// compiler's fallback set when a change document defines no `personas:`
/// directive.
pub fn default_personas() -> Vec<PersonaDefinition> {
    let make = |id: &str, role: PersonaRole, focus: &str| PersonaDefinition {
        id: id.to_string(),
        role,
        focus: focus.to_string(),
        can_block: false,
        enabled: true,
        execution: Some(PersonaExecutionConfig {
            enabled: true,
            command_ref: "default".to_string(),
            sandbox: "workspace-write".to_string(),
            timeout_sec: 900,
        }),
    };
    vec![
        make("implementer", PersonaRole::Implementer, "drive implementation forward"),
        make("code-reviewer", PersonaRole::Reviewer, "check quality and regression risk"),
        make("spec-checker", PersonaRole::SpecGuard, "prevent requirement drift"),
        make("test-owner", PersonaRole::TestGuard, "ensure verification completeness"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_personas_all_execute() {
        let personas = default_personas();
        assert_eq!(personas.len(), 4);
        assert!(personas.iter().all(|p| p.executes()));
    }
}
