use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One task block parsed out of a `tasks.md` change document, before
/// overrides and persona validation are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_paths: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub requires_plan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_policy: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationItem {
    pub text: String,
    pub checked: bool,
    pub line: usize,
}

/// Persona-related directives collected while walking `tasks.md`, applied
/// to the payload once parsing finishes.
#[derive(Debug, Clone, Default)]
pub struct PersonaDirectives {
    pub personas: Option<Value>,
    pub persona_defaults: Option<Value>,
    pub global_disable_personas: Vec<String>,
}

pub const ALLOWED_OVERRIDE_TOP_LEVEL_KEYS: [&str; 4] = ["teammates", "tasks", "requires_plan", "depends_on"];
pub const ALLOWED_TASK_OVERRIDE_KEYS: [&str; 5] =
    ["title", "description", "target_paths", "depends_on", "requires_plan"];
