use serde::{Deserialize, Serialize};

use crew_types::{Event, PersonaComment, PersonaDefinition, PlanActionKind, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSummaryView {
    pub pending: u64,
    pub in_progress: u64,
    pub blocked: u64,
    pub needs_approval: u64,
    pub completed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner: Option<String>,
    pub depends_on: Vec<String>,
    pub target_paths: Vec<String>,
    pub requires_plan: bool,
    pub plan_status: crew_types::PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub seq: u64,
    pub sender: String,
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub content_short: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    #[serde(rename = "type")]
    pub decision_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teammate: Option<String>,
    pub reason_short: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub lead_id: String,
    pub teammates: Vec<String>,
    pub personas: Vec<PersonaDefinition>,
    pub round_index: u64,
    pub idle_rounds: u64,
    pub status_summary: StatusSummaryView,
    pub events: Vec<Event>,
    pub persona_comments: Vec<PersonaComment>,
    pub tasks: Vec<TaskSnapshot>,
    pub recent_messages: Vec<MessageSnapshot>,
    pub last_decisions: Vec<DecisionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdateEntry {
    pub task_id: String,
    pub new_status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_action: Option<PlanActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub to: String,
    pub text_short: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopDirective {
    pub should_stop: bool,
    #[serde(default)]
    pub reason_short: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionMeta {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub token_budget: TokenBudget,
    #[serde(default)]
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    #[serde(default)]
    pub decisions: Vec<DecisionSummary>,
    #[serde(default)]
    pub task_updates: Vec<TaskUpdateEntry>,
    #[serde(default)]
    pub messages: Vec<MessageEntry>,
    #[serde(default)]
    pub stop: StopDirective,
    #[serde(default)]
    pub meta: DecisionMeta,
}
