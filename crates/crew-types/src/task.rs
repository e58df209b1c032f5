use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock seconds since the epoch, as a float to match the original
/// `time.time()` resolution used throughout the state store.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Blocked,
    NeedsApproval,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    NotRequired,
    Pending,
    Drafting,
    Submitted,
    Approved,
    Rejected,
    RevisionRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanActionKind {
    Approve,
    Reject,
    Revise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    Stdout,
    Stderr,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    pub timestamp: f64,
    pub source: ProgressSource,
    pub text: String,
}

pub const DEFAULT_PROGRESS_LOG_CAP: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasePolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_personas: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executor_personas: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_transition_personas: Vec<String>,
}

/// Task-local persona policy overrides, merged field-by-field over the
/// global `persona_defaults` at resolution time (see `crew-persona`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaPolicy {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub disable_personas: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_order: Vec<String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub phase_overrides: std::collections::BTreeMap<String, PhasePolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub target_paths: Vec<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    pub requires_plan: bool,
    pub status: TaskStatus,
    pub plan_status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    pub created_at: f64,
    pub updated_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
    #[serde(default)]
    pub current_phase_index: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progress_log: Vec<ProgressLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_policy: Option<PersonaPolicy>,
}

impl Task {
    /// Builds a task in its bootstrap state: `plan_status` is derived from
    /// `requires_plan` per the invariant in SPEC_FULL.md section 3.
    pub fn new(id: impl Into<String>, title: impl Into<String>, requires_plan: bool) -> Self {
        let now = now_seconds();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            target_paths: vec!["*".to_string()],
            depends_on: BTreeSet::new(),
            requires_plan,
            status: TaskStatus::Pending,
            plan_status: if requires_plan {
                PlanStatus::Pending
            } else {
                PlanStatus::NotRequired
            },
            owner: None,
            planner: None,
            plan_text: None,
            plan_feedback: None,
            result_summary: None,
            block_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            current_phase_index: 0,
            progress_log: Vec::new(),
            persona_policy: None,
        }
    }

    pub fn push_progress_log(&mut self, source: ProgressSource, text: impl Into<String>, cap: usize) {
        self.progress_log.push(ProgressLogEntry {
            timestamp: now_seconds(),
            source,
            text: text.into(),
        });
        if self.progress_log.len() > cap {
            let overflow = self.progress_log.len() - cap;
            self.progress_log.drain(0..overflow);
        }
    }

    pub fn targets_overlap(&self, other: &Task) -> bool {
        for a in &self.target_paths {
            if a == "*" {
                continue;
            }
            for b in &other.target_paths {
                if b == "*" {
                    continue;
                }
                if a == b {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_derives_plan_status() {
        let requires = Task::new("A", "title", true);
        assert_eq!(requires.plan_status, PlanStatus::Pending);
        let skips = Task::new("B", "title", false);
        assert_eq!(skips.plan_status, PlanStatus::NotRequired);
    }

    #[test]
    fn round_trips_through_json() {
        let task = Task::new("A", "title", true);
        let value = serde_json::to_value(&task).unwrap();
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn progress_log_drops_head_when_full() {
        let mut task = Task::new("A", "title", false);
        for i in 0..5 {
            task.push_progress_log(ProgressSource::Stdout, format!("line {i}"), 3);
        }
        assert_eq!(task.progress_log.len(), 3);
        assert_eq!(task.progress_log[0].text, "line 2");
        assert_eq!(task.progress_log[2].text, "line 4");
    }

    #[test]
    fn wildcard_targets_never_collide() {
        let a = Task::new("A", "t", false);
        let mut b = Task::new("B", "t", false);
        b.target_paths = vec!["*".to_string()];
        assert!(!a.targets_overlap(&b));
    }
}
