use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Kickoff,
    TaskCompleted,
    NeedsApproval,
    NoProgress,
    Collision,
    Blocked,
    TaskHandoff,
    WarnRecheck,
}

impl EventType {
    /// The event's default severity, or `None` when the event type carries
    /// no persona-visible severity (events outside this table are ignored
    /// by the pipeline).
    pub fn default_severity(self) -> Option<Severity> {
        use EventType::*;
        Some(match self {
            Kickoff => Severity::Info,
            TaskCompleted => Severity::Info,
            NeedsApproval => Severity::Warn,
            NoProgress => Severity::Warn,
            Collision => Severity::Warn,
            Blocked => Severity::Critical,
            TaskHandoff => Severity::Info,
            WarnRecheck => Severity::Warn,
        })
    }
}

/// Ordered `Blocker < Critical < Warn < Info` so the derived `Ord` matches
/// the ascending sort priority the pipeline requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    Critical,
    Warn,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teammate: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, detail: impl Into<String>) -> Self {
        Self {
            event_type,
            detail: detail.into(),
            task_id: None,
            teammate: None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_teammate(mut self, teammate: impl Into<String>) -> Self {
        self.teammate = Some(teammate.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaComment {
    pub persona_id: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub event_type: EventType,
    pub detail: String,
    pub round: u64,
}

pub const MAX_COMMENT_DETAIL_LEN: usize = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_priority_orders_blocker_first() {
        let mut severities = vec![Severity::Info, Severity::Blocker, Severity::Warn, Severity::Critical];
        severities.sort();
        assert_eq!(
            severities,
            vec![Severity::Blocker, Severity::Critical, Severity::Warn, Severity::Info]
        );
    }

    #[test]
    fn event_types_outside_table_have_no_severity() {
        assert_eq!(EventType::WarnRecheck.default_severity(), Some(Severity::Warn));
    }
}
