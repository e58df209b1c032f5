use crew_types::{Event, EventType, PersonaComment, Severity};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeverityActionOutcome {
    /// WarnRecheck events to fold into next round's `pending_events`.
    pub next_round_events: Vec<Event>,
    /// Task ids to escalate to `needs_approval` (critical comments with
    /// transition permission, deduplicated, excluding tasks already there).
    pub escalate_task_ids: Vec<String>,
    /// The persona id that triggered an immediate stop, if any.
    pub persona_blocker: Option<String>,
}

/// Applies the severity-action table to a round's already-sorted persona
/// comments. `has_transition_permission` and `already_needs_approval` let
/// the scheduler answer policy/state questions without this crate touching
/// the state store directly.
pub fn apply_severity_actions(
    comments: &[PersonaComment],
    can_block: impl Fn(&str) -> bool,
    has_transition_permission: impl Fn(&str, Option<&str>) -> bool,
    already_needs_approval: impl Fn(&str) -> bool,
) -> SeverityActionOutcome {
    let mut outcome = SeverityActionOutcome::default();

    for comment in comments {
        match comment.severity {
            Severity::Info => {}
            Severity::Warn => {
                outcome.next_round_events.push(Event::new(
                    EventType::WarnRecheck,
                    format!("persona={} from={:?}", comment.persona_id, comment.event_type),
                ));
            }
            Severity::Critical => {
                try_escalate(comment, &has_transition_permission, &already_needs_approval, &mut outcome);
            }
            Severity::Blocker => {
                let permitted = has_transition_permission(&comment.persona_id, comment.task_id.as_deref());
                if can_block(&comment.persona_id) && permitted {
                    outcome.persona_blocker = Some(comment.persona_id.clone());
                    return outcome;
                }
                try_escalate(comment, &has_transition_permission, &already_needs_approval, &mut outcome);
            }
        }
    }

    outcome
}

fn try_escalate(
    comment: &PersonaComment,
    has_transition_permission: &impl Fn(&str, Option<&str>) -> bool,
    already_needs_approval: &impl Fn(&str) -> bool,
    outcome: &mut SeverityActionOutcome,
) {
    let Some(task_id) = &comment.task_id else {
        return;
    };
    if !has_transition_permission(&comment.persona_id, Some(task_id)) {
        return;
    }
    if already_needs_approval(task_id) {
        return;
    }
    if !outcome.escalate_task_ids.iter().any(|id| id == task_id) {
        outcome.escalate_task_ids.push(task_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_types::EventType;

    fn comment(severity: Severity, persona_id: &str, task_id: Option<&str>) -> PersonaComment {
        PersonaComment {
            persona_id: persona_id.to_string(),
            severity,
            task_id: task_id.map(str::to_string),
            event_type: EventType::Blocked,
            detail: "detail".to_string(),
            round: 1,
        }
    }

    #[test]
    fn blocker_with_permission_stops_immediately() {
        let comments = vec![comment(Severity::Blocker, "custom-blocker", Some("A"))];
        let outcome = apply_severity_actions(&comments, |_| true, |_, _| true, |_| false);
        assert_eq!(outcome.persona_blocker, Some("custom-blocker".to_string()));
    }

    #[test]
    fn critical_without_transition_permission_is_noop() {
        let comments = vec![comment(Severity::Critical, "reviewer", Some("A"))];
        let outcome = apply_severity_actions(&comments, |_| false, |_, _| false, |_| false);
        assert!(outcome.escalate_task_ids.is_empty());
        assert!(outcome.persona_blocker.is_none());
    }

    #[test]
    fn critical_with_permission_escalates_once() {
        let comments = vec![
            comment(Severity::Critical, "reviewer", Some("A")),
            comment(Severity::Critical, "spec-checker", Some("A")),
        ];
        let outcome = apply_severity_actions(&comments, |_| false, |_, _| true, |_| false);
        assert_eq!(outcome.escalate_task_ids, vec!["A".to_string()]);
    }

    #[test]
    fn blocker_without_can_block_downgrades_to_critical() {
        let comments = vec![comment(Severity::Blocker, "reviewer", Some("A"))];
        let outcome = apply_severity_actions(&comments, |_| false, |_, _| true, |_| false);
        assert!(outcome.persona_blocker.is_none());
        assert_eq!(outcome.escalate_task_ids, vec!["A".to_string()]);
    }

    #[test]
    fn warn_emits_warn_recheck_event() {
        let comments = vec![comment(Severity::Warn, "reviewer", Some("A"))];
        let outcome = apply_severity_actions(&comments, |_| false, |_, _| false, |_| false);
        assert_eq!(outcome.next_round_events.len(), 1);
        assert_eq!(outcome.next_round_events[0].event_type, EventType::WarnRecheck);
    }
}
