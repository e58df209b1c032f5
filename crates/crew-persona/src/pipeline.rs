use std::collections::BTreeSet;

use crew_types::{Event, PersonaComment, PersonaDefinition, MAX_COMMENT_DETAIL_LEN};

pub const DEFAULT_MAX_COMMENTS_PER_EVENT: usize = 2;

fn truncate_detail(detail: String) -> String {
    if detail.chars().count() <= MAX_COMMENT_DETAIL_LEN {
        detail
    } else {
        detail.chars().take(MAX_COMMENT_DETAIL_LEN).collect()
    }
}

fn format_detail(event: &Event) -> String {
    let mut text = format!("observed {:?}", event.event_type);
    if let Some(task_id) = &event.task_id {
        text.push_str(&format!(" task={task_id}"));
    }
    if !event.detail.is_empty() {
        text.push_str(&format!(" detail={}", event.detail));
    }
    truncate_detail(text)
}

/// Scores each event against the enabled personas active for its task and
/// returns the ordered, capped set of advisory comments for the round.
///
/// `active_for_task` resolves a task id to its active persona id set; it
/// returns `None` when the event has no task id or the task is unknown,
/// meaning "every enabled persona is active".
pub fn evaluate_events(
    events: &[Event],
    personas: &[PersonaDefinition],
    active_for_task: impl Fn(Option<&str>) -> Option<BTreeSet<String>>,
    round: u64,
    max_comments_per_event: usize,
) -> Vec<PersonaComment> {
    let mut comments = Vec::new();
    for event in events {
        let Some(severity) = event.event_type.default_severity() else {
            continue;
        };
        let active_ids = active_for_task(event.task_id.as_deref());
        let detail = format_detail(event);

        let mut candidates: Vec<PersonaComment> = personas
            .iter()
            .filter(|p| p.enabled)
            .filter(|p| active_ids.as_ref().map(|ids| ids.contains(&p.id)).unwrap_or(true))
            .map(|p| PersonaComment {
                persona_id: p.id.clone(),
                severity,
                task_id: event.task_id.clone(),
                event_type: event.event_type,
                detail: detail.clone(),
                round,
            })
            .collect();

        candidates.sort_by(|a, b| {
            (a.severity, a.persona_id.as_str(), a.task_id.as_deref().unwrap_or(""))
                .cmp(&(b.severity, b.persona_id.as_str(), b.task_id.as_deref().unwrap_or("")))
        });
        candidates.truncate(max_comments_per_event);
        comments.extend(candidates);
    }
    comments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_types::{EventType, PersonaRole, Severity};

    fn persona(id: &str) -> PersonaDefinition {
        PersonaDefinition {
            id: id.to_string(),
            role: PersonaRole::Custom,
            focus: "focus".to_string(),
            can_block: false,
            enabled: true,
            execution: None,
        }
    }

    #[test]
    fn sorts_by_severity_then_persona_then_task() {
        let events = vec![Event::new(EventType::Blocked, "x").with_task("A")];
        let personas = vec![persona("b"), persona("a")];
        let comments = evaluate_events(&events, &personas, |_| None, 1, 10);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].persona_id, "a");
        assert_eq!(comments[1].persona_id, "b");
    }

    #[test]
    fn caps_at_max_comments_per_event() {
        let events = vec![Event::new(EventType::Kickoff, "x")];
        let personas = vec![persona("a"), persona("b"), persona("c")];
        let comments = evaluate_events(&events, &personas, |_| None, 1, 2);
        assert_eq!(comments.len(), 2);
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        // every EventType variant is in the table, so construct via detail check instead:
        let events = vec![Event::new(EventType::WarnRecheck, "x")];
        let personas = vec![persona("a")];
        let comments = evaluate_events(&events, &personas, |_| None, 1, 2);
        assert_eq!(comments[0].severity, Severity::Warn);
    }
}
