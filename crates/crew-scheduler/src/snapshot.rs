use crew_provider::{
    DecisionSnapshot, DecisionSummary, MessageSnapshot, StatusSummaryView, TaskSnapshot,
};
use crew_state::{StateStore, StatusSummary};
use crew_types::{Event, MailMessage, PersonaComment, PersonaDefinition, Task};

use crate::error::SchedulerError;
use crate::round::{ExecutionSubjectMode, PolicyContext};

pub(crate) fn short(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        truncated.push_str("...");
        truncated
    }
}

fn status_summary_view(summary: StatusSummary) -> StatusSummaryView {
    StatusSummaryView {
        pending: summary.pending,
        in_progress: summary.in_progress,
        blocked: summary.blocked,
        needs_approval: summary.needs_approval,
        completed: summary.completed,
    }
}

fn task_snapshot(task: &Task, policy: &PolicyContext) -> TaskSnapshot {
    TaskSnapshot {
        id: task.id.clone(),
        title: task.title.clone(),
        status: task.status,
        owner: task.owner.clone(),
        planner: task.planner.clone(),
        depends_on: task.depends_on.iter().cloned().collect(),
        target_paths: task.target_paths.clone(),
        requires_plan: task.requires_plan,
        plan_status: task.plan_status,
        current_phase_index: Some(task.current_phase_index),
        current_phase: policy.current_phase(task),
        plan_excerpt: task.plan_text.as_deref().map(|text| short(text, 240)),
        block_reason: task.block_reason.as_deref().map(|text| short(text, 180)),
    }
}

fn message_snapshot(message: &MailMessage) -> MessageSnapshot {
    MessageSnapshot {
        seq: message.seq,
        sender: message.sender.clone(),
        receiver: message.receiver.clone(),
        task_id: message.task_id.clone(),
        content_short: short(&message.content, 120),
    }
}

/// Builds the read-only round snapshot handed to the provider, matching
/// `_build_snapshot`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_snapshot(
    store: &StateStore,
    lead_id: &str,
    execution_subject_ids: &[String],
    personas: &[PersonaDefinition],
    _mode: ExecutionSubjectMode,
    policy: &PolicyContext,
    events: &[Event],
    persona_comments: &[PersonaComment],
    round_index: u64,
    idle_rounds: u64,
    last_decisions: &[DecisionSummary],
) -> Result<DecisionSnapshot, SchedulerError> {
    let tasks: Vec<TaskSnapshot> = store.list_tasks()?.iter().map(|task| task_snapshot(task, policy)).collect();
    let messages: Vec<MessageSnapshot> = store.recent_messages(20)?.iter().map(message_snapshot).collect();

    Ok(DecisionSnapshot {
        lead_id: lead_id.to_string(),
        teammates: execution_subject_ids.to_vec(),
        personas: personas.to_vec(),
        round_index,
        idle_rounds,
        status_summary: status_summary_view(store.status_summary()?),
        events: events.to_vec(),
        persona_comments: persona_comments.to_vec(),
        tasks,
        recent_messages: messages,
        last_decisions: last_decisions.to_vec(),
    })
}
