use async_trait::async_trait;
use crew_types::{PlanActionKind, PlanStatus, TaskStatus};

use crate::error::ProviderError;
use crate::model::{DecisionMeta, DecisionResponse, DecisionSnapshot, TaskUpdateEntry};
use crate::trait_def::DecisionProvider;

/// Deterministic, offline stand-in for a real scheduling-hint model:
/// approves the oldest submitted plan it sees and otherwise does nothing.
#[derive(Debug, Default, Clone)]
pub struct MockDecisionProvider;

#[async_trait]
impl DecisionProvider for MockDecisionProvider {
    async fn run(&self, snapshot: &DecisionSnapshot) -> Result<DecisionResponse, ProviderError> {
        let oldest_submitted = snapshot
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::NeedsApproval && t.plan_status == PlanStatus::Submitted)
            .min_by(|a, b| a.id.cmp(&b.id));

        let task_updates = match oldest_submitted {
            Some(task) => vec![TaskUpdateEntry {
                task_id: task.id.clone(),
                new_status: TaskStatus::NeedsApproval,
                owner: None,
                plan_action: Some(PlanActionKind::Approve),
                feedback: None,
            }],
            None => Vec::new(),
        };

        Ok(DecisionResponse {
            decisions: Vec::new(),
            task_updates,
            messages: Vec::new(),
            stop: Default::default(),
            meta: DecisionMeta {
                provider: "mock".to_string(),
                ..Default::default()
            },
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StatusSummaryView, TaskSnapshot};

    fn snapshot_with(task: TaskSnapshot) -> DecisionSnapshot {
        DecisionSnapshot {
            lead_id: "lead".to_string(),
            teammates: vec!["tm-1".to_string()],
            personas: Vec::new(),
            round_index: 1,
            idle_rounds: 0,
            status_summary: StatusSummaryView::default(),
            events: Vec::new(),
            persona_comments: Vec::new(),
            tasks: vec![task],
            recent_messages: Vec::new(),
            last_decisions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn approves_oldest_submitted_plan() {
        let task = TaskSnapshot {
            id: "A".to_string(),
            title: "t".to_string(),
            status: TaskStatus::NeedsApproval,
            owner: None,
            planner: Some("tm-1".to_string()),
            depends_on: vec![],
            target_paths: vec!["*".to_string()],
            requires_plan: true,
            plan_status: PlanStatus::Submitted,
            current_phase_index: None,
            current_phase: None,
            plan_excerpt: None,
            block_reason: None,
        };
        let provider = MockDecisionProvider;
        let response = provider.run(&snapshot_with(task)).await.unwrap();
        assert_eq!(response.task_updates.len(), 1);
        assert_eq!(response.task_updates[0].plan_action, Some(PlanActionKind::Approve));
    }
}
