mod error;
mod file;
mod store;

pub use error::StateError;
pub use file::{Meta, StateFile, STATE_VERSION};
pub use store::{Collision, PlanAction, StateStore, StatusSummary};

#[cfg(test)]
mod tests {
    use super::*;
    use crew_types::{PlanStatus, ProgressSource, Task, TaskStatus};

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn bootstrap_rejects_duplicate_ids_on_replace() {
        let (_dir, store) = store();
        let tasks = vec![
            Task::new("A", "a", false),
            Task::new("A", "dup", false),
        ];
        let err = store.bootstrap_tasks(tasks, true).unwrap_err();
        assert!(matches!(err, StateError::DuplicateTaskId(id) if id == "A"));
    }

    #[test]
    fn plan_then_execute_happy_path() {
        let (_dir, store) = store();
        let mut a = Task::new("A", "a", true);
        a.target_paths = vec!["src/a".to_string()];
        store.bootstrap_tasks(vec![a], true).unwrap();

        let claimed = store.claim_plan_task("tm-1").unwrap().unwrap();
        assert_eq!(claimed.plan_status, PlanStatus::Drafting);

        store.submit_plan("A", "tm-1", "plan text").unwrap();
        let task = store.get_task("A").unwrap().unwrap();
        assert_eq!(task.plan_status, PlanStatus::Submitted);
        assert_eq!(task.status, TaskStatus::NeedsApproval);

        store
            .review_plan("A", PlanAction::Approve, None)
            .unwrap();
        let task = store.get_task("A").unwrap().unwrap();
        assert_eq!(task.plan_status, PlanStatus::Approved);
        assert_eq!(task.status, TaskStatus::Pending);

        let executing = store.claim_execution_task("tm-1", None).unwrap().unwrap();
        assert_eq!(executing.status, TaskStatus::InProgress);

        store.complete_task("A", "tm-1", "done").unwrap();
        let task = store.get_task("A").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn claim_execution_respects_target_collisions() {
        let (_dir, store) = store();
        let mut a = Task::new("A", "a", false);
        a.target_paths = vec!["src/shared".to_string()];
        let mut b = Task::new("B", "b", false);
        b.target_paths = vec!["src/shared".to_string()];
        store.bootstrap_tasks(vec![a, b], true).unwrap();

        let first = store.claim_execution_task("tm-1", None).unwrap();
        assert!(first.is_some());
        let second = store.claim_execution_task("tm-2", None).unwrap();
        assert!(second.is_none());

        let collisions = store.detect_collisions().unwrap();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].waiting_task_id, "B");
        assert_eq!(collisions[0].running_task_id, "A");
    }

    #[test]
    fn mailbox_seq_strictly_increases() {
        let (_dir, store) = store();
        let first = store.send_message("lead", "tm-1", "hi", None).unwrap();
        let second = store.send_message("lead", "tm-1", "again", None).unwrap();
        assert!(second > first);
    }

    #[test]
    fn bootstrap_resume_mismatch_mentions_field() {
        let (_dir, store) = store();
        let mut a = Task::new("A", "a", false);
        a.target_paths = vec!["src/A".to_string()];
        store.bootstrap_tasks(vec![a], true).unwrap();

        let mut a_again = Task::new("A", "a", false);
        a_again.target_paths = vec!["src/other".to_string()];
        let err = store.bootstrap_tasks(vec![a_again], false).unwrap_err();
        match err {
            StateError::ResumeMismatch(msg) => assert!(msg.contains("A:target_paths")),
            other => panic!("expected resume mismatch, got {other:?}"),
        }
    }

    #[test]
    fn requeue_in_progress_marks_pending_with_system_log() {
        let (_dir, store) = store();
        let a = Task::new("A", "a", false);
        store.bootstrap_tasks(vec![a], true).unwrap();
        store.claim_execution_task("tm-1", None).unwrap();

        let requeued = store.requeue_in_progress_tasks().unwrap();
        assert_eq!(requeued, vec!["A".to_string()]);

        let task = store.get_task("A").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.owner.is_none());
        let last = task.progress_log.last().unwrap();
        assert_eq!(last.source, ProgressSource::System);
        assert!(last.text.contains("resume recovery"));
    }

    #[test]
    fn progress_marker_advances_on_mutation() {
        let (_dir, store) = store();
        let before = store.progress_marker().unwrap();
        store
            .bootstrap_tasks(vec![Task::new("A", "a", false)], true)
            .unwrap();
        let after = store.progress_marker().unwrap();
        assert!(after.0 > before.0);
    }
}
