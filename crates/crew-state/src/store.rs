use std::path::{Path, PathBuf};

use crew_types::{
    now_seconds, MailMessage, PlanStatus, ProgressSource, Task, TaskStatus,
    DEFAULT_PROGRESS_LOG_CAP,
};

use crate::error::StateError;
use crate::file::{self, LockGuard, StateFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Approve,
    Reject,
    Revise,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub waiting_task_id: String,
    pub running_task_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: u64,
    pub in_progress: u64,
    pub blocked: u64,
    pub needs_approval: u64,
    pub completed: u64,
}

/// The crash-safe, process-locked repository of task and mailbox state.
///
/// Every mutating method takes the exclusive lock on `state.lock`, reads
/// `state.json`, mutates in memory, and writes back via tmp+rename before
/// releasing the lock. Read-only methods tolerate a stale snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn with_locked<T>(
        &self,
        f: impl FnOnce(&mut StateFile) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let _guard = LockGuard::acquire(&self.dir)?;
        let mut state = file::load(&self.dir)?;
        let result = f(&mut state)?;
        file::write_atomic(&self.dir, &state)?;
        Ok(result)
    }

    fn touch(state: &mut StateFile) {
        state.meta.progress_counter += 1;
        state.meta.last_progress_at = now_seconds();
    }

    // -- bootstrap / reads -------------------------------------------------

    pub fn bootstrap_tasks(&self, tasks: Vec<Task>, replace: bool) -> Result<(), StateError> {
        self.with_locked(|state| {
            if replace {
                state.tasks.clear();
                for task in tasks {
                    if state.tasks.contains_key(&task.id) {
                        return Err(StateError::DuplicateTaskId(task.id.clone()));
                    }
                    state.tasks.insert(task.id.clone(), task);
                }
            } else {
                for task in tasks {
                    match state.tasks.get(&task.id) {
                        Some(existing) => {
                            if existing.target_paths != task.target_paths {
                                return Err(StateError::ResumeMismatch(format!(
                                    "{}:target_paths",
                                    task.id
                                )));
                            }
                        }
                        None => {
                            state.tasks.insert(task.id.clone(), task);
                        }
                    }
                }
            }
            Self::touch(state);
            Ok(())
        })
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>, StateError> {
        let state = file::load(&self.dir)?;
        Ok(state.tasks.into_values().collect())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StateError> {
        let state = file::load(&self.dir)?;
        Ok(state.tasks.get(id).cloned())
    }

    // -- planning ------------------------------------------------------------

    pub fn claim_plan_task(&self, worker: &str) -> Result<Option<Task>, StateError> {
        self.with_locked(|state| {
            let claimable_id = state
                .tasks
                .values()
                .filter(|t| {
                    t.requires_plan
                        && matches!(
                            t.plan_status,
                            PlanStatus::Pending | PlanStatus::Rejected | PlanStatus::RevisionRequested
                        )
                        && t.planner.is_none()
                        && deps_completed(state, t)
                })
                .map(|t| t.id.clone())
                .min();
            let Some(id) = claimable_id else {
                return Ok(None);
            };
            let task = state.tasks.get_mut(&id).expect("id came from map");
            task.planner = Some(worker.to_string());
            task.plan_status = PlanStatus::Drafting;
            task.updated_at = now_seconds();
            let claimed = task.clone();
            Self::touch(state);
            Ok(Some(claimed))
        })
    }

    pub fn submit_plan(&self, id: &str, worker: &str, text: &str) -> Result<(), StateError> {
        self.with_locked(|state| {
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| StateError::UnknownTask(id.to_string()))?;
            if task.planner.as_deref() != Some(worker) || task.plan_status != PlanStatus::Drafting {
                return Err(StateError::InvalidTransition {
                    task_id: id.to_string(),
                    detail: "submit_plan requires planner match and drafting status".to_string(),
                });
            }
            task.plan_text = Some(text.to_string());
            task.plan_status = PlanStatus::Submitted;
            task.status = TaskStatus::NeedsApproval;
            task.updated_at = now_seconds();
            Self::touch(state);
            Ok(())
        })
    }

    pub fn review_plan(
        &self,
        id: &str,
        action: PlanAction,
        feedback: Option<String>,
    ) -> Result<(), StateError> {
        self.with_locked(|state| {
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| StateError::UnknownTask(id.to_string()))?;
            if task.status != TaskStatus::NeedsApproval || task.plan_status != PlanStatus::Submitted {
                return Err(StateError::InvalidTransition {
                    task_id: id.to_string(),
                    detail: "review_plan requires needs_approval + submitted".to_string(),
                });
            }
            match action {
                PlanAction::Approve => {
                    task.plan_status = PlanStatus::Approved;
                    task.status = TaskStatus::Pending;
                    task.owner = None;
                }
                PlanAction::Reject => {
                    task.plan_status = PlanStatus::Rejected;
                    task.planner = None;
                    task.status = TaskStatus::Pending;
                }
                PlanAction::Revise => {
                    task.plan_status = PlanStatus::RevisionRequested;
                    task.planner = None;
                    task.status = TaskStatus::Pending;
                }
            }
            task.plan_feedback = feedback;
            task.updated_at = now_seconds();
            Self::touch(state);
            Ok(())
        })
    }

    // -- execution -------------------------------------------------------

    pub fn claim_execution_task(
        &self,
        worker: &str,
        allowed: Option<&[String]>,
    ) -> Result<Option<Task>, StateError> {
        self.with_locked(|state| {
            let in_progress_targets: Vec<Vec<String>> = state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::InProgress)
                .map(|t| t.target_paths.clone())
                .collect();

            let claimable_id = state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .filter(|t| allowed.map(|ids| ids.iter().any(|i| i == &t.id)).unwrap_or(true))
                .filter(|t| deps_completed(state, t))
                .filter(|t| {
                    (t.requires_plan && t.plan_status == PlanStatus::Approved) || !t.requires_plan
                })
                .filter(|t| {
                    !in_progress_targets
                        .iter()
                        .any(|running| overlaps(&t.target_paths, running))
                })
                .map(|t| t.id.clone())
                .min();

            let Some(id) = claimable_id else {
                return Ok(None);
            };
            let task = state.tasks.get_mut(&id).expect("id came from map");
            task.owner = Some(worker.to_string());
            task.status = TaskStatus::InProgress;
            task.block_reason = None;
            task.updated_at = now_seconds();
            let claimed = task.clone();
            Self::touch(state);
            Ok(Some(claimed))
        })
    }

    pub fn complete_task(&self, id: &str, worker: &str, summary: &str) -> Result<(), StateError> {
        self.with_locked(|state| {
            let task = Self::owned_in_progress(state, id, worker)?;
            task.status = TaskStatus::Completed;
            task.result_summary = Some(summary.to_string());
            let now = now_seconds();
            task.completed_at = Some(now);
            task.updated_at = now;
            Self::touch(state);
            Ok(())
        })
    }

    pub fn mark_task_blocked(&self, id: &str, worker: &str, reason: &str) -> Result<(), StateError> {
        self.with_locked(|state| {
            let task = Self::owned_in_progress(state, id, worker)?;
            task.status = TaskStatus::Blocked;
            task.block_reason = Some(reason.to_string());
            task.updated_at = now_seconds();
            Self::touch(state);
            Ok(())
        })
    }

    pub fn handoff_task_phase(
        &self,
        id: &str,
        worker: &str,
        next_index: u32,
    ) -> Result<(), StateError> {
        self.with_locked(|state| {
            let task = Self::owned_in_progress(state, id, worker)?;
            task.current_phase_index = next_index;
            task.status = TaskStatus::Pending;
            task.owner = None;
            task.updated_at = now_seconds();
            Self::touch(state);
            Ok(())
        })
    }

    fn owned_in_progress<'a>(
        state: &'a mut StateFile,
        id: &str,
        worker: &str,
    ) -> Result<&'a mut Task, StateError> {
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownTask(id.to_string()))?;
        if task.status != TaskStatus::InProgress {
            return Err(StateError::InvalidTransition {
                task_id: id.to_string(),
                detail: "task is not in_progress".to_string(),
            });
        }
        if task.owner.as_deref() != Some(worker) {
            return Err(StateError::OwnerMismatch {
                task_id: id.to_string(),
                expected: task.owner.clone(),
                actual: worker.to_string(),
            });
        }
        Ok(task)
    }

    // -- decision application ---------------------------------------------

    pub fn apply_task_update(
        &self,
        id: &str,
        new_status: TaskStatus,
        owner: Option<String>,
        plan_action: Option<PlanAction>,
        feedback: Option<String>,
    ) -> Result<(), StateError> {
        if let Some(action) = plan_action {
            return self.review_plan(id, action, feedback);
        }
        self.with_locked(|state| {
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| StateError::UnknownTask(id.to_string()))?;
            task.status = new_status;
            if owner.is_some() {
                task.owner = owner;
            }
            task.updated_at = now_seconds();
            Self::touch(state);
            Ok(())
        })
    }

    pub fn append_task_progress_log(
        &self,
        id: &str,
        source: ProgressSource,
        text: &str,
        cap: Option<usize>,
    ) -> Result<(), StateError> {
        self.with_locked(|state| {
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| StateError::UnknownTask(id.to_string()))?;
            task.push_progress_log(source, text, cap.unwrap_or(DEFAULT_PROGRESS_LOG_CAP));
            task.updated_at = now_seconds();
            Self::touch(state);
            Ok(())
        })
    }

    pub fn requeue_in_progress_tasks(&self) -> Result<Vec<String>, StateError> {
        self.with_locked(|state| {
            let mut requeued = Vec::new();
            for task in state.tasks.values_mut() {
                if task.status == TaskStatus::InProgress {
                    task.status = TaskStatus::Pending;
                    task.owner = None;
                    task.push_progress_log(
                        ProgressSource::System,
                        "resume recovery: requeued in-progress task",
                        DEFAULT_PROGRESS_LOG_CAP,
                    );
                    task.updated_at = now_seconds();
                    requeued.push(task.id.clone());
                }
            }
            requeued.sort();
            Self::touch(state);
            Ok(requeued)
        })
    }

    // -- mailbox ------------------------------------------------------------

    pub fn send_message(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
        task_id: Option<String>,
    ) -> Result<u64, StateError> {
        self.with_locked(|state| {
            state.meta.sequence += 1;
            let seq = state.meta.sequence;
            state
                .messages
                .push(MailMessage::new(seq, sender, receiver, content, task_id));
            Self::touch(state);
            Ok(seq)
        })
    }

    pub fn recent_messages(&self, limit: usize) -> Result<Vec<MailMessage>, StateError> {
        let state = file::load(&self.dir)?;
        let len = state.messages.len();
        let start = len.saturating_sub(limit);
        Ok(state.messages[start..].to_vec())
    }

    // -- collisions / summaries ---------------------------------------------

    pub fn detect_collisions(&self) -> Result<Vec<Collision>, StateError> {
        let state = file::load(&self.dir)?;
        let running: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::InProgress)
            .collect();
        let mut collisions = Vec::new();
        for waiting in state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && deps_completed(&state, t))
        {
            for run in &running {
                if waiting.targets_overlap(run) {
                    collisions.push(Collision {
                        waiting_task_id: waiting.id.clone(),
                        running_task_id: run.id.clone(),
                    });
                }
            }
        }
        collisions.sort_by(|a, b| {
            (a.waiting_task_id.as_str(), a.running_task_id.as_str())
                .cmp(&(b.waiting_task_id.as_str(), b.running_task_id.as_str()))
        });
        Ok(collisions)
    }

    pub fn status_summary(&self) -> Result<StatusSummary, StateError> {
        let state = file::load(&self.dir)?;
        let mut summary = StatusSummary::default();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Blocked => summary.blocked += 1,
                TaskStatus::NeedsApproval => summary.needs_approval += 1,
                TaskStatus::Completed => summary.completed += 1,
            }
        }
        Ok(summary)
    }

    pub fn progress_marker(&self) -> Result<(u64, f64), StateError> {
        let state = file::load(&self.dir)?;
        Ok((state.meta.progress_counter, state.meta.last_progress_at))
    }

    pub fn all_tasks_completed(&self) -> Result<bool, StateError> {
        let state = file::load(&self.dir)?;
        Ok(!state.tasks.is_empty()
            && state.tasks.values().all(|t| t.status == TaskStatus::Completed))
    }

    pub fn has_pending_approvals(&self) -> Result<bool, StateError> {
        let state = file::load(&self.dir)?;
        Ok(state.tasks.values().any(|t| t.status == TaskStatus::NeedsApproval))
    }

    pub fn list_submitted_plans(&self) -> Result<Vec<Task>, StateError> {
        let state = file::load(&self.dir)?;
        let mut submitted: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::NeedsApproval && t.plan_status == PlanStatus::Submitted)
            .cloned()
            .collect();
        submitted.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(submitted)
    }
}

fn deps_completed(state: &StateFile, task: &Task) -> bool {
    task.depends_on.iter().all(|dep| {
        state
            .tasks
            .get(dep)
            .map(|d| d.status == TaskStatus::Completed)
            .unwrap_or(false)
    })
}

fn overlaps(a: &[String], b: &[String]) -> bool {
    for x in a {
        if x == "*" {
            continue;
        }
        for y in b {
            if y == "*" {
                continue;
            }
            if x == y {
                return true;
            }
        }
    }
    false
}
