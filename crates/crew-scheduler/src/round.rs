use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crew_adapter::{ProgressCallback, TeammateAdapter};
use crew_persona::{apply_severity_actions, evaluate_events, ResolvedPolicy, DEFAULT_MAX_COMMENTS_PER_EVENT};
use crew_provider::{DecisionProvider, DecisionSummary};
use crew_state::{PlanAction, StateStore, StatusSummary};
use crew_types::{
    now_seconds, Event, EventType, PersonaDefaults, PersonaDefinition, ProgressSource, Severity,
    Task, TaskStatus,
};

use crate::config::RunConfig;
use crate::error::SchedulerError;
use crate::snapshot::{build_snapshot, short};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionSubjectMode {
    Teammate,
    Persona,
}

/// Bundles the inputs `crew_persona::resolve` needs so round code can ask
/// phase/policy questions about a task without re-threading four arguments
/// everywhere.
#[derive(Debug, Clone)]
pub(crate) struct PolicyContext {
    pub mode: ExecutionSubjectMode,
    pub defaults: PersonaDefaults,
    pub enabled_persona_ids: BTreeSet<String>,
    pub phase_mode_active: bool,
}

impl PolicyContext {
    pub fn phase_order(&self) -> &[String] {
        &self.defaults.phase_order
    }

    pub fn resolve(&self, task: &Task) -> ResolvedPolicy {
        crew_persona::resolve(task, &self.defaults, &self.enabled_persona_ids, self.phase_mode_active)
    }

    pub fn current_phase(&self, task: &Task) -> Option<String> {
        task_current_phase(self.mode, self.phase_order(), task)
    }

    pub fn next_phase(&self, task: &Task) -> Option<(u32, String)> {
        task_next_phase(self.mode, self.phase_order(), task)
    }

    pub fn can_transition(&self, task: &Task, persona_id: &str) -> bool {
        if self.mode != ExecutionSubjectMode::Persona {
            return true;
        }
        crew_persona::can_transition(&self.resolve(task), persona_id)
    }
}

pub(crate) fn task_current_phase(mode: ExecutionSubjectMode, phase_order: &[String], task: &Task) -> Option<String> {
    if mode != ExecutionSubjectMode::Persona || phase_order.is_empty() {
        return None;
    }
    phase_order.get(task.current_phase_index as usize).cloned()
}

pub(crate) fn task_next_phase(mode: ExecutionSubjectMode, phase_order: &[String], task: &Task) -> Option<(u32, String)> {
    if mode != ExecutionSubjectMode::Persona || phase_order.is_empty() {
        return None;
    }
    let next_index = task.current_phase_index + 1;
    phase_order
        .get(next_index as usize)
        .map(|name| (next_index, name.clone()))
}

fn resolve_execution_subjects(config: &RunConfig) -> Result<(ExecutionSubjectMode, Vec<String>), SchedulerError> {
    let persona_ids = config.resolved_execution_personas();
    if !persona_ids.is_empty() {
        return Ok((ExecutionSubjectMode::Persona, persona_ids));
    }
    let teammate_ids = config.resolved_teammates();
    if !teammate_ids.is_empty() {
        return Ok((ExecutionSubjectMode::Teammate, teammate_ids));
    }
    Err(SchedulerError::NoExecutionSubjects)
}

fn allowed_execution_task_ids(
    store: &StateStore,
    policy: &PolicyContext,
    subject_id: &str,
) -> Result<Option<Vec<String>>, SchedulerError> {
    if policy.mode != ExecutionSubjectMode::Persona {
        return Ok(None);
    }
    let mut allowed = Vec::new();
    for task in store.list_tasks()? {
        if policy.resolve(&task).executor_personas.contains(subject_id) {
            allowed.push(task.id.clone());
        }
    }
    Ok(Some(allowed))
}

fn active_personas_map(
    store: &StateStore,
    policy: &PolicyContext,
    events: &[Event],
) -> Result<HashMap<String, BTreeSet<String>>, SchedulerError> {
    let mut map = HashMap::new();
    if policy.mode != ExecutionSubjectMode::Persona {
        return Ok(map);
    }
    for event in events {
        let Some(task_id) = &event.task_id else { continue };
        if map.contains_key(task_id) {
            continue;
        }
        let active = match store.get_task(task_id)? {
            Some(task) => policy.resolve(&task).active_personas,
            None => BTreeSet::new(),
        };
        map.insert(task_id.clone(), active);
    }
    Ok(map)
}

fn append_progress_log(
    store: &StateStore,
    task_id: &str,
    source: ProgressSource,
    text: &str,
    cap: usize,
) -> Result<(), SchedulerError> {
    store.append_task_progress_log(task_id, source, text, Some(cap))?;
    Ok(())
}

async fn teammate_process_plan(
    store: &StateStore,
    adapter: &dyn TeammateAdapter,
    lead_id: &str,
    teammate_id: &str,
) -> Result<(bool, Vec<Event>), SchedulerError> {
    let Some(task) = store.claim_plan_task(teammate_id)? else {
        return Ok((false, Vec::new()));
    };
    let plan_text = adapter.build_plan(teammate_id, &task).await?;
    store.submit_plan(&task.id, teammate_id, &plan_text)?;
    store.send_message(
        teammate_id,
        lead_id,
        &format!("plan submitted task={}", task.id),
        Some(task.id.clone()),
    )?;
    Ok((
        true,
        vec![Event::new(EventType::NeedsApproval, "plan submitted")
            .with_task(task.id.clone())
            .with_teammate(teammate_id.to_string())],
    ))
}

async fn teammate_process_execution(
    store: &StateStore,
    adapter: &dyn TeammateAdapter,
    lead_id: &str,
    policy: &PolicyContext,
    progress_log_cap: usize,
    teammate_id: &str,
) -> Result<(bool, Vec<Event>), SchedulerError> {
    let allowed = allowed_execution_task_ids(store, policy, teammate_id)?;
    if let Some(ids) = &allowed {
        if ids.is_empty() {
            return Ok((false, Vec::new()));
        }
    }
    let Some(task) = store.claim_execution_task(teammate_id, allowed.as_deref())? else {
        return Ok((false, Vec::new()));
    };

    let phase = policy.current_phase(&task);
    let mut start_detail = format!(
        "execution started {}={teammate_id}",
        if policy.mode == ExecutionSubjectMode::Persona { "persona" } else { "teammate" }
    );
    if let Some(phase_name) = &phase {
        start_detail.push_str(&format!(" phase={phase_name}"));
    }
    append_progress_log(store, &task.id, ProgressSource::System, &start_detail, progress_log_cap)?;

    let task_for_execution = store.get_task(&task.id)?.unwrap_or_else(|| task.clone());

    let cb_store = store.clone();
    let cb_task_id = task.id.clone();
    let progress: ProgressCallback = Arc::new(move |source: &str, text: &str| {
        let progress_source = match source {
            "stdout" => ProgressSource::Stdout,
            "stderr" => ProgressSource::Stderr,
            _ => ProgressSource::System,
        };
        let _ = cb_store.append_task_progress_log(&cb_task_id, progress_source, text, Some(progress_log_cap));
    });

    match adapter.execute_task(teammate_id, &task_for_execution, Some(progress)).await {
        Err(error) => {
            let reason = short(&error.to_string(), 180);
            store.mark_task_blocked(&task.id, teammate_id, &reason)?;
            append_progress_log(
                store,
                &task.id,
                ProgressSource::System,
                &format!("execution blocked: {reason}"),
                progress_log_cap,
            )?;
            store.send_message(
                teammate_id,
                lead_id,
                &format!("task blocked task={} reason={reason}", task.id),
                Some(task.id.clone()),
            )?;
            Ok((
                true,
                vec![Event::new(EventType::Blocked, reason)
                    .with_task(task.id.clone())
                    .with_teammate(teammate_id.to_string())],
            ))
        }
        Ok(result) => {
            if let Some((next_index, next_name)) = policy.next_phase(&task_for_execution) {
                store.handoff_task_phase(&task.id, teammate_id, next_index)?;
                append_progress_log(
                    store,
                    &task.id,
                    ProgressSource::System,
                    &format!("phase handoff to {next_name}: {}", short(&result, 160)),
                    progress_log_cap,
                )?;
                store.send_message(
                    teammate_id,
                    lead_id,
                    &format!("task handed off task={} next_phase={next_name}", task.id),
                    Some(task.id.clone()),
                )?;
                return Ok((
                    true,
                    vec![Event::new(EventType::TaskHandoff, format!("next_phase={next_name}"))
                        .with_task(task.id.clone())
                        .with_teammate(teammate_id.to_string())],
                ));
            }

            store.complete_task(&task.id, teammate_id, &result)?;
            append_progress_log(
                store,
                &task.id,
                ProgressSource::System,
                &format!("execution completed: {}", short(&result, 160)),
                progress_log_cap,
            )?;
            store.send_message(
                teammate_id,
                lead_id,
                &format!("task completed task={}", task.id),
                Some(task.id.clone()),
            )?;
            Ok((
                true,
                vec![Event::new(EventType::TaskCompleted, short(&result, 160))
                    .with_task(task.id.clone())
                    .with_teammate(teammate_id.to_string())],
            ))
        }
    }
}

fn collect_collision_events(
    store: &StateStore,
    cache: &mut HashSet<(String, String)>,
) -> Result<Vec<Event>, SchedulerError> {
    let collisions = store.detect_collisions()?;
    let mut current = HashSet::new();
    let mut events = Vec::new();
    for item in &collisions {
        let key = (item.waiting_task_id.clone(), item.running_task_id.clone());
        current.insert(key.clone());
        if cache.contains(&key) {
            continue;
        }
        events.push(
            Event::new(
                EventType::Collision,
                format!("waiting={} running={}", item.waiting_task_id, item.running_task_id),
            )
            .with_task(item.waiting_task_id.clone()),
        );
    }
    *cache = current;
    Ok(events)
}

struct ApplyResult {
    applied_updates: u64,
    applied_plan_actions: u64,
}

fn apply_decision(
    store: &StateStore,
    lead_id: &str,
    decision: &crew_provider::DecisionResponse,
    history: &mut Vec<DecisionSummary>,
) -> Result<ApplyResult, SchedulerError> {
    let mut applied_updates = 0u64;
    let mut applied_plan_actions = 0u64;

    for update in &decision.task_updates {
        let Some(current) = store.get_task(&update.task_id)? else {
            tracing::debug!(task_id = %update.task_id, "skip update: task not found");
            continue;
        };
        if matches!(update.new_status, TaskStatus::InProgress | TaskStatus::Completed) {
            tracing::debug!(task_id = %update.task_id, "skip update: execution state managed by teammates");
            continue;
        }
        if update.new_status == TaskStatus::Blocked && current.status != TaskStatus::Blocked {
            tracing::debug!(task_id = %update.task_id, "skip update: blocked transition not allowed");
            continue;
        }
        let plan_action = update.plan_action.map(|kind| match kind {
            crew_types::PlanActionKind::Approve => PlanAction::Approve,
            crew_types::PlanActionKind::Reject => PlanAction::Reject,
            crew_types::PlanActionKind::Revise => PlanAction::Revise,
        });
        if plan_action.is_some()
            && !(current.status == TaskStatus::NeedsApproval && current.plan_status == crew_types::PlanStatus::Submitted)
        {
            tracing::debug!(task_id = %update.task_id, "skip update: plan action not applicable");
            continue;
        }
        let apply_result = store.apply_task_update(
            &update.task_id,
            update.new_status,
            update.owner.clone(),
            plan_action,
            update.feedback.clone(),
        );
        if apply_result.is_err() {
            tracing::debug!(task_id = %update.task_id, "skip update: state transition rejected");
            continue;
        }
        applied_updates += 1;
        if plan_action.is_some() {
            applied_plan_actions += 1;
        }
        history.push(DecisionSummary {
            decision_type: "task_update".to_string(),
            task_id: Some(update.task_id.clone()),
            teammate: None,
            reason_short: format!("new_status={:?}", update.new_status),
        });
    }

    for message in &decision.messages {
        store.send_message(lead_id, &message.to, &message.text_short, None)?;
        history.push(DecisionSummary {
            decision_type: "message".to_string(),
            task_id: None,
            teammate: Some(message.to.clone()),
            reason_short: message.text_short.clone(),
        });
    }

    let overflow = history.len().saturating_sub(10);
    if overflow > 0 {
        history.drain(0..overflow);
    }

    Ok(ApplyResult { applied_updates, applied_plan_actions })
}

fn auto_release_nonplan_approvals(store: &StateStore, lead_id: &str) -> Result<Vec<String>, SchedulerError> {
    let mut released = Vec::new();
    for task in store.list_tasks()? {
        if task.status != TaskStatus::NeedsApproval {
            continue;
        }
        if task.requires_plan && task.plan_status == crew_types::PlanStatus::Submitted {
            continue;
        }
        let receiver = task.owner.clone().or_else(|| task.planner.clone()).unwrap_or_else(|| lead_id.to_string());
        if store
            .apply_task_update(&task.id, TaskStatus::Pending, None, None, None)
            .is_err()
        {
            continue;
        }
        store.send_message(
            lead_id,
            &receiver,
            &format!("approval cleared by fallback for {}", task.id),
            Some(task.id.clone()),
        )?;
        released.push(task.id.clone());
    }
    Ok(released)
}

fn severity_key(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warn => "warn",
        Severity::Critical => "critical",
        Severity::Blocker => "blocker",
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PersonaMetrics {
    pub severity_counts: HashMap<String, u64>,
    pub persona_blocker_triggered: bool,
    pub warn_recheck_queue_remaining: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunResult {
    pub stop_reason: String,
    pub elapsed_seconds: f64,
    pub summary: StatusSummary,
    pub tasks_total: usize,
    pub provider_calls: u64,
    pub provider: String,
    pub human_approval: bool,
    pub persona_metrics: PersonaMetrics,
}

/// Drives the task board to completion or a stop condition, one round at a
/// time. A round: each execution subject advances its plan or in-flight
/// task, fresh collisions surface as events, persona advisories evaluate
/// against those events, then (unless a blocker fired) the decision
/// provider is consulted and its `task_updates`/`messages` applied.
pub async fn run(
    store: StateStore,
    adapter: Arc<dyn TeammateAdapter>,
    provider: Arc<dyn DecisionProvider>,
    config: RunConfig,
) -> Result<RunResult, SchedulerError> {
    let start = now_seconds();
    let (mode, execution_subject_ids) = resolve_execution_subjects(&config)?;
    let personas: Vec<PersonaDefinition> = config.personas.clone().unwrap_or_else(crew_types::default_personas);
    let persona_by_id: HashMap<String, PersonaDefinition> =
        personas.iter().map(|p| (p.id.clone(), p.clone())).collect();
    let defaults = config.persona_defaults.clone().unwrap_or_default();
    let phase_mode_active = mode == ExecutionSubjectMode::Persona && !defaults.phase_order.is_empty();
    let enabled_persona_ids: BTreeSet<String> =
        personas.iter().filter(|p| p.enabled).map(|p| p.id.clone()).collect();
    let policy = PolicyContext { mode, defaults, enabled_persona_ids, phase_mode_active };

    let human_approval = config.resolved_human_approval();
    let auto_approve_fallback = config.resolved_auto_approve_fallback();
    let progress_log_cap = config.task_progress_log_limit;

    let mut idle_rounds = 0u64;
    let mut stop_reason = "max_rounds".to_string();
    let mut collision_cache: HashSet<(String, String)> = HashSet::new();
    let mut provider_calls = 0u64;
    let mut decision_history: Vec<DecisionSummary> = Vec::new();
    let mut persona_severity_counts: HashMap<String, u64> = HashMap::new();
    let mut persona_blocker_triggered = false;
    let mut pending_events = vec![Event::new(EventType::Kickoff, "start")];

    for round_index in 1..=config.max_rounds {
        let marker_before = store.progress_marker()?;
        let mut round_events = std::mem::take(&mut pending_events);
        let mut progress_from_teammates = false;

        for teammate_id in &execution_subject_ids {
            let (changed, events) =
                teammate_process_plan(&store, adapter.as_ref(), &config.lead_id, teammate_id).await?;
            if changed {
                progress_from_teammates = true;
                round_events.extend(events);
                continue;
            }
            let (changed, events) = teammate_process_execution(
                &store,
                adapter.as_ref(),
                &config.lead_id,
                &policy,
                progress_log_cap,
                teammate_id,
            )
            .await?;
            if changed {
                progress_from_teammates = true;
                round_events.extend(events);
            }
        }

        round_events.extend(collect_collision_events(&store, &mut collision_cache)?);

        if store.all_tasks_completed()? {
            stop_reason = "all_tasks_completed".to_string();
            break;
        }

        let marker_after = store.progress_marker()?;
        let progressed = progress_from_teammates || marker_after.0 > marker_before.0;
        if progressed {
            idle_rounds = 0;
        } else {
            idle_rounds += 1;
            let interval = config.no_progress_event_interval.max(1);
            if idle_rounds % interval == 0 {
                round_events.push(Event::new(EventType::NoProgress, format!("idle_rounds={idle_rounds}")));
            }
        }

        if human_approval && store.has_pending_approvals()? {
            stop_reason = "human_approval_required".to_string();
            tracing::info!("waiting for human approval");
            break;
        }

        if !round_events.is_empty() {
            let active_map = active_personas_map(&store, &policy, &round_events)?;
            let comments = evaluate_events(
                &round_events,
                &personas,
                |task_id| match task_id {
                    None => None,
                    Some(id) if policy.mode == ExecutionSubjectMode::Persona => {
                        Some(active_map.get(id).cloned().unwrap_or_default())
                    }
                    Some(_) => None,
                },
                round_index,
                DEFAULT_MAX_COMMENTS_PER_EVENT,
            );

            for comment in &comments {
                *persona_severity_counts.entry(severity_key(comment.severity).to_string()).or_insert(0) += 1;
            }

            let comment_task_ids: BTreeSet<String> = comments.iter().filter_map(|c| c.task_id.clone()).collect();
            let mut task_cache: HashMap<String, Task> = HashMap::new();
            for task_id in &comment_task_ids {
                if let Some(task) = store.get_task(task_id)? {
                    task_cache.insert(task_id.clone(), task);
                }
            }

            let can_block = |persona_id: &str| persona_by_id.get(persona_id).map(|p| p.can_block).unwrap_or(false);
            let has_transition_permission = |persona_id: &str, task_id: Option<&str>| -> bool {
                if policy.mode != ExecutionSubjectMode::Persona {
                    return true;
                }
                let Some(task_id) = task_id else { return false };
                let Some(task) = task_cache.get(task_id) else { return false };
                policy.can_transition(task, persona_id)
            };
            let already_needs_approval = |task_id: &str| -> bool {
                task_cache.get(task_id).map(|t| t.status == TaskStatus::NeedsApproval).unwrap_or(false)
            };

            let outcome =
                apply_severity_actions(&comments, can_block, has_transition_permission, already_needs_approval);
            pending_events.extend(outcome.next_round_events);

            if let Some(persona_id) = &outcome.persona_blocker {
                persona_blocker_triggered = true;
                stop_reason = format!("persona_blocker:{persona_id}");
                tracing::info!(persona_id, "persona blocker stop triggered");
                break;
            }

            for task_id in &outcome.escalate_task_ids {
                if let Some(current) = store.get_task(task_id)? {
                    if current.status != TaskStatus::NeedsApproval {
                        store.apply_task_update(task_id, TaskStatus::NeedsApproval, None, None, None)?;
                    }
                }
            }

            let snapshot = build_snapshot(
                &store,
                &config.lead_id,
                &execution_subject_ids,
                &personas,
                mode,
                &policy,
                &round_events,
                &comments,
                round_index,
                idle_rounds,
                &decision_history,
            )?;
            provider_calls += 1;
            let decision = match provider.run(&snapshot).await {
                Ok(decision) => decision,
                Err(error) => {
                    stop_reason = "provider_error".to_string();
                    tracing::warn!(error = %error, "provider error");
                    break;
                }
            };

            let apply_result = apply_decision(&store, &config.lead_id, &decision, &mut decision_history)?;

            if auto_approve_fallback && apply_result.applied_plan_actions == 0 && store.has_pending_approvals()? {
                let submitted = store.list_submitted_plans()?;
                if let Some(fallback_task) = submitted.first() {
                    store.review_plan(&fallback_task.id, PlanAction::Approve, Some("fallback auto-approval".to_string()))?;
                    if let Some(updated) = store.get_task(&fallback_task.id)? {
                        let receiver = updated.planner.clone().unwrap_or_else(|| "unknown".to_string());
                        store.send_message(
                            &config.lead_id,
                            &receiver,
                            &format!("plan approved by fallback for {}", updated.id),
                            Some(updated.id.clone()),
                        )?;
                    }
                }
            }
            if auto_approve_fallback && !human_approval {
                let released = auto_release_nonplan_approvals(&store, &config.lead_id)?;
                if !released.is_empty() {
                    tracing::info!(tasks = %released.join(","), "fallback released nonplan approvals");
                }
            }

            if decision.stop.should_stop {
                let detail = if decision.stop.reason_short.is_empty() {
                    "provider requested stop".to_string()
                } else {
                    decision.stop.reason_short.clone()
                };
                stop_reason = format!("provider_stop:{detail}");
                tracing::info!(detail, "provider stop reason");
                break;
            }
        }

        if store.all_tasks_completed()? {
            stop_reason = "all_tasks_completed".to_string();
            break;
        }

        let elapsed_idle_seconds = now_seconds() - store.progress_marker()?.1;
        if idle_rounds >= config.max_idle_rounds {
            stop_reason = "idle_rounds_limit".to_string();
            break;
        }
        if elapsed_idle_seconds >= config.max_idle_seconds as f64 {
            stop_reason = "idle_seconds_limit".to_string();
            break;
        }

        if config.tick_seconds > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(config.tick_seconds)).await;
        }

        tracing::info!(
            round = round_index,
            idle_rounds,
            provider_calls,
            "round complete"
        );
    }

    let warn_recheck_queue_remaining =
        pending_events.iter().filter(|event| event.event_type == EventType::WarnRecheck).count();

    Ok(RunResult {
        stop_reason,
        elapsed_seconds: now_seconds() - start,
        summary: store.status_summary()?,
        tasks_total: store.list_tasks()?.len(),
        provider_calls,
        provider: provider.name().to_string(),
        human_approval,
        persona_metrics: PersonaMetrics {
            severity_counts: persona_severity_counts,
            persona_blocker_triggered,
            warn_recheck_queue_remaining,
        },
    })
}
