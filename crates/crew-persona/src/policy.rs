use std::collections::BTreeSet;

use crew_types::{PersonaDefaults, PhasePolicy, Task};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub active_personas: BTreeSet<String>,
    pub executor_personas: BTreeSet<String>,
    pub state_transition_personas: BTreeSet<String>,
}

/// Resolves, for a task at its current phase, which personas are active,
/// may execute, and may transition it — merging the global phase policy
/// with the task-local `phase_overrides` per field.
pub fn resolve(
    task: &Task,
    defaults: &PersonaDefaults,
    enabled_persona_ids: &BTreeSet<String>,
    phase_mode_active: bool,
) -> ResolvedPolicy {
    let disabled: BTreeSet<String> = task
        .persona_policy
        .as_ref()
        .map(|p| p.disable_personas.clone())
        .unwrap_or_default();

    let all_enabled = |excluding: &BTreeSet<String>| -> BTreeSet<String> {
        enabled_persona_ids.difference(excluding).cloned().collect()
    };

    if !phase_mode_active {
        let active = all_enabled(&disabled);
        return ResolvedPolicy {
            active_personas: active.clone(),
            executor_personas: active.clone(),
            state_transition_personas: active,
        };
    }

    let phase_order = task
        .persona_policy
        .as_ref()
        .map(|p| p.phase_order.clone())
        .filter(|order| !order.is_empty())
        .unwrap_or_else(|| defaults.phase_order.clone());

    if phase_order.is_empty() {
        let active = all_enabled(&disabled);
        return ResolvedPolicy {
            active_personas: active.clone(),
            executor_personas: active.clone(),
            state_transition_personas: active,
        };
    }

    let Some(phase) = phase_order.get(task.current_phase_index as usize) else {
        return ResolvedPolicy::default();
    };

    let global_policy = defaults.phase_policies.get(phase).cloned().unwrap_or_default();
    let task_override = task
        .persona_policy
        .as_ref()
        .and_then(|p| p.phase_overrides.get(phase).cloned());
    let merged = merge_phase_policy(global_policy, task_override);

    let exclude_disabled = |ids: &[String]| -> BTreeSet<String> {
        ids.iter().filter(|id| !disabled.contains(*id)).cloned().collect()
    };

    let active_personas = exclude_disabled(&merged.active_personas);
    let executor_personas = exclude_disabled(&merged.executor_personas);
    let state_transition_personas = if merged.state_transition_personas.is_empty() {
        executor_personas.clone()
    } else {
        exclude_disabled(&merged.state_transition_personas)
    };

    ResolvedPolicy {
        active_personas,
        executor_personas,
        state_transition_personas,
    }
}

/// Per-field merge: a non-empty task override list wins over the global
/// policy's list for that same field; an empty (or absent) override list
/// keeps the global value.
fn merge_phase_policy(global: PhasePolicy, task_override: Option<PhasePolicy>) -> PhasePolicy {
    let Some(over) = task_override else {
        return global;
    };
    PhasePolicy {
        active_personas: if over.active_personas.is_empty() {
            global.active_personas
        } else {
            over.active_personas
        },
        executor_personas: if over.executor_personas.is_empty() {
            global.executor_personas
        } else {
            over.executor_personas
        },
        state_transition_personas: if over.state_transition_personas.is_empty() {
            global.state_transition_personas
        } else {
            over.state_transition_personas
        },
    }
}

/// A persona may escalate a task's state iff it is in the resolved
/// `state_transition_personas` set for that task's current phase.
pub fn can_transition(resolved: &ResolvedPolicy, persona_id: &str) -> bool {
    resolved.state_transition_personas.contains(persona_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_types::PersonaPolicy;

    fn defaults_with_phase(phase: &str, policy: PhasePolicy) -> PersonaDefaults {
        let mut phase_policies = std::collections::BTreeMap::new();
        phase_policies.insert(phase.to_string(), policy);
        PersonaDefaults {
            phase_order: vec!["implement".to_string(), "review".to_string()],
            phase_policies,
        }
    }

    #[test]
    fn non_phase_mode_enables_all_non_disabled() {
        let mut task = Task::new("A", "a", false);
        task.persona_policy = Some(PersonaPolicy {
            disable_personas: ["p2".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let enabled: BTreeSet<String> = ["p1".to_string(), "p2".to_string()].into_iter().collect();
        let resolved = resolve(&task, &PersonaDefaults::default(), &enabled, false);
        assert_eq!(resolved.active_personas, ["p1".to_string()].into_iter().collect());
    }

    #[test]
    fn phase_mode_merges_task_override_per_field() {
        let mut task = Task::new("A", "a", false);
        let mut overrides = std::collections::BTreeMap::new();
        overrides.insert(
            "implement".to_string(),
            PhasePolicy {
                active_personas: vec!["local".to_string()],
                executor_personas: vec![],
                state_transition_personas: vec![],
            },
        );
        task.persona_policy = Some(PersonaPolicy {
            phase_overrides: overrides,
            ..Default::default()
        });

        let defaults = defaults_with_phase(
            "implement",
            PhasePolicy {
                active_personas: vec!["global".to_string()],
                executor_personas: vec!["implementer".to_string()],
                state_transition_personas: vec![],
            },
        );
        let enabled: BTreeSet<String> = ["local".to_string(), "implementer".to_string()]
            .into_iter()
            .collect();
        let resolved = resolve(&task, &defaults, &enabled, true);
        assert_eq!(resolved.active_personas, ["local".to_string()].into_iter().collect());
        assert_eq!(
            resolved.executor_personas,
            ["implementer".to_string()].into_iter().collect()
        );
        // falls back to executor_personas since no transition list is set anywhere
        assert_eq!(
            resolved.state_transition_personas,
            ["implementer".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn phase_index_past_end_has_no_policy() {
        let mut task = Task::new("A", "a", false);
        task.current_phase_index = 5;
        let defaults = defaults_with_phase("implement", PhasePolicy::default());
        let resolved = resolve(&task, &defaults, &BTreeSet::new(), true);
        assert!(resolved.active_personas.is_empty());
    }
}
