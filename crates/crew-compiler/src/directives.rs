use serde_json::{Map, Value};

use crate::json_merge::merge_persona_policy;
use crate::model::{ParsedTask, PersonaDirectives};

/// Folds the persona directives collected during markdown parsing into the
/// task list and records a small `meta.persona_resolution` summary,
/// matching `_apply_persona_directives`.
pub fn apply_persona_directives(
    tasks: &mut [ParsedTask],
    personas: &mut Option<Value>,
    persona_defaults: &mut Option<Value>,
    meta: &mut Map<String, Value>,
    directives: PersonaDirectives,
) {
    if directives.personas.is_none()
        && directives.persona_defaults.is_none()
        && directives.global_disable_personas.is_empty()
    {
        return;
    }

    if let Some(personas_value) = directives.personas {
        *personas = Some(personas_value);
    }
    if let Some(defaults_value) = directives.persona_defaults {
        *persona_defaults = Some(defaults_value);
    }

    if !directives.global_disable_personas.is_empty() {
        let mut incoming = Map::new();
        incoming.insert(
            "disable_personas".to_string(),
            Value::Array(directives.global_disable_personas.iter().cloned().map(Value::String).collect()),
        );
        for task in tasks.iter_mut() {
            task.persona_policy = Some(merge_persona_policy(task.persona_policy.as_ref(), &incoming));
        }
    }

    let mut task_policy_ids: Vec<String> = tasks
        .iter()
        .filter(|t| t.persona_policy.is_some())
        .map(|t| t.id.clone())
        .collect();
    task_policy_ids.sort();

    let mut global_disable_sorted = directives.global_disable_personas;
    global_disable_sorted.sort();

    let mut resolution = Map::new();
    resolution.insert(
        "global_disable_personas".to_string(),
        Value::Array(global_disable_sorted.into_iter().map(Value::String).collect()),
    );
    resolution.insert(
        "tasks_with_persona_policy".to_string(),
        Value::Array(task_policy_ids.into_iter().map(Value::String).collect()),
    );
    meta.insert("persona_resolution".to_string(), Value::Object(resolution));
}
