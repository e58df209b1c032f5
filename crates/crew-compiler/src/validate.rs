use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crew_types::{PersonaDefaults, PersonaDefinition, PersonaPolicy, PhasePolicy, DEFAULT_PHASE_ORDER};
use serde_json::{Map, Value};

use crate::error::CompileError;
use crate::json_merge::normalize_phase_id;
use crate::model::ParsedTask;

/// Final, validated shape of one task as it leaves the compiler.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompiledTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub target_paths: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub requires_plan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_policy: Option<PersonaPolicy>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompiledChange {
    pub teammates: Vec<String>,
    pub tasks: Vec<CompiledTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personas: Option<Vec<PersonaDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_defaults: Option<PersonaDefaults>,
    pub meta: Value,
}

/// Rejects a task-id graph with a cycle, matching `_validate_no_dependency_cycle`.
/// The error text always contains `dependency cycle detected` so callers can
/// pattern-match on it without parsing the full cycle trail.
fn validate_no_dependency_cycle(graph: &BTreeMap<String, Vec<String>>) -> Result<(), CompileError> {
    let mut visiting: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = Vec::new();

    fn dfs(
        node: &str,
        graph: &BTreeMap<String, Vec<String>>,
        visiting: &mut HashSet<String>,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        if visited.contains(node) {
            return Ok(());
        }
        if visiting.contains(node) {
            let cycle_start = stack.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle = stack[cycle_start..].to_vec();
            cycle.push(node.to_string());
            return Err(CompileError::Validation(format!(
                "dependency cycle detected: {}",
                cycle.join(" -> ")
            )));
        }
        visiting.insert(node.to_string());
        stack.push(node.to_string());
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                dfs(dep, graph, visiting, visited, stack)?;
            }
        }
        stack.pop();
        visiting.remove(node);
        visited.insert(node.to_string());
        Ok(())
    }

    for task_id in graph.keys() {
        dfs(task_id, graph, &mut visiting, &mut visited, &mut stack)?;
    }
    Ok(())
}

/// Structural validation shared by every compile path: non-empty teammates
/// and tasks, unique ids, target-path fallback to `["*"]`, and an acyclic,
/// fully-resolved dependency graph. Matches `_validate_compiled_payload`.
fn validate_structure(
    tasks: &mut [ParsedTask],
    teammates: &mut Vec<String>,
    change_id: &str,
) -> Result<Vec<String>, CompileError> {
    let normalized_teammates: Vec<String> = teammates.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
    if normalized_teammates.is_empty() {
        return Err(CompileError::Validation("compiled teammates must contain non-empty values".to_string()));
    }
    *teammates = normalized_teammates;

    if tasks.is_empty() {
        return Err(CompileError::Validation("compiled tasks must be a non-empty list".to_string()));
    }

    let mut task_ids: HashSet<String> = HashSet::new();
    let mut auto_target_path_tasks: Vec<String> = Vec::new();
    let mut dependency_graph: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for task in tasks.iter_mut() {
        let task_id = task.id.trim().to_string();
        if task_id.is_empty() {
            return Err(CompileError::Validation("task id is required".to_string()));
        }
        if !task_ids.insert(task_id.clone()) {
            return Err(CompileError::Validation(format!("duplicate task id in compiled config: {task_id}")));
        }
        task.id = task_id.clone();

        task.title = task.title.trim().to_string();
        if task.title.is_empty() {
            return Err(CompileError::Validation(format!("task title is required: {task_id}")));
        }
        task.description = task.description.trim().to_string();

        let normalized_paths: Vec<String> = task.target_paths.iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
        task.target_paths = if normalized_paths.is_empty() {
            auto_target_path_tasks.push(task_id.clone());
            vec!["*".to_string()]
        } else {
            normalized_paths
        };

        let normalized_deps: Vec<String> = task.depends_on.iter().map(|d| d.trim().to_string()).filter(|d| !d.is_empty()).collect();
        task.depends_on = normalized_deps.clone();
        dependency_graph.insert(task_id, normalized_deps);
    }

    let mut missing_dependencies: Vec<String> = Vec::new();
    for (task_id, dependencies) in &dependency_graph {
        for dep in dependencies {
            if !task_ids.contains(dep) {
                missing_dependencies.push(format!("unknown dependency '{dep}' in task {task_id} for change {change_id}"));
            }
        }
    }
    if !missing_dependencies.is_empty() {
        return Err(CompileError::Validation(missing_dependencies.join("; ")));
    }

    validate_no_dependency_cycle(&dependency_graph)?;

    auto_target_path_tasks.sort();
    Ok(auto_target_path_tasks)
}

fn normalize_persona_id_list(
    raw: &Value,
    field_name: &str,
    known_persona_ids: &BTreeSet<String>,
) -> Result<Vec<String>, String> {
    let items = raw.as_array().ok_or_else(|| format!("{field_name} must be a list"))?;
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let s = item
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| format!("{field_name}[{index}] must be a non-empty string"))?;
        let persona_id = s.trim().to_string();
        if !known_persona_ids.contains(&persona_id) {
            return Err(format!("{field_name}[{index}] references unknown persona: {persona_id}"));
        }
        if seen.insert(persona_id.clone()) {
            normalized.push(persona_id);
        }
    }
    Ok(normalized)
}

fn normalize_phase_policy(
    raw: &Value,
    field_name: &str,
    known_persona_ids: &BTreeSet<String>,
) -> Result<PhasePolicy, String> {
    let map = raw.as_object().ok_or_else(|| format!("{field_name} must be an object"))?;
    const ALLOWED: [&str; 3] = ["active_personas", "executor_personas", "state_transition_personas"];
    let unknown: Vec<&str> = map.keys().map(String::as_str).filter(|k| !ALLOWED.contains(k)).collect();
    if !unknown.is_empty() {
        return Err(format!("{field_name} has unknown keys: {}", unknown.join(", ")));
    }
    let field = |key: &str| -> Result<Vec<String>, String> {
        match map.get(key) {
            Some(value) => normalize_persona_id_list(value, &format!("{field_name}.{key}"), known_persona_ids),
            None => Ok(Vec::new()),
        }
    };
    Ok(PhasePolicy {
        active_personas: field("active_personas")?,
        executor_personas: field("executor_personas")?,
        state_transition_personas: field("state_transition_personas")?,
    })
}

fn normalize_phase_policy_map(
    raw: &Value,
    field_name: &str,
    known_persona_ids: &BTreeSet<String>,
) -> Result<BTreeMap<String, PhasePolicy>, String> {
    let map = raw.as_object().ok_or_else(|| format!("{field_name} must be an object"))?;
    let mut normalized = BTreeMap::new();
    for (phase_raw, policy_raw) in map {
        let phase = phase_raw.trim().to_string();
        if phase.is_empty() {
            return Err(format!("{field_name} contains an empty phase key"));
        }
        let policy = normalize_phase_policy(policy_raw, &format!("{field_name}.{phase}"), known_persona_ids)?;
        normalized.insert(phase, policy);
    }
    Ok(normalized)
}

fn normalize_phase_order(raw: &Value, field_name: &str) -> Result<Vec<String>, String> {
    let items = raw.as_array().ok_or_else(|| format!("{field_name} must be a list"))?;
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let phase = item
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| format!("{field_name}[{index}] must be a non-empty string"))?
            .trim()
            .to_string();
        if seen.insert(phase.clone()) {
            normalized.push(phase);
        }
    }
    Ok(normalized)
}

fn load_personas(raw_personas: Option<&Value>) -> Result<Vec<PersonaDefinition>, String> {
    let mut merged: Vec<PersonaDefinition> = crew_types::default_personas();
    let Some(raw) = raw_personas else {
        return Ok(merged);
    };
    let items = raw.as_array().ok_or_else(|| "personas must be a list".to_string())?;
    let mut seen_ids = HashSet::new();
    let mut duplicates = BTreeSet::new();
    let mut parsed = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let persona: PersonaDefinition = serde_json::from_value(item.clone())
            .map_err(|e| format!("personas[{index}] is invalid: {e}"))?;
        if !seen_ids.insert(persona.id.clone()) {
            duplicates.insert(persona.id.clone());
        }
        parsed.push(persona);
    }
    if !duplicates.is_empty() {
        return Err(format!(
            "duplicate persona id(s): {}",
            duplicates.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    let mut index_by_id: HashMap<String, usize> = merged.iter().enumerate().map(|(i, p)| (p.id.clone(), i)).collect();
    for persona in parsed {
        match index_by_id.get(&persona.id) {
            Some(&idx) => merged[idx] = persona,
            None => {
                index_by_id.insert(persona.id.clone(), merged.len());
                merged.push(persona);
            }
        }
    }
    Ok(merged)
}

/// Normalizes phase identifiers across the payload (aliases like
/// `spec_checker` collapse to `spec_check`) and infers a task's
/// `phase_order` from its `phase_overrides` keys when absent, matching
/// `_canonicalize_phase_fields`.
fn canonicalize_phase_fields(persona_defaults: &mut Option<Value>, tasks: &mut [ParsedTask]) {
    let mut default_phase_order: Vec<String> = Vec::new();

    if let Some(defaults) = persona_defaults.as_mut().and_then(Value::as_object_mut) {
        if let Some(order) = defaults.get("phase_order").and_then(Value::as_array).cloned() {
            let mut seen = HashSet::new();
            let normalized: Vec<Value> = order
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_phase_id)
                .filter(|p| !p.is_empty() && seen.insert(p.clone()))
                .map(Value::String)
                .collect();
            default_phase_order = normalized.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            defaults.insert("phase_order".to_string(), Value::Array(normalized));
        }
        if let Some(policies) = defaults.get("phase_policies").and_then(Value::as_object).cloned() {
            let mut normalized = Map::new();
            for (phase, policy) in policies {
                normalized.insert(normalize_phase_id(&phase), policy);
            }
            defaults.insert("phase_policies".to_string(), Value::Object(normalized));
        }
    }

    for task in tasks.iter_mut() {
        let Some(policy) = task.persona_policy.as_mut().and_then(Value::as_object_mut) else {
            continue;
        };
        let mut normalized_task_phase_order: Vec<String> = Vec::new();
        if let Some(order) = policy.get("phase_order").and_then(Value::as_array).cloned() {
            let mut seen = HashSet::new();
            let normalized: Vec<Value> = order
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_phase_id)
                .filter(|p| !p.is_empty() && seen.insert(p.clone()))
                .map(Value::String)
                .collect();
            normalized_task_phase_order = normalized.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            policy.insert("phase_order".to_string(), Value::Array(normalized));
        }
        if let Some(overrides) = policy.get("phase_overrides").and_then(Value::as_object).cloned() {
            let mut normalized_overrides = Map::new();
            for (phase, value) in overrides {
                normalized_overrides.insert(normalize_phase_id(&phase), value);
            }
            let override_phases: Vec<String> = normalized_overrides.keys().cloned().collect();
            policy.insert("phase_overrides".to_string(), Value::Object(normalized_overrides));
            if normalized_task_phase_order.is_empty() {
                let ordered = if !default_phase_order.is_empty() {
                    let mut ordered: Vec<String> =
                        default_phase_order.iter().filter(|p| override_phases.contains(p)).cloned().collect();
                    for phase in &override_phases {
                        if !ordered.contains(phase) {
                            ordered.push(phase.clone());
                        }
                    }
                    ordered
                } else {
                    override_phases
                };
                policy.insert("phase_order".to_string(), Value::Array(ordered.into_iter().map(Value::String).collect()));
            }
        }
    }
}

/// Validates and normalizes persona-related fields: loads/merges the
/// persona catalog, normalizes `persona_defaults`, and requires every task
/// to carry a `persona_policy.phase_overrides` assignment. Matches
/// `_validate_persona_payload`.
fn validate_personas(
    tasks: &mut Vec<ParsedTask>,
    personas_raw: Option<Value>,
    persona_defaults_raw: Option<Value>,
) -> Result<(Vec<PersonaDefinition>, bool, Option<PersonaDefaults>), CompileError> {
    let had_personas_directive = personas_raw.is_some();
    let mut persona_defaults_opt = persona_defaults_raw;
    canonicalize_phase_fields(&mut persona_defaults_opt, tasks);

    let personas = load_personas(personas_raw.as_ref()).map_err(CompileError::Validation)?;
    let known_persona_ids: BTreeSet<String> = personas.iter().map(|p| p.id.clone()).collect();
    let mut validation_errors: Vec<String> = Vec::new();

    let mut known_phases: BTreeSet<String> = DEFAULT_PHASE_ORDER.iter().map(|s| s.to_string()).collect();
    let mut normalized_defaults: Option<PersonaDefaults> = None;
    if let Some(defaults_value) = &persona_defaults_opt {
        let phase_order = defaults_value
            .get("phase_order")
            .map(|v| normalize_phase_order(v, "persona_defaults.phase_order"))
            .transpose();
        let phase_policies = defaults_value
            .get("phase_policies")
            .map(|v| normalize_phase_policy_map(v, "persona_defaults.phase_policies", &known_persona_ids))
            .transpose();
        match (phase_order, phase_policies) {
            (Ok(order), Ok(policies)) => {
                let order = order.unwrap_or_default();
                if !order.is_empty() {
                    known_phases = order.iter().cloned().collect();
                }
                let policies = policies.unwrap_or_default();
                let unknown_phases: Vec<&String> = policies.keys().filter(|p| !known_phases.contains(*p)).collect();
                if !unknown_phases.is_empty() {
                    validation_errors.push(format!(
                        "unknown persona phase(s) in persona_defaults: {}",
                        unknown_phases.into_iter().cloned().collect::<Vec<_>>().join(", ")
                    ));
                }
                normalized_defaults = Some(PersonaDefaults {
                    phase_order: order,
                    phase_policies: policies,
                });
            }
            (Err(e), _) | (_, Err(e)) => validation_errors.push(e),
        }
    }

    for task in tasks.iter_mut() {
        let task_id = task.id.clone();
        let raw_policy = task.persona_policy.take();
        let Some(raw_policy) = raw_policy else {
            validation_errors.push(format!(
                "task {task_id} must define phase assignments via persona_policy.phase_overrides"
            ));
            continue;
        };
        let Some(policy_map) = raw_policy.as_object() else {
            validation_errors.push(format!("task {task_id} persona_policy must be an object"));
            continue;
        };

        let disable_personas = match policy_map.get("disable_personas") {
            Some(v) => match normalize_persona_id_list(v, &format!("task {task_id} persona_policy.disable_personas"), &known_persona_ids) {
                Ok(v) => v,
                Err(e) => {
                    validation_errors.push(e);
                    continue;
                }
            },
            None => Vec::new(),
        };
        let phase_order = match policy_map.get("phase_order") {
            Some(v) => match normalize_phase_order(v, &format!("task {task_id} persona_policy.phase_order")) {
                Ok(v) => v,
                Err(e) => {
                    validation_errors.push(e);
                    continue;
                }
            },
            None => Vec::new(),
        };
        if !phase_order.is_empty() {
            let unknown: Vec<&String> = phase_order.iter().filter(|p| !known_phases.contains(*p)).collect();
            if !unknown.is_empty() {
                validation_errors.push(format!(
                    "unknown persona phase(s) in task {task_id} phase_order: {}",
                    unknown.into_iter().cloned().collect::<Vec<_>>().join(", ")
                ));
                continue;
            }
        }
        let phase_overrides = match policy_map.get("phase_overrides") {
            Some(v) => match normalize_phase_policy_map(v, &format!("task {task_id} persona_policy.phase_overrides"), &known_persona_ids) {
                Ok(v) => v,
                Err(e) => {
                    validation_errors.push(e);
                    continue;
                }
            },
            None => BTreeMap::new(),
        };
        if phase_overrides.is_empty() {
            validation_errors.push(format!(
                "task {task_id} must define phase assignments via persona_policy.phase_overrides"
            ));
            continue;
        }
        let unknown: Vec<&String> = phase_overrides.keys().filter(|p| !known_phases.contains(*p)).collect();
        if !unknown.is_empty() {
            validation_errors.push(format!(
                "unknown persona phase(s) in task {task_id}: {}",
                unknown.into_iter().cloned().collect::<Vec<_>>().join(", ")
            ));
            continue;
        }

        task.persona_policy = serde_json::to_value(PersonaPolicy {
            disable_personas: disable_personas.into_iter().collect(),
            phase_order,
            phase_overrides,
        })
        .ok();
    }

    if !validation_errors.is_empty() {
        return Err(CompileError::Validation(validation_errors.join("; ")));
    }

    Ok((personas, had_personas_directive, normalized_defaults))
}

/// Full validation pipeline: structural checks, then persona checks, then
/// a stable sort of the task list by id. Matches `validate_compiled_config`.
pub fn validate(
    mut tasks: Vec<ParsedTask>,
    mut teammates: Vec<String>,
    personas_raw: Option<Value>,
    persona_defaults_raw: Option<Value>,
    mut meta: Map<String, Value>,
    change_id: &str,
) -> Result<CompiledChange, CompileError> {
    let auto_target_path_tasks = validate_structure(&mut tasks, &mut teammates, change_id)?;
    meta.insert(
        "auto_target_path_tasks".to_string(),
        Value::Array(auto_target_path_tasks.into_iter().map(Value::String).collect()),
    );

    let (personas, had_personas_directive, persona_defaults) =
        validate_personas(&mut tasks, personas_raw, persona_defaults_raw)?;

    let mut compiled_tasks: Vec<CompiledTask> = tasks
        .into_iter()
        .map(|t| CompiledTask {
            id: t.id,
            title: t.title,
            description: t.description,
            target_paths: t.target_paths,
            depends_on: t.depends_on,
            requires_plan: t.requires_plan,
            persona_policy: t.persona_policy.and_then(|v| serde_json::from_value(v).ok()),
        })
        .collect();
    compiled_tasks.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(CompiledChange {
        teammates,
        tasks: compiled_tasks,
        personas: if had_personas_directive { Some(personas) } else { None },
        persona_defaults,
        meta: Value::Object(meta),
    })
}
