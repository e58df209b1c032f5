use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::CompileError;
use crate::json_merge::{
    merge_dict_values, merge_persona_policy, merge_unique, parse_dependency_value, parse_inline_json,
    parse_path_value, parse_persona_id_list, parse_phase_assignments,
};
use crate::model::{ParsedTask, PersonaDirectives, VerificationItem};
use crate::patterns::{
    CHECK_ITEM_PATTERN, DEPENDENCY_PATTERN, DESCRIPTION_PATTERN, DISABLE_PERSONAS_PATTERN, HEADING_PATTERN,
    PERSONAS_PATTERN, PERSONA_DEFAULTS_PATTERN, PHASE_ASSIGNMENTS_PATTERN, PHASE_OVERRIDES_PATTERN,
    REQUIRES_PLAN_PATTERN, REQUIRES_PLAN_TITLE_SUFFIX_PATTERN, TASK_HEADER_ID_PATTERN, TASK_HEADER_PATTERN,
    TASK_PERSONA_POLICY_PATTERN,
};

fn is_verification_section(title: &str) -> bool {
    let normalized = regex::Regex::new(r"\s+").unwrap().replace_all(title.trim(), " ").to_lowercase();
    const PATTERNS: [&str; 7] = ["検証項目", "verification", "validation", "checklist", "checks?", "testing", r"\bqa\b"];
    PATTERNS
        .iter()
        .any(|p| regex::Regex::new(p).unwrap().is_match(&normalized))
}

fn extract_requires_plan(text: &str) -> bool {
    REQUIRES_PLAN_PATTERN
        .captures(text)
        .map(|c| c[1].eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn extract_task_id_and_title(raw_header: &str, auto_id_counter: usize) -> (String, String) {
    let stripped = raw_header.trim();
    if let Some(caps) = TASK_HEADER_ID_PATTERN.captures(stripped) {
        return (caps["task_id"].trim().to_string(), caps["title"].trim().to_string());
    }
    (format!("AUTO-{auto_id_counter:03}"), stripped.to_string())
}

/// Walks `tasks.md` line by line and produces the raw task list, the
/// verification checklist, and any persona directives embedded in the
/// document, matching `_parse_tasks_markdown`.
pub fn parse_tasks_markdown(
    text: &str,
) -> Result<(Vec<ParsedTask>, Vec<VerificationItem>, PersonaDirectives), CompileError> {
    let mut parsed_tasks: Vec<ParsedTask> = Vec::new();
    let mut verification_items: Vec<VerificationItem> = Vec::new();
    let mut persona_defaults: Option<Value> = None;
    let mut personas: Option<Value> = None;
    let mut global_disable_personas: Vec<String> = Vec::new();
    let mut current_task: Option<ParsedTask> = None;
    let mut current_description_parts: Vec<String> = Vec::new();
    let mut known_ids: HashSet<String> = HashSet::new();
    let mut current_section = String::new();
    let mut auto_id_counter = 1usize;

    macro_rules! finalize_current {
        () => {
            if let Some(mut task) = current_task.take() {
                task.description = current_description_parts.join("\n").trim().to_string();
                parsed_tasks.push(task);
            }
        };
    }

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;

        if let Some(caps) = HEADING_PATTERN.captures(line) {
            finalize_current!();
            current_description_parts.clear();
            current_section = caps[1].trim().to_string();
            continue;
        }

        if is_verification_section(&current_section) {
            if let Some(caps) = CHECK_ITEM_PATTERN.captures(line) {
                verification_items.push(VerificationItem {
                    text: caps[2].trim().to_string(),
                    checked: caps[1].trim().eq_ignore_ascii_case("x"),
                    line: line_no,
                });
                continue;
            }
        }

        if let Some(caps) = TASK_HEADER_PATTERN.captures(line) {
            finalize_current!();
            let (task_id, title_raw) = extract_task_id_and_title(&caps[1], auto_id_counter);
            auto_id_counter += 1;
            if known_ids.contains(&task_id) {
                return Err(CompileError::Parse(format!("duplicate task id {task_id} at tasks.md:{line_no}")));
            }
            known_ids.insert(task_id.clone());
            let requires_plan = extract_requires_plan(&title_raw);
            let title = {
                let stripped = REQUIRES_PLAN_TITLE_SUFFIX_PATTERN.replace(&title_raw, "").trim().to_string();
                if stripped.is_empty() {
                    title_raw.clone()
                } else {
                    stripped
                }
            };
            current_task = Some(ParsedTask {
                id: task_id,
                title,
                description: String::new(),
                target_paths: Vec::new(),
                depends_on: Vec::new(),
                requires_plan,
                persona_policy: None,
            });
            current_description_parts = Vec::new();
            continue;
        }

        let Some(task) = current_task.as_mut() else {
            if let Some(caps) = PERSONA_DEFAULTS_PATTERN.captures(line) {
                let parsed = parse_inline_json(&caps[1], "persona_defaults", line_no)?;
                if !parsed.is_object() {
                    return Err(CompileError::Parse(format!("persona_defaults must be JSON object at tasks.md:{line_no}")));
                }
                persona_defaults = Some(merge_dict_values(persona_defaults.as_ref(), Some(&parsed)));
                continue;
            }
            if let Some(caps) = PERSONAS_PATTERN.captures(line) {
                let parsed = parse_inline_json(&caps[1], "personas", line_no)?;
                let Some(items) = parsed.as_array() else {
                    return Err(CompileError::Parse(format!("personas must be JSON array at tasks.md:{line_no}")));
                };
                if !items.iter().all(Value::is_object) {
                    return Err(CompileError::Parse(format!("personas must be an array of objects at tasks.md:{line_no}")));
                }
                personas = Some(Value::Array(items.clone()));
                continue;
            }
            if let Some(caps) = DISABLE_PERSONAS_PATTERN.captures(line) {
                global_disable_personas = merge_unique(&global_disable_personas, &parse_persona_id_list(&caps[1]));
                continue;
            }
            if let Some(caps) = PHASE_ASSIGNMENTS_PATTERN.captures(line) {
                let assignments = parse_phase_assignments(&caps[1], line_no)?;
                let mut defaults = persona_defaults
                    .take()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default();
                let phase_policies = defaults
                    .get("phase_policies")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                if !phase_policies.is_object() {
                    return Err(CompileError::Parse(format!(
                        "persona_defaults.phase_policies must be object at tasks.md:{line_no}"
                    )));
                }
                let merged_policies = merge_dict_values(Some(&phase_policies), Some(&Value::Object(assignments.clone())));
                defaults.insert("phase_policies".to_string(), merged_policies);
                let mut phase_order: Vec<Value> = defaults
                    .get("phase_order")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for phase in assignments.keys() {
                    if !phase_order.iter().any(|v| v.as_str() == Some(phase.as_str())) {
                        phase_order.push(Value::String(phase.clone()));
                    }
                }
                defaults.insert("phase_order".to_string(), Value::Array(phase_order));
                persona_defaults = Some(Value::Object(defaults));
                continue;
            }
            continue;
        };

        if let Some(caps) = TASK_PERSONA_POLICY_PATTERN.captures(line) {
            let parsed = parse_inline_json(&caps[1], "persona_policy", line_no)?;
            let Some(parsed_obj) = parsed.as_object() else {
                return Err(CompileError::Parse(format!("persona_policy must be JSON object at tasks.md:{line_no}")));
            };
            task.persona_policy = Some(merge_persona_policy(task.persona_policy.as_ref(), parsed_obj));
            continue;
        }
        if let Some(caps) = PHASE_OVERRIDES_PATTERN.captures(line) {
            let parsed = parse_inline_json(&caps[1], "phase_overrides", line_no)?;
            if !parsed.is_object() {
                return Err(CompileError::Parse(format!("phase_overrides must be JSON object at tasks.md:{line_no}")));
            }
            let mut incoming = Map::new();
            incoming.insert("phase_overrides".to_string(), parsed);
            task.persona_policy = Some(merge_persona_policy(task.persona_policy.as_ref(), &incoming));
            continue;
        }
        if let Some(caps) = DISABLE_PERSONAS_PATTERN.captures(line) {
            let disable_personas = parse_persona_id_list(&caps[1]);
            let mut incoming = Map::new();
            incoming.insert(
                "disable_personas".to_string(),
                Value::Array(disable_personas.into_iter().map(Value::String).collect()),
            );
            task.persona_policy = Some(merge_persona_policy(task.persona_policy.as_ref(), &incoming));
            continue;
        }
        if let Some(caps) = PHASE_ASSIGNMENTS_PATTERN.captures(line) {
            let assignments = parse_phase_assignments(&caps[1], line_no)?;
            let mut incoming = Map::new();
            incoming.insert("phase_overrides".to_string(), Value::Object(assignments));
            task.persona_policy = Some(merge_persona_policy(task.persona_policy.as_ref(), &incoming));
            continue;
        }
        if let Some(caps) = DEPENDENCY_PATTERN.captures(line) {
            task.depends_on = parse_dependency_value(&caps[1], line_no)?;
            continue;
        }
        if let Some(caps) = TARGET_PATHS_PATTERN.captures(line) {
            task.target_paths = parse_path_value(&caps[1]);
            continue;
        }
        if let Some(caps) = DESCRIPTION_PATTERN.captures(line) {
            current_description_parts.push(caps[1].trim().to_string());
            continue;
        }
    }

    finalize_current!();
    if parsed_tasks.is_empty() {
        return Err(CompileError::Parse("no tasks found in tasks.md".to_string()));
    }

    let directives = PersonaDirectives {
        personas,
        persona_defaults,
        global_disable_personas,
    };
    Ok((parsed_tasks, verification_items, directives))
}
