use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value as YamlValue;

use crate::error::CompileError;
use crate::model::{ParsedTask, ALLOWED_OVERRIDE_TOP_LEVEL_KEYS, ALLOWED_TASK_OVERRIDE_KEYS};
use crate::patterns::{TASK_ID_FULL_PATTERN, TASK_ID_PATTERN};

fn load_override_yaml(path: &Path) -> Result<serde_yaml::Mapping, CompileError> {
    let text = std::fs::read_to_string(path)?;
    let loaded: YamlValue = serde_yaml::from_str(&text)?;
    match loaded {
        YamlValue::Null => Ok(serde_yaml::Mapping::new()),
        YamlValue::Mapping(map) => Ok(map),
        _ => Err(CompileError::Validation(format!("override root must be object: {}", path.display()))),
    }
}

fn yaml_str(value: &YamlValue) -> String {
    match value {
        YamlValue::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn normalize_depends_override(task_id: &str, value: &YamlValue) -> Result<Vec<String>, CompileError> {
    match value {
        YamlValue::String(s) => {
            let trimmed = s.trim();
            if matches!(trimmed, "" | "-" | "なし" | "none" | "None") {
                return Ok(Vec::new());
            }
            let dependencies: Vec<String> = TASK_ID_PATTERN.find_iter(trimmed).map(|m| m.as_str().to_string()).collect();
            if dependencies.is_empty() {
                return Err(CompileError::Validation(format!(
                    "depends_on override must include task ids: {task_id}"
                )));
            }
            Ok(dependencies)
        }
        YamlValue::Sequence(items) => {
            let normalized: Vec<String> = items.iter().map(yaml_str).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            for dep in &normalized {
                if !TASK_ID_FULL_PATTERN.is_match(dep) {
                    return Err(CompileError::Validation(format!(
                        "depends_on override contains invalid id '{dep}' for {task_id}"
                    )));
                }
            }
            Ok(normalized)
        }
        _ => Err(CompileError::Validation(format!("depends_on override must be list or string: {task_id}"))),
    }
}

/// Applies a `<change_id>.yaml` override file over the parsed task list and
/// teammate roster, matching `_apply_overrides`. A missing file is not an
/// error; the base payload passes through untouched.
pub fn apply_overrides(
    tasks: &mut Vec<ParsedTask>,
    teammates: &mut Vec<String>,
    override_path: &Path,
) -> Result<(), CompileError> {
    if !override_path.exists() {
        return Ok(());
    }
    let override_data = load_override_yaml(override_path)?;

    let allowed: std::collections::HashSet<&str> = ALLOWED_OVERRIDE_TOP_LEVEL_KEYS.iter().copied().collect();
    let mut unknown: Vec<String> = override_data
        .keys()
        .filter_map(|k| k.as_str())
        .filter(|k| !allowed.contains(k))
        .map(str::to_string)
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(CompileError::Validation(format!("unknown override keys: {}", unknown.join(", "))));
    }

    let mut by_id: HashMap<String, usize> = HashMap::new();
    for (idx, task) in tasks.iter().enumerate() {
        by_id.insert(task.id.clone(), idx);
    }
    let resolve = |by_id: &HashMap<String, usize>, task_id: &str| -> Result<usize, CompileError> {
        by_id
            .get(task_id)
            .copied()
            .ok_or_else(|| CompileError::Validation(format!("override references unknown task id: {task_id}")))
    };

    if let Some(value) = override_data.get("teammates") {
        let items = value
            .as_sequence()
            .ok_or_else(|| CompileError::Validation("override teammates must be a non-empty list".to_string()))?;
        if items.is_empty() {
            return Err(CompileError::Validation("override teammates must be a non-empty list".to_string()));
        }
        let normalized: Vec<String> = items.iter().map(yaml_str).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        if normalized.is_empty() {
            return Err(CompileError::Validation("override teammates must contain at least one non-empty id".to_string()));
        }
        *teammates = normalized;
    }

    if let Some(value) = override_data.get("requires_plan") {
        let map = value
            .as_mapping()
            .ok_or_else(|| CompileError::Validation("override requires_plan must be an object".to_string()))?;
        for (key, flag) in map {
            let task_id = yaml_str(key);
            let idx = resolve(&by_id, &task_id)?;
            let flag = flag
                .as_bool()
                .ok_or_else(|| CompileError::Validation(format!("requires_plan override must be bool: {task_id}")))?;
            tasks[idx].requires_plan = flag;
        }
    }

    if let Some(value) = override_data.get("depends_on") {
        let map = value
            .as_mapping()
            .ok_or_else(|| CompileError::Validation("override depends_on must be an object".to_string()))?;
        for (key, deps) in map {
            let task_id = yaml_str(key);
            let idx = resolve(&by_id, &task_id)?;
            tasks[idx].depends_on = normalize_depends_override(&task_id, deps)?;
        }
    }

    if let Some(value) = override_data.get("tasks") {
        let map = value
            .as_mapping()
            .ok_or_else(|| CompileError::Validation("override tasks must be an object".to_string()))?;
        let allowed_task_keys: std::collections::HashSet<&str> = ALLOWED_TASK_OVERRIDE_KEYS.iter().copied().collect();
        for (key, override_item) in map {
            let task_id = yaml_str(key);
            let idx = resolve(&by_id, &task_id)?;
            let item = override_item
                .as_mapping()
                .ok_or_else(|| CompileError::Validation(format!("task override must be object: {task_id}")))?;
            let mut unknown_task: Vec<String> = item
                .keys()
                .filter_map(|k| k.as_str())
                .filter(|k| !allowed_task_keys.contains(k))
                .map(str::to_string)
                .collect();
            if !unknown_task.is_empty() {
                unknown_task.sort();
                return Err(CompileError::Validation(format!(
                    "unknown task override keys for {task_id}: {}",
                    unknown_task.join(", ")
                )));
            }
            if let Some(title) = item.get("title") {
                let title = yaml_str(title).trim().to_string();
                if title.is_empty() {
                    return Err(CompileError::Validation(format!("title override must be non-empty: {task_id}")));
                }
                tasks[idx].title = title;
            }
            if let Some(description) = item.get("description") {
                tasks[idx].description = yaml_str(description);
            }
            if let Some(target_paths) = item.get("target_paths") {
                let items = target_paths
                    .as_sequence()
                    .ok_or_else(|| CompileError::Validation(format!("target_paths override must be list: {task_id}")))?;
                tasks[idx].target_paths =
                    items.iter().map(yaml_str).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            }
            if let Some(deps) = item.get("depends_on") {
                tasks[idx].depends_on = normalize_depends_override(&task_id, deps)?;
            }
            if let Some(flag) = item.get("requires_plan") {
                let flag = flag
                    .as_bool()
                    .ok_or_else(|| CompileError::Validation(format!("requires_plan override must be bool: {task_id}")))?;
                tasks[idx].requires_plan = flag;
            }
        }
    }

    Ok(())
}
