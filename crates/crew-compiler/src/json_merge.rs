use serde_json::{Map, Value};

use crate::error::CompileError;
use crate::patterns::TASK_ID_PATTERN;

/// Dedups while preserving first-seen order, mirroring `_merge_unique`.
pub fn merge_unique(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for item in existing.iter().chain(incoming.iter()) {
        let value = item.trim().to_string();
        if value.is_empty() || !seen.insert(value.clone()) {
            continue;
        }
        merged.push(value);
    }
    merged
}

/// Recursive merge matching `_merge_dict_values`: nested objects merge
/// key-by-key, sibling lists merge through [`merge_unique`], anything else
/// is replaced by the incoming value.
pub fn merge_dict_values(existing: Option<&Value>, incoming: Option<&Value>) -> Value {
    let existing_map = existing.and_then(Value::as_object);
    let Some(existing_map) = existing_map else {
        return incoming.cloned().filter(Value::is_object).unwrap_or_else(|| Value::Object(Map::new()));
    };
    let Some(incoming_map) = incoming.and_then(Value::as_object) else {
        return Value::Object(existing_map.clone());
    };

    let mut merged = existing_map.clone();
    for (key, value) in incoming_map {
        match (value.is_object(), merged.get(key).map(Value::is_object).unwrap_or(false)) {
            (true, true) => {
                merged.insert(key.clone(), merge_dict_values(merged.get(key), Some(value)));
            }
            _ => match (value.as_array(), merged.get(key).and_then(Value::as_array)) {
                (Some(incoming_list), Some(existing_list)) => {
                    let existing_strs: Vec<String> =
                        existing_list.iter().map(value_to_string).collect();
                    let incoming_strs: Vec<String> = incoming_list.iter().map(value_to_string).collect();
                    let merged_list = merge_unique(&existing_strs, &incoming_strs);
                    merged.insert(
                        key.clone(),
                        Value::Array(merged_list.into_iter().map(Value::String).collect()),
                    );
                }
                _ => {
                    merged.insert(key.clone(), value.clone());
                }
            },
        }
    }
    Value::Object(merged)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merges a task- or global-level persona policy fragment into an existing
/// one, matching `_merge_persona_policy`'s special cases for
/// `disable_personas` and `phase_overrides`.
pub fn merge_persona_policy(existing: Option<&Value>, incoming: &Map<String, Value>) -> Value {
    let mut merged = existing.and_then(Value::as_object).cloned().unwrap_or_default();
    for (key, value) in incoming {
        if key == "disable_personas" {
            let incoming_values: Vec<String> = match value.as_array() {
                Some(items) => items
                    .iter()
                    .map(value_to_string)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                None => parse_persona_id_list(&value_to_string(value)),
            };
            let existing_values: Vec<String> = merged
                .get("disable_personas")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(value_to_string).collect())
                .unwrap_or_default();
            merged.insert(
                "disable_personas".to_string(),
                Value::Array(merge_unique(&existing_values, &incoming_values).into_iter().map(Value::String).collect()),
            );
            continue;
        }
        if key == "phase_overrides" {
            let incoming_overrides = value.as_object().cloned().unwrap_or_default();
            let existing_overrides = merged.get("phase_overrides").cloned();
            let result = merge_dict_values(existing_overrides.as_ref(), Some(&Value::Object(incoming_overrides)));
            merged.insert("phase_overrides".to_string(), result);
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

pub fn parse_inline_json(raw: &str, label: &str, line_no: usize) -> Result<Value, CompileError> {
    let mut value = raw.trim();
    if value.starts_with('`') && value.ends_with('`') && value.len() >= 2 {
        value = value[1..value.len() - 1].trim();
    }
    serde_json::from_str(value).map_err(|_| {
        CompileError::Parse(format!("{label} must be JSON at tasks.md:{line_no}"))
    })
}

pub fn parse_path_value(raw: &str) -> Vec<String> {
    let value = raw.trim();
    if value.is_empty() || matches!(value, "なし" | "none" | "None" | "-") {
        return Vec::new();
    }

    let backtick_re = regex::Regex::new(r"`([^`]+)`").unwrap();
    let backticked: Vec<String> = backtick_re
        .captures_iter(value)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !backticked.is_empty() {
        return backticked;
    }

    if value.starts_with('[') && value.ends_with(']') {
        let inner = value[1..value.len() - 1].trim();
        if inner.is_empty() {
            return Vec::new();
        }
        return inner
            .split(',')
            .map(|p| p.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }

    if value.contains(',') || value.contains('、') {
        return value
            .split(&['、', ','][..])
            .map(|p| p.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }

    vec![value.trim_matches(|c| c == '"' || c == '\'').to_string()]
}

pub fn parse_persona_id_list(raw: &str) -> Vec<String> {
    let candidates = parse_path_value(raw);
    let mut normalized = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for item in candidates {
        let mut parts: Vec<String> = item
            .split('/')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            parts = vec![item.trim().to_string()];
        }
        for part in parts {
            if part.is_empty() || !seen.insert(part.clone()) {
                continue;
            }
            normalized.push(part);
        }
    }
    normalized
}

pub fn parse_dependency_value(raw: &str, line_no: usize) -> Result<Vec<String>, CompileError> {
    let cleaned = raw.trim();
    if matches!(cleaned, "なし" | "none" | "None" | "-") {
        return Ok(Vec::new());
    }
    let dependencies: Vec<String> = TASK_ID_PATTERN
        .find_iter(cleaned)
        .map(|m| m.as_str().to_string())
        .collect();
    if !dependencies.is_empty() {
        return Ok(dependencies);
    }
    Err(CompileError::Parse(format!(
        "dependency parse failed at tasks.md:{line_no}. use task ids like T-001/TASK-1/1.1 or 'none'."
    )))
}

pub fn normalize_phase_id(raw: &str) -> String {
    let collapsed = regex::Regex::new(r"[\s\-]+").unwrap().replace_all(raw.trim(), "_").to_lowercase();
    match collapsed.as_str() {
        "speccheck" | "spec_checker" | "spec_review" => "spec_check".to_string(),
        other => other.to_string(),
    }
}

pub fn parse_phase_assignments(raw: &str, line_no: usize) -> Result<Map<String, Value>, CompileError> {
    let split_re = regex::Regex::new(r"[;|]").unwrap();
    let chunks: Vec<&str> = split_re.split(raw).map(str::trim).filter(|c| !c.is_empty()).collect();
    if chunks.is_empty() {
        return Err(CompileError::Parse(format!("phase assignments must not be empty at tasks.md:{line_no}")));
    }
    let chunk_re = regex::Regex::new(r"^(?P<phase>[^=:]+)\s*(?:=|:)\s*(?P<personas>.+)$").unwrap();
    let mut parsed = Map::new();
    for chunk in chunks {
        let caps = chunk_re
            .captures(chunk)
            .ok_or_else(|| CompileError::Parse(format!("invalid phase assignment '{chunk}' at tasks.md:{line_no}")))?;
        let phase = normalize_phase_id(&caps["phase"]);
        let persona_ids = parse_persona_id_list(&caps["personas"]);
        if persona_ids.is_empty() {
            return Err(CompileError::Parse(format!(
                "phase assignment has no personas for phase '{phase}' at tasks.md:{line_no}"
            )));
        }
        let ids_value: Vec<Value> = persona_ids.iter().cloned().map(Value::String).collect();
        let mut policy = Map::new();
        policy.insert("active_personas".to_string(), Value::Array(ids_value.clone()));
        policy.insert("executor_personas".to_string(), Value::Array(ids_value.clone()));
        policy.insert("state_transition_personas".to_string(), Value::Array(ids_value));
        parsed.insert(phase, Value::Object(policy));
    }
    Ok(parsed)
}
