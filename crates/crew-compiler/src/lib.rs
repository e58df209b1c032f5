pub mod directives;
pub mod error;
pub mod json_merge;
pub mod markdown;
pub mod model;
pub mod overrides;
pub mod patterns;
pub mod template;
pub mod validate;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

pub use error::CompileError;
pub use model::{ParsedTask, PersonaDirectives, VerificationItem};
pub use template::get_openspec_tasks_template;
pub use validate::{CompiledChange, CompiledTask};

pub fn default_compiled_output_path(change_id: &str, task_config_root: &Path) -> PathBuf {
    task_config_root.join(format!("{change_id}.json"))
}

/// Writes a compiled config as pretty, key-sorted JSON, matching
/// `write_compiled_config`'s deterministic-diff behavior.
pub fn write_compiled_config(config: &CompiledChange, output_path: &Path) -> Result<PathBuf, CompileError> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let value = serde_json::to_value(config)?;
    let sorted = sort_json_keys(&value);
    let text = serde_json::to_string_pretty(&sorted)?;
    std::fs::write(output_path, text)?;
    Ok(output_path.to_path_buf())
}

fn sort_json_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_json_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_json_keys).collect()),
        other => other.clone(),
    }
}

/// Compiles `<openspec_root>/changes/<change_id>/tasks.md`, applying any
/// matching override file under `overrides_root`, into a validated
/// [`CompiledChange`]. Matches `compile_change_to_config`.
pub fn compile_change_to_config(
    change_id: &str,
    openspec_root: &Path,
    overrides_root: &Path,
    teammates: Option<Vec<String>>,
) -> Result<CompiledChange, CompileError> {
    let change_dir = openspec_root.join("changes").join(change_id);
    if !change_dir.is_dir() {
        return Err(CompileError::ChangeNotFound(change_dir.display().to_string()));
    }
    let tasks_path = change_dir.join("tasks.md");
    if !tasks_path.is_file() {
        return Err(CompileError::TasksFileNotFound(tasks_path.display().to_string()));
    }

    let text = std::fs::read_to_string(&tasks_path)?;
    let (mut tasks, verification_items, directives) = markdown::parse_tasks_markdown(&text)?;

    let mut teammates = teammates.unwrap_or_else(|| vec!["teammate-a".to_string(), "teammate-b".to_string()]);
    let mut personas: Option<Value> = None;
    let mut persona_defaults: Option<Value> = None;
    let mut meta = Map::new();
    meta.insert("source_change_id".to_string(), Value::String(change_id.to_string()));
    meta.insert("verification_items".to_string(), serde_json::to_value(&verification_items)?);

    directives::apply_persona_directives(&mut tasks, &mut personas, &mut persona_defaults, &mut meta, directives);

    let override_path = overrides_root.join(format!("{change_id}.yaml"));
    overrides::apply_overrides(&mut tasks, &mut teammates, &override_path)?;

    validate::validate(tasks, teammates, personas, persona_defaults, meta, change_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_change(root: &Path, change_id: &str, tasks_md: &str) {
        let dir = root.join("changes").join(change_id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("tasks.md"), tasks_md).unwrap();
    }

    const MINIMAL_TASKS_MD: &str = "\
## 0. Persona Defaults
- persona_defaults: {\"phase_order\":[\"implement\",\"review\"]}

## 1. Implementation
- [ ] T-001 do the thing (requires_plan=true)
  - Depends on: none
  - Target paths: `src/lib.rs`
  - phase assignments: implement=implementer; review=code-reviewer
  - Description: make it work
- [ ] T-002 follow up
  - Depends on: T-001
  - phase assignments: implement=implementer
  - Description: polish

## 2. Verification Checklist
- [ ] cargo test passes
";

    #[test]
    fn compiles_minimal_change_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        write_change(tmp.path(), "add-widget", MINIMAL_TASKS_MD);
        let compiled = compile_change_to_config(
            "add-widget",
            tmp.path(),
            &tmp.path().join("overrides"),
            None,
        )
        .unwrap();

        assert_eq!(compiled.teammates, vec!["teammate-a".to_string(), "teammate-b".to_string()]);
        assert_eq!(compiled.tasks.len(), 2);
        assert_eq!(compiled.tasks[0].id, "T-001");
        assert!(compiled.tasks[0].requires_plan);
        assert_eq!(compiled.tasks[0].target_paths, vec!["src/lib.rs".to_string()]);
        assert_eq!(compiled.tasks[1].depends_on, vec!["T-001".to_string()]);
        assert!(compiled.tasks[0].persona_policy.is_some());
    }

    #[test]
    fn missing_change_directory_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let err = compile_change_to_config("nope", tmp.path(), &tmp.path().join("overrides"), None).unwrap_err();
        assert!(matches!(err, CompileError::ChangeNotFound(_)));
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cyclic = "\
## 1. Implementation
- [ ] T-001 first
  - Depends on: T-002
  - phase assignments: implement=implementer
- [ ] T-002 second
  - Depends on: T-001
  - phase assignments: implement=implementer
";
        write_change(tmp.path(), "cyclic", cyclic);
        let err = compile_change_to_config("cyclic", tmp.path(), &tmp.path().join("overrides"), None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("dependency cycle detected"));
    }

    #[test]
    fn task_without_phase_assignment_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let unassigned = "\
## 1. Implementation
- [ ] T-001 no phases
  - Depends on: none
";
        write_change(tmp.path(), "no-phases", unassigned);
        let err = compile_change_to_config("no-phases", tmp.path(), &tmp.path().join("overrides"), None).unwrap_err();
        assert!(err.to_string().contains("phase_overrides"));
    }

    #[test]
    fn missing_target_paths_fall_back_to_wildcard() {
        let tmp = tempfile::tempdir().unwrap();
        let no_targets = "\
## 1. Implementation
- [ ] T-001 wildcard target
  - Depends on: none
  - phase assignments: implement=implementer
";
        write_change(tmp.path(), "wildcard", no_targets);
        let compiled = compile_change_to_config("wildcard", tmp.path(), &tmp.path().join("overrides"), None).unwrap();
        assert_eq!(compiled.tasks[0].target_paths, vec!["*".to_string()]);
        let auto = compiled.meta.get("auto_target_path_tasks").and_then(Value::as_array).unwrap();
        assert_eq!(auto.len(), 1);
    }
}
