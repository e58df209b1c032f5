use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("change not found: {0}")]
    ChangeNotFound(String),
    #[error("tasks.md not found: {0}")]
    TasksFileNotFound(String),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Validation(String),
    #[error("compiler io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("compiler json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compiler yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
