use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("owner mismatch on task {task_id}: expected {expected:?}, got {actual}")]
    OwnerMismatch {
        task_id: String,
        expected: Option<String>,
        actual: String,
    },
    #[error("invalid transition on task {task_id}: {detail}")]
    InvalidTransition { task_id: String, detail: String },
    #[error("resume mismatch: {0}")]
    ResumeMismatch(String),
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
