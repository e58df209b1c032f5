use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("command timed out: {command} ({seconds}s)")]
    Timeout { command: String, seconds: u64 },
    #[error("command failed: {command} :: {reason}")]
    Failed { command: String, reason: String },
    #[error("empty response from command: {command}")]
    EmptyOutput { command: String },
    #[error("adapter io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("adapter serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
