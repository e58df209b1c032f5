use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("malformed provider response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("provider response violated the decision schema: {0}")]
    SchemaViolation(String),
}
