use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("state error: {0}")]
    State(#[from] crew_state::StateError),
    #[error("adapter error: {0}")]
    Adapter(#[from] crew_adapter::AdapterError),
    #[error("provider error: {0}")]
    Provider(#[from] crew_provider::ProviderError),
    #[error("config error: {0}")]
    Config(String),
    #[error("at least one execution subject is required")]
    NoExecutionSubjects,
}
