use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{DecisionResponse, DecisionSnapshot};

/// The scheduling-hint boundary: given a read-only snapshot of the round,
/// produce a bounded decision. Implementations must not mutate state
/// directly — the scheduler applies `task_updates`/`messages` itself.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn run(&self, snapshot: &DecisionSnapshot) -> Result<DecisionResponse, ProviderError>;

    fn name(&self) -> &str;
}
