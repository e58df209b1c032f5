use std::sync::Arc;

use async_trait::async_trait;
use crew_types::Task;

use crate::error::AdapterError;

/// Invoked once per non-empty stdout/stderr line during `execute_task`,
/// labeled by source (`"stdout"` or `"stderr"`).
pub type ProgressCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[async_trait]
pub trait TeammateAdapter: Send + Sync {
    async fn build_plan(&self, teammate_id: &str, task: &Task) -> Result<String, AdapterError>;

    async fn execute_task(
        &self,
        teammate_id: &str,
        task: &Task,
        progress: Option<ProgressCallback>,
    ) -> Result<String, AdapterError>;
}
