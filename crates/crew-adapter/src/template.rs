use async_trait::async_trait;
use crew_types::Task;

use crate::error::AdapterError;
use crate::trait_def::{ProgressCallback, TeammateAdapter};

/// Inert adapter for tests and dry runs: fills a small template with the
/// teammate id and task fields instead of invoking an external process.
#[derive(Debug, Clone)]
pub struct TemplateAdapter {
    pub plan_template: String,
    pub result_template: String,
}

impl Default for TemplateAdapter {
    fn default() -> Self {
        Self {
            plan_template: "plan by {teammate_id} for {task_id}: {title}".to_string(),
            result_template: "{teammate_id} completed {task_id}: {title}".to_string(),
        }
    }
}

fn render(template: &str, teammate_id: &str, task: &Task) -> String {
    template
        .replace("{teammate_id}", teammate_id)
        .replace("{task_id}", &task.id)
        .replace("{title}", &task.title)
}

#[async_trait]
impl TeammateAdapter for TemplateAdapter {
    async fn build_plan(&self, teammate_id: &str, task: &Task) -> Result<String, AdapterError> {
        Ok(render(&self.plan_template, teammate_id, task))
    }

    async fn execute_task(
        &self,
        teammate_id: &str,
        task: &Task,
        progress: Option<ProgressCallback>,
    ) -> Result<String, AdapterError> {
        let summary = render(&self.result_template, teammate_id, task);
        if let Some(cb) = progress {
            cb("stdout", &summary);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_types::Task;

    #[tokio::test]
    async fn renders_task_fields_into_templates() {
        let adapter = TemplateAdapter::default();
        let task = Task::new("A", "do the thing", false);
        let plan = adapter.build_plan("tm-1", &task).await.unwrap();
        assert!(plan.contains("tm-1"));
        assert!(plan.contains("A"));
        let result = adapter.execute_task("tm-1", &task, None).await.unwrap();
        assert!(result.contains("do the thing"));
    }
}
