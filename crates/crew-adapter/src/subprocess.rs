use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crew_types::Task;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::AdapterError;
use crate::trait_def::{ProgressCallback, TeammateAdapter};

/// Runs plan/execute requests through external commands over stdio, the
/// way `TEAMMATE_STREAM_LOGS`-aware worker processes have always been
/// driven in this workspace's subprocess-backed adapters: piped stdio,
/// line-buffered concurrent readers, a kill-on-timeout wait.
#[derive(Debug, Clone)]
pub struct SubprocessAdapter {
    pub plan_command: Vec<String>,
    pub execute_command: Vec<String>,
    pub timeout_seconds: u64,
    pub extra_env: HashMap<String, String>,
    pub stream_stderr_to_parent: bool,
}

impl SubprocessAdapter {
    pub fn new(plan_command: Vec<String>, execute_command: Vec<String>) -> Self {
        Self {
            plan_command,
            execute_command,
            timeout_seconds: 120,
            extra_env: HashMap::new(),
            stream_stderr_to_parent: true,
        }
    }

    async fn run(
        &self,
        command: &[String],
        payload: &serde_json::Value,
        progress: Option<ProgressCallback>,
    ) -> Result<String, AdapterError> {
        let command_display = command.join(" ");
        let Some((program, args)) = command.split_first() else {
            return Err(AdapterError::Failed {
                command: command_display,
                reason: "empty command".to_string(),
            });
        };

        let mut child = Command::new(program)
            .args(args)
            .envs(&self.extra_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let request = serde_json::to_vec(payload)?;
        stdin.write_all(&request).await?;
        drop(stdin);

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stdout_lines = Arc::new(Mutex::new(Vec::new()));
        let stderr_lines = Arc::new(Mutex::new(Vec::new()));

        let stdout_task = spawn_reader("stdout", stdout, stdout_lines.clone(), progress.clone(), false);
        let stderr_task = spawn_reader(
            "stderr",
            stderr,
            stderr_lines.clone(),
            progress,
            self.stream_stderr_to_parent,
        );

        let wait_result = tokio::time::timeout(Duration::from_secs(self.timeout_seconds), child.wait()).await;

        let (_, _) = tokio::join!(stdout_task, stderr_task);

        let status = match wait_result {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(AdapterError::Timeout {
                    command: command_display,
                    seconds: self.timeout_seconds,
                });
            }
        };

        let stdout_text = stdout_lines.lock().await.join("\n").trim().to_string();
        let stderr_text = stderr_lines.lock().await.join("\n").trim().to_string();

        if !status.success() {
            let reason = if stderr_text.is_empty() {
                "no stderr".to_string()
            } else {
                stderr_text
            };
            return Err(AdapterError::Failed {
                command: command_display,
                reason,
            });
        }
        if stdout_text.is_empty() {
            return Err(AdapterError::EmptyOutput {
                command: command_display,
            });
        }
        Ok(stdout_text)
    }
}

fn spawn_reader<R>(
    source: &'static str,
    pipe: R,
    collected: Arc<Mutex<Vec<String>>>,
    progress: Option<ProgressCallback>,
    mirror_to_parent: bool,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let text = line.trim_end_matches('\r').to_string();
                    if mirror_to_parent {
                        tracing::debug!(target: "teammate", "{text}");
                    }
                    if !text.is_empty() {
                        if let Some(cb) = &progress {
                            cb(source, &text);
                        }
                    }
                    collected.lock().await.push(text);
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
    })
}

fn build_payload(mode: &str, teammate_id: &str, task: &Task) -> Result<serde_json::Value, AdapterError> {
    Ok(serde_json::json!({
        "mode": mode,
        "teammate_id": teammate_id,
        "task": serde_json::to_value(task)?,
    }))
}

#[async_trait]
impl TeammateAdapter for SubprocessAdapter {
    async fn build_plan(&self, teammate_id: &str, task: &Task) -> Result<String, AdapterError> {
        let payload = build_payload("plan", teammate_id, task)?;
        self.run(&self.plan_command, &payload, None).await
    }

    async fn execute_task(
        &self,
        teammate_id: &str,
        task: &Task,
        progress: Option<ProgressCallback>,
    ) -> Result<String, AdapterError> {
        let payload = build_payload("execute", teammate_id, task)?;
        self.run(&self.execute_command, &payload, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_stdout_is_an_error() {
        let adapter = SubprocessAdapter::new(
            vec!["true".to_string()],
            vec!["true".to_string()],
        );
        let task = Task::new("A", "t", false);
        let err = adapter.build_plan("tm-1", &task).await.unwrap_err();
        assert!(matches!(err, AdapterError::EmptyOutput { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let adapter = SubprocessAdapter::new(
            vec!["false".to_string()],
            vec!["false".to_string()],
        );
        let task = Task::new("A", "t", false);
        let err = adapter.build_plan("tm-1", &task).await.unwrap_err();
        assert!(matches!(err, AdapterError::Failed { .. }));
    }

    #[tokio::test]
    async fn stdout_is_returned_trimmed() {
        let adapter = SubprocessAdapter::new(
            vec!["sh".to_string(), "-c".to_string(), "cat; echo plan-result".to_string()],
            vec!["sh".to_string(), "-c".to_string(), "cat; echo plan-result".to_string()],
        );
        let task = Task::new("A", "t", false);
        let plan = adapter.build_plan("tm-1", &task).await.unwrap();
        assert!(plan.contains("plan-result"));
    }
}
