use serde::{Deserialize, Serialize};

use crate::task::now_seconds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub seq: u64,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub created_at: f64,
}

impl MailMessage {
    pub fn new(
        seq: u64,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
        task_id: Option<String>,
    ) -> Self {
        Self {
            seq,
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
            task_id,
            created_at: now_seconds(),
        }
    }
}
