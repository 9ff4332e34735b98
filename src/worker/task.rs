//! The unit of background work: process one persisted inbound message.

use serde::{Deserialize, Serialize};

use crate::store::NewDeadLetter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTask {
    pub message_id: String,
    pub external_id: Option<String>,
    pub thread_id: String,
}

impl ProcessTask {
    /// Snapshot this task into a dead-letter row after retries ran out.
    pub fn into_dead_letter(self, attempts: u32, last_error: String) -> NewDeadLetter {
        let context = serde_json::to_string(&self).ok();
        NewDeadLetter {
            message_id: self.message_id,
            external_id: self.external_id,
            thread_id: self.thread_id,
            attempts: attempts as i64,
            last_error,
            context,
        }
    }
}
