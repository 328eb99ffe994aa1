//! The queue-adapter contract and its implementations.

pub mod fake;
pub mod sqs;

use crate::command::Message;
use crate::error::TaskError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Maximum number of messages a single [`QueueAdapter::receive`] call may
/// return; a caller asking for more is clamped down to this with a warning.
pub const MAX_RECEIVE: u32 = 10;

/// Thin interface over the remote, visibility-timeout-based queue.
///
/// Implementors own connection setup and lazy queue creation; `send`,
/// `receive`, and `approximate_depth` fail loudly, while `change_visibility`
/// swallows its own errors and reports `false` so the caller can decide how
/// to recover (see spec §4.1).
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Enqueue a command. Fills in a fresh `exec_id` and `when = now` when
    /// not provided. `delay_s` is the server-side visibility delay before
    /// the message becomes receivable at all.
    async fn send(
        &self,
        task_name: &str,
        attrs: &Value,
        delay_s: u64,
        exec_id: Option<String>,
        when: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError>;

    /// Long-poll up to `max` messages (clamped to [`MAX_RECEIVE`]).
    async fn receive(&self, max: u32) -> Result<Vec<Message>, TaskError>;

    /// Acknowledge/consume a message permanently.
    async fn delete(&self, message: &Message) -> Result<(), TaskError>;

    /// Extend or shorten how long a message stays invisible to other
    /// receivers. Never raises; returns `false` on failure.
    async fn change_visibility(&self, message: &Message, new_timeout_s: i64) -> bool;

    /// Queue length indicator, used by the scaling controller.
    async fn approximate_depth(&self) -> Result<u64, TaskError>;
}
