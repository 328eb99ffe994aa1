//! In-memory [`QueueAdapter`] used by this crate's own tests and available
//! to embedders who want to exercise a [`crate::consumer::TaskConsumer`]
//! without a real queue.

use super::{QueueAdapter, MAX_RECEIVE};
use crate::command::{self, Message};
use crate::error::TaskError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

struct Envelope {
    message: Message,
    visible_at: DateTime<Utc>,
    receive_count: u32,
}

/// A queue backed by an in-process `VecDeque`, with receive-count and
/// visibility-timeout behaviour close enough to SQS for the in-flight
/// scheduling logic to exercise every branch: `receive()` hides a message
/// for `task_timeout` seconds, mirroring `SqsQueueAdapter`'s own
/// `.visibility_timeout(self.task_timeout as i32)` on every receive.
pub struct FakeQueueAdapter {
    messages: Mutex<VecDeque<Envelope>>,
    next_handle: AtomicU64,
    fail_change_visibility: AtomicBool,
    task_timeout: i64,
}

impl FakeQueueAdapter {
    /// `task_timeout` is the number of seconds a message stays invisible
    /// after being handed out by `receive()`, mirroring
    /// `SqsQueueAdapter::new(queue_name, task_timeout)`.
    pub fn new(task_timeout: u64) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            next_handle: AtomicU64::new(1),
            fail_change_visibility: AtomicBool::new(false),
            task_timeout: task_timeout as i64,
        }
    }

    /// Force every subsequent `change_visibility` call to report failure,
    /// for exercising the postpone-failure re-issue path (S5).
    pub fn set_change_visibility_fails(&self, fails: bool) {
        self.fail_change_visibility.store(fails, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every currently-parked message immediately receivable, short-
    /// circuiting whatever backoff or deferred delay is in effect. Useful
    /// for integration tests that would otherwise need to wait out a real
    /// backoff window.
    pub fn force_all_visible(&self) {
        let mut queue = self.messages.lock().unwrap();
        for envelope in queue.iter_mut() {
            envelope.visible_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    /// Directly enqueue a pre-built message, bypassing attribute defaulting,
    /// for tests that need an unknown or malformed command.
    pub fn push_raw(&self, message: Message) {
        self.messages.lock().unwrap().push_back(Envelope {
            message,
            visible_at: Utc::now(),
            receive_count: 0,
        });
    }
}

#[async_trait]
impl QueueAdapter for FakeQueueAdapter {
    async fn send(
        &self,
        task_name: &str,
        attrs: &Value,
        delay_s: u64,
        exec_id: Option<String>,
        when: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        let exec_id = exec_id.unwrap_or_else(command::new_exec_id);
        let when = when.unwrap_or_else(Utc::now);
        let mut attributes = HashMap::new();
        attributes.insert("task_name".to_string(), task_name.to_string());
        attributes.insert("exec_id".to_string(), exec_id);
        attributes.insert("when".to_string(), command::format_when(when));

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            body: serde_json::to_string(attrs)?,
            message_attributes: attributes,
            attributes: HashMap::new(),
            receipt_handle: handle.to_string(),
        };
        self.messages.lock().unwrap().push_back(Envelope {
            message,
            visible_at: Utc::now() + chrono::Duration::seconds(delay_s as i64),
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(&self, max: u32) -> Result<Vec<Message>, TaskError> {
        let max = if max > MAX_RECEIVE {
            warn!(requested = max, "RECEIVE_CLAMPED_TO_MAX");
            MAX_RECEIVE
        } else {
            max
        };
        let now = Utc::now();
        let mut queue = self.messages.lock().unwrap();
        let mut out = Vec::new();
        for envelope in queue.iter_mut() {
            if out.len() as u32 >= max {
                break;
            }
            if envelope.visible_at > now {
                continue;
            }
            envelope.receive_count += 1;
            envelope.message.attributes.insert(
                "ApproximateReceiveCount".to_string(),
                envelope.receive_count.to_string(),
            );
            envelope.visible_at = now + chrono::Duration::seconds(self.task_timeout.max(0));
            envelope.attributes_snapshot_into(&mut out);
        }
        Ok(out)
    }

    async fn delete(&self, message: &Message) -> Result<(), TaskError> {
        self.messages
            .lock()
            .unwrap()
            .retain(|e| e.message.receipt_handle != message.receipt_handle);
        Ok(())
    }

    async fn change_visibility(&self, message: &Message, new_timeout_s: i64) -> bool {
        if self.fail_change_visibility.load(Ordering::SeqCst) {
            return false;
        }
        let mut queue = self.messages.lock().unwrap();
        if let Some(envelope) = queue
            .iter_mut()
            .find(|e| e.message.receipt_handle == message.receipt_handle)
        {
            envelope.visible_at = Utc::now() + chrono::Duration::seconds(new_timeout_s.max(0));
            true
        } else {
            false
        }
    }

    async fn approximate_depth(&self) -> Result<u64, TaskError> {
        Ok(self.messages.lock().unwrap().len() as u64)
    }
}

impl Envelope {
    fn attributes_snapshot_into(&self, out: &mut Vec<Message>) {
        out.push(self.message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_is_queue_adapter<T: QueueAdapter>(_: &T) {}

    #[test]
    fn fake_adapter_implements_queue_adapter() {
        let adapter = FakeQueueAdapter::new(120);
        assert_is_queue_adapter(&adapter);
    }

    #[tokio::test]
    async fn send_then_receive_round_trips() {
        let adapter = FakeQueueAdapter::new(120);
        adapter
            .send("greet", &serde_json::json!({"name": "x"}), 0, None, None)
            .await
            .unwrap();
        let messages = adapter.receive(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].task_name(), Some("greet"));
        assert_eq!(messages[0].approximate_receive_count(), 1);
    }

    #[tokio::test]
    async fn receive_count_increments_across_receives() {
        let adapter = FakeQueueAdapter::new(120);
        adapter
            .send("flaky", &serde_json::json!({}), 0, None, None)
            .await
            .unwrap();
        let first = adapter.receive(1).await.unwrap();
        assert_eq!(first[0].approximate_receive_count(), 1);
        // simulate visibility expiry by resetting visible_at in the past
        adapter.change_visibility(&first[0], -1).await;
        let second = adapter.receive(1).await.unwrap();
        assert_eq!(second[0].approximate_receive_count(), 2);
    }

    #[tokio::test]
    async fn received_message_stays_hidden_until_task_timeout_elapses() {
        let adapter = FakeQueueAdapter::new(120);
        adapter
            .send("greet", &serde_json::json!({}), 0, None, None)
            .await
            .unwrap();
        let first = adapter.receive(10).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = adapter.receive(10).await.unwrap();
        assert!(
            second.is_empty(),
            "a message already in flight must not be handed out again before its timeout elapses"
        );
    }

    #[tokio::test]
    async fn delete_removes_message() {
        let adapter = FakeQueueAdapter::new(120);
        adapter
            .send("greet", &serde_json::json!({}), 0, None, None)
            .await
            .unwrap();
        let messages = adapter.receive(1).await.unwrap();
        adapter.delete(&messages[0]).await.unwrap();
        assert!(adapter.is_empty());
    }

    #[tokio::test]
    async fn change_visibility_can_be_forced_to_fail() {
        let adapter = FakeQueueAdapter::new(120);
        adapter
            .send("greet", &serde_json::json!({}), 0, None, None)
            .await
            .unwrap();
        let messages = adapter.receive(1).await.unwrap();
        adapter.set_change_visibility_fails(true);
        assert!(!adapter.change_visibility(&messages[0], 30).await);
    }

    #[tokio::test]
    async fn receive_clamps_a_request_above_max_receive() {
        let adapter = FakeQueueAdapter::new(120);
        for _ in 0..(MAX_RECEIVE + 5) {
            adapter
                .send("greet", &serde_json::json!({}), 0, None, None)
                .await
                .unwrap();
        }
        let messages = adapter.receive(MAX_RECEIVE + 5).await.unwrap();
        assert_eq!(messages.len(), MAX_RECEIVE as usize);
    }
}
