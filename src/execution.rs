//! The in-flight per-message record and its lifecycle.

use crate::command::Message;
use crate::queue::QueueAdapter;
use crate::task::Task;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, info_span, Instrument};

/// Created when the Consumer accepts a message for execution; destroyed
/// when it leaves the in-flight set. Mutated only by the scheduling loop,
/// except `results`, which the spawned worker writes exactly once.
pub struct TaskExecution {
    pub exec_id: String,
    pub task: Arc<Task>,
    pub attr: Value,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub message: Message,
    pub timeout: u64,
    pub postpone_num: u32,
    pub job_id: String,
    pub job_name: String,
    results: Arc<Mutex<Option<bool>>>,
    disabled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TaskExecution {
    pub fn new(
        exec_id: String,
        task: Arc<Task>,
        attr: Value,
        attempts: u32,
        created_at: DateTime<Utc>,
        message: Message,
        timeout: u64,
    ) -> Self {
        let job_name = task.name.clone();
        Self {
            exec_id: exec_id.clone(),
            task,
            attr,
            attempts,
            created_at,
            message,
            timeout,
            postpone_num: 0,
            job_id: exec_id,
            job_name,
            results: Arc::new(Mutex::new(None)),
            disabled: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// `created_at + (timeout/2)·(postpone_num+1)`.
    pub fn get_deadline(&self) -> DateTime<Utc> {
        let half = (self.timeout / 2) as i64;
        self.created_at + Duration::seconds(half * (self.postpone_num as i64 + 1))
    }

    /// Whether the worker has finished and written a result.
    pub fn results(&self) -> Option<bool> {
        *self.results.lock().unwrap()
    }

    pub fn disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    /// Whether the spawned handler worker has terminated (one way or
    /// another). Used to detect a dead worker that never wrote a result.
    pub fn worker_finished(&self) -> bool {
        self.worker.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Spawn the handler on its own task. `retries = attempts - 1` per
    /// invariant 3; a fresh message (`attempts = 1`) yields `retries = 0`.
    ///
    /// The handler runs inside a span carrying `job_id`/`job_name` so every
    /// log record it (or `Task::run`) emits satisfies the logging contract
    /// in spec §6.
    pub fn spawn(&mut self) {
        let task = self.task.clone();
        let attr = self.attr.clone();
        let retries = self.attempts.saturating_sub(1);
        let results = self.results.clone();
        let disabled = self.disabled.clone();
        let span = info_span!("task_execution", job_id = %self.job_id, job_name = %self.job_name);

        self.worker = Some(tokio::spawn(
            async move {
                let outcome = task.run(attr, retries).await;
                if !disabled.load(Ordering::SeqCst) {
                    *results.lock().unwrap() = Some(outcome);
                }
            }
            .instrument(span),
        ));
    }

    /// Extend the message's visibility to keep pace with a deadline that has
    /// already passed. Bumps `postpone_num` first (the "half-timeout
    /// ratchet" — see spec §4.3/§9), then asks the queue to extend by
    /// `⌈(deadline − now)⌉ + timeout` seconds.
    pub async fn postpone(&mut self, adapter: &dyn QueueAdapter) -> bool {
        self.postpone_num += 1;
        let remaining = (self.get_deadline() - Utc::now()).num_seconds().max(0);
        let new_timeout = remaining + self.timeout as i64;
        info!(
            job_id = %self.job_id, job_name = %self.job_name, new_timeout,
            "POSTPONE"
        );
        adapter.change_visibility(&self.message, new_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fake::FakeQueueAdapter;
    use crate::retry::WaitProgression;
    use std::collections::HashMap;

    fn dummy_message() -> Message {
        Message {
            body: "{}".into(),
            message_attributes: HashMap::new(),
            attributes: HashMap::new(),
            receipt_handle: "h1".into(),
        }
    }

    fn dummy_task() -> Arc<Task> {
        let adapter: Arc<dyn crate::queue::QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));
        Arc::new(Task::new(
            "greet",
            Arc::new(|_| Box::pin(async { Ok(crate::task::HandlerOutcome::Success) })),
            adapter,
            3,
            None,
            0,
            WaitProgression::None,
        ))
    }

    #[test]
    fn deadline_follows_half_timeout_law() {
        let created_at = Utc::now();
        let exec = TaskExecution::new(
            "e1".into(),
            dummy_task(),
            serde_json::json!({}),
            1,
            created_at,
            dummy_message(),
            120,
        );
        assert_eq!(exec.get_deadline(), created_at + Duration::seconds(60));
    }

    #[test]
    fn deadline_grows_with_postpone_num() {
        let created_at = Utc::now();
        let mut exec = TaskExecution::new(
            "e1".into(),
            dummy_task(),
            serde_json::json!({}),
            1,
            created_at,
            dummy_message(),
            120,
        );
        exec.postpone_num = 2;
        assert_eq!(exec.get_deadline(), created_at + Duration::seconds(180));
    }

    #[tokio::test]
    async fn spawn_writes_result_when_not_disabled() {
        let mut exec = TaskExecution::new(
            "e1".into(),
            dummy_task(),
            serde_json::json!({}),
            1,
            Utc::now(),
            dummy_message(),
            120,
        );
        exec.spawn();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(exec.results(), Some(true));
    }

    #[tokio::test]
    async fn postpone_failure_is_reported() {
        let mut exec = TaskExecution::new(
            "e1".into(),
            dummy_task(),
            serde_json::json!({}),
            1,
            Utc::now() - Duration::seconds(1000),
            dummy_message(),
            120,
        );
        let adapter = FakeQueueAdapter::new(120);
        adapter.set_change_visibility_fails(true);
        assert!(!exec.postpone(&adapter).await);
        assert_eq!(exec.postpone_num, 1);
    }
}
