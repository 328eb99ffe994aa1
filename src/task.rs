//! Task registration: name-keyed handler table, retry policy, fallback.

use crate::error::TaskError;
use crate::queue::QueueAdapter;
use crate::retry::WaitProgression;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, warn};

/// What a handler reports back about one invocation.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// The work is done; the message should be deleted.
    Success,
    /// The work did not complete; the message should be retried.
    Failure(String),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerOutcome, TaskError>> + Send>>;

/// A registered handler function: takes the decoded attribute object,
/// returns a boolean-equivalent success signal. Raising (returning `Err`)
/// is treated the same as an explicit `Failure`.
pub type HandlerFn = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Where to send the fallback command when a task is permanently failed.
#[derive(Clone)]
pub enum FallbackTarget {
    /// Another task name in the same pool (this task's own adapter).
    SamePool(String),
    /// A task name routed through a different pool's adapter.
    OtherPool(String, Arc<dyn QueueAdapter>),
}

/// A registered task: name, handler, retry policy, and fallback wiring.
pub struct Task {
    pub name: String,
    handler: HandlerFn,
    pub adapter: Arc<dyn QueueAdapter>,
    pub max_retries: u32,
    pub on_fail: Option<FallbackTarget>,
    pub wait_time: u64,
    pub wait_progression: WaitProgression,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        handler: HandlerFn,
        adapter: Arc<dyn QueueAdapter>,
        max_retries: u32,
        on_fail: Option<FallbackTarget>,
        wait_time: u64,
        wait_progression: WaitProgression,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            adapter,
            max_retries,
            on_fail,
            wait_time,
            wait_progression,
        }
    }

    /// Seconds to wait before the next retry, given attempts already made.
    pub fn get_delay(&self, retries: u32) -> u64 {
        self.wait_progression.get_delay(self.wait_time, retries)
    }

    /// Run the handler, applying the terminal-failure and exception-as-
    /// failure rules from spec §4.2. Returns `true` for success/terminal,
    /// `false` for a retryable failure.
    pub async fn run(&self, attr: Value, retries: u32) -> bool {
        if retries >= self.max_retries {
            error!(task = %self.name, retries, max_retries = self.max_retries, "TASK_FAILED");
            self.issue_fail(attr).await;
            return true;
        }

        match (self.handler)(attr).await {
            Ok(HandlerOutcome::Success) => true,
            Ok(HandlerOutcome::Failure(reason)) => {
                warn!(task = %self.name, reason, "TASK_RETURNED_FAILURE");
                false
            }
            Err(err) => {
                error!(task = %self.name, error = %err, "ERROR_RUNNING_TASK");
                false
            }
        }
    }

    /// Issue a fresh command for this task (used both by the Producer and by
    /// the Consumer's re-issue-before-delete postpone-failure path).
    pub async fn issue(
        &self,
        attr: Value,
        delay: u64,
        exec_id: Option<String>,
        when: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), TaskError> {
        self.adapter
            .send(&self.name, &attr, delay, exec_id, when)
            .await
    }

    async fn issue_fail(&self, attr: Value) {
        let Some(on_fail) = &self.on_fail else {
            return;
        };
        let result = match on_fail {
            FallbackTarget::SamePool(name) => {
                self.adapter.send(name, &attr, 0, None, None).await
            }
            FallbackTarget::OtherPool(name, adapter) => {
                adapter.send(name, &attr, 0, None, None).await
            }
        };
        if let Err(err) = result {
            error!(task = %self.name, error = %err, "FALLBACK_DISPATCH_FAILED");
        }
    }
}

/// Maps task name to its registered [`Task`].
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, Arc<Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, warning (not failing) on an overwrite — matching
    /// the "duplicate task name → warning, overwrite" policy from §7.
    pub fn register(&self, task: Task) {
        if self.tasks.contains_key(&task.name) {
            warn!(task = %task.name, "REGISTERED_TASK_OVERWRITTEN");
        }
        self.tasks.insert(task.name.clone(), Arc::new(task));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Task>> {
        self.tasks.get(name).map(|r| r.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.tasks.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fake::FakeQueueAdapter;

    fn success_handler() -> HandlerFn {
        Arc::new(|_attr| Box::pin(async { Ok(HandlerOutcome::Success) }))
    }

    fn failing_handler() -> HandlerFn {
        Arc::new(|_attr| Box::pin(async { Ok(HandlerOutcome::Failure("nope".into())) }))
    }

    #[tokio::test]
    async fn run_invokes_handler_when_under_max_retries() {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));
        let task = Task::new(
            "greet",
            success_handler(),
            adapter,
            3,
            None,
            0,
            WaitProgression::None,
        );
        assert!(task.run(serde_json::json!({}), 0).await);
    }

    #[tokio::test]
    async fn run_returns_true_and_issues_fallback_at_max_retries() {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));
        let task = Task::new(
            "flaky",
            failing_handler(),
            adapter.clone(),
            3,
            Some(FallbackTarget::SamePool("flaky_dead".into())),
            0,
            WaitProgression::None,
        );
        assert!(task.run(serde_json::json!({}), 3).await);
        assert_eq!(adapter.approximate_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_returns_false_on_handler_failure_under_max() {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));
        let task = Task::new(
            "flaky",
            failing_handler(),
            adapter,
            3,
            None,
            0,
            WaitProgression::None,
        );
        assert!(!task.run(serde_json::json!({}), 0).await);
    }

    #[test]
    fn registry_overwrite_warns_but_succeeds() {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));
        let registry = TaskRegistry::new();
        registry.register(Task::new(
            "greet",
            success_handler(),
            adapter.clone(),
            3,
            None,
            0,
            WaitProgression::None,
        ));
        registry.register(Task::new(
            "greet",
            success_handler(),
            adapter,
            5,
            None,
            0,
            WaitProgression::None,
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("greet").unwrap().max_retries, 5);
    }
}
