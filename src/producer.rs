//! The small producer-side surface: send a run command into a pool.

use crate::error::TaskError;
use crate::queue::QueueAdapter;
use crate::task::TaskRegistry;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// `run(task_name, attrs, task_pool?, when?)` from spec §4.6.
///
/// `task_pool` defaults to the consumer's own registry/adapter; when a
/// different pool is supplied the strictness check is skipped, since
/// cross-pool tasks need not be registered locally.
pub struct Producer {
    local_registry: Arc<TaskRegistry>,
    local_adapter: Arc<dyn QueueAdapter>,
}

impl Producer {
    pub fn new(local_registry: Arc<TaskRegistry>, local_adapter: Arc<dyn QueueAdapter>) -> Self {
        Self {
            local_registry,
            local_adapter,
        }
    }

    pub async fn run(
        &self,
        task_name: &str,
        attrs: Value,
        task_pool: Option<Arc<dyn QueueAdapter>>,
        when: Option<DateTime<Utc>>,
    ) -> Result<(), TaskError> {
        let (adapter, strict) = match task_pool {
            Some(adapter) => (adapter, false),
            None => (self.local_adapter.clone(), true),
        };

        if strict && !self.local_registry.contains(task_name) {
            return Err(TaskError::Registration(format!(
                "strict task not registered: {task_name}"
            )));
        }

        adapter.send(task_name, &attrs, 0, None, when).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fake::FakeQueueAdapter;
    use crate::retry::WaitProgression;
    use crate::task::{HandlerOutcome, Task};

    fn adapter() -> Arc<dyn QueueAdapter> {
        Arc::new(FakeQueueAdapter::new(120))
    }

    #[tokio::test]
    async fn strict_run_rejects_unregistered_task() {
        let registry = Arc::new(TaskRegistry::new());
        let producer = Producer::new(registry, adapter());
        let err = producer
            .run("missing", serde_json::json!({}), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Registration(_)));
    }

    #[tokio::test]
    async fn strict_run_succeeds_for_registered_task() {
        let local_adapter = adapter();
        let registry = Arc::new(TaskRegistry::new());
        registry.register(Task::new(
            "greet",
            Arc::new(|_| Box::pin(async { Ok(HandlerOutcome::Success) })),
            local_adapter.clone(),
            3,
            None,
            0,
            WaitProgression::None,
        ));
        let producer = Producer::new(registry, local_adapter);
        producer
            .run("greet", serde_json::json!({"name": "x"}), None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cross_pool_run_skips_strictness_check() {
        let registry = Arc::new(TaskRegistry::new());
        let local_adapter = adapter();
        let other_pool_adapter = adapter();
        let producer = Producer::new(registry, local_adapter);
        producer
            .run(
                "not_registered_here",
                serde_json::json!({}),
                Some(other_pool_adapter),
                None,
            )
            .await
            .unwrap();
    }
}
