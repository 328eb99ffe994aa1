//! Reliable asynchronous task execution engine over a visibility-timeout
//! queue: producers enqueue task execution commands, a Consumer dequeues
//! them, runs registered handlers by name, and manages visibility
//! extension, retry backoff, deferred execution, fallback, and dynamic
//! worker-pool scaling.

pub mod command;
pub mod config;
pub mod consumer;
pub mod error;
pub mod execution;
pub mod logging;
pub mod producer;
pub mod queue;
pub mod retry;
pub mod scaling;
pub mod task;

pub use command::Message;
pub use config::ConsumerConfig;
pub use consumer::{ConsumerStatus, TaskConsumer};
pub use error::{Result, TaskError};
pub use execution::TaskExecution;
pub use producer::Producer;
pub use queue::QueueAdapter;
pub use retry::WaitProgression;
pub use task::{FallbackTarget, HandlerFn, HandlerFuture, HandlerOutcome, Task, TaskRegistry};

use serde::Serialize;

/// Readiness status for each feature the core exposes, per spec §6.
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub task_queues: FeatureStatus,
    pub task_consumer: FeatureStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeatureStatus {
    Ok,
    Error,
}

/// `TASK_CONSUMER` is OK iff the consumer's status is `RUNNING` or
/// `STOPPING` and its scheduling worker is alive (i.e. not `ERROR`).
pub async fn ready(consumer: &TaskConsumer) -> Readiness {
    let status = consumer.status().await;
    let task_consumer = match status {
        ConsumerStatus::Running | ConsumerStatus::Stopping => FeatureStatus::Ok,
        ConsumerStatus::Stopped | ConsumerStatus::Error => FeatureStatus::Error,
    };
    Readiness {
        task_queues: FeatureStatus::Ok,
        task_consumer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fake::FakeQueueAdapter;
    use std::sync::Arc;

    #[tokio::test]
    async fn ready_reports_error_before_start() {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));
        let registry = Arc::new(TaskRegistry::new());
        let config = ConsumerConfig::new("project_tasks").unwrap();
        let consumer = TaskConsumer::new(adapter, registry, config);
        let readiness = ready(&consumer).await;
        assert_eq!(readiness.task_consumer, FeatureStatus::Error);
    }

    #[tokio::test]
    async fn ready_reports_ok_while_running() {
        let adapter: Arc<dyn QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));
        let registry = Arc::new(TaskRegistry::new());
        let config = ConsumerConfig::new("project_tasks").unwrap();
        let consumer = TaskConsumer::new(adapter, registry, config);
        consumer.start().await;
        let readiness = ready(&consumer).await;
        assert_eq!(readiness.task_consumer, FeatureStatus::Ok);
        consumer.stop(true).await;
    }
}
