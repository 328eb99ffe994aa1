//! Example demonstrating end-to-end producer/consumer wiring against the
//! in-memory queue adapter.
//!
//! Registers a "greet" task, starts a consumer against it, submits a run
//! through the Producer API, and waits for it to be processed.

use std::sync::Arc;
use std::time::Duration;
use taskrelay::queue::fake::FakeQueueAdapter;
use taskrelay::{
    ConsumerConfig, FallbackTarget, HandlerOutcome, Producer, QueueAdapter, Task, TaskConsumer,
    TaskRegistry, WaitProgression,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskrelay::logging::init();

    let adapter: Arc<dyn QueueAdapter> = Arc::new(FakeQueueAdapter::new(120));

    let registry = Arc::new(TaskRegistry::new());
    registry.register(Task::new(
        "greet",
        Arc::new(|attr| {
            Box::pin(async move {
                let name = attr.get("name").and_then(|v| v.as_str()).unwrap_or("world");
                println!("hello, {name}!");
                Ok(HandlerOutcome::Success)
            })
        }),
        adapter.clone(),
        3,
        Some(FallbackTarget::SamePool("greet_dead_letter".to_string())),
        10,
        WaitProgression::Arithmetic,
    ));

    let config = ConsumerConfig::new("demo_tasks")?;
    let consumer = TaskConsumer::new(adapter.clone(), registry.clone(), config);
    consumer.start().await;

    let producer = Producer::new(registry, adapter);
    producer
        .run("greet", serde_json::json!({"name": "taskrelay"}), None, None)
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    consumer.stop(false).await;
    Ok(())
}
