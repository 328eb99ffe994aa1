//! The scheduling loop: worker-slot accounting, visibility extension,
//! result dispatch, unknown-task policy, deferred-execution gate, scaling.

use crate::command::{self, Message};
use crate::config::ConsumerConfig;
use crate::execution::TaskExecution;
use crate::queue::{QueueAdapter, MAX_RECEIVE};
use crate::scaling;
use crate::task::TaskRegistry;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consumer state machine: `STOPPED -> RUNNING -> STOPPING -> STOPPED`, with
/// `ERROR` reported if the scheduling worker has died while status isn't
/// `STOPPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    Stopped,
    Running,
    Stopping,
    Error,
}

pub struct TaskConsumer {
    adapter: Arc<dyn QueueAdapter>,
    registry: Arc<TaskRegistry>,
    config: ConsumerConfig,
    def_workers: u32,
    workers: AtomicU32,
    status: Mutex<ConsumerStatus>,
    in_flight: Mutex<HashMap<String, TaskExecution>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl TaskConsumer {
    pub fn new(
        adapter: Arc<dyn QueueAdapter>,
        registry: Arc<TaskRegistry>,
        config: ConsumerConfig,
    ) -> Arc<Self> {
        let def_workers = config.workers;
        Arc::new(Self {
            adapter,
            registry,
            workers: AtomicU32::new(def_workers),
            def_workers,
            config,
            status: Mutex::new(ConsumerStatus::Stopped),
            in_flight: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(None),
        })
    }

    pub fn workers(&self) -> u32 {
        self.workers.load(Ordering::SeqCst)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Idempotent: starting while `STOPPING` flips back to `RUNNING` without
    /// spawning a second scheduling worker.
    pub async fn start(self: &Arc<Self>) {
        info!("STARTING_TASK_CONSUMER");
        let was_stopped = self.transition_to_running().await;
        if was_stopped {
            let this = self.clone();
            let handle = tokio::spawn(async move { this.run_loop().await });
            *self.scheduler.lock().await = Some(handle);
        }
    }

    /// Like [`Self::start`], but never spawns the background scheduling
    /// worker: only flips `status` to `RUNNING` (with the same idempotent
    /// `STOPPING -> RUNNING` wrinkle). Intended for tests and embedders that
    /// drive [`Self::tick`] by hand, since `tick()` gates intake on
    /// `status == RUNNING` but a real `run_loop()` would race with manually
    /// driven ticks.
    pub async fn start_without_scheduler(&self) {
        info!("STARTING_TASK_CONSUMER_MANUAL");
        self.transition_to_running().await;
    }

    /// Flip `STOPPED`/`STOPPING` to `RUNNING`; leave `RUNNING`/`ERROR` alone.
    /// Returns whether the prior status was `STOPPED` (i.e. whether a fresh
    /// scheduling worker needs spawning).
    async fn transition_to_running(&self) -> bool {
        let mut status = self.status.lock().await;
        match *status {
            ConsumerStatus::Stopped => {
                *status = ConsumerStatus::Running;
                true
            }
            ConsumerStatus::Stopping => {
                *status = ConsumerStatus::Running;
                false
            }
            ConsumerStatus::Running | ConsumerStatus::Error => false,
        }
    }

    /// `force=false` requests a drain (wait for in-flight to finish);
    /// `force=true` stops immediately and abandons in-flight results to the
    /// next visibility timeout.
    pub async fn stop(&self, force: bool) {
        info!(force, "STOPPING_TASK_CONSUMER");
        let mut status = self.status.lock().await;
        *status = if force {
            ConsumerStatus::Stopped
        } else {
            ConsumerStatus::Stopping
        };
    }

    /// Reports `ERROR` if the scheduling worker has died while status isn't
    /// `STOPPED`.
    pub async fn status(&self) -> ConsumerStatus {
        let status = *self.status.lock().await;
        if status != ConsumerStatus::Stopped {
            let alive = self
                .scheduler
                .lock()
                .await
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false);
            if !alive {
                return ConsumerStatus::Error;
            }
        }
        status
    }

    async fn run_loop(self: Arc<Self>) {
        debug!("Entering loop");
        loop {
            if *self.status.lock().await == ConsumerStatus::Stopped {
                break;
            }
            self.tick().await;
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        debug!("Getting out of loop");
        *self.status.lock().await = ConsumerStatus::Stopped;
    }

    /// One iteration of the main tick: process in-flight, drain check,
    /// scale, intake. Exposed directly so tests can drive it without the
    /// 1-second real-time sleep of [`Self::run_loop`].
    pub async fn tick(&self) {
        let mut in_flight = self.in_flight.lock().await;
        debug!(count = in_flight.len(), "tasks executing");

        self.process_in_flight(&mut in_flight).await;

        {
            let mut status = self.status.lock().await;
            if in_flight.is_empty() && *status == ConsumerStatus::Stopping {
                *status = ConsumerStatus::Stopped;
            }
        }

        self.process_scaling().await;

        let running = *self.status.lock().await == ConsumerStatus::Running;
        let workers = self.workers() as usize;
        if in_flight.len() < workers && running {
            let want = (workers - in_flight.len()).min(MAX_RECEIVE as usize) as u32;
            match self.adapter.receive(want).await {
                Ok(messages) => {
                    if !messages.is_empty() {
                        info!(received = messages.len(), want, "RETRIEVED_TASKS");
                    }
                    for message in messages {
                        self.intake_one(message, &mut in_flight).await;
                    }
                }
                Err(err) => error!(error = %err, "RECEIVE_FAILED"),
            }
        }
    }

    async fn process_in_flight(&self, in_flight: &mut HashMap<String, TaskExecution>) {
        let exec_ids: Vec<String> = in_flight.keys().cloned().collect();
        let mut bye_bye = Vec::new();

        for exec_id in exec_ids {
            let exec = in_flight.get_mut(&exec_id).expect("snapshotted key must exist");

            if let Some(result) = exec.results() {
                self.dispatch_result(exec, result).await;
                bye_bye.push(exec_id);
                continue;
            }

            if exec.worker_finished() {
                error!(job_id = %exec.job_id, job_name = %exec.job_name, "DEAD_WORKER");
                self.dispatch_dead_worker(exec).await;
                bye_bye.push(exec_id);
                continue;
            }

            if Utc::now() > exec.get_deadline() {
                if !exec.postpone(self.adapter.as_ref()).await {
                    self.postpone_failed(exec).await;
                    bye_bye.push(exec_id);
                }
            }
        }

        for exec_id in bye_bye {
            in_flight.remove(&exec_id);
        }
    }

    async fn dispatch_result(&self, exec: &TaskExecution, result: bool) {
        if result {
            let _ = self.adapter.delete(&exec.message).await;
        } else {
            let vis_delay = retry_visibility_delay(exec);
            self.adapter.change_visibility(&exec.message, vis_delay).await;
        }
    }

    async fn dispatch_dead_worker(&self, exec: &TaskExecution) {
        if exec.disabled() {
            let _ = self.adapter.delete(&exec.message).await;
        } else {
            let vis_delay = retry_visibility_delay(exec);
            self.adapter.change_visibility(&exec.message, vis_delay).await;
        }
    }

    /// On postpone failure, re-issue precedes delete so there is never a
    /// window where neither the original nor the replacement command
    /// exists.
    async fn postpone_failed(&self, exec: &mut TaskExecution) {
        error!(job_id = %exec.job_id, job_name = %exec.job_name, "POSTPONE_FAILURE");
        if let Err(err) = exec
            .task
            .issue(exec.attr.clone(), 0, Some(exec.exec_id.clone()), None)
            .await
        {
            error!(error = %err, "REISSUE_FAILED");
        }
        exec.disable();
        let _ = self.adapter.delete(&exec.message).await;
    }

    async fn process_scaling(&self) {
        let Some(max_workers) = self.config.max_workers else {
            return;
        };
        match self.adapter.approximate_depth().await {
            Ok(depth) => {
                let current = self.workers();
                let next = scaling::next_worker_count(
                    current,
                    depth,
                    self.config.scale_factor,
                    self.def_workers,
                    max_workers,
                );
                self.workers.store(next, Ordering::SeqCst);
            }
            Err(err) => warn!(error = %err, "SCALING_ERROR"),
        }
    }

    async fn intake_one(&self, message: Message, in_flight: &mut HashMap<String, TaskExecution>) {
        debug!(attrs = %message.message_attributes.len(), "Received message");

        let known = message
            .task_name()
            .map(|name| self.registry.contains(name))
            .unwrap_or(false);

        if !known {
            warn!("RECEIVED_UNKNOWN_TASK");
            if message.approximate_receive_count() > self.config.unknown_tasks_retries {
                let _ = self.adapter.delete(&message).await;
            } else {
                self.adapter
                    .change_visibility(&message, self.config.unknown_tasks_delay as i64)
                    .await;
            }
            return;
        }

        if let Some(raw_when) = message.when() {
            match command::parse_when(raw_when) {
                Ok(when) => {
                    let now = Utc::now();
                    if now > when {
                        warn!(%raw_when, "EXEC_PASSED_DUE_DATE");
                    }
                    let admit_after = when - Duration::seconds(self.config.when_window);
                    if now <= admit_after {
                        let total = (admit_after - now).num_seconds().max(0);
                        let delay = total.min(18000);
                        self.adapter.change_visibility(&message, delay).await;
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "INVALID_WHEN_HEADER");
                }
            }
        }

        let task_name = message.task_name().expect("known task implies a name").to_string();
        let task = self.registry.get(&task_name).expect("checked contains above");

        let attr = match serde_json::from_str(&message.body) {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "MALFORMED_COMMAND_BODY");
                if message.approximate_receive_count() > self.config.unknown_tasks_retries {
                    let _ = self.adapter.delete(&message).await;
                } else {
                    self.adapter
                        .change_visibility(&message, self.config.unknown_tasks_delay as i64)
                        .await;
                }
                return;
            }
        };

        let exec_id = message
            .exec_id()
            .map(str::to_string)
            .unwrap_or_else(command::new_exec_id);
        let attempts = message.approximate_receive_count();

        info!(job_id = %exec_id, job_name = %task_name, "RUNNING_TASK");
        let mut exec = TaskExecution::new(
            exec_id.clone(),
            task,
            attr,
            attempts,
            Utc::now(),
            message,
            self.config.task_timeout,
        );
        exec.spawn();
        in_flight.insert(exec_id, exec);
    }
}

/// `(now - created_at) + task.get_delay(attempts)`, the visibility delay
/// applied after a handler failure (or a dead worker standing in for one).
fn retry_visibility_delay(exec: &TaskExecution) -> i64 {
    let elapsed = (Utc::now() - exec.created_at).num_seconds().max(0);
    elapsed + exec.task.get_delay(exec.attempts) as i64
}
