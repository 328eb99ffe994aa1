//! Environment-driven configuration for a [`crate::consumer::TaskConsumer`].
//!
//! There is no config file in this crate (the loader mechanism is out of
//! scope — see spec §1); values are read from `TASKRELAY_`-prefixed
//! environment variables with the defaults and constraints from spec §6.

use crate::error::TaskError;
use std::env;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Lowercase identifier naming this consumer's queue/pool. Required.
    pub task_pool: String,
    pub task_timeout: u64,
    pub workers: u32,
    pub unknown_tasks_retries: u32,
    pub unknown_tasks_delay: u64,
    /// `None` disables auto-scaling.
    pub max_workers: Option<u32>,
    pub scale_factor: u32,
    pub when_window: i64,
}

impl ConsumerConfig {
    /// Build a config for `task_pool` using spec-table defaults; useful for
    /// tests and for embedders who configure programmatically instead of
    /// through the environment.
    pub fn new(task_pool: impl Into<String>) -> Result<Self, TaskError> {
        let cfg = Self {
            task_pool: task_pool.into(),
            task_timeout: 120,
            workers: 3,
            unknown_tasks_retries: 50,
            unknown_tasks_delay: 10,
            max_workers: Some(6),
            scale_factor: 100,
            when_window: 300,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `TASKRELAY_*` environment variables, falling back to the
    /// spec-table defaults for anything unset.
    pub fn from_env() -> Result<Self, TaskError> {
        let task_pool = env::var("TASKRELAY_TASK_POOL").map_err(|_| {
            TaskError::Configuration("TASKRELAY_TASK_POOL is required".into())
        })?;

        let cfg = Self {
            task_pool,
            task_timeout: read_env_u64("TASKRELAY_TASK_TIMEOUT", 120)?,
            workers: read_env_u32("TASKRELAY_WORKERS", 3)?,
            unknown_tasks_retries: read_env_u32("TASKRELAY_UNKNOWN_TASKS_RETRIES", 50)?,
            unknown_tasks_delay: read_env_u64("TASKRELAY_UNKNOWN_TASKS_DELAY", 10)?,
            max_workers: match env::var("TASKRELAY_MAX_WORKERS") {
                Ok(v) if v.is_empty() => None,
                Ok(v) => Some(v.parse().map_err(|_| {
                    TaskError::Configuration("TASKRELAY_MAX_WORKERS must be an integer".into())
                })?),
                Err(_) => Some(6),
            },
            scale_factor: read_env_u32("TASKRELAY_SCALE_FACTOR", 100)?,
            when_window: read_env_u64("TASKRELAY_WHEN_WINDOW", 300)? as i64,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.task_pool.is_empty() || self.task_pool.to_lowercase() != self.task_pool {
            return Err(TaskError::Configuration(
                "task_pool must be a non-empty lowercase identifier".into(),
            ));
        }
        if self.task_timeout == 0 {
            return Err(TaskError::Configuration("task_timeout must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(TaskError::Configuration("workers must be > 0".into()));
        }
        if self.unknown_tasks_retries == 0 {
            return Err(TaskError::Configuration(
                "unknown_tasks_retries must be > 0".into(),
            ));
        }
        if self.unknown_tasks_delay == 0 {
            return Err(TaskError::Configuration(
                "unknown_tasks_delay must be > 0".into(),
            ));
        }
        if let Some(max) = self.max_workers {
            if max == 0 {
                return Err(TaskError::Configuration("max_workers must be > 0".into()));
            }
        }
        if self.scale_factor == 0 {
            return Err(TaskError::Configuration("scale_factor must be > 0".into()));
        }
        if self.when_window <= 0 {
            return Err(TaskError::Configuration("when_window must be > 0".into()));
        }
        Ok(())
    }
}

fn read_env_u64(key: &str, default: u64) -> Result<u64, TaskError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| TaskError::Configuration(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

fn read_env_u32(key: &str, default: u32) -> Result<u32, TaskError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| TaskError::Configuration(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = ConsumerConfig::new("project_tasks").unwrap();
        assert_eq!(cfg.task_timeout, 120);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.unknown_tasks_retries, 50);
        assert_eq!(cfg.unknown_tasks_delay, 10);
        assert_eq!(cfg.max_workers, Some(6));
        assert_eq!(cfg.scale_factor, 100);
        assert_eq!(cfg.when_window, 300);
    }

    #[test]
    fn uppercase_pool_name_is_rejected() {
        assert!(ConsumerConfig::new("ProjectTasks").is_err());
    }
}
