//! Scheduler collaborator interface for cleanup jobs.
//!
//! The resolver core does not run cron triggers itself; an external
//! scheduling engine does. This module defines the capability surface that
//! engine must provide and an in-memory implementation of the trigger
//! bookkeeping for tests and embedded use. Schedule strings are opaque
//! cron expressions interpreted by the engine.

pub mod cleanup;

pub use cleanup::CleanupJobConfig;

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{Error, Result};

/// A job's schedule as seen by the scheduler.
pub trait ScheduleConfig {
    fn id(&self) -> Uuid;
    fn schedule(&self) -> &str;
    fn enabled(&self) -> bool;

    /// A job runs only when it is enabled and carries a schedule.
    fn is_scheduled(&self) -> bool {
        self.enabled() && !self.schedule().is_empty()
    }
}

/// Identity of a scheduled job within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

pub trait SchedulerService: Send + Sync {
    /// Apply the job's current schedule. When the config is not scheduled
    /// (disabled or empty schedule), any existing trigger is removed rather
    /// than left stale.
    fn reschedule(&self, config: &dyn ScheduleConfig, group: &str) -> Result<()>;

    fn check_exists(&self, key: &JobKey) -> bool;

    fn delete(&self, key: &JobKey) -> Result<()>;
}

/// Trigger bookkeeping backed by a mutexed map; the firing engine lives
/// elsewhere.
#[derive(Default)]
pub struct InMemoryScheduler {
    triggers: Mutex<HashMap<JobKey, String>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn job_key(config: &dyn ScheduleConfig, group: &str) -> JobKey {
        JobKey::new(config.id().to_string(), group)
    }
}

impl SchedulerService for InMemoryScheduler {
    fn reschedule(&self, config: &dyn ScheduleConfig, group: &str) -> Result<()> {
        let key = Self::job_key(config, group);
        let mut triggers = self.triggers.lock().unwrap();
        if config.is_scheduled() {
            tracing::debug!(
                "Scheduling job {}/{} with '{}'",
                key.group,
                key.name,
                config.schedule()
            );
            triggers.insert(key, config.schedule().to_string());
        } else {
            tracing::debug!("Removing trigger for job {}/{}", key.group, key.name);
            triggers.remove(&key);
        }
        Ok(())
    }

    fn check_exists(&self, key: &JobKey) -> bool {
        self.triggers.lock().unwrap().contains_key(key)
    }

    fn delete(&self, key: &JobKey) -> Result<()> {
        let removed = self.triggers.lock().unwrap().remove(key);
        if removed.is_none() {
            return Err(Error::Scheduler(format!(
                "No job {}/{} to delete",
                key.group, key.name
            )));
        }
        Ok(())
    }
}
