use super::jobs::{available_jobs, find_spec, JobFactory, JobSpec};
use super::{ExecutionRecord, JobInfo, Scheduler, SchedulerStatus};
use auction_core::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct JobOptions {
    pub interval_minutes: Option<u64>,
    /// `Some(false)` registers the job paused.
    pub enabled: Option<bool>,
}

/// Operator-facing job surface over the scheduler and the job registry.
#[derive(Clone)]
pub struct JobControl {
    scheduler: Arc<Scheduler>,
    factory: JobFactory,
}

impl JobControl {
    pub fn new(scheduler: Arc<Scheduler>, factory: JobFactory) -> Self {
        Self { scheduler, factory }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.jobs()
    }

    pub fn list_available(&self) -> Vec<JobSpec> {
        available_jobs()
    }

    /// Registers a job from the registry, replacing any existing one.
    #[instrument(skip(self))]
    pub fn enable(&self, job_id: &str, options: JobOptions) -> Result<JobInfo> {
        let spec = find_spec(job_id)?;
        let minutes = options.interval_minutes.unwrap_or(spec.default_interval_minutes);
        if minutes == 0 {
            return Err(Error::Validation("interval_minutes must be at least 1".to_string()));
        }
        let task = self.factory.build(&spec)?;
        let paused = !options.enabled.unwrap_or(true);
        self.scheduler
            .register(&spec.id, &spec.name, Duration::from_secs(minutes * 60), task, paused)?;
        self.info(&spec.id)
    }

    pub fn disable(&self, job_id: &str) -> Result<()> {
        self.scheduler.remove(job_id)
    }

    pub fn pause(&self, job_id: &str) -> Result<JobInfo> {
        self.scheduler.pause(job_id)?;
        self.info(job_id)
    }

    pub fn resume(&self, job_id: &str) -> Result<JobInfo> {
        self.scheduler.resume(job_id)?;
        self.info(job_id)
    }

    /// `false` when the job was already running.
    pub fn run_now(&self, job_id: &str) -> Result<bool> {
        self.scheduler.run_now(job_id)
    }

    pub fn history(&self, job_id: &str, limit: Option<usize>) -> Result<Vec<ExecutionRecord>> {
        self.scheduler.history(job_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
    }

    pub fn status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    /// Enables every registry entry marked as a default, at its default interval.
    pub fn register_defaults(&self) -> Result<usize> {
        let defaults: Vec<_> = available_jobs().into_iter().filter(|spec| spec.default_enabled).collect();
        for spec in &defaults {
            self.enable(&spec.id, JobOptions::default())?;
        }
        info!(jobs = defaults.len(), "Registered default jobs");
        Ok(defaults.len())
    }

    fn info(&self, job_id: &str) -> Result<JobInfo> {
        self.scheduler
            .jobs()
            .into_iter()
            .find(|job| job.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }
}
