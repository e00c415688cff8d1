mod control;
mod jobs;

pub use control::{JobControl, JobOptions};
pub use jobs::{available_jobs, AdapterJob, CleanupJob, JobFactory, JobSpec, JobTarget, SnapshotJob};

use async_trait::async_trait;
use auction_core::config::SchedulerConfig;
use auction_core::{record_metric, Error, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Work a scheduled job performs. The returned string lands in the
/// execution record's message.
#[async_trait]
pub trait JobTask: Send + Sync {
    async fn execute(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
    pub message: Option<String>,
    /// Raw error text, surfaced unchanged to operators.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub interval_minutes: u64,
    pub paused: bool,
    pub running: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_execution: Option<ExecutionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub job_count: usize,
    pub jobs: Vec<JobInfo>,
}

struct Job {
    id: String,
    name: String,
    interval: Duration,
    task: Arc<dyn JobTask>,
    paused: AtomicBool,
    /// Shared by every registration of the same id.
    in_flight: Arc<AtomicBool>,
    history: Mutex<VecDeque<ExecutionRecord>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Job {
    fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            interval_minutes: self.interval.as_secs() / 60,
            paused: self.paused.load(Ordering::SeqCst),
            running: self.in_flight.load(Ordering::SeqCst),
            next_run: *lock(&self.next_run),
            last_execution: lock(&self.history).back().cloned(),
        }
    }

    fn stop_ticker(&self) {
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
        }
    }
}

/// Recurring job runner. Each job gets its own ticker task; executions run as
/// separate tasks so a slow or failing job never holds up another.
pub struct Scheduler {
    config: SchedulerConfig,
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    in_flight: Mutex<HashMap<String, Arc<AtomicBool>>>,
    executions: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            jobs: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            executions: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registers `job_id`, replacing any job with the same id along with its
    /// history. A paused job keeps its ticker but skips every tick. An
    /// execution still running from a replaced registration keeps the id busy.
    #[instrument(skip(self, task), fields(job_id = %job_id))]
    pub fn register(
        self: &Arc<Self>,
        job_id: &str,
        name: &str,
        interval: Duration,
        task: Arc<dyn JobTask>,
        paused: bool,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::Validation(format!("job {job_id}: interval must be positive")));
        }
        let in_flight = Arc::clone(
            lock(&self.in_flight)
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        );
        let job = Arc::new(Job {
            id: job_id.to_string(),
            name: name.to_string(),
            interval,
            task,
            paused: AtomicBool::new(paused),
            in_flight,
            history: Mutex::new(VecDeque::new()),
            next_run: Mutex::new(None),
            ticker: Mutex::new(None),
        });

        let replaced = lock(&self.jobs).insert(job_id.to_string(), Arc::clone(&job));
        if let Some(old) = replaced {
            old.stop_ticker();
            debug!("Replaced existing job");
        }
        if self.is_running() {
            self.spawn_ticker(&job);
        }
        record_metric!(gauge, "scheduler_jobs", lock(&self.jobs).len());
        info!(interval_secs = interval.as_secs(), paused, "Registered job");
        Ok(())
    }

    /// Removes the job and its history. An in-flight execution finishes but
    /// its record is discarded.
    pub fn remove(&self, job_id: &str) -> Result<()> {
        let job = lock(&self.jobs)
            .remove(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        job.stop_ticker();
        record_metric!(gauge, "scheduler_jobs", lock(&self.jobs).len());
        info!(job_id, "Removed job");
        Ok(())
    }

    pub fn pause(&self, job_id: &str) -> Result<()> {
        self.job(job_id)?.paused.store(true, Ordering::SeqCst);
        info!(job_id, "Paused job");
        Ok(())
    }

    pub fn resume(&self, job_id: &str) -> Result<()> {
        self.job(job_id)?.paused.store(false, Ordering::SeqCst);
        info!(job_id, "Resumed job");
        Ok(())
    }

    /// Starts an out-of-band execution without touching the regular schedule.
    /// Returns `false` when the job is already running and the request was
    /// coalesced.
    pub fn run_now(self: &Arc<Self>, job_id: &str) -> Result<bool> {
        let job = self.job(job_id)?;
        Ok(self.dispatch(&job, Trigger::Manual))
    }

    /// Most recent executions first.
    pub fn history(&self, job_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let job = self.job(job_id)?;
        let history = lock(&job.history);
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<_> = lock(&self.jobs).values().map(|job| job.info()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub fn contains(&self, job_id: &str) -> bool {
        lock(&self.jobs).contains_key(job_id)
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.jobs();
        SchedulerStatus {
            running: self.is_running(),
            job_count: jobs.len(),
            jobs,
        }
    }

    /// Spawns a ticker for every registered job. Jobs registered afterwards
    /// get theirs immediately.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let jobs: Vec<_> = lock(&self.jobs).values().cloned().collect();
        for job in &jobs {
            self.spawn_ticker(job);
        }
        info!(jobs = jobs.len(), "Scheduler started");
    }

    /// Stops every ticker, then waits up to `shutdown_timeout_secs` for
    /// in-flight executions.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for job in lock(&self.jobs).values() {
            job.stop_ticker();
        }
        let pending: Vec<_> = lock(&self.executions).drain(..).collect();
        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        let waiting = pending.len();
        match tokio::time::timeout(timeout, futures::future::join_all(pending)).await {
            Ok(_) => info!(waited_for = waiting, "Scheduler stopped"),
            Err(_) => warn!(timeout_secs = timeout.as_secs(), "Scheduler stopped with executions still running"),
        }
    }

    fn job(&self, job_id: &str) -> Result<Arc<Job>> {
        lock(&self.jobs)
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }

    fn spawn_ticker(self: &Arc<Self>, job: &Arc<Job>) {
        let scheduler = Arc::downgrade(self);
        let ticking = Arc::clone(job);
        let grace = Duration::from_secs(self.config.misfire_grace_secs);
        *lock(&job.next_run) = Some(Utc::now() + to_chrono(job.interval));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + ticking.interval, ticking.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let due = ticker.tick().await;
                *lock(&ticking.next_run) = Some(Utc::now() + to_chrono(ticking.interval));
                let Some(scheduler) = scheduler.upgrade() else { break };

                let late = due.elapsed();
                if late > grace {
                    record_metric!(counter, "job_ticks_misfired_total", 1, "job_id" = ticking.id.clone());
                    warn!(job_id = %ticking.id, late_secs = late.as_secs(), "Skipping misfired tick");
                    continue;
                }
                if ticking.paused.load(Ordering::SeqCst) {
                    continue;
                }
                scheduler.dispatch(&ticking, Trigger::Scheduled);
            }
        });
        *lock(&job.ticker) = Some(handle);
    }

    /// Single-flight gate: starts an execution only if none is in flight.
    fn dispatch(self: &Arc<Self>, job: &Arc<Job>, trigger: Trigger) -> bool {
        if job.in_flight.swap(true, Ordering::SeqCst) {
            record_metric!(counter, "job_ticks_coalesced_total", 1, "job_id" = job.id.clone());
            debug!(job_id = %job.id, ?trigger, "Previous execution still running, coalescing");
            return false;
        }

        let job = Arc::clone(job);
        let history_limit = self.config.history_limit;
        let handle = tokio::spawn(async move {
            let record = execute(&job, trigger).await;
            let mut history = lock(&job.history);
            history.push_back(record);
            while history.len() > history_limit {
                history.pop_front();
            }
            drop(history);
            job.in_flight.store(false, Ordering::SeqCst);
        });

        let mut executions = lock(&self.executions);
        executions.retain(|h| !h.is_finished());
        executions.push(handle);
        true
    }
}

async fn execute(job: &Job, trigger: Trigger) -> ExecutionRecord {
    let started_at = Utc::now();
    let clock = Instant::now();
    let outcome = AssertUnwindSafe(job.task.execute()).catch_unwind().await;
    let duration_ms = clock.elapsed().as_millis() as u64;

    let (status, message, error) = match outcome {
        Ok(Ok(message)) => {
            info!(job_id = %job.id, ?trigger, duration_ms, %message, "Job finished");
            (ExecutionStatus::Success, Some(message), None)
        }
        Ok(Err(e)) => {
            error!(job_id = %job.id, ?trigger, duration_ms, error = %e, "Job failed");
            (ExecutionStatus::Error, None, Some(e.to_string()))
        }
        Err(_) => {
            error!(job_id = %job.id, ?trigger, "Job panicked");
            (ExecutionStatus::Error, None, Some("job panicked".to_string()))
        }
    };
    let label = match status {
        ExecutionStatus::Success => "success",
        ExecutionStatus::Error => "error",
    };
    record_metric!(counter, "job_executions_total", 1, "job_id" = job.id.clone(), "status" = label);

    ExecutionRecord {
        trigger,
        started_at,
        duration_ms,
        status,
        message,
        error,
    }
}

fn to_chrono(interval: Duration) -> chrono::Duration {
    chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero())
}
