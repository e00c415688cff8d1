use super::JobTask;
use crate::ingest::{build_adapter, AdapterContext, AdapterKind, SourceAdapter};
use crate::pipeline::Ingestor;
use async_trait::async_trait;
use auction_core::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

/// What a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "adapter")]
pub enum JobTarget {
    Adapter(AdapterKind),
    Cleanup,
    PriceSnapshots,
}

/// One entry of the job registry.
#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    pub target: JobTarget,
    pub default_interval_minutes: u64,
    /// Registered at startup when auto-registration is on.
    pub default_enabled: bool,
}

const CLEANUP_JOB_ID: &str = "cleanup";
const SNAPSHOT_JOB_ID: &str = "price_snapshots";

fn default_interval(kind: AdapterKind) -> (u64, bool) {
    match kind {
        AdapterKind::CardHobby | AdapterKind::Goldin | AdapterKind::Fanatics | AdapterKind::Pristine => (30, true),
        AdapterKind::Heritage => (60, true),
        _ => (60, false),
    }
}

/// Every job that can be enabled: one per adapter, the retention cleanup and
/// the daily price snapshot.
pub fn available_jobs() -> Vec<JobSpec> {
    let mut jobs: Vec<JobSpec> = AdapterKind::ALL
        .into_iter()
        .map(|kind| {
            let (minutes, enabled) = default_interval(kind);
            JobSpec {
                id: kind.name().to_string(),
                name: format!("Scrape {}", kind.display_name()),
                target: JobTarget::Adapter(kind),
                default_interval_minutes: minutes,
                default_enabled: enabled,
            }
        })
        .collect();
    jobs.push(JobSpec {
        id: CLEANUP_JOB_ID.to_string(),
        name: "Delete long-ended items".to_string(),
        target: JobTarget::Cleanup,
        default_interval_minutes: 1440,
        default_enabled: true,
    });
    jobs.push(JobSpec {
        id: SNAPSHOT_JOB_ID.to_string(),
        name: "Record daily price snapshots".to_string(),
        target: JobTarget::PriceSnapshots,
        default_interval_minutes: 1440,
        default_enabled: true,
    });
    jobs
}

pub(crate) fn find_spec(job_id: &str) -> Result<JobSpec> {
    available_jobs()
        .into_iter()
        .find(|spec| spec.id == job_id)
        .ok_or_else(|| Error::NotFound(format!("unknown job: {job_id}")))
}

/// Scrapes one adapter through the ingest pipeline.
pub struct AdapterJob {
    ingestor: Arc<Ingestor>,
    adapter: Arc<dyn SourceAdapter>,
    max_items: usize,
}

impl AdapterJob {
    pub fn new(ingestor: Arc<Ingestor>, adapter: Arc<dyn SourceAdapter>, max_items: usize) -> Self {
        Self {
            ingestor,
            adapter,
            max_items,
        }
    }
}

#[async_trait]
impl JobTask for AdapterJob {
    async fn execute(&self) -> Result<String> {
        let report = self.ingestor.run(self.adapter.as_ref(), self.max_items, false).await?;
        Ok(report.to_string())
    }
}

pub struct CleanupJob {
    ingestor: Arc<Ingestor>,
    days_old: i64,
}

impl CleanupJob {
    pub fn new(ingestor: Arc<Ingestor>, days_old: i64) -> Self {
        Self { ingestor, days_old }
    }
}

#[async_trait]
impl JobTask for CleanupJob {
    async fn execute(&self) -> Result<String> {
        let deleted = self.ingestor.cleanup(self.days_old).await?;
        Ok(format!("deleted {deleted} items ended more than {} days ago", self.days_old))
    }
}

pub struct SnapshotJob {
    ingestor: Arc<Ingestor>,
    days_kept: i64,
}

impl SnapshotJob {
    pub fn new(ingestor: Arc<Ingestor>, days_kept: i64) -> Self {
        Self { ingestor, days_kept }
    }
}

#[async_trait]
impl JobTask for SnapshotJob {
    async fn execute(&self) -> Result<String> {
        Ok(self.ingestor.snapshot_prices(self.days_kept).await?.to_string())
    }
}

/// Builds job tasks from registry entries.
#[derive(Clone)]
pub struct JobFactory {
    ingestor: Arc<Ingestor>,
    ctx: AdapterContext,
    max_items: usize,
    cleanup_days_old: i64,
    snapshot_days_kept: i64,
}

impl JobFactory {
    pub fn new(
        ingestor: Arc<Ingestor>,
        ctx: AdapterContext,
        max_items: usize,
        cleanup_days_old: i64,
        snapshot_days_kept: i64,
    ) -> Self {
        Self {
            ingestor,
            ctx,
            max_items,
            cleanup_days_old,
            snapshot_days_kept,
        }
    }

    pub fn build(&self, spec: &JobSpec) -> Result<Arc<dyn JobTask>> {
        let task: Arc<dyn JobTask> = match spec.target {
            JobTarget::Adapter(kind) => Arc::new(AdapterJob::new(
                Arc::clone(&self.ingestor),
                build_adapter(kind, &self.ctx)?,
                self.max_items,
            )),
            JobTarget::Cleanup => Arc::new(CleanupJob::new(Arc::clone(&self.ingestor), self.cleanup_days_old)),
            JobTarget::PriceSnapshots => {
                Arc::new(SnapshotJob::new(Arc::clone(&self.ingestor), self.snapshot_days_kept))
            }
        };
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn registry_defaults() {
        let jobs = available_jobs();
        assert_eq!(jobs.len(), AdapterKind::ALL.len() + 2);

        let defaults: Vec<(&str, u64)> = jobs
            .iter()
            .filter(|j| j.default_enabled)
            .map(|j| (j.id.as_str(), j.default_interval_minutes))
            .collect();
        assert_eq!(
            defaults,
            vec![
                ("goldin", 30),
                ("fanatics", 30),
                ("cardhobby", 30),
                ("pristine", 30),
                ("heritage", 60),
                ("cleanup", 1440),
                ("price_snapshots", 1440),
            ]
        );
        assert_eq!(find_spec("vsa").unwrap().default_interval_minutes, 60);
        assert!(matches!(find_spec("nope"), Err(Error::NotFound(_))));
    }
}
