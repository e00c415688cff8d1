use crate::ingest::SourceAdapter;
use crate::model::{CanonicalItem, PriceSnapshot, RunReport, SnapshotReport};
use crate::normalize::normalize_record;
use crate::store::{ItemStore, MemoryStore};
use auction_core::backoff::{retry_with_backoff, RetryPolicy};
use auction_core::{record_metric, Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Runs one adapter end to end: fetch, normalize, upsert, sweep.
pub struct Ingestor {
    store: Arc<dyn ItemStore>,
    retry: RetryPolicy,
}

impl Ingestor {
    pub fn new(store: Arc<dyn ItemStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    /// A transport failure while fetching aborts before anything is written.
    /// With `dry_run` the batch goes through an in-memory store instead, so
    /// the report still shows what a real run would have inserted.
    #[instrument(skip(self, adapter), fields(source = adapter.source_name()))]
    pub async fn run(&self, adapter: &dyn SourceAdapter, max_items: usize, dry_run: bool) -> Result<RunReport> {
        let source = adapter.source_name();
        let started = Instant::now();

        let outcome = self.run_inner(adapter, max_items, dry_run).await;
        let elapsed = started.elapsed().as_secs_f64();
        record_metric!(histogram, "adapter_run_duration_seconds", elapsed, "source" = source);

        match &outcome {
            Ok(report) => {
                record_metric!(counter, "adapter_runs_total", 1, "source" = source, "outcome" = "success");
                info!(%report, dry_run, duration_secs = elapsed, "Adapter run completed");
            }
            Err(e) => {
                record_metric!(counter, "adapter_runs_total", 1, "source" = source, "outcome" = "error");
                error!(error = %e, duration_secs = elapsed, "Adapter run failed");
            }
        }
        outcome
    }

    async fn run_inner(&self, adapter: &dyn SourceAdapter, max_items: usize, dry_run: bool) -> Result<RunReport> {
        let source = adapter.source_name();
        let raw = adapter.fetch_listings(max_items).await?;
        let fetched = raw.len();
        record_metric!(counter, "records_fetched_total", fetched as u64, "source" = source);

        let now = Utc::now();
        let (items, skipped) = normalize_batch(source, raw, now);
        if skipped > 0 {
            record_metric!(counter, "records_skipped_total", skipped as u64, "source" = source);
            warn!(skipped, "Records dropped during normalization");
        }

        let store: Arc<dyn ItemStore> = if dry_run {
            Arc::new(MemoryStore::new())
        } else {
            Arc::clone(&self.store)
        };

        let summary = if items.is_empty() {
            Default::default()
        } else {
            retry_with_backoff(|| store.upsert_items(source, &items), &self.retry, "upsert_items").await?
        };
        let ended = store.sweep_ended(Some(source), now).await?;
        if !dry_run {
            record_metric!(counter, "items_upserted_total", summary.inserted as u64, "source" = source, "op" = "insert");
            record_metric!(counter, "items_upserted_total", summary.updated as u64, "source" = source, "op" = "update");
            record_metric!(counter, "items_swept_total", ended, "source" = source);
        }

        Ok(RunReport {
            fetched,
            skipped,
            inserted: summary.inserted,
            updated: summary.updated,
            ended,
        })
    }

    /// Reclassifies expired Live items across every source.
    #[instrument(skip(self))]
    pub async fn sweep_all(&self) -> Result<u64> {
        let ended = self.store.sweep_ended(None, Utc::now()).await?;
        record_metric!(counter, "items_swept_total", ended, "source" = "all");
        info!(ended, "Swept expired items");
        Ok(ended)
    }

    /// Retention job: deletes items that ended more than `days_old` days ago.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, days_old: i64) -> Result<u64> {
        if days_old < 1 {
            return Err(Error::Validation("days_old must be at least 1".to_string()));
        }
        let cutoff = chrono::Duration::try_days(days_old)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| Error::Validation(format!("days_old {days_old} is out of range")))?;
        let deleted = self.store.delete_ended_before(cutoff).await?;
        info!(deleted, %cutoff, "Deleted long-ended items");
        Ok(deleted)
    }

    /// Daily price history: records today's bid of every Live item, then
    /// drops snapshots older than `days_kept` days.
    #[instrument(skip(self))]
    pub async fn snapshot_prices(&self, days_kept: i64) -> Result<SnapshotReport> {
        let today = Utc::now().date_naive();
        let cutoff = days_before(today, days_kept)?;
        let created = self.store.snapshot_live_items(today).await?;
        let pruned = self.store.delete_snapshots_before(cutoff).await?;
        record_metric!(counter, "price_snapshots_total", created);
        let report = SnapshotReport { created, pruned };
        info!(%report, %today, "Recorded price snapshots");
        Ok(report)
    }

    /// Snapshots of one stored item over the last `days` days, oldest first.
    pub async fn price_history(&self, source_name: &str, external_id: &str, days: i64) -> Result<Vec<PriceSnapshot>> {
        let stored = self
            .store
            .find_item(source_name, external_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("item {source_name}/{external_id}")))?;
        let since = days_before(Utc::now().date_naive(), days)?;
        self.store.price_history(stored.id, since).await
    }
}

fn days_before(day: chrono::NaiveDate, days: i64) -> Result<chrono::NaiveDate> {
    if days < 1 {
        return Err(Error::Validation("days must be at least 1".to_string()));
    }
    u64::try_from(days)
        .ok()
        .and_then(|days| day.checked_sub_days(chrono::Days::new(days)))
        .ok_or_else(|| Error::Validation(format!("days {days} is out of range")))
}

/// Normalizes every record, dropping the ones that fail with a parse error.
fn normalize_batch(
    source: &str,
    raw: Vec<crate::model::RawRecord>,
    now: chrono::DateTime<Utc>,
) -> (Vec<CanonicalItem>, usize) {
    let mut items = Vec::with_capacity(raw.len());
    let mut skipped = 0;
    for record in raw {
        match normalize_record(source, record, now) {
            Ok(item) => items.push(item),
            Err(e) => {
                debug!(error = %e, "Skipping record");
                skipped += 1;
            }
        }
    }
    (items, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{HealthCheckResult, ItemLocator};
    use crate::model::{AuctionRef, ItemStatus, RawRecord};
    use async_trait::async_trait;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshot};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    struct ScriptedAdapter {
        pages: Mutex<Vec<Result<Vec<RawRecord>>>>,
    }

    impl ScriptedAdapter {
        fn new(runs: Vec<Result<Vec<RawRecord>>>) -> Self {
            let mut runs = runs;
            runs.reverse();
            Self { pages: Mutex::new(runs) }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn source_name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
            let next = self.pages.lock().unwrap().pop().unwrap_or_else(|| Ok(Vec::new()));
            next.map(|mut records| {
                records.truncate(max_items);
                records
            })
        }

        async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
            Ok(None)
        }

        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult::healthy("ok")
        }
    }

    fn record(id: &str, title: &str, bid: i64) -> RawRecord {
        RawRecord {
            external_id: Some(id.to_string()),
            title: Some(title.to_string()),
            current_bid: Some(Decimal::new(bid, 0)),
            end_time: Some(Utc::now() + chrono::Duration::days(2)),
            auction: Some(AuctionRef::new("a-1", "Weekly")),
            ..RawRecord::default()
        }
    }

    fn ingestor(store: Arc<MemoryStore>) -> Ingestor {
        Ingestor::new(store, RetryPolicy::new(0, 1, 2.0))
    }

    #[tokio::test]
    async fn rerun_updates_instead_of_duplicating() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(Arc::clone(&store));
        let adapter = ScriptedAdapter::new(vec![
            Ok(vec![
                record("1", "2020 Panini Prizm Justin Jefferson PSA 10", 100),
                record("2", "1986 Fleer Michael Jordan #57", 900),
            ]),
            Ok(vec![record("1", "2020 Panini Prizm Justin Jefferson PSA 10", 150)]),
        ]);

        let first = ingestor.run(&adapter, 100, false).await.unwrap();
        let second = ingestor.run(&adapter, 100, false).await.unwrap();

        assert_eq!(first, RunReport { fetched: 2, skipped: 0, inserted: 2, updated: 0, ended: 0 });
        assert_eq!(second, RunReport { fetched: 1, skipped: 0, inserted: 0, updated: 1, ended: 0 });
        let items = store.items().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item.current_bid, Some(Decimal::new(150, 0)));
        assert_eq!(items[0].item.grading_company.as_deref(), Some("PSA"));
        assert_eq!(store.auction_count().await, 1);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(Arc::clone(&store));
        let mut untitled = record("3", "", 5);
        untitled.title = None;
        let mut anonymous = record("", "2019 Topps Chrome Pete Alonso", 5);
        anonymous.external_id = None;
        let adapter = ScriptedAdapter::new(vec![Ok(vec![
            record("1", "2018 Topps Update Ronald Acuna Jr", 40),
            untitled,
            anonymous,
        ])]);

        let report = ingestor.run(&adapter, 100, false).await.unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn transport_failure_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(Arc::clone(&store));
        let seeded = ScriptedAdapter::new(vec![
            Ok(vec![record("1", "2003 Topps Chrome LeBron James RC", 500)]),
            Err(Error::ingest("scripted", "HTTP 503 after retries")),
        ]);
        ingestor.run(&seeded, 100, false).await.unwrap();

        let result = ingestor.run(&seeded, 100, false).await;

        assert!(result.is_err());
        let items = store.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item.current_bid, Some(Decimal::new(500, 0)));
    }

    #[tokio::test]
    async fn dry_run_leaves_the_store_untouched() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(Arc::clone(&store));
        let adapter = ScriptedAdapter::new(vec![Ok(vec![record("1", "2011 Topps Update Mike Trout", 300)])]);

        let report = ingestor.run(&adapter, 100, true).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert!(store.items().await.is_empty());
    }

    #[tokio::test]
    async fn swept_items_stay_ended_until_reported_live() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(Arc::clone(&store));
        let mut expired = record("1", "1952 Topps Mickey Mantle #311", 10_000);
        expired.end_time = Some(Utc::now() - chrono::Duration::minutes(5));
        let mut live_again = expired.clone();
        live_again.status = Some(ItemStatus::Live);
        let adapter = ScriptedAdapter::new(vec![Ok(vec![expired.clone()]), Ok(vec![expired]), Ok(vec![live_again])]);

        let first = ingestor.run(&adapter, 100, false).await.unwrap();
        assert_eq!(first.ended, 1);

        ingestor.run(&adapter, 100, false).await.unwrap();
        assert_eq!(store.items().await[0].status(), ItemStatus::Ended);

        // Explicitly reported Live, then swept again since the end time is past.
        let third = ingestor.run(&adapter, 100, false).await.unwrap();
        assert_eq!(third.ended, 1);
    }

    #[tokio::test]
    async fn cleanup_rejects_zero_days() {
        let ingestor = ingestor(Arc::new(MemoryStore::new()));
        assert!(matches!(ingestor.cleanup(0).await, Err(Error::Validation(_))));
        assert_eq!(ingestor.cleanup(7).await.unwrap(), 0);
        assert!(matches!(ingestor.cleanup(i64::MAX).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn snapshots_build_a_daily_price_history() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(Arc::clone(&store));
        let adapter = ScriptedAdapter::new(vec![Ok(vec![
            record("1", "2003 Topps Chrome LeBron James RC", 500),
            record("2", "1993 SP Derek Jeter RC", 80),
        ])]);
        ingestor.run(&adapter, 100, false).await.unwrap();

        let first = ingestor.snapshot_prices(90).await.unwrap();
        let again = ingestor.snapshot_prices(90).await.unwrap();

        assert_eq!(first, SnapshotReport { created: 2, pruned: 0 });
        assert_eq!(again, SnapshotReport { created: 0, pruned: 0 });
        let history = ingestor.price_history("scripted", "1", 30).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].current_bid, Some(Decimal::new(500, 0)));
        assert_eq!(history[0].snapshot_date, Utc::now().date_naive());
    }

    #[tokio::test]
    async fn price_history_requires_a_known_item() {
        let ingestor = ingestor(Arc::new(MemoryStore::new()));
        assert!(matches!(
            ingestor.price_history("scripted", "missing", 30).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(ingestor.snapshot_prices(0).await, Err(Error::Validation(_))));
        assert!(matches!(ingestor.snapshot_prices(i64::MAX).await, Err(Error::Validation(_))));
    }

    fn counter_totals(snapshot: Snapshot, name: &str) -> Vec<(Vec<(String, String)>, u64)> {
        let mut totals: Vec<_> = snapshot
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == name)
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) => {
                    let labels = key
                        .key()
                        .labels()
                        .map(|l| (l.key().to_string(), l.value().to_string()))
                        .collect();
                    Some((labels, n))
                }
                _ => None,
            })
            .collect();
        totals.sort();
        totals
    }

    #[test]
    fn upserts_are_counted_once_per_op() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(Arc::clone(&store));
        let adapter = ScriptedAdapter::new(vec![
            Ok(vec![record("1", "2011 Topps Update Mike Trout", 300)]),
            Ok(vec![
                record("1", "2011 Topps Update Mike Trout", 350),
                record("2", "2018 Topps Update Ronald Acuna Jr", 40),
            ]),
            Ok(vec![record("3", "1989 Upper Deck Ken Griffey Jr", 90)]),
        ]);

        metrics::with_local_recorder(&recorder, || {
            futures::executor::block_on(async {
                ingestor.run(&adapter, 100, false).await.unwrap();
                ingestor.run(&adapter, 100, false).await.unwrap();
                ingestor.run(&adapter, 100, true).await.unwrap();
            })
        });

        let label = |op: &str| {
            vec![
                ("source".to_string(), "scripted".to_string()),
                ("op".to_string(), op.to_string()),
            ]
        };
        assert_eq!(
            counter_totals(snapshotter.snapshot(), "items_upserted_total"),
            vec![(label("insert"), 2), (label("update"), 1)]
        );
    }
}
