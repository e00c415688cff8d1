use crate::auth::{AuthService, LoginOutcome};
use crate::bid::{BidExecutor, BidOutcome};
use crate::browser::{ChromiumLauncher, SharedBrowser};
use crate::ingest::{build_adapter, AdapterContext, AdapterKind, HealthCheckResult};
use crate::model::{PriceSnapshot, RunReport, SnapshotReport};
use crate::pipeline::Ingestor;
use crate::scheduler::{JobControl, JobFactory, JobSpec, Scheduler};
use crate::session::SessionManager;
use crate::store::{ItemStore, PgStore};
use crate::vault::{CredentialStatus, CredentialVault};
use auction_core::crypto::Cipher;
use auction_core::{Config, Result};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Wires the read path (adapters, ingest, scheduler) and the write path
/// (vault, sessions, login, bidding) over one store and one browser.
pub struct App {
    config: Config,
    adapters: AdapterContext,
    ingestor: Arc<Ingestor>,
    jobs: JobControl,
    vault: Arc<CredentialVault>,
    sessions: Arc<SessionManager>,
    auth: AuthService,
    bids: BidExecutor,
}

impl App {
    #[instrument(skip(config, pool))]
    pub async fn new(config: Config, pool: PgPool) -> Result<Self> {
        info!("Initializing application");

        let store = Arc::new(PgStore::new(pool));
        info!("Performing health checks");
        store.health_check().await?;

        // Chrome is only launched once something renders a page.
        let launcher = Arc::new(ChromiumLauncher::new(
            config.browser.clone(),
            config.scraping.user_agent.clone(),
        ));
        let browser = Arc::new(SharedBrowser::new(
            launcher,
            Duration::from_millis(config.browser.settle_millis),
        ));

        let adapters = AdapterContext::new(config.scraping.clone(), config.sources.clone(), Arc::clone(&browser));
        let ingestor = Arc::new(Ingestor::new(store.clone(), config.scraping.retry_policy()));
        let factory = JobFactory::new(
            Arc::clone(&ingestor),
            adapters.clone(),
            config.scraping.default_max_items,
            config.scheduler.cleanup_days_old,
            config.scheduler.snapshot_days_kept,
        );
        let jobs = JobControl::new(Scheduler::new(config.scheduler.clone()), factory);

        let vault = Arc::new(CredentialVault::new(
            store,
            Cipher::from_secret(&config.vault.secret_key)?,
            config.vault.session_ttl_hours,
        ));
        let sessions = Arc::new(SessionManager::new(browser));
        let auth = AuthService::new(Arc::clone(&vault), Arc::clone(&sessions));
        let bids = BidExecutor::new(Arc::clone(&vault), Arc::clone(&sessions));

        Ok(Self {
            config,
            adapters,
            ingestor,
            jobs,
            vault,
            sessions,
            auth,
            bids,
        })
    }

    pub fn jobs(&self) -> &JobControl {
        &self.jobs
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Starts the scheduler and blocks until Ctrl-C, then shuts down in order.
    pub async fn run_service(&self, register_defaults: bool) -> Result<()> {
        if register_defaults || self.config.scheduler.auto_register_default_jobs {
            self.jobs.register_defaults()?;
        } else {
            info!("No jobs registered; enable them through job control");
        }
        self.jobs.scheduler().start();

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        self.shutdown().await
    }

    pub async fn scrape(&self, kind: AdapterKind, max_items: Option<usize>, dry_run: bool) -> Result<RunReport> {
        let adapter = build_adapter(kind, &self.adapters)?;
        let max_items = max_items.unwrap_or(self.config.scraping.default_max_items);
        let report = self.ingestor.run(adapter.as_ref(), max_items, dry_run).await;
        self.close_browser().await;
        report
    }

    /// Health of one adapter, or of every adapter in registry order.
    pub async fn health(&self, kind: Option<AdapterKind>) -> Result<Vec<(AdapterKind, HealthCheckResult)>> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => AdapterKind::ALL.to_vec(),
        };
        let mut results = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let adapter = build_adapter(kind, &self.adapters)?;
            results.push((kind, adapter.health_check().await));
        }
        self.close_browser().await;
        Ok(results)
    }

    pub async fn sweep(&self) -> Result<u64> {
        self.ingestor.sweep_all().await
    }

    pub async fn cleanup(&self, days_old: Option<i64>) -> Result<u64> {
        self.ingestor
            .cleanup(days_old.unwrap_or(self.config.scheduler.cleanup_days_old))
            .await
    }

    pub async fn snapshot_prices(&self) -> Result<SnapshotReport> {
        self.ingestor
            .snapshot_prices(self.config.scheduler.snapshot_days_kept)
            .await
    }

    pub async fn price_history(&self, kind: AdapterKind, external_id: &str, days: i64) -> Result<Vec<PriceSnapshot>> {
        self.ingestor.price_history(kind.name(), external_id, days).await
    }

    pub fn available_jobs(&self) -> Vec<JobSpec> {
        self.jobs.list_available()
    }

    pub async fn store_credentials(&self, user_id: i64, site: &str, username: &str, password: &str) -> Result<CredentialStatus> {
        self.vault.store(user_id, site, username, password).await
    }

    pub async fn login(&self, user_id: i64, site: &str) -> Result<LoginOutcome> {
        let outcome = self.auth.login(user_id, site).await;
        self.close_browser().await;
        outcome
    }

    pub async fn logout(&self, user_id: i64, site: &str) -> Result<u64> {
        self.auth.logout(user_id, site).await
    }

    pub async fn bid(&self, user_id: i64, site: &str, item_url: &str, amount: Decimal) -> Result<BidOutcome> {
        let outcome = self.bids.place_bid(user_id, site, item_url, amount).await;
        self.close_browser().await;
        outcome
    }

    /// Stops job tickers and waits for in-flight runs, then closes every
    /// browser context and the browser itself.
    pub async fn shutdown(&self) -> Result<()> {
        self.jobs.scheduler().shutdown().await;
        self.sessions.shutdown().await
    }

    async fn close_browser(&self) {
        if let Err(e) = self.sessions.shutdown().await {
            warn!(error = %e, "Failed to close browser");
        }
    }
}
