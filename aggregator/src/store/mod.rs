mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use crate::model::{
    CanonicalItem, CredentialRow, NewCredential, PriceSnapshot, SessionRow, StoredItem, UpsertSummary,
};
use async_trait::async_trait;
use auction_core::Result;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Maximum stored length of a credential's last error.
pub const LAST_ERROR_MAX_CHARS: usize = 500;

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert-or-update every item under `source_name` in one transaction.
    /// Auctions referenced by the items are created on first sight.
    async fn upsert_items(&self, source_name: &str, items: &[CanonicalItem]) -> Result<UpsertSummary>;

    /// Marks Live items whose end time has passed as Ended. Restricted to one
    /// source when given.
    async fn sweep_ended(&self, source_name: Option<&str>, now: DateTime<Utc>) -> Result<u64>;

    /// Physically deletes Ended items whose end time is before `cutoff`.
    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn find_item(&self, source_name: &str, external_id: &str) -> Result<Option<StoredItem>>;

    async fn count_items(&self, source_name: &str) -> Result<i64>;

    /// Records the bid of every Live item for `day`. An item already
    /// snapshotted that day is left alone.
    async fn snapshot_live_items(&self, day: NaiveDate) -> Result<u64>;

    /// Snapshots of one item taken on or after `since`, oldest first.
    async fn price_history(&self, item_id: Uuid, since: NaiveDate) -> Result<Vec<PriceSnapshot>>;

    async fn delete_snapshots_before(&self, cutoff: NaiveDate) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Creates or replaces the secrets for (user, site), resetting validity.
    async fn upsert_credential(&self, credential: NewCredential) -> Result<CredentialRow>;

    async fn get_credential(&self, user_id: i64, site: &str) -> Result<Option<CredentialRow>>;

    async fn list_credentials(&self, user_id: i64) -> Result<Vec<CredentialRow>>;

    async fn mark_invalid(&self, credential_id: Uuid, reason: &str) -> Result<()>;

    async fn mark_verified(&self, credential_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Deletes the credential and, by cascade, its sessions.
    async fn delete_credential(&self, user_id: i64, site: &str) -> Result<bool>;

    /// Stores a new active session and deactivates every other session of
    /// the credential atomically.
    async fn insert_session(
        &self,
        credential_id: Uuid,
        encrypted_state: &str,
        iv: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRow>;

    async fn active_session(&self, credential_id: Uuid, now: DateTime<Utc>) -> Result<Option<SessionRow>>;

    async fn deactivate_sessions(&self, credential_id: Uuid) -> Result<u64>;

    async fn list_sessions(&self, credential_id: Uuid) -> Result<Vec<SessionRow>>;
}

pub(crate) fn truncate_error(reason: &str) -> String {
    reason.chars().take(LAST_ERROR_MAX_CHARS).collect()
}
