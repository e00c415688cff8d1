use super::{truncate_error, CredentialStore, ItemStore};
use crate::model::{
    CanonicalItem, CredentialRow, ItemStatus, NewCredential, PriceSnapshot, SessionRow, StoredItem,
    UpsertSummary,
};
use async_trait::async_trait;
use auction_core::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-process store with the same semantics as the Postgres one. Backs
/// `--dry-run` scrapes and tests.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Items>,
    vault: Mutex<Vault>,
}

#[derive(Default)]
struct Items {
    by_key: HashMap<(String, String), StoredItem>,
    auctions: HashMap<(String, String), Uuid>,
    snapshots: Vec<PriceSnapshot>,
}

#[derive(Default)]
struct Vault {
    credentials: Vec<CredentialRow>,
    sessions: Vec<SessionRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn items(&self) -> Vec<StoredItem> {
        let mut items: Vec<_> = self.items.lock().await.by_key.values().cloned().collect();
        items.sort_by(|a, b| {
            (&a.item.source_name, &a.item.external_id).cmp(&(&b.item.source_name, &b.item.external_id))
        });
        items
    }

    pub async fn auction_count(&self) -> usize {
        self.items.lock().await.auctions.len()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn upsert_items(&self, source_name: &str, items: &[CanonicalItem]) -> Result<UpsertSummary> {
        let mut guard = self.items.lock().await;
        let state = &mut *guard;
        let now = Utc::now();
        let mut summary = UpsertSummary::default();

        for item in items {
            let auction_id = item.auction.as_ref().map(|auction| {
                *state
                    .auctions
                    .entry((source_name.to_string(), auction.external_id.clone()))
                    .or_insert_with(Uuid::new_v4)
            });

            let key = (source_name.to_string(), item.external_id.clone());
            match state.by_key.get_mut(&key) {
                Some(existing) => {
                    let status = item.status.or(existing.item.status);
                    let item_type = existing.item.item_type;
                    let mut next = item.clone();
                    next.source_name = source_name.to_string();
                    next.status = status;
                    next.item_type = item_type;
                    existing.item = next;
                    existing.auction_id = auction_id.or(existing.auction_id);
                    existing.updated_at = now;
                    summary.updated += 1;
                }
                None => {
                    let mut next = item.clone();
                    next.source_name = source_name.to_string();
                    next.status = Some(item.status.unwrap_or(ItemStatus::Live));
                    state.by_key.insert(
                        key,
                        StoredItem {
                            id: Uuid::new_v4(),
                            auction_id,
                            item: next,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    summary.inserted += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn sweep_ended(&self, source_name: Option<&str>, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.items.lock().await;
        let mut ended = 0;
        for stored in state.by_key.values_mut() {
            let in_scope = source_name.map_or(true, |s| stored.item.source_name == s);
            let expired = stored.item.end_time.is_some_and(|end| end < now);
            if in_scope && expired && stored.status() == ItemStatus::Live {
                stored.item.status = Some(ItemStatus::Ended);
                stored.updated_at = Utc::now();
                ended += 1;
            }
        }
        Ok(ended)
    }

    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.items.lock().await;
        let before = state.by_key.len();
        state.by_key.retain(|_, stored| {
            !(stored.status() == ItemStatus::Ended && stored.item.end_time.is_some_and(|end| end < cutoff))
        });
        let Items { by_key, snapshots, .. } = &mut *state;
        snapshots.retain(|snapshot| by_key.values().any(|stored| stored.id == snapshot.item_id));
        Ok((before - state.by_key.len()) as u64)
    }

    async fn find_item(&self, source_name: &str, external_id: &str) -> Result<Option<StoredItem>> {
        let state = self.items.lock().await;
        Ok(state
            .by_key
            .get(&(source_name.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn count_items(&self, source_name: &str) -> Result<i64> {
        let state = self.items.lock().await;
        Ok(state
            .by_key
            .keys()
            .filter(|(source, _)| source == source_name)
            .count() as i64)
    }

    async fn snapshot_live_items(&self, day: NaiveDate) -> Result<u64> {
        let mut guard = self.items.lock().await;
        let state = &mut *guard;
        let now = Utc::now();
        let mut created = 0;
        for stored in state.by_key.values() {
            if stored.status() != ItemStatus::Live {
                continue;
            }
            let taken = state
                .snapshots
                .iter()
                .any(|s| s.item_id == stored.id && s.snapshot_date == day);
            if taken {
                continue;
            }
            state.snapshots.push(PriceSnapshot {
                id: Uuid::new_v4(),
                item_id: stored.id,
                current_bid: stored.item.current_bid,
                bid_count: stored.item.bid_count,
                status: stored.status().as_str().to_string(),
                snapshot_date: day,
                created_at: now,
            });
            created += 1;
        }
        Ok(created)
    }

    async fn price_history(&self, item_id: Uuid, since: NaiveDate) -> Result<Vec<PriceSnapshot>> {
        let state = self.items.lock().await;
        let mut history: Vec<_> = state
            .snapshots
            .iter()
            .filter(|s| s.item_id == item_id && s.snapshot_date >= since)
            .cloned()
            .collect();
        history.sort_by_key(|s| s.snapshot_date);
        Ok(history)
    }

    async fn delete_snapshots_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let mut state = self.items.lock().await;
        let before = state.snapshots.len();
        state.snapshots.retain(|s| s.snapshot_date >= cutoff);
        Ok((before - state.snapshots.len()) as u64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn upsert_credential(&self, credential: NewCredential) -> Result<CredentialRow> {
        let mut vault = self.vault.lock().await;
        let now = Utc::now();

        if let Some(existing) = vault
            .credentials
            .iter_mut()
            .find(|c| c.user_id == credential.user_id && c.site == credential.site)
        {
            existing.encrypted_username = credential.encrypted_username;
            existing.encrypted_password = credential.encrypted_password;
            existing.iv = credential.iv;
            existing.is_valid = true;
            existing.last_error = None;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let row = CredentialRow {
            id: Uuid::new_v4(),
            user_id: credential.user_id,
            site: credential.site,
            encrypted_username: credential.encrypted_username,
            encrypted_password: credential.encrypted_password,
            iv: credential.iv,
            is_valid: true,
            last_verified: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        vault.credentials.push(row.clone());
        Ok(row)
    }

    async fn get_credential(&self, user_id: i64, site: &str) -> Result<Option<CredentialRow>> {
        let vault = self.vault.lock().await;
        Ok(vault
            .credentials
            .iter()
            .find(|c| c.user_id == user_id && c.site == site)
            .cloned())
    }

    async fn list_credentials(&self, user_id: i64) -> Result<Vec<CredentialRow>> {
        let vault = self.vault.lock().await;
        let mut rows: Vec<_> = vault
            .credentials
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.site.cmp(&b.site));
        Ok(rows)
    }

    async fn mark_invalid(&self, credential_id: Uuid, reason: &str) -> Result<()> {
        let mut vault = self.vault.lock().await;
        if let Some(c) = vault.credentials.iter_mut().find(|c| c.id == credential_id) {
            c.is_valid = false;
            c.last_error = Some(truncate_error(reason));
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_verified(&self, credential_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut vault = self.vault.lock().await;
        if let Some(c) = vault.credentials.iter_mut().find(|c| c.id == credential_id) {
            c.is_valid = true;
            c.last_verified = Some(at);
            c.last_error = None;
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_credential(&self, user_id: i64, site: &str) -> Result<bool> {
        let mut vault = self.vault.lock().await;
        let Some(pos) = vault
            .credentials
            .iter()
            .position(|c| c.user_id == user_id && c.site == site)
        else {
            return Ok(false);
        };
        let removed = vault.credentials.remove(pos);
        vault.sessions.retain(|s| s.credential_id != removed.id);
        Ok(true)
    }

    async fn insert_session(
        &self,
        credential_id: Uuid,
        encrypted_state: &str,
        iv: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRow> {
        let mut vault = self.vault.lock().await;
        for session in vault
            .sessions
            .iter_mut()
            .filter(|s| s.credential_id == credential_id)
        {
            session.is_active = false;
        }

        let row = SessionRow {
            id: Uuid::new_v4(),
            credential_id,
            encrypted_state: encrypted_state.to_string(),
            iv: iv.to_string(),
            expires_at,
            is_active: true,
            created_at: Utc::now(),
        };
        vault.sessions.push(row.clone());
        Ok(row)
    }

    async fn active_session(&self, credential_id: Uuid, now: DateTime<Utc>) -> Result<Option<SessionRow>> {
        let vault = self.vault.lock().await;
        Ok(vault
            .sessions
            .iter()
            .rev()
            .find(|s| s.credential_id == credential_id && s.is_active && s.expires_at > now)
            .cloned())
    }

    async fn deactivate_sessions(&self, credential_id: Uuid) -> Result<u64> {
        let mut vault = self.vault.lock().await;
        let mut changed = 0;
        for session in vault
            .sessions
            .iter_mut()
            .filter(|s| s.credential_id == credential_id && s.is_active)
        {
            session.is_active = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn list_sessions(&self, credential_id: Uuid) -> Result<Vec<SessionRow>> {
        let vault = self.vault.lock().await;
        Ok(vault
            .sessions
            .iter()
            .filter(|s| s.credential_id == credential_id)
            .cloned()
            .collect())
    }
}
