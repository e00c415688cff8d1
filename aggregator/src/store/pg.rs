use super::{truncate_error, CredentialStore, ItemStore};
use crate::model::{
    AuctionItemRow, AuctionRef, CanonicalItem, CredentialRow, NewCredential, PriceSnapshot, SessionRow,
    StoredItem, UpsertSummary,
};
use async_trait::async_trait;
use auction_core::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const UPSERT_ITEM_SQL: &str = r#"
    INSERT INTO auction_items (
        id, source_name, external_id, auction_id, lot_number, title, description,
        category, sub_category, sport, item_type, grading_company, grade, cert_number,
        current_bid, starting_bid, reserve_price, buy_now_price, bid_count, end_time,
        status, item_url, image_url, image_urls, raw_data
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
        $15, $16, $17, $18, $19, $20, COALESCE($21, 'Live'), $22, $23, $24, $25
    )
    ON CONFLICT (source_name, external_id) DO UPDATE SET
        auction_id = COALESCE(EXCLUDED.auction_id, auction_items.auction_id),
        lot_number = EXCLUDED.lot_number,
        title = EXCLUDED.title,
        description = EXCLUDED.description,
        category = EXCLUDED.category,
        sub_category = EXCLUDED.sub_category,
        sport = EXCLUDED.sport,
        item_type = COALESCE(auction_items.item_type, EXCLUDED.item_type),
        grading_company = EXCLUDED.grading_company,
        grade = EXCLUDED.grade,
        cert_number = EXCLUDED.cert_number,
        current_bid = EXCLUDED.current_bid,
        starting_bid = EXCLUDED.starting_bid,
        reserve_price = EXCLUDED.reserve_price,
        buy_now_price = EXCLUDED.buy_now_price,
        bid_count = EXCLUDED.bid_count,
        end_time = EXCLUDED.end_time,
        status = COALESCE($21, auction_items.status),
        item_url = EXCLUDED.item_url,
        image_url = EXCLUDED.image_url,
        image_urls = EXCLUDED.image_urls,
        raw_data = EXCLUDED.raw_data,
        updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn get_or_create_auction(
        tx: &mut Transaction<'_, Postgres>,
        source_name: &str,
        auction: &AuctionRef,
    ) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO auctions (id, source_name, external_id, title, end_time)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_name, external_id) DO UPDATE SET
                title = COALESCE(EXCLUDED.title, auctions.title),
                end_time = COALESCE(EXCLUDED.end_time, auctions.end_time),
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_name)
        .bind(&auction.external_id)
        .bind(auction.title.as_deref())
        .bind(auction.end_time)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl ItemStore for PgStore {
    #[instrument(skip(self, items), fields(source = %source_name, count = items.len()))]
    async fn upsert_items(&self, source_name: &str, items: &[CanonicalItem]) -> Result<UpsertSummary> {
        if items.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut auctions: HashMap<String, Uuid> = HashMap::new();
        let mut summary = UpsertSummary::default();

        for item in items {
            let auction_id = match &item.auction {
                Some(auction) => match auctions.get(&auction.external_id) {
                    Some(id) => Some(*id),
                    None => {
                        let id = Self::get_or_create_auction(&mut tx, source_name, auction).await?;
                        auctions.insert(auction.external_id.clone(), id);
                        Some(id)
                    }
                },
                None => None,
            };

            let inserted: bool = sqlx::query_scalar(UPSERT_ITEM_SQL)
                .bind(Uuid::new_v4())
                .bind(source_name)
                .bind(&item.external_id)
                .bind(auction_id)
                .bind(item.lot_number.as_deref())
                .bind(&item.title)
                .bind(item.description.as_deref())
                .bind(item.category.as_deref())
                .bind(item.sub_category.as_deref())
                .bind(item.sport.as_str())
                .bind(item.item_type.as_str())
                .bind(item.grading_company.as_deref())
                .bind(item.grade.as_deref())
                .bind(item.cert_number.as_deref())
                .bind(item.current_bid)
                .bind(item.starting_bid)
                .bind(item.reserve_price)
                .bind(item.buy_now_price)
                .bind(item.bid_count)
                .bind(item.end_time)
                .bind(item.status.map(|s| s.as_str()))
                .bind(item.item_url.as_deref())
                .bind(item.image_url.as_deref())
                .bind(serde_json::json!(item.image_urls))
                .bind(&item.raw_data)
                .fetch_one(&mut *tx)
                .await?;

            if inserted {
                summary.inserted += 1;
            } else {
                summary.updated += 1;
            }
        }

        tx.commit().await?;

        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            auctions = auctions.len(),
            "Upserted items"
        );

        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn sweep_ended(&self, source_name: Option<&str>, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE auction_items
            SET status = 'Ended', updated_at = NOW()
            WHERE status = 'Live'
              AND end_time IS NOT NULL
              AND end_time < $1
              AND ($2::text IS NULL OR source_name = $2)
            "#,
        )
        .bind(now)
        .bind(source_name)
        .execute(&self.pool)
        .await?;

        let ended = result.rows_affected();
        if ended > 0 {
            info!(ended, "Marked expired items as Ended");
        }
        Ok(ended)
    }

    #[instrument(skip(self))]
    async fn delete_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM auction_items WHERE status = 'Ended' AND end_time < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        info!(deleted, cutoff = %cutoff, "Deleted long-ended items");
        Ok(deleted)
    }

    async fn find_item(&self, source_name: &str, external_id: &str) -> Result<Option<StoredItem>> {
        let row = sqlx::query_as::<_, AuctionItemRow>(
            "SELECT * FROM auction_items WHERE source_name = $1 AND external_id = $2",
        )
        .bind(source_name)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredItem::from))
    }

    async fn count_items(&self, source_name: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM auction_items WHERE source_name = $1")
                .bind(source_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn snapshot_live_items(&self, day: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO price_snapshots (item_id, current_bid, bid_count, status, snapshot_date)
            SELECT id, current_bid, bid_count, status, $1
            FROM auction_items
            WHERE status = 'Live'
            ON CONFLICT (item_id, snapshot_date) DO NOTHING
            "#,
        )
        .bind(day)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn price_history(&self, item_id: Uuid, since: NaiveDate) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query_as::<_, PriceSnapshot>(
            r#"
            SELECT * FROM price_snapshots
            WHERE item_id = $1 AND snapshot_date >= $2
            ORDER BY snapshot_date ASC
            "#,
        )
        .bind(item_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn delete_snapshots_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM price_snapshots WHERE snapshot_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    #[instrument(skip(self, credential), fields(user_id = credential.user_id, site = %credential.site))]
    async fn upsert_credential(&self, credential: NewCredential) -> Result<CredentialRow> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            INSERT INTO credentials (id, user_id, site, encrypted_username, encrypted_password, iv)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, site) DO UPDATE SET
                encrypted_username = EXCLUDED.encrypted_username,
                encrypted_password = EXCLUDED.encrypted_password,
                iv = EXCLUDED.iv,
                is_valid = TRUE,
                last_error = NULL,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(credential.user_id)
        .bind(&credential.site)
        .bind(&credential.encrypted_username)
        .bind(&credential.encrypted_password)
        .bind(&credential.iv)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_credential(&self, user_id: i64, site: &str) -> Result<Option<CredentialRow>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM credentials WHERE user_id = $1 AND site = $2",
        )
        .bind(user_id)
        .bind(site)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_credentials(&self, user_id: i64) -> Result<Vec<CredentialRow>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM credentials WHERE user_id = $1 ORDER BY site",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_invalid(&self, credential_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE credentials SET is_valid = FALSE, last_error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(credential_id)
        .bind(truncate_error(reason))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_verified(&self, credential_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE credentials
            SET is_valid = TRUE, last_verified = $2, last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(credential_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_credential(&self, user_id: i64, site: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE user_id = $1 AND site = $2")
            .bind(user_id)
            .bind(site)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, encrypted_state, iv))]
    async fn insert_session(
        &self,
        credential_id: Uuid,
        encrypted_state: &str,
        iv: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRow> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE sessions SET is_active = FALSE WHERE credential_id = $1 AND is_active")
            .bind(credential_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (id, credential_id, encrypted_state, iv, expires_at, is_active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(credential_id)
        .bind(encrypted_state)
        .bind(iv)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn active_session(&self, credential_id: Uuid, now: DateTime<Utc>) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT * FROM sessions
            WHERE credential_id = $1 AND is_active AND expires_at > $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(credential_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn deactivate_sessions(&self, credential_id: Uuid) -> Result<u64> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = FALSE WHERE credential_id = $1 AND is_active")
                .bind(credential_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn list_sessions(&self, credential_id: Uuid) -> Result<Vec<SessionRow>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE credential_id = $1 ORDER BY created_at",
        )
        .bind(credential_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    const INITIAL_MIGRATION: &str = include_str!("../../../migrations/0001_initial.sql");
    const SNAPSHOT_MIGRATION: &str = include_str!("../../../migrations/0002_price_snapshots.sql");

    #[test]
    fn scraped_free_text_columns_are_unbounded() {
        for column in ["lot_number", "category", "sub_category", "grading_company", "grade", "cert_number"] {
            let prefix = format!("{column} ");
            let line = INITIAL_MIGRATION
                .lines()
                .map(str::trim_start)
                .find(|line| line.starts_with(&prefix))
                .unwrap();
            assert!(line.contains("TEXT"), "{line}");
        }
    }

    #[test]
    fn one_snapshot_per_item_and_day() {
        assert!(SNAPSHOT_MIGRATION.contains("UNIQUE (item_id, snapshot_date)"));
        assert!(SNAPSHOT_MIGRATION.contains("REFERENCES auction_items(id) ON DELETE CASCADE"));
    }
}
