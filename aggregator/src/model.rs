use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Live,
    Ended,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Live => "Live",
            ItemStatus::Ended => "Ended",
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Live" => Ok(ItemStatus::Live),
            "Ended" => Ok(ItemStatus::Ended),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration order is the tie-break order for sport scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sport {
    Basketball,
    Baseball,
    Football,
    Hockey,
    Soccer,
    Golf,
    Boxing,
    Racing,
    Other,
}

impl Sport {
    pub const ALL: [Sport; 9] = [
        Sport::Basketball,
        Sport::Baseball,
        Sport::Football,
        Sport::Hockey,
        Sport::Soccer,
        Sport::Golf,
        Sport::Boxing,
        Sport::Racing,
        Sport::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Basketball => "BASKETBALL",
            Sport::Baseball => "BASEBALL",
            Sport::Football => "FOOTBALL",
            Sport::Hockey => "HOCKEY",
            Sport::Soccer => "SOCCER",
            Sport::Golf => "GOLF",
            Sport::Boxing => "BOXING",
            Sport::Racing => "RACING",
            Sport::Other => "OTHER",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::str::FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sport::ALL
            .into_iter()
            .find(|sport| sport.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown sport: {s}"))
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemType {
    Card,
    Memorabilia,
    Autograph,
    Sealed,
    Other,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Card => "CARD",
            ItemType::Memorabilia => "MEMORABILIA",
            ItemType::Autograph => "AUTOGRAPH",
            ItemType::Sealed => "SEALED",
            ItemType::Other => "OTHER",
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CARD" => Ok(ItemType::Card),
            "MEMORABILIA" => Ok(ItemType::Memorabilia),
            "AUTOGRAPH" => Ok(ItemType::Autograph),
            "SEALED" => Ok(ItemType::Sealed),
            "OTHER" => Ok(ItemType::Other),
            other => Err(format!("unknown item type: {other}")),
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External auction/listing page an item belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuctionRef {
    pub external_id: String,
    pub title: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
}

impl AuctionRef {
    pub fn new(external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: Some(title.into()),
            end_time: None,
        }
    }
}

/// Fields an adapter managed to extract from one listing, before the
/// shared normalization rules run. Discarded after mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub lot_number: Option<String>,
    pub grading_company: Option<String>,
    pub grade: Option<String>,
    pub cert_number: Option<String>,
    /// PSA/Beckett verification link, mined for a cert number.
    pub cert_url: Option<String>,
    pub current_bid: Option<Decimal>,
    pub starting_bid: Option<Decimal>,
    pub reserve_price: Option<Decimal>,
    pub buy_now_price: Option<Decimal>,
    pub bid_count: Option<i32>,
    pub end_time: Option<DateTime<Utc>>,
    /// Relative remaining time such as "3d 20h 41m", used when `end_time` is absent.
    pub time_left: Option<String>,
    pub status: Option<ItemStatus>,
    pub item_url: Option<String>,
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub auction: Option<AuctionRef>,
    pub raw: serde_json::Value,
}

/// Unified listing, identity = (source_name, external_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub source_name: String,
    pub external_id: String,
    pub auction: Option<AuctionRef>,
    pub lot_number: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub sport: Sport,
    pub item_type: ItemType,
    pub grading_company: Option<String>,
    pub grade: Option<String>,
    pub cert_number: Option<String>,
    pub current_bid: Option<Decimal>,
    pub starting_bid: Option<Decimal>,
    pub reserve_price: Option<Decimal>,
    pub buy_now_price: Option<Decimal>,
    pub bid_count: i32,
    pub end_time: Option<DateTime<Utc>>,
    /// Status the source reported; `None` means it said nothing.
    pub status: Option<ItemStatus>,
    pub item_url: Option<String>,
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub raw_data: serde_json::Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct AuctionItemRow {
    pub id: Uuid,
    pub source_name: String,
    pub external_id: String,
    pub auction_id: Option<Uuid>,
    pub lot_number: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub sport: String,
    pub item_type: Option<String>,
    pub grading_company: Option<String>,
    pub grade: Option<String>,
    pub cert_number: Option<String>,
    pub current_bid: Option<Decimal>,
    pub starting_bid: Option<Decimal>,
    pub reserve_price: Option<Decimal>,
    pub buy_now_price: Option<Decimal>,
    pub bid_count: i32,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
    pub item_url: Option<String>,
    pub image_url: Option<String>,
    pub image_urls: serde_json::Value,
    pub raw_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted item as the store sees it: stored status and item type resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: Uuid,
    pub auction_id: Option<Uuid>,
    pub item: CanonicalItem,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredItem {
    pub fn status(&self) -> ItemStatus {
        self.item.status.unwrap_or(ItemStatus::Live)
    }
}

impl From<AuctionItemRow> for StoredItem {
    fn from(row: AuctionItemRow) -> Self {
        let image_urls = serde_json::from_value(row.image_urls).unwrap_or_default();
        Self {
            id: row.id,
            auction_id: row.auction_id,
            item: CanonicalItem {
                source_name: row.source_name,
                external_id: row.external_id,
                auction: None,
                lot_number: row.lot_number,
                title: row.title,
                description: row.description,
                category: row.category,
                sub_category: row.sub_category,
                sport: row.sport.parse().unwrap_or(Sport::Other),
                item_type: row
                    .item_type
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(ItemType::Other),
                grading_company: row.grading_company,
                grade: row.grade,
                cert_number: row.cert_number,
                current_bid: row.current_bid,
                starting_bid: row.starting_bid,
                reserve_price: row.reserve_price,
                buy_now_price: row.buy_now_price,
                bid_count: row.bid_count,
                end_time: row.end_time,
                status: row.status.parse().ok(),
                item_url: row.item_url,
                image_url: row.image_url,
                image_urls,
                raw_data: row.raw_data.unwrap_or(serde_json::Value::Null),
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// One item's bid on one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PriceSnapshot {
    pub id: Uuid,
    pub item_id: Uuid,
    pub current_bid: Option<Decimal>,
    pub bid_count: i32,
    pub status: String,
    pub snapshot_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub created: u64,
    pub pruned: u64,
}

impl std::fmt::Display for SnapshotReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "created {} price snapshots, pruned {}", self.created, self.pruned)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Outcome of one adapter run through the ingest pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub fetched: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub ended: u64,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched {}, skipped {}, inserted {}, updated {}, ended {}",
            self.fetched, self.skipped, self.inserted, self.updated, self.ended
        )
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: Uuid,
    pub user_id: i64,
    pub site: String,
    pub encrypted_username: String,
    pub encrypted_password: String,
    /// `"<username iv>:<password iv>"`
    pub iv: String,
    pub is_valid: bool,
    pub last_verified: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub user_id: i64,
    pub site: String,
    pub encrypted_username: String,
    pub encrypted_password: String,
    pub iv: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub credential_id: Uuid,
    pub encrypted_state: String,
    pub iv: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
