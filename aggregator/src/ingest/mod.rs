//! Source adapters: one per external auction site, a closed set selected by
//! name through [`AdapterKind`]. Adapters return raw records and never touch
//! the store.

pub mod html;
pub mod http;

mod auction_of_champions;
mod cardhobby;
mod catalog;
mod cleansweep;
mod ebay;
mod fanatics;
mod goldin;
mod gregmorris;
mod heritage;
mod lelands;
mod pristine;
mod queencity;
mod rea;
mod rr_auction;
mod vsa;

pub use http::HttpFetcher;

use crate::browser::SharedBrowser;
use crate::model::{RawRecord, StoredItem};
use async_trait::async_trait;
use auction_core::config::{ScrapingConfig, SourcesConfig};
use auction_core::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub message: String,
    pub details: serde_json::Value,
}

impl HealthCheckResult {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Health derived from a probe that fetched `found` records.
    pub(crate) fn from_probe(source_name: &str, probe: Result<usize>) -> Self {
        match probe {
            Ok(0) => Self::unhealthy(format!("{source_name} responded but no listings were found"))
                .with_details(serde_json::json!({ "items_found": 0 })),
            Ok(found) => Self::healthy(format!("{source_name} is reachable"))
                .with_details(serde_json::json!({ "items_found": found })),
            Err(e) => Self::unhealthy(format!("{source_name} unreachable: {e}"))
                .with_details(serde_json::json!({ "error": e.to_string() })),
        }
    }
}

impl std::fmt::Display for HealthCheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = if self.healthy { "healthy" } else { "unhealthy" };
        write!(f, "[{mark}] {}", self.message)
    }
}

/// Identifies an item an adapter has listed before: the stored external id
/// plus the listing URL, for sites whose detail lookups key on the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocator {
    pub external_id: String,
    pub item_url: Option<String>,
}

impl ItemLocator {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            item_url: None,
        }
    }

    pub fn with_url(mut self, item_url: impl Into<String>) -> Self {
        self.item_url = Some(item_url.into());
        self
    }
}

impl From<&StoredItem> for ItemLocator {
    fn from(stored: &StoredItem) -> Self {
        Self {
            external_id: stored.item.external_id.clone(),
            item_url: stored.item.item_url.clone(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Listings currently on offer, at most `max_items`. Pages are fetched
    /// in order; malformed listings are dropped, transport failures abort.
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>>;

    /// Fresh detail for an item this adapter listed earlier.
    async fn fetch_item_detail(&self, item: &ItemLocator) -> Result<Option<RawRecord>>;

    async fn health_check(&self) -> HealthCheckResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Goldin,
    Fanatics,
    Ebay,
    CardHobby,
    Pristine,
    GregMorris,
    Rea,
    Lelands,
    CleanSweep,
    DetroitCity,
    MileHigh,
    Sirius,
    Vsa,
    QueenCity,
    RrAuction,
    Heritage,
    AuctionOfChampions,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 17] = [
        AdapterKind::Goldin,
        AdapterKind::Fanatics,
        AdapterKind::Ebay,
        AdapterKind::CardHobby,
        AdapterKind::Pristine,
        AdapterKind::GregMorris,
        AdapterKind::Rea,
        AdapterKind::Lelands,
        AdapterKind::CleanSweep,
        AdapterKind::DetroitCity,
        AdapterKind::MileHigh,
        AdapterKind::Sirius,
        AdapterKind::Vsa,
        AdapterKind::QueenCity,
        AdapterKind::RrAuction,
        AdapterKind::Heritage,
        AdapterKind::AuctionOfChampions,
    ];

    /// Source name stored with every item the adapter produces.
    pub fn name(&self) -> &'static str {
        match self {
            AdapterKind::Goldin => "goldin",
            AdapterKind::Fanatics => "fanatics",
            AdapterKind::Ebay => "ebay",
            AdapterKind::CardHobby => "cardhobby",
            AdapterKind::Pristine => "pristine",
            AdapterKind::GregMorris => "gregmorris",
            AdapterKind::Rea => "rea",
            AdapterKind::Lelands => "lelands",
            AdapterKind::CleanSweep => "cleansweep",
            AdapterKind::DetroitCity => "detroitcity",
            AdapterKind::MileHigh => "milehigh",
            AdapterKind::Sirius => "sirius",
            AdapterKind::Vsa => "vsa",
            AdapterKind::QueenCity => "queencity",
            AdapterKind::RrAuction => "rr_auction",
            AdapterKind::Heritage => "heritage",
            AdapterKind::AuctionOfChampions => "auction_of_champions",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AdapterKind::Goldin => "Goldin",
            AdapterKind::Fanatics => "Fanatics Collect",
            AdapterKind::Ebay => "eBay",
            AdapterKind::CardHobby => "CardHobby",
            AdapterKind::Pristine => "Pristine Auction",
            AdapterKind::GregMorris => "Greg Morris Cards",
            AdapterKind::Rea => "Robert Edward Auctions",
            AdapterKind::Lelands => "Lelands",
            AdapterKind::CleanSweep => "Clean Sweep Auctions",
            AdapterKind::DetroitCity => "Detroit City Sports",
            AdapterKind::MileHigh => "Mile High Card Co",
            AdapterKind::Sirius => "Sirius Sports",
            AdapterKind::Vsa => "VSA Auctions",
            AdapterKind::QueenCity => "Queen City Cards",
            AdapterKind::RrAuction => "RR Auction",
            AdapterKind::Heritage => "Heritage Auctions",
            AdapterKind::AuctionOfChampions => "Auction of Champions",
        }
    }
}

impl std::str::FromStr for AdapterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        AdapterKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| Error::NotFound(format!("unknown adapter: {s}")))
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything an adapter may need to build its transport.
#[derive(Clone)]
pub struct AdapterContext {
    pub scraping: ScrapingConfig,
    pub sources: SourcesConfig,
    pub browser: Arc<SharedBrowser>,
}

impl AdapterContext {
    pub fn new(scraping: ScrapingConfig, sources: SourcesConfig, browser: Arc<SharedBrowser>) -> Self {
        Self {
            scraping,
            sources,
            browser,
        }
    }

    pub fn fetcher(&self, kind: AdapterKind) -> Result<HttpFetcher> {
        HttpFetcher::new(kind.name(), &self.scraping)
    }
}

/// Static registry: the only way adapters are constructed.
pub fn build_adapter(kind: AdapterKind, ctx: &AdapterContext) -> Result<Arc<dyn SourceAdapter>> {
    let adapter: Arc<dyn SourceAdapter> = match kind {
        AdapterKind::Goldin => Arc::new(goldin::GoldinAdapter::new(ctx)?),
        AdapterKind::Fanatics => Arc::new(fanatics::FanaticsAdapter::new(ctx)?),
        AdapterKind::Ebay => Arc::new(ebay::EbayAdapter::new(ctx)?),
        AdapterKind::CardHobby => Arc::new(cardhobby::CardHobbyAdapter::new(ctx)?),
        AdapterKind::Pristine => Arc::new(pristine::PristineAdapter::new(ctx)?),
        AdapterKind::GregMorris => Arc::new(gregmorris::GregMorrisAdapter::new(ctx)?),
        AdapterKind::Rea => Arc::new(rea::ReaAdapter::new(ctx)?),
        AdapterKind::Lelands => Arc::new(lelands::LelandsAdapter::new(ctx)),
        AdapterKind::CleanSweep => Arc::new(cleansweep::CleanSweepAdapter::new(ctx)),
        AdapterKind::DetroitCity => Arc::new(catalog::CatalogAdapter::new(ctx, catalog::DETROIT_CITY)?),
        AdapterKind::MileHigh => Arc::new(catalog::CatalogAdapter::new(ctx, catalog::MILE_HIGH)?),
        AdapterKind::Sirius => Arc::new(catalog::CatalogAdapter::new(ctx, catalog::SIRIUS)?),
        AdapterKind::Vsa => Arc::new(vsa::VsaAdapter::new(ctx)),
        AdapterKind::QueenCity => Arc::new(queencity::QueenCityAdapter::new(ctx)?),
        AdapterKind::RrAuction => Arc::new(rr_auction::RrAuctionAdapter::new(ctx)?),
        AdapterKind::Heritage => Arc::new(heritage::HeritageAdapter::new(ctx)?),
        AdapterKind::AuctionOfChampions => {
            Arc::new(auction_of_champions::AuctionOfChampionsAdapter::new(ctx)?)
        }
    };
    Ok(adapter)
}

/// Tracks ids already emitted in one run; sites that repeat listings across
/// pages rely on it to stop paginating.
#[derive(Debug, Default)]
pub(crate) struct SeenIds(HashSet<String>);

impl SeenIds {
    /// `true` the first time an id is offered.
    pub(crate) fn admit(&mut self, id: &str) -> bool {
        self.0.insert(id.to_string())
    }
}

/// First of `keys` present as a non-empty string or a number, as text.
pub(crate) fn json_str(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn json_i64(value: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn json_price(value: &serde_json::Value, keys: &[&str]) -> Option<rust_decimal::Decimal> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(crate::normalize::price_from_json))
}

/// Adapter context over a fake browser and default configuration.
#[cfg(test)]
pub(crate) fn test_context(browser: &crate::browser::fake::FakeBrowser) -> AdapterContext {
    let config = auction_core::config::Config::default();
    AdapterContext::new(
        config.scraping,
        config.sources,
        Arc::new(SharedBrowser::new(browser.launcher(), std::time::Duration::ZERO)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_field_fallbacks() {
        let lot = serde_json::json!({ "id": 42, "name": " ", "title": "Jordan", "bids": "7", "price": "$1,200" });
        assert_eq!(json_str(&lot, &["lot_id", "id"]), Some("42".into()));
        assert_eq!(json_str(&lot, &["name", "title"]), Some("Jordan".into()));
        assert_eq!(json_i64(&lot, &["bids"]), Some(7));
        assert_eq!(json_price(&lot, &["current", "price"]), Some(rust_decimal::Decimal::new(1200, 0)));
        assert_eq!(json_price(&lot, &["current"]), None);
    }

    #[test]
    fn registry_names_round_trip() {
        for kind in AdapterKind::ALL {
            assert_eq!(kind.name().parse::<AdapterKind>().unwrap(), kind);
        }
        assert!("classic_auctions".parse::<AdapterKind>().is_err());
        assert_eq!("  Goldin ".parse::<AdapterKind>().unwrap(), AdapterKind::Goldin);
    }

    #[test]
    fn probe_health() {
        assert!(HealthCheckResult::from_probe("rea", Ok(12)).healthy);
        assert!(!HealthCheckResult::from_probe("rea", Ok(0)).healthy);
        let failed = HealthCheckResult::from_probe("rea", Err(Error::Browser("gone".into())));
        assert!(!failed.healthy);
        assert!(failed.message.contains("gone"));
    }

    #[test]
    fn seen_ids_admit_once() {
        let mut seen = SeenIds::default();
        assert!(seen.admit("a"));
        assert!(!seen.admit("a"));
    }
}
