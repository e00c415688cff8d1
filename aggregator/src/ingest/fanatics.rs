use super::{json_i64, json_price, json_str, AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SeenIds, SourceAdapter};
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::{parse_rfc3339, price_from_cents};
use async_trait::async_trait;
use auction_core::{Error, Result};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

const ALGOLIA_APP_ID: &str = "3XT9C4X62I";
const ALGOLIA_URL: &str = "https://3xt9c4x62i-dsn.algolia.net/1/indexes/*/queries";
const ALGOLIA_INDEX: &str = "prod_item_state_v1";
const GRAPHQL_URL: &str = "https://app.fanaticscollect.com/graphql";
const SITE: &str = "https://www.fanaticscollect.com";
const PAGE_SIZE: usize = 1000;
const LIVE_FILTER: &str = r#"(marketplace:"WEEKLY" OR marketplace:"PREMIER") AND (status:"Live")"#;

const LISTING_QUERY: &str = "query webWeeklyListingQuery($id: UUID!, $type: CollectListingType!) {
  collectListing(id: $id, type: $type) {
    id title subtitle description status bidCount slug lotString
    currentBid { amountInCents currency }
    startingPrice { amountInCents currency }
    auction { name shortName endsAt }
    imageSets { large medium small thumbnail }
    vaultItem { gradingServiceUrl }
  }
}";

/// Title keywords -> category label, first match wins.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("Basketball", &["BASKETBALL", "NBA", "KOBE", "JORDAN", "LEBRON"]),
    ("Football", &["FOOTBALL", "NFL"]),
    ("Baseball", &["BASEBALL", "MLB"]),
    ("Hockey", &["HOCKEY", "NHL"]),
    ("Soccer", &["SOCCER", "MLS"]),
    ("Pokemon", &["POKEMON", "PIKACHU"]),
    ("Magic The Gathering", &["MAGIC", "MTG"]),
    ("Yu-Gi-Oh", &["YU-GI-OH", "YUGIOH"]),
];

pub struct FanaticsAdapter {
    http: HttpFetcher,
    detail_concurrency: usize,
}

impl FanaticsAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::Fanatics)?,
            detail_concurrency: ctx.scraping.detail_concurrency.max(1),
        })
    }

    async fn graphql(&self, operation: &'static str, payload: Value) -> Result<Value> {
        let url = format!("{GRAPHQL_URL}?{operation}");
        let body = self
            .http
            .send(operation, |client| {
                client
                    .post(&url)
                    .header("Accept", "*/*")
                    .header("Origin", SITE)
                    .header("Referer", format!("{SITE}/"))
                    .header("x-platform", "WEB")
                    .header("x-platform-app", "collect")
                    .json(&payload)
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// The Algolia key is short-lived; one is fetched per run.
    async fn search_key(&self) -> Result<String> {
        let data = self
            .graphql(
                "webSearchKeyQuery",
                json!({
                    "operationName": "webSearchKeyQuery",
                    "query": "query webSearchKeyQuery { collectSearchKey }",
                }),
            )
            .await?;
        data.pointer("/data/collectSearchKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::ingest("fanatics", "no search key returned"))
    }

    async fn search_page(&self, api_key: &str, page: usize, hits_per_page: usize) -> Result<Value> {
        let payload = json!({
            "requests": [{
                "indexName": ALGOLIA_INDEX,
                "query": "",
                "type": "default",
                "page": page,
                "hitsPerPage": hits_per_page,
                "attributesToRetrieve": [
                    "listingUuid", "marketplace", "title", "subtitle", "currentPrice",
                    "status", "images.primary", "lotNumber", "bidCount"
                ],
                "attributesToHighlight": [],
                "filters": LIVE_FILTER,
            }]
        });
        let body = self
            .http
            .send("search", |client| {
                client
                    .post(ALGOLIA_URL)
                    .query(&[
                        ("x-algolia-api-key", api_key),
                        ("x-algolia-application-id", ALGOLIA_APP_ID),
                    ])
                    .json(&payload)
            })
            .await?;
        let data: Value = serde_json::from_str(&body)?;
        data.pointer("/results/0")
            .cloned()
            .ok_or_else(|| Error::ingest("fanatics", "search response has no results"))
    }

    async fn listing(&self, uuid: &str, marketplace: &str) -> Result<Option<Value>> {
        let data = self
            .graphql(
                "webWeeklyListingQuery",
                json!({
                    "operationName": "webWeeklyListingQuery",
                    "variables": { "id": uuid, "type": marketplace.to_ascii_uppercase() },
                    "query": LISTING_QUERY,
                }),
            )
            .await?;
        Ok(data
            .pointer("/data/collectListing")
            .filter(|v| !v.is_null())
            .cloned())
    }
}

fn category_for(text: &str) -> Option<&'static str> {
    let upper = text.to_ascii_uppercase();
    CATEGORIES
        .iter()
        .find(|(_, words)| words.iter().any(|w| upper.contains(w)))
        .map(|(label, _)| *label)
}

fn collect_auction() -> AuctionRef {
    AuctionRef::new("fanatics-collect", "Fanatics Collect Auctions")
}

/// Merges a search hit with its optional GraphQL detail. Detail values win.
fn listing_record(hit: &Value, detail: Option<&Value>) -> RawRecord {
    let uuid = json_str(hit, &["listingUuid"]);
    let title = json_str(hit, &["title"]);
    let subtitle = json_str(hit, &["subtitle"]);
    let marketplace = json_str(hit, &["marketplace"])
        .unwrap_or_else(|| "WEEKLY".into())
        .to_ascii_lowercase();

    let current_bid = detail
        .and_then(|d| d.pointer("/currentBid/amountInCents"))
        .and_then(Value::as_i64)
        .map(price_from_cents)
        .or_else(|| json_price(hit, &["currentPrice"]));
    let starting_bid = detail
        .and_then(|d| d.pointer("/startingPrice/amountInCents"))
        .and_then(Value::as_i64)
        .map(price_from_cents);
    let end_time = detail
        .and_then(|d| d.pointer("/auction/endsAt"))
        .and_then(Value::as_str)
        .and_then(parse_rfc3339);
    let image_url = hit
        .pointer("/images/primary/large")
        .and_then(Value::as_str)
        .or_else(|| {
            detail
                .and_then(|d| d.pointer("/imageSets/0/large"))
                .and_then(Value::as_str)
        })
        .map(str::to_string);
    let slug = detail.and_then(|d| json_str(d, &["slug"]));
    let item_url = uuid.as_ref().map(|id| match &slug {
        Some(slug) => format!("{SITE}/{marketplace}/{id}/{slug}"),
        None => format!("{SITE}/{marketplace}/{id}"),
    });
    let category = category_for(&format!(
        "{} {}",
        title.as_deref().unwrap_or_default(),
        subtitle.as_deref().unwrap_or_default()
    ))
    .map(str::to_string);

    RawRecord {
        external_id: uuid,
        title,
        description: subtitle,
        sub_category: category.clone(),
        category,
        lot_number: json_str(hit, &["lotNumber"]),
        cert_url: detail
            .and_then(|d| d.pointer("/vaultItem/gradingServiceUrl"))
            .and_then(Value::as_str)
            .map(str::to_string),
        current_bid,
        starting_bid,
        bid_count: json_i64(hit, &["bidCount"]).map(|n| n as i32),
        end_time,
        status: Some(ItemStatus::Live),
        item_url,
        image_url,
        auction: Some(collect_auction()),
        raw: json!({ "algolia": hit, "details": detail }),
        ..RawRecord::default()
    }
}

#[async_trait]
impl SourceAdapter for FanaticsAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Fanatics.name()
    }

    #[instrument(skip(self), fields(source = "fanatics"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let api_key = self.search_key().await?;

        let mut seen = SeenIds::default();
        let mut hits = Vec::new();
        let mut page = 0;
        while hits.len() < max_items {
            let result = self.search_page(&api_key, page, PAGE_SIZE).await?;
            let total = json_i64(&result, &["nbHits"]).unwrap_or(0).max(0) as usize;
            let page_hits = result
                .get("hits")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if page_hits.is_empty() {
                break;
            }
            let page_len = page_hits.len();
            hits.extend(page_hits.into_iter().filter(|hit| {
                hit.get("listingUuid")
                    .and_then(Value::as_str)
                    .is_some_and(|id| seen.admit(id))
            }));

            if hits.len() >= total || page_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        hits.truncate(max_items);
        info!(hits = hits.len(), "Fetched Fanatics search hits");

        let records = stream::iter(hits)
            .map(|hit| async move {
                let uuid = json_str(&hit, &["listingUuid"]).unwrap_or_default();
                let marketplace = json_str(&hit, &["marketplace"]).unwrap_or_else(|| "WEEKLY".into());
                let detail = match self.listing(&uuid, &marketplace).await {
                    Ok(detail) => detail,
                    Err(e) => {
                        warn!(listing = %uuid, error = %e, "Fanatics listing detail failed");
                        None
                    }
                };
                listing_record(&hit, detail.as_ref())
            })
            .buffer_unordered(self.detail_concurrency)
            .collect()
            .await;
        Ok(records)
    }

    async fn fetch_item_detail(&self, item: &ItemLocator) -> Result<Option<RawRecord>> {
        let external_id = item.external_id.as_str();
        let Some(detail) = self.listing(external_id, "WEEKLY").await? else {
            return Ok(None);
        };
        let hit = json!({
            "listingUuid": external_id,
            "title": detail.get("title"),
            "subtitle": detail.get("subtitle"),
            "bidCount": detail.get("bidCount"),
            "lotNumber": detail.get("lotString"),
        });
        Ok(Some(listing_record(&hit, Some(&detail))))
    }

    async fn health_check(&self) -> HealthCheckResult {
        let api_key = match self.search_key().await {
            Ok(key) => key,
            Err(e) => {
                return HealthCheckResult::unhealthy(format!("Failed to fetch search key: {e}"))
                    .with_details(json!({ "error": e.to_string() }))
            }
        };
        let probe = self
            .search_page(&api_key, 0, 1)
            .await
            .map(|r| json_i64(&r, &["nbHits"]).unwrap_or(0).max(0) as usize);
        HealthCheckResult::from_probe("Fanatics search API", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn detail_overrides_search_hit() {
        let hit = json!({
            "listingUuid": "5b1e",
            "marketplace": "PREMIER",
            "title": "2003 Topps Chrome LeBron James PSA 10",
            "subtitle": "Rookie",
            "currentPrice": 900,
            "bidCount": 22,
            "images": { "primary": { "large": "https://img/large.jpg" } }
        });
        let detail = json!({
            "slug": "lebron-rookie",
            "currentBid": { "amountInCents": 125000 },
            "startingPrice": { "amountInCents": 10000 },
            "auction": { "endsAt": "2025-03-02T02:00:00Z" },
            "vaultItem": { "gradingServiceUrl": "https://www.psacard.com/cert/25569000/psa" }
        });

        let record = listing_record(&hit, Some(&detail));

        assert_eq!(record.current_bid, Some(Decimal::new(1250, 0)));
        assert_eq!(record.starting_bid, Some(Decimal::new(100, 0)));
        assert_eq!(
            record.item_url.as_deref(),
            Some("https://www.fanaticscollect.com/premier/5b1e/lebron-rookie")
        );
        assert_eq!(record.category.as_deref(), Some("Basketball"));
        assert_eq!(record.cert_url.as_deref(), Some("https://www.psacard.com/cert/25569000/psa"));
        assert!(record.end_time.is_some());
        assert_eq!(record.auction.unwrap().external_id, "fanatics-collect");
    }

    #[test]
    fn search_hit_alone_is_enough() {
        let hit = json!({ "listingUuid": "77", "title": "Pikachu Promo", "currentPrice": "15.50" });

        let record = listing_record(&hit, None);

        assert_eq!(record.current_bid, Some(Decimal::new(1550, 2)));
        assert_eq!(record.item_url.as_deref(), Some("https://www.fanaticscollect.com/weekly/77"));
        assert_eq!(record.category.as_deref(), Some("Pokemon"));
        assert_eq!(record.end_time, None);
    }
}
