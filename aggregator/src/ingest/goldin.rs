use super::{json_i64, json_price, json_str, AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SourceAdapter};
use crate::model::{AuctionRef, RawRecord};
use crate::normalize::{parse_rfc3339, parse_status};
use async_trait::async_trait;
use auction_core::{Error, Result};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

const AUCTIONS_URL: &str = "https://d2l9s2774i83t9.cloudfront.net/api/auctions";
const LOTS_SEARCH_URL: &str = "https://d1wu47wucybvr3.cloudfront.net/api/lots_v2";
const LOT_DETAIL_URL: &str = "https://d1wu47wucybvr3.cloudfront.net/api/lots";
const IMAGE_CDN: &str = "https://d2tt46f3mh26nl.cloudfront.net/public/Lots";
const SITE: &str = "https://goldin.co";
const PAGE_SIZE: usize = 1000;

pub struct GoldinAdapter {
    http: HttpFetcher,
    detail_concurrency: usize,
}

/// Grading fields only the per-lot endpoint returns.
#[derive(Debug, Clone, Default, PartialEq)]
struct LotGrading {
    cert_number: Option<String>,
    sub_category: Option<String>,
    grading_company: Option<String>,
    grade: Option<String>,
}

impl GoldinAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::Goldin)?,
            detail_concurrency: ctx.scraping.detail_concurrency.max(1),
        })
    }

    async fn post(&self, operation: &str, url: &str, payload: Value) -> Result<Value> {
        let body = self
            .http
            .send(operation, |client| {
                client
                    .post(url)
                    .header("Accept", "application/json, text/plain, */*")
                    .header("Origin", SITE)
                    .header("Referer", format!("{SITE}/"))
                    .json(&payload)
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn auctions(&self) -> Result<HashMap<String, String>> {
        let data = self
            .post("auctions", AUCTIONS_URL, json!({ "status": "All", "order": "asc" }))
            .await?;
        Ok(parse_auctions(&data))
    }

    async fn lot_grading(&self, slug: &str) -> Result<Option<(Value, LotGrading)>> {
        let data = self
            .post("lot_detail", LOT_DETAIL_URL, json!({ "queryType": "Search", "slug": [slug] }))
            .await?;
        Ok(data
            .pointer("/body/lots/0")
            .map(|lot| (lot.clone(), parse_grading(lot))))
    }

    /// Enriches records with cert numbers, bounded by the detail semaphore.
    async fn attach_grading(&self, records: &mut [RawRecord]) {
        let slugs: Vec<String> = records
            .iter()
            .filter_map(|r| r.raw.get("meta_slug").and_then(Value::as_str).map(str::to_string))
            .collect();
        if slugs.is_empty() {
            return;
        }

        let fetched: HashMap<String, LotGrading> = stream::iter(slugs)
            .map(|slug| async move {
                match self.lot_grading(&slug).await {
                    Ok(Some((_, grading))) if grading.cert_number.is_some() => Some((slug, grading)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(slug = %slug, error = %e, "Goldin lot detail failed");
                        None
                    }
                }
            })
            .buffer_unordered(self.detail_concurrency)
            .filter_map(|entry| async move { entry })
            .collect()
            .await;

        let mut graded = 0;
        for record in records.iter_mut() {
            let Some(grading) = record
                .raw
                .get("meta_slug")
                .and_then(Value::as_str)
                .and_then(|slug| fetched.get(slug))
            else {
                continue;
            };
            record.cert_number = grading.cert_number.clone();
            record.sub_category = grading.sub_category.clone().or(record.sub_category.take());
            record.grading_company = grading.grading_company.clone().or(record.grading_company.take());
            record.grade = grading.grade.clone().or(record.grade.take());
            graded += 1;
        }
        info!(graded, total = records.len(), "Attached Goldin grading data");
    }
}

fn parse_auctions(data: &Value) -> HashMap<String, String> {
    data.get("auctions")
        .and_then(Value::as_array)
        .map(|auctions| {
            auctions
                .iter()
                .filter_map(|a| {
                    let id = json_str(a, &["auction_id", "id"])?;
                    let title = json_str(a, &["title", "name"]).unwrap_or_else(|| {
                        format!("Goldin Auction {}", id.chars().take(8).collect::<String>())
                    });
                    Some((id, title))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Lots from a search page and the total the index reports, if any.
fn parse_lots_page(data: &Value, auctions: &HashMap<String, String>) -> (Vec<RawRecord>, Option<usize>) {
    let search = data.get("searchalgolia");
    let total = search
        .and_then(|s| json_i64(s, &["nbHits", "total", "totalHits"]))
        .map(|n| n.max(0) as usize);
    let lots = search
        .and_then(|s| s.get("lots"))
        .and_then(Value::as_array)
        .map(|lots| lots.iter().map(|lot| parse_lot(lot, auctions)).collect())
        .unwrap_or_default();
    (lots, total)
}

fn parse_lot(lot: &Value, auctions: &HashMap<String, String>) -> RawRecord {
    let lot_id = json_str(lot, &["lot_id", "id", "lotId"]);
    let slug = json_str(lot, &["meta_slug"]);

    let image_url = match (json_str(lot, &["primary_image_name"]), &lot_id) {
        (Some(name), Some(id)) => Some(format!("{IMAGE_CDN}/{id}/{name}@3x")),
        _ => json_str(lot, &["image_url", "imageUrl", "image", "thumbnail"]),
    };
    let item_url = json_str(lot, &["url"]).or_else(|| {
        slug.as_ref()
            .or(lot_id.as_ref())
            .map(|s| format!("{SITE}/item/{s}"))
    });
    let auction = json_str(lot, &["auction_id"]).map(|id| AuctionRef {
        title: auctions.get(&id).cloned(),
        external_id: id,
        end_time: None,
    });

    RawRecord {
        external_id: lot_id,
        title: json_str(lot, &["title", "name", "lot_title"]),
        description: json_str(lot, &["description"]),
        category: json_str(lot, &["category", "item_type", "type"]),
        sub_category: json_str(lot, &["sub_category"]),
        lot_number: json_str(lot, &["lot_number", "lotNumber"]),
        grading_company: json_str(lot, &["grading_company"]),
        grade: json_str(lot, &["grade"]),
        cert_number: json_str(lot, &["cert_number"]),
        current_bid: json_price(
            lot,
            &["current_price", "current_bid", "currentBid", "high_bid", "highBid", "price"],
        ),
        bid_count: json_i64(lot, &["number_of_bids", "bid_count", "bidCount", "num_bids"])
            .map(|n| n as i32),
        end_time: json_str(lot, &["end_timestamp", "end_time", "endTime", "close_time"])
            .and_then(|t| parse_rfc3339(&t)),
        status: json_str(lot, &["status"]).and_then(|s| parse_status(&s)),
        item_url,
        image_url,
        auction,
        raw: lot.clone(),
        ..RawRecord::default()
    }
}

/// Slug from an item URL of the form `https://goldin.co/item/<slug>`.
fn detail_slug(item: &ItemLocator) -> Option<String> {
    let url = item.item_url.as_deref()?;
    let (_, tail) = url.split_once("/item/")?;
    let slug = tail.split(['?', '#', '/']).next()?;
    (!slug.is_empty()).then(|| slug.to_string())
}

fn parse_grading(lot: &Value) -> LotGrading {
    LotGrading {
        cert_number: json_str(lot, &["cert_number"]),
        sub_category: json_str(lot, &["sub_category"]),
        grading_company: json_str(lot, &["grading_company"]),
        grade: json_str(lot, &["grade"]),
    }
}

#[async_trait]
impl SourceAdapter for GoldinAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Goldin.name()
    }

    #[instrument(skip(self), fields(source = "goldin"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let auctions = self.auctions().await?;
        let auction_ids: Vec<&String> = auctions.keys().collect();
        info!(auctions = auction_ids.len(), "Fetched Goldin auctions");

        let mut records = Vec::new();
        let mut offset = 0;
        while records.len() < max_items {
            let payload = json!({
                "search": {
                    "queryType": "Featured",
                    "size": PAGE_SIZE,
                    "from": offset,
                    "auction_id": auction_ids,
                }
            });
            let data = self.post("lots", LOTS_SEARCH_URL, payload).await?;
            let (page, total) = parse_lots_page(&data, &auctions);
            let page_len = page.len();
            if page_len == 0 {
                break;
            }
            records.extend(page);

            if total.is_some_and(|t| records.len() >= t) || page_len < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        records.truncate(max_items);

        self.attach_grading(&mut records).await;
        Ok(records)
    }

    /// The lot endpoint is keyed by slug, which only the item URL carries.
    async fn fetch_item_detail(&self, item: &ItemLocator) -> Result<Option<RawRecord>> {
        let slug = detail_slug(item).ok_or_else(|| {
            Error::Validation(format!("goldin lot {} has no item url to resolve", item.external_id))
        })?;
        let auctions = HashMap::new();
        Ok(self
            .lot_grading(&slug)
            .await?
            .map(|(lot, _)| parse_lot(&lot, &auctions))
            .filter(|record| record.external_id.as_deref() == Some(item.external_id.as_str())))
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.auctions().await.map(|a| a.len());
        HealthCheckResult::from_probe("Goldin API", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemStatus;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn page() -> Value {
        json!({
            "searchalgolia": {
                "nbHits": 2,
                "lots": [
                    {
                        "lot_id": "c1f0",
                        "title": "2020 Panini Prizm Justin Jefferson PSA 10",
                        "current_price": 1250.5,
                        "number_of_bids": 14,
                        "end_timestamp": "2025-12-14T03:00:00Z",
                        "primary_image_name": "front.jpg",
                        "meta_slug": "2020-panini-prizm-justin-jefferson",
                        "auction_id": "a-77",
                        "status": "active"
                    },
                    { "id": 9, "name": "1986 Fleer Jordan", "price": "$99" }
                ]
            }
        })
    }

    #[test]
    fn parses_search_page() {
        let auctions = HashMap::from([("a-77".to_string(), "Winter Elite".to_string())]);
        let (lots, total) = parse_lots_page(&page(), &auctions);

        assert_eq!(total, Some(2));
        assert_eq!(lots.len(), 2);
        let first = &lots[0];
        assert_eq!(first.external_id.as_deref(), Some("c1f0"));
        assert_eq!(first.current_bid, Some(Decimal::new(12505, 1)));
        assert_eq!(first.bid_count, Some(14));
        assert_eq!(first.status, Some(ItemStatus::Live));
        assert_eq!(
            first.item_url.as_deref(),
            Some("https://goldin.co/item/2020-panini-prizm-justin-jefferson")
        );
        assert_eq!(
            first.image_url.as_deref(),
            Some("https://d2tt46f3mh26nl.cloudfront.net/public/Lots/c1f0/front.jpg@3x")
        );
        let auction = first.auction.as_ref().unwrap();
        assert_eq!(auction.external_id, "a-77");
        assert_eq!(auction.title.as_deref(), Some("Winter Elite"));

        assert_eq!(lots[1].external_id.as_deref(), Some("9"));
        assert_eq!(lots[1].current_bid, Some(Decimal::new(99, 0)));
        assert_eq!(lots[1].item_url.as_deref(), Some("https://goldin.co/item/9"));
    }

    #[test]
    fn auction_titles_fall_back_to_id_prefix() {
        let data = json!({ "auctions": [{ "auction_id": "0123456789abcdef" }, { "name": "no id" }] });
        let auctions = parse_auctions(&data);
        assert_eq!(auctions.len(), 1);
        assert_eq!(auctions["0123456789abcdef"], "Goldin Auction 01234567");
    }

    #[test]
    fn grading_from_detail_lot() {
        let lot = json!({ "cert_number": "81234567", "grading_company": "PSA", "grade": 10 });
        assert_eq!(
            parse_grading(&lot),
            LotGrading {
                cert_number: Some("81234567".into()),
                sub_category: None,
                grading_company: Some("PSA".into()),
                grade: Some("10".into()),
            }
        );
    }

    #[test]
    fn detail_lookup_resolves_stored_lot_ids() {
        let (lots, _) = parse_lots_page(&page(), &HashMap::new());
        let stored: Vec<ItemLocator> = lots
            .iter()
            .map(|lot| {
                let locator = ItemLocator::new(lot.external_id.clone().unwrap());
                match &lot.item_url {
                    Some(url) => locator.with_url(url.clone()),
                    None => locator,
                }
            })
            .collect();

        assert_eq!(stored[0].external_id, "c1f0");
        assert_eq!(detail_slug(&stored[0]).as_deref(), Some("2020-panini-prizm-justin-jefferson"));
        assert_eq!(detail_slug(&stored[1]).as_deref(), Some("9"));
        assert_eq!(detail_slug(&ItemLocator::new("c1f0")), None);
        assert_eq!(
            detail_slug(&ItemLocator::new("c1f0").with_url("https://goldin.co/item/some-lot?tab=bids")).as_deref(),
            Some("some-lot")
        );

        // The detail endpoint answers with the same lot, keyed by its lot id.
        let detail = json!({ "lot_id": "c1f0", "title": "2020 Panini Prizm Justin Jefferson PSA 10" });
        assert_eq!(
            parse_lot(&detail, &HashMap::new()).external_id.as_deref(),
            Some(stored[0].external_id.as_str())
        );
    }

    #[test]
    fn empty_response_yields_no_lots() {
        let (lots, total) = parse_lots_page(&json!({}), &HashMap::new());
        assert!(lots.is_empty());
        assert_eq!(total, None);
    }
}
