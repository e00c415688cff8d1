use super::{json_i64, json_price, json_str, AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SourceAdapter};
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::{canonical_grader, parse_local_time};
use async_trait::async_trait;
use auction_core::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::{info, instrument};

const SITE: &str = "https://gregmorriscards.com";
const LISTINGS_URL: &str = "https://gregmorriscards.com/auctions/getListings";

pub struct GregMorrisAdapter {
    http: HttpFetcher,
}

impl GregMorrisAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::GregMorris)?,
        })
    }

    async fn page(&self, page: usize) -> Result<Value> {
        let page = page.to_string();
        let body = self
            .http
            .send("listings", |client| {
                client
                    .get(LISTINGS_URL)
                    .header("Accept", "application/json")
                    .header("X-Requested-With", "XMLHttpRequest")
                    .header("Referer", format!("{SITE}/auctions"))
                    .query(&[
                        ("page", page.as_str()),
                        ("options[card_year][0]", "0"),
                        ("options[card_price][0]", "0"),
                        ("options[search]", ""),
                        ("sort[sort_field]", "end_time"),
                        ("sort[sort_dir]", "asc"),
                    ])
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// End times come without a zone and are taken as UTC.
fn end_time(text: &str) -> Option<DateTime<Utc>> {
    parse_local_time(text, "%Y-%m-%d %H:%M:%S", 0).or_else(|| {
        NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

fn listing_record(item: &Value) -> Option<RawRecord> {
    let id = json_str(item, &["item_id"])?;
    let name = json_str(item, &["name"]);
    let year = json_str(item, &["card_year"]).filter(|y| y != "0");
    let manufacturer = json_str(item, &["manufacturer"]);
    let number = json_str(item, &["card_number"]);

    let title = [
        year.clone(),
        manufacturer.clone(),
        name.clone(),
        number.as_ref().map(|n| format!("#{n}")),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    if title.len() < 3 {
        return None;
    }

    Some(RawRecord {
        item_url: Some(format!("{SITE}/listing/{id}")),
        lot_number: Some(id.clone()),
        external_id: Some(id),
        title: Some(title),
        grading_company: json_str(item, &["grading_service"]).map(|g| canonical_grader(&g)),
        grade: json_str(item, &["service_grade", "grade"]),
        current_bid: json_price(item, &["current_price"]),
        bid_count: json_i64(item, &["bid_count"]).map(|n| n as i32),
        end_time: json_str(item, &["end_time"]).and_then(|t| end_time(&t)),
        status: Some(ItemStatus::Live),
        image_url: json_str(item, &["gallery_url"])
            .and_then(|urls| urls.split('|').next().map(str::to_string))
            .filter(|u| !u.is_empty()),
        auction: Some(AuctionRef::new("gregmorris-current", "Greg Morris Cards Current Auction")),
        raw: json!({ "card_year": year, "manufacturer": manufacturer, "card_number": number }),
        ..RawRecord::default()
    })
}

fn parse_page(data: &Value) -> (Vec<RawRecord>, usize) {
    let records = data
        .pointer("/listings/data")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(listing_record).collect())
        .unwrap_or_default();
    let last_page = data
        .get("listings")
        .and_then(|l| json_i64(l, &["last_page"]))
        .unwrap_or(1)
        .max(1) as usize;
    (records, last_page)
}

#[async_trait]
impl SourceAdapter for GregMorrisAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::GregMorris.name()
    }

    #[instrument(skip(self), fields(source = "gregmorris"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let (mut records, last_page) = parse_page(&self.page(1).await?);
        info!(last_page, "Greg Morris listing pages");
        for page in 2..=last_page {
            if records.len() >= max_items {
                break;
            }
            let (more, _) = parse_page(&self.page(page).await?);
            records.extend(more);
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.page(1).await.map(|data| parse_page(&data).0.len());
        HealthCheckResult::from_probe("Greg Morris Cards", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn builds_title_from_card_fields() {
        let data = json!({
            "listings": {
                "last_page": 4,
                "data": [
                    {
                        "item_id": 9001,
                        "name": "Mickey Mantle",
                        "card_year": 1952,
                        "manufacturer": "Topps",
                        "card_number": "311",
                        "grading_service": "bgs",
                        "service_grade": 7,
                        "current_price": "12500.00",
                        "end_time": "2030-03-01 21:00:00",
                        "gallery_url": "https://img/1.jpg|https://img/2.jpg"
                    },
                    { "item_id": 9002, "name": "" }
                ]
            }
        });

        let (records, last_page) = parse_page(&data);

        assert_eq!(last_page, 4);
        assert_eq!(records.len(), 1);
        let mantle = &records[0];
        assert_eq!(mantle.title.as_deref(), Some("1952 Topps Mickey Mantle #311"));
        assert_eq!(mantle.grading_company.as_deref(), Some("Beckett"));
        assert_eq!(mantle.grade.as_deref(), Some("7"));
        assert_eq!(mantle.current_bid, Some(Decimal::new(12500, 0)));
        assert_eq!(mantle.image_url.as_deref(), Some("https://img/1.jpg"));
        assert_eq!(mantle.end_time, Some(Utc.with_ymd_and_hms(2030, 3, 1, 21, 0, 0).unwrap()));
        assert_eq!(mantle.item_url.as_deref(), Some("https://gregmorriscards.com/listing/9001"));
    }

    #[test]
    fn date_only_end_time() {
        assert_eq!(end_time("2030-03-01"), Some(Utc.with_ymd_and_hms(2030, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(end_time("soon"), None);
    }
}
