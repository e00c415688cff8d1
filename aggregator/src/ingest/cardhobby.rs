use super::{json_i64, json_price, json_str, AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SourceAdapter};
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::parse_local_time;
use async_trait::async_trait;
use auction_core::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, instrument};

const SEARCH_URL: &str = "https://gatewayapi.cardhobby.com/solr/NewCommodity/SearchCommodityPost";
const SITE: &str = "https://www.cardhobby.com";
const PAGE_SIZE: usize = 100;
/// Active auctions only (`ByWay` 1 is fixed price).
const ACTIVE_AUCTIONS: &str = r#"[{"Key":"Status","Value":1},{"Key":"ByWay","Value":"2"}]"#;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// CardHobby reports China Standard Time.
const UTC_OFFSET_HOURS: i32 = 8;

pub struct CardHobbyAdapter {
    http: HttpFetcher,
    auth_token: Option<String>,
    min_price: Decimal,
}

impl CardHobbyAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::CardHobby)?,
            auth_token: ctx.sources.cardhobby_auth_token.clone().filter(|t| !t.is_empty()),
            min_price: Decimal::try_from(ctx.sources.cardhobby_min_price).unwrap_or_default(),
        })
    }

    /// Page `page` (1-based), sorted by current bid descending.
    async fn page(&self, page: usize, page_size: usize) -> Result<Value> {
        let payload = json!({
            "userId": "",
            "pageIndex": page,
            "pageSize": page_size,
            "searchKey": "",
            "searchJson": ACTIVE_AUCTIONS,
            "sort": "LowestPrice",
            "sortType": "desc",
            "lag": "en",
            "device": "Web",
            "version": 1,
            "appname": "Card Hobby",
        });
        let body = self
            .http
            .send("search", |client| {
                let request = client
                    .post(SEARCH_URL)
                    .header("Accept", "application/json, text/plain, */*")
                    .header("Origin", SITE)
                    .header("Referer", format!("{SITE}/"))
                    .json(&payload);
                match &self.auth_token {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await?;
        let data: Value = serde_json::from_str(&body)?;
        if json_i64(&data, &["result"]) != Some(1) {
            return Err(Error::ingest(
                "cardhobby",
                format!("search returned result={}", data.get("result").unwrap_or(&Value::Null)),
            ));
        }
        Ok(data)
    }
}

fn page_items(data: &Value) -> Vec<Value> {
    data.pointer("/data/PagedMarketItemList")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// `USD_LowestPrice` is the current high bid; `USD_Price` the opening price.
fn current_bid(item: &Value) -> Decimal {
    json_price(item, &["USD_LowestPrice"]).unwrap_or_default()
}

fn item_record(item: &Value) -> RawRecord {
    let id = json_str(item, &["ID"]);
    RawRecord {
        item_url: id.as_ref().map(|id| format!("{SITE}/#/carddetails/{id}")),
        external_id: id,
        title: json_str(item, &["Title"]),
        category: Some("Trading Cards".into()),
        lot_number: json_str(item, &["Code"]),
        current_bid: Some(current_bid(item)),
        starting_bid: json_price(item, &["USD_Price"]).filter(|p| !p.is_zero()),
        bid_count: json_i64(item, &["PriceCount"]).map(|n| n as i32),
        end_time: json_str(item, &["EffectiveDate"])
            .and_then(|t| parse_local_time(&t, TIME_FORMAT, UTC_OFFSET_HOURS)),
        status: Some(if json_i64(item, &["Status"]) == Some(1) {
            ItemStatus::Live
        } else {
            ItemStatus::Ended
        }),
        image_url: json_str(item, &["TitImg"]),
        auction: Some(AuctionRef::new("cardhobby-current", "CardHobby Current Auctions")),
        raw: json!({
            "seller": item.get("SellRealName"),
            "seller_id": item.get("SellMemberID"),
            "sell_source": item.get("SellSource"),
            "review_count": item.get("ReviewCount"),
            "cny_price": item.get("Price"),
        }),
        ..RawRecord::default()
    }
}

/// Keeps items at or above `min_price` that have not ended yet. The second
/// value is `false` once the page shows prices have dropped below the floor.
fn filter_page(items: &[Value], min_price: Decimal, now: DateTime<Utc>) -> (Vec<RawRecord>, bool) {
    let kept = items
        .iter()
        .filter(|item| current_bid(item) >= min_price)
        .map(item_record)
        .filter(|record| record.end_time.map_or(true, |end| end >= now))
        .collect();
    let more = items.last().is_some_and(|last| current_bid(last) >= min_price);
    (kept, more)
}

#[async_trait]
impl SourceAdapter for CardHobbyAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::CardHobby.name()
    }

    #[instrument(skip(self), fields(source = "cardhobby", min_price = %self.min_price))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut page = 1;
        while records.len() < max_items {
            let data = self.page(page, PAGE_SIZE).await?;
            let items = page_items(&data);
            if items.is_empty() {
                break;
            }
            let (kept, more) = filter_page(&items, self.min_price, Utc::now());
            debug!(page, kept = kept.len(), "Fetched CardHobby page");
            records.extend(kept);
            if !more {
                break;
            }
            page += 1;
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self
            .page(1, 1)
            .await
            .map(|data| json_i64(&data, &["Total"]).or_else(|| data.pointer("/data/Total").and_then(Value::as_i64)))
            .map(|total| total.unwrap_or(0).max(0) as usize);
        HealthCheckResult::from_probe("CardHobby API", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn item(id: i64, usd: &str, ends: &str) -> Value {
        json!({
            "ID": id,
            "Title": format!("Card {id}"),
            "USD_LowestPrice": usd,
            "USD_Price": "10.00",
            "PriceCount": 3,
            "EffectiveDate": ends,
            "Status": 1,
            "Code": "A1"
        })
    }

    #[test]
    fn end_time_is_shifted_from_china_time() {
        let record = item_record(&item(5, "1,250.00", "2030-05-01 20:00:00"));
        assert_eq!(record.end_time, Some(Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap()));
        assert_eq!(record.current_bid, Some(Decimal::new(1250, 0)));
        assert_eq!(record.item_url.as_deref(), Some("https://www.cardhobby.com/#/carddetails/5"));
    }

    #[test]
    fn drops_cheap_and_ended_items_and_stops_below_floor() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let page = vec![
            item(1, "500", "2030-02-01 00:00:00"),
            item(2, "300", "2029-12-01 00:00:00"),
            item(3, "50", "2030-02-01 00:00:00"),
        ];

        let (kept, more) = filter_page(&page, Decimal::new(100, 0), now);

        assert_eq!(
            kept.iter().map(|r| r.external_id.clone().unwrap()).collect::<Vec<_>>(),
            vec!["1".to_string()]
        );
        assert!(!more);
    }

    #[test]
    fn continues_while_last_item_is_above_floor() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let page = vec![item(1, "500", "2030-02-01 00:00:00"), item(2, "120", "2030-02-01 00:00:00")];

        let (kept, more) = filter_page(&page, Decimal::new(100, 0), now);

        assert_eq!(kept.len(), 2);
        assert!(more);
    }
}
