use super::{json_i64, json_price, json_str, AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SeenIds, SourceAdapter};
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::parse_rfc3339;
use async_trait::async_trait;
use auction_core::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

const PAGE_SIZE: usize = 200;
/// Sports trading cards, non-sport trading cards, sports memorabilia.
const CATEGORY_IDS: &[&str] = &["212", "213", "64482"];
const TOKEN_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoints {
    token: &'static str,
    browse: &'static str,
}

const PRODUCTION: Endpoints = Endpoints {
    token: "https://api.ebay.com/identity/v1/oauth2/token",
    browse: "https://api.ebay.com/buy/browse/v1/item_summary/search",
};

const SANDBOX: Endpoints = Endpoints {
    token: "https://api.sandbox.ebay.com/identity/v1/oauth2/token",
    browse: "https://api.sandbox.ebay.com/buy/browse/v1/item_summary/search",
};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    7200
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

pub struct EbayAdapter {
    http: HttpFetcher,
    credentials: Option<(String, String)>,
    endpoints: Endpoints,
    token: Mutex<Option<CachedToken>>,
}

impl EbayAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        let sources = &ctx.sources;
        let credentials = match (&sources.ebay_client_id, &sources.ebay_client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.clone(), secret.clone()))
            }
            _ => None,
        };
        let sandbox = sources.ebay_sandbox
            || credentials
                .as_ref()
                .is_some_and(|(id, _)| id.to_ascii_uppercase().contains("SBX"));

        Ok(Self {
            http: ctx.fetcher(AdapterKind::Ebay)?,
            credentials,
            endpoints: if sandbox { SANDBOX } else { PRODUCTION },
            token: Mutex::new(None),
        })
    }

    /// Client-credentials token, reused until five minutes before it expires.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Utc::now() < t.refresh_at) {
            return Ok(token.value.clone());
        }

        let (client_id, client_secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Config("eBay client id/secret not configured".into()))?;

        let body = self
            .http
            .send("token", |client| {
                client
                    .post(self.endpoints.token)
                    .basic_auth(client_id, Some(client_secret))
                    .form(&[("grant_type", "client_credentials"), ("scope", TOKEN_SCOPE)])
            })
            .await
            .map_err(|e| match e {
                Error::UpstreamStatus { status, .. } if status == 400 || status == 401 => {
                    Error::auth("ebay", format!("token request rejected with HTTP {status}"))
                }
                other => other,
            })?;
        let token: TokenResponse = serde_json::from_str(&body)?;
        debug!(expires_in = token.expires_in, "Obtained eBay access token");

        let fresh = CachedToken {
            value: token.access_token,
            refresh_at: Utc::now() + Duration::seconds(token.expires_in - 300),
        };
        *cached = Some(fresh.clone());
        Ok(fresh.value)
    }

    async fn search(&self, token: &str, category_id: &str, offset: usize, limit: usize) -> Result<Value> {
        let limit = limit.min(PAGE_SIZE).to_string();
        let offset = offset.to_string();
        let body = self
            .http
            .send("search", |client| {
                client
                    .get(self.endpoints.browse)
                    .bearer_auth(token)
                    .header("X-EBAY-C-MARKETPLACE-ID", "EBAY_US")
                    .query(&[
                        ("category_ids", category_id),
                        ("filter", "buyingOptions:{AUCTION}"),
                        ("sort", "endingSoonest"),
                        ("fieldgroups", "EXTENDED"),
                        ("limit", limit.as_str()),
                        ("offset", offset.as_str()),
                    ])
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// `v1|123456|0` -> `123456`; bare ids pass through.
fn legacy_id(item_id: &str) -> &str {
    let mut parts = item_id.split('|');
    match (parts.next(), parts.next()) {
        (Some(_), Some(id)) => id,
        _ => item_id,
    }
}

#[derive(Debug, Default, PartialEq)]
struct Descriptors {
    grader: Option<String>,
    grade: Option<String>,
    cert: Option<String>,
}

fn condition_descriptors(item: &Value) -> Descriptors {
    let mut found = Descriptors::default();
    let Some(list) = item.get("conditionDescriptors").and_then(Value::as_array) else {
        return found;
    };
    for descriptor in list {
        let name = json_str(descriptor, &["name"]).unwrap_or_default().to_lowercase();
        let Some(value) = descriptor
            .pointer("/values/0/content")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            continue;
        };
        if name.contains("grader") || name.contains("professional") {
            found.grader = Some(value);
        } else if name.contains("grade") {
            found.grade = Some(value);
        } else if name.contains("cert") || name.contains("serial") {
            found.cert = Some(value);
        }
    }
    found
}

fn item_record(item: &Value) -> RawRecord {
    let descriptors = condition_descriptors(item);
    let category = item.get("categories").and_then(Value::as_array).map(|cats| {
        cats.iter()
            .filter_map(|c| json_str(c, &["categoryName"]))
            .collect::<Vec<_>>()
            .join(" > ")
    });

    RawRecord {
        external_id: json_str(item, &["itemId"]).map(|id| legacy_id(&id).to_string()),
        title: json_str(item, &["title"]),
        description: json_str(item, &["shortDescription"]),
        category: category.filter(|c| !c.is_empty()),
        grading_company: descriptors.grader,
        grade: descriptors.grade,
        cert_number: descriptors.cert,
        current_bid: item
            .get("currentBidPrice")
            .or_else(|| item.get("price"))
            .and_then(|p| json_price(p, &["value"])),
        bid_count: json_i64(item, &["bidCount"]).map(|n| n as i32),
        end_time: json_str(item, &["itemEndDate"]).and_then(|t| parse_rfc3339(&t)),
        status: Some(ItemStatus::Live),
        item_url: json_str(item, &["itemWebUrl", "itemHref"]),
        image_url: item
            .pointer("/image/imageUrl")
            .or_else(|| item.pointer("/thumbnailImages/0/imageUrl"))
            .and_then(Value::as_str)
            .map(str::to_string),
        auction: Some(AuctionRef::new("ebay-auctions", "eBay Auctions")),
        raw: json!({
            "ebay": item,
            "seller": item.pointer("/seller/username"),
            "condition": item.get("condition"),
            "location": item.pointer("/itemLocation/country"),
        }),
        ..RawRecord::default()
    }
}

#[async_trait]
impl SourceAdapter for EbayAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Ebay.name()
    }

    #[instrument(skip(self), fields(source = "ebay"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let token = self.access_token().await?;

        let mut seen = SeenIds::default();
        let mut items = Vec::new();
        'categories: for category_id in CATEGORY_IDS {
            let mut offset = 0;
            loop {
                if items.len() >= max_items {
                    break 'categories;
                }
                let page = self.search(&token, category_id, offset, PAGE_SIZE).await?;
                let total = json_i64(&page, &["total"]).unwrap_or(0).max(0) as usize;
                let summaries = page
                    .get("itemSummaries")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if summaries.is_empty() {
                    break;
                }
                let page_len = summaries.len();
                for summary in summaries {
                    let fresh = json_str(&summary, &["itemId"])
                        .is_some_and(|id| seen.admit(legacy_id(&id)));
                    if fresh {
                        items.push(item_record(&summary));
                    }
                }
                offset += page_len;
                if offset >= total || page_len < PAGE_SIZE {
                    break;
                }
            }
            info!(category = category_id, total = items.len(), "Fetched eBay category");
        }
        items.truncate(max_items);
        Ok(items)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        // Browse item lookups need the full `v1|id|variation` key, which is not stored.
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        if self.credentials.is_none() {
            return HealthCheckResult::unhealthy("eBay API credentials not configured");
        }
        let probe = async {
            let token = self.access_token().await?;
            let page = self.search(&token, CATEGORY_IDS[0], 0, 1).await?;
            Ok(json_i64(&page, &["total"]).unwrap_or(0).max(0) as usize)
        }
        .await;
        HealthCheckResult::from_probe("eBay Browse API", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn strips_item_id_version() {
        assert_eq!(legacy_id("v1|315467288123|0"), "315467288123");
        assert_eq!(legacy_id("315467288123"), "315467288123");
    }

    #[test]
    fn summary_with_condition_descriptors() {
        let item = json!({
            "itemId": "v1|111|0",
            "title": "2018 Bowman Chrome Shohei Ohtani Auto",
            "currentBidPrice": { "value": "455.00", "currency": "USD" },
            "bidCount": 31,
            "itemEndDate": "2025-06-01T18:00:00.000Z",
            "itemWebUrl": "https://www.ebay.com/itm/111",
            "image": { "imageUrl": "https://i.ebayimg.com/1.jpg" },
            "categories": [{ "categoryName": "Sports Trading Cards" }, { "categoryName": "Baseball Cards" }],
            "conditionDescriptors": [
                { "name": "Professional Grader", "values": [{ "content": "PSA" }] },
                { "name": "Grade", "values": [{ "content": "10" }] },
                { "name": "Certification Number", "values": [{ "content": "73001234" }] }
            ],
            "seller": { "username": "cardshop" }
        });

        let record = item_record(&item);

        assert_eq!(record.external_id.as_deref(), Some("111"));
        assert_eq!(record.current_bid, Some(Decimal::new(455, 0)));
        assert_eq!(record.grading_company.as_deref(), Some("PSA"));
        assert_eq!(record.grade.as_deref(), Some("10"));
        assert_eq!(record.cert_number.as_deref(), Some("73001234"));
        assert_eq!(record.category.as_deref(), Some("Sports Trading Cards > Baseball Cards"));
        assert_eq!(record.raw["seller"], json!("cardshop"));
        assert!(record.end_time.is_some());
    }

    #[test]
    fn falls_back_to_fixed_price_and_thumbnail() {
        let item = json!({
            "itemId": "222",
            "title": "Charizard",
            "price": { "value": "12.5" },
            "thumbnailImages": [{ "imageUrl": "https://i.ebayimg.com/t.jpg" }]
        });

        let record = item_record(&item);

        assert_eq!(record.current_bid, Some(Decimal::new(125, 1)));
        assert_eq!(record.image_url.as_deref(), Some("https://i.ebayimg.com/t.jpg"));
        assert_eq!(condition_descriptors(&item), Descriptors::default());
    }
}
