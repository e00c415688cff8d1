use super::html::{absolute_url, attr, first_text, sel, text_of};
use super::{AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SourceAdapter};
use crate::browser::SharedBrowser;
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::parse_price;
use async_trait::async_trait;
use auction_core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const SITE: &str = "https://www.auctionninja.com";
const SELLER_URL: &str = "https://www.auctionninja.com/queen-city-cards/";
const MAX_AUCTIONS: usize = 10;

static SALE_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href*='/sales/details/']"));
static LOT_BOX: Lazy<Selector> = Lazy::new(|| sel(".search-catalog-item-box"));
static LOT_NUMBER: Lazy<Selector> = Lazy::new(|| sel(".lot-number"));
static LOT_TITLE: Lazy<Selector> = Lazy::new(|| sel(".hot-items-title"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img"));

static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#?\s*(\d+)").expect("valid lot number regex"));
static SALE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d+)\.html").expect("valid sale id regex"));
static CURRENT_BID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Current\s*Bid\s*(\$?[\d,]+(?:\.\d{2})?)").expect("valid current bid regex"));
static ANY_PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[\d,]+(?:\.\d{2})?").expect("valid price regex"));
static TIME_LEFT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\s*days?\s*\d+\s*hours?").expect("valid time left regex"));
static BIDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*bids?\b").expect("valid bids regex"));

/// Queen City Cards sells through AuctionNinja: the seller page links the
/// open sales, each sale page lists its lots.
pub struct QueenCityAdapter {
    browser: Arc<SharedBrowser>,
    http: HttpFetcher,
}

impl QueenCityAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            browser: Arc::clone(&ctx.browser),
            http: ctx.fetcher(AdapterKind::QueenCity)?,
        })
    }

    async fn sale_urls(&self) -> Result<Vec<String>> {
        self.http.limiter().acquire().await;
        Ok(sale_urls(&self.browser.render(SELLER_URL).await?))
    }
}

/// Distinct sale detail URLs, query strings dropped, in page order.
fn sale_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut urls: Vec<String> = Vec::new();
    for href in doc.select(&SALE_LINK).filter_map(|a| attr(a, "href")) {
        let url = absolute_url(SITE, href.split('?').next().unwrap_or_default());
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

fn parse_sale(html: &str, sale_url: &str) -> Vec<RawRecord> {
    let sale_id = SALE_ID_RE
        .captures(sale_url)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let doc = Html::parse_document(html);

    doc.select(&LOT_BOX)
        .filter_map(|lot| {
            let title = first_text(lot, &LOT_TITLE).filter(|t| t.len() >= 5)?;
            // Without a lot number there is no stable id across runs.
            let lot_number = first_text(lot, &LOT_NUMBER)
                .and_then(|t| DIGITS_RE.captures(&t).map(|c| c[1].to_string()))?;
            let text = text_of(lot);
            let current_bid = CURRENT_BID_RE
                .captures(&text)
                .and_then(|c| parse_price(&c[1]))
                .or_else(|| ANY_PRICE_RE.find(&text).and_then(|m| parse_price(m.as_str())));
            let image_url = lot
                .select(&IMAGE)
                .find_map(|img| attr(img, "src").or_else(|| attr(img, "data-src")))
                .filter(|src| !src.ends_with("box-img.png"))
                .map(|src| absolute_url(SITE, &src));

            Some(RawRecord {
                external_id: Some(format!("{sale_id}-{lot_number}")),
                lot_number: Some(lot_number),
                title: Some(title),
                current_bid,
                bid_count: BIDS_RE.captures(&text).and_then(|c| c[1].parse().ok()),
                time_left: TIME_LEFT_RE.find(&text).map(|m| m.as_str().to_string()),
                status: Some(ItemStatus::Live),
                item_url: Some(sale_url.to_string()),
                image_url,
                auction: Some(AuctionRef::new("queencity-current", "Queen City Cards")),
                raw: json!({ "auction_url": sale_url }),
                ..RawRecord::default()
            })
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for QueenCityAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::QueenCity.name()
    }

    #[instrument(skip(self), fields(source = "queencity"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let sales = self.sale_urls().await?;
        info!(sales = sales.len(), "Queen City sales");

        let mut records = Vec::new();
        for sale in sales.iter().take(MAX_AUCTIONS) {
            if records.len() >= max_items {
                break;
            }
            self.http.limiter().acquire().await;
            let lots = parse_sale(&self.browser.render(sale).await?, sale);
            debug!(sale, lots = lots.len(), "Parsed sale");
            records.extend(lots);
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.sale_urls().await.map(|sales| sales.len());
        HealthCheckResult::from_probe("Queen City Cards (AuctionNinja)", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn sale_links_deduplicated() {
        let html = r#"
            <a href="/sales/details/sports-cards-4471.html?ref=x">A</a>
            <a href="/sales/details/sports-cards-4471.html">A again</a>
            <a href="https://www.auctionninja.com/sales/details/more-4480.html">B</a>
            <a href="/about">About</a>"#;
        assert_eq!(
            sale_urls(html),
            vec![
                "https://www.auctionninja.com/sales/details/sports-cards-4471.html".to_string(),
                "https://www.auctionninja.com/sales/details/more-4480.html".to_string(),
            ]
        );
    }

    #[test]
    fn lots_carry_sale_scoped_ids() {
        let html = r#"
            <div class="search-catalog-item-box">
              <span class="lot-number">Lot # 27</span>
              <div class="hot-items-title">2020 Prizm Justin Herbert RC PSA 10</div>
              <img src="/img/box-img.png">
              <p>Current Bid $310.00</p><p>12 bids</p><p>2 days 5 hours</p>
            </div>
            <div class="search-catalog-item-box">
              <div class="hot-items-title">Mystery pack without lot number</div>
            </div>"#;
        let sale = "https://www.auctionninja.com/sales/details/sports-cards-4471.html";

        let records = parse_sale(html, sale);

        assert_eq!(records.len(), 1);
        let herbert = &records[0];
        assert_eq!(herbert.external_id.as_deref(), Some("4471-27"));
        assert_eq!(herbert.current_bid, Some(Decimal::new(31000, 2)));
        assert_eq!(herbert.bid_count, Some(12));
        assert_eq!(herbert.time_left.as_deref(), Some("2 days 5 hours"));
        assert_eq!(herbert.image_url, None);
    }
}
