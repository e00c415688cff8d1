use super::html::{absolute_url, attr, sel, text_of};
use super::{AdapterContext, AdapterKind, HealthCheckResult, ItemLocator, SourceAdapter};
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
use tracing::{info, instrument, warn};

const SITE: &str = "https://vsaauctions.com";
/// VSA moves its catalog around; the first path that lists lots wins.
const CATALOG_PATHS: &[&str] = &["/auctions", "/catalog", "/lots", ""];

static CONTAINERS: Lazy<[Selector; 4]> =
    Lazy::new(|| [sel("div.lot"), sel("div.item"), sel("div.auction-item"), sel("div.lot-item")]);
static TITLE: Lazy<Selector> = Lazy::new(|| {
    sel("[class*='title'], [class*='name'], [class*='Title'], [class*='Name']")
});
static LINK: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img"));

static URL_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[/-](\d+)").expect("valid url id regex"));
static LOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Lot\s*#?\s*(\d+)").expect("valid lot regex"));
static CURRENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Current\s*Bid[:\s]*(\$?[\d,]+)").expect("valid current bid regex"));
static STARTING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:Start|Min|Opening)\s*Bid[:\s]*(\$?[\d,]+)").expect("valid starting bid regex"));
static BIDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*Bids?\b").expect("valid bids regex"));
static CLOSED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(ended|sold|closed)\b").expect("valid closed regex"));

pub struct VsaAdapter {
    browser: Arc<SharedBrowser>,
}

impl VsaAdapter {
    pub fn new(ctx: &AdapterContext) -> Self {
        Self {
            browser: Arc::clone(&ctx.browser),
        }
    }

    /// Renders candidate catalog paths until one yields lots. Render failures
    /// move on to the next path; if every path failed the last error is returned.
    async fn probe(&self) -> Result<Vec<RawRecord>> {
        let mut last_error = None;
        let mut rendered_any = false;
        for path in CATALOG_PATHS {
            let url = format!("{SITE}{path}");
            match self.browser.render(&url).await {
                Ok(html) => {
                    rendered_any = true;
                    let records = parse_lots(&html);
                    if !records.is_empty() {
                        info!(url, items = records.len(), "Found VSA catalog");
                        return Ok(records);
                    }
                }
                Err(e) => {
                    warn!(url, error = %e, "VSA catalog path failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !rendered_any => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}

fn parse_lots(html: &str) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    let Some(container) = CONTAINERS.iter().find(|c| doc.select(c).next().is_some()) else {
        return Vec::new();
    };

    doc.select(container)
        .filter_map(|lot| {
            let title = lot
                .select(&TITLE)
                .next()
                .or_else(|| lot.select(&LINK).next())
                .map(text_of)?;
            if title.len() < 5 {
                return None;
            }
            let item_url = lot
                .select(&LINK)
                .find_map(|a| attr(a, "href"))
                .map(|href| absolute_url(SITE, &href))?;
            let path = reqwest::Url::parse(&item_url).map(|u| u.path().to_string()).unwrap_or_default();
            let external_id = URL_ID_RE.captures(&path).map(|c| c[1].to_string())?;

            let text = text_of(lot);
            if CLOSED_RE.is_match(&text) {
                return None;
            }
            let amount = |re: &Regex| re.captures(&text).and_then(|c| parse_price(&c[1]));
            let starting_bid = amount(&STARTING_RE);
            let lot_number = LOT_RE.captures(&text).map(|c| c[1].to_string());

            Some(RawRecord {
                external_id: Some(external_id),
                lot_number: lot_number.clone(),
                title: Some(title),
                current_bid: amount(&CURRENT_RE).or(starting_bid),
                starting_bid,
                bid_count: BIDS_RE.captures(&text).and_then(|c| c[1].parse().ok()),
                status: Some(ItemStatus::Live),
                item_url: Some(item_url),
                image_url: lot
                    .select(&IMAGE)
                    .find_map(|img| attr(img, "src").or_else(|| attr(img, "data-src")))
                    .map(|src| absolute_url(SITE, &src)),
                auction: Some(AuctionRef::new("vsa-current", "VSA Auctions")),
                raw: json!({ "lot_number": lot_number }),
                ..RawRecord::default()
            })
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for VsaAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Vsa.name()
    }

    #[instrument(skip(self), fields(source = "vsa"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let mut records = self.probe().await?;
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.probe().await.map(|records| records.len());
        HealthCheckResult::from_probe("VSA Auctions", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::ingest::test_context;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    const LOTS: &str = r#"
        <div class="item">
          <h3 class="lot-title">Lot #18 1954 Topps Hank Aaron RC PSA 5</h3>
          <a href="/lot/4410">View</a>
          <img data-src="/img/4410.jpg">
          <p>Starting Bid: $300</p><p>Current Bid: $820</p><p>7 Bids</p>
        </div>
        <div class="item">
          <h3 class="lot-title">1969 Topps Reggie Jackson</h3>
          <a href="/lot/4411">View</a>
          <p>Sold for $900</p>
        </div>
        <div class="item"><h3 class="lot-title">No link here</h3></div>"#;

    #[test]
    fn parses_open_lots() {
        let records = parse_lots(LOTS);
        assert_eq!(records.len(), 1);

        let aaron = &records[0];
        assert_eq!(aaron.external_id.as_deref(), Some("4410"));
        assert_eq!(aaron.lot_number.as_deref(), Some("18"));
        assert_eq!(aaron.current_bid, Some(Decimal::new(820, 0)));
        assert_eq!(aaron.starting_bid, Some(Decimal::new(300, 0)));
        assert_eq!(aaron.bid_count, Some(7));
        assert_eq!(aaron.image_url.as_deref(), Some("https://vsaauctions.com/img/4410.jpg"));
    }

    #[tokio::test]
    async fn empty_catalog_is_not_an_error() {
        let fake = FakeBrowser::new();
        fake.set_html("<html><body>No auctions right now</body></html>");
        let adapter = VsaAdapter::new(&test_context(&fake));

        let records = adapter.fetch_listings(10).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(fake.contexts_created(), CATALOG_PATHS.len());
    }

    #[tokio::test]
    async fn launch_failure_surfaces() {
        let fake = FakeBrowser::new();
        fake.fail_launch();
        let adapter = VsaAdapter::new(&test_context(&fake));

        assert!(adapter.fetch_listings(10).await.is_err());
    }
}
