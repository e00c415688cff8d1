use super::html::{absolute_url, first_attr, first_text, sel};
use super::lelands::max_linked_page;
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
use tracing::{info, instrument};

const SITE: &str = "https://marketplace.cleansweepauctions.com";

static PRODUCT: Lazy<Selector> = Lazy::new(|| sel("div.single-products"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| sel("h6 a"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img"));
static PRICE: Lazy<Selector> = Lazy::new(|| sel("p"));
static PAGE_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href*='page=']"));
static ITEM_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/item-0*(\d+)/?").expect("valid item id regex"));

/// Clean Sweep's marketplace is fixed-price; the listed price is both the
/// current and the buy-now price.
pub struct CleanSweepAdapter {
    browser: Arc<SharedBrowser>,
}

impl CleanSweepAdapter {
    pub fn new(ctx: &AdapterContext) -> Self {
        Self {
            browser: Arc::clone(&ctx.browser),
        }
    }
}

fn parse_marketplace(html: &str) -> (Vec<RawRecord>, usize) {
    let doc = Html::parse_document(html);
    let records = doc
        .select(&PRODUCT)
        .map(|product| {
            let href = first_attr(product, &TITLE_LINK, "href");
            let external_id = href
                .as_deref()
                .and_then(|h| ITEM_ID_RE.captures(h))
                .map(|c| c[1].to_string());
            let price = first_text(product, &PRICE).and_then(|t| parse_price(&t));

            RawRecord {
                lot_number: external_id.clone(),
                external_id,
                title: first_text(product, &TITLE_LINK),
                current_bid: price,
                buy_now_price: price,
                status: Some(ItemStatus::Live),
                item_url: href.map(|h| absolute_url(SITE, &h)),
                image_url: first_attr(product, &IMAGE, "src"),
                auction: Some(AuctionRef::new("cleansweep-marketplace", "Clean Sweep Auctions Marketplace")),
                raw: json!({ "buy_now_price": price }),
                ..RawRecord::default()
            }
        })
        .collect();
    (records, max_linked_page(&doc, &PAGE_LINK))
}

#[async_trait]
impl SourceAdapter for CleanSweepAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::CleanSweep.name()
    }

    #[instrument(skip(self), fields(source = "cleansweep"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let (mut records, pages) = parse_marketplace(&self.browser.render(SITE).await?);
        info!(pages, "Clean Sweep marketplace pages");
        for page in 2..=pages {
            if records.len() >= max_items {
                break;
            }
            let html = self.browser.render(&format!("{SITE}?page={page}")).await?;
            records.extend(parse_marketplace(&html).0);
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.browser.render(SITE).await.map(|html| parse_marketplace(&html).0.len());
        HealthCheckResult::from_probe("Clean Sweep Auctions", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn fixed_price_products() {
        let html = r#"
            <div class="single-products">
              <img src="https://cdn.cleansweep.com/a.jpg">
              <h6><a href="/item-000123/">1933 Goudey Lou Gehrig SGC 3</a></h6>
              <p>Buy it for $2,100</p>
            </div>
            <a href="?page=3">3</a><a href="?page=2">2</a>"#;

        let (records, pages) = parse_marketplace(html);

        assert_eq!(pages, 3);
        assert_eq!(records.len(), 1);
        let gehrig = &records[0];
        assert_eq!(gehrig.external_id.as_deref(), Some("123"));
        assert_eq!(gehrig.buy_now_price, Some(Decimal::new(2100, 0)));
        assert_eq!(gehrig.current_bid, gehrig.buy_now_price);
        assert_eq!(
            gehrig.item_url.as_deref(),
            Some("https://marketplace.cleansweepauctions.com/item-000123/")
        );
    }
}
