use super::html::{absolute_url, first_attr, first_text, sel, text_of};
use super::{AdapterContext, AdapterKind, HealthCheckResult, ItemLocator, SourceAdapter};
use crate::browser::SharedBrowser;
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::{parse_price, parse_status};
use async_trait::async_trait;
use auction_core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const SITE: &str = "https://auction.lelands.com";
const GALLERY_URL: &str = "https://auction.lelands.com/Lots/Gallery";

static ITEM: Lazy<Selector> = Lazy::new(|| sel("div.item"));
static LOT: Lazy<Selector> = Lazy::new(|| sel("h5.boxed"));
static DESCRIPTION_LINK: Lazy<Selector> = Lazy::new(|| sel("p.description a"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("div.item-image img"));
static DETAIL_PARAGRAPH: Lazy<Selector> = Lazy::new(|| sel("div.item-details p"));
static PRICE_LINK: Lazy<Selector> = Lazy::new(|| sel("div.item-price a"));
static PAGINATION_LINK: Lazy<Selector> = Lazy::new(|| sel("ul.pagination a[href]"));

static ITEM_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)itemid=(\d+)").expect("valid item id regex"));
static BIDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Bids:\s*(\d+)").expect("valid bids regex"));
static OPENING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Opening Bid:\s*(\$?[\d,]+)").expect("valid opening bid regex"));
static STATUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Status:\s*(\w+)").expect("valid status regex"));
pub(crate) static PAGE_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]page=(\d+)").expect("valid page regex"));

/// Lelands rejects plain HTTP clients, so gallery pages are rendered in the
/// shared browser.
pub struct LelandsAdapter {
    browser: Arc<SharedBrowser>,
}

impl LelandsAdapter {
    pub fn new(ctx: &AdapterContext) -> Self {
        Self {
            browser: Arc::clone(&ctx.browser),
        }
    }
}

/// Highest `page=N` linked from the pager; 1 without a pager.
pub(crate) fn max_linked_page(doc: &Html, links: &Selector) -> usize {
    doc.select(links)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| PAGE_PARAM_RE.captures(href).and_then(|c| c[1].parse().ok()))
        .max()
        .unwrap_or(1)
}

fn parse_gallery(html: &str) -> (Vec<RawRecord>, usize) {
    let doc = Html::parse_document(html);
    let records = doc
        .select(&ITEM)
        .filter_map(|item| {
            let details: Vec<String> = item.select(&DETAIL_PARAGRAPH).map(text_of).collect();
            let find = |re: &Regex| details.iter().find_map(|p| re.captures(p).map(|c| c[1].to_string()));

            // Listings without a status line are closed lots from past sales.
            let status = find(&STATUS_RE)?;
            if parse_status(&status) == Some(ItemStatus::Ended) {
                return None;
            }

            let href = first_attr(item, &DESCRIPTION_LINK, "href");
            let external_id = href
                .as_deref()
                .and_then(|h| ITEM_ID_RE.captures(h))
                .map(|c| c[1].to_string());
            let lot_number = first_text(item, &LOT);

            Some(RawRecord {
                external_id,
                lot_number: lot_number.clone(),
                title: first_text(item, &DESCRIPTION_LINK),
                current_bid: first_text(item, &PRICE_LINK).and_then(|t| parse_price(&t)),
                starting_bid: find(&OPENING_RE).and_then(|t| parse_price(&t)),
                bid_count: find(&BIDS_RE).and_then(|n| n.parse().ok()),
                status: Some(ItemStatus::Live),
                item_url: href.map(|h| absolute_url(SITE, &h)),
                image_url: first_attr(item, &IMAGE, "src"),
                auction: Some(AuctionRef::new("lelands-current", "Lelands Auction")),
                raw: json!({ "lot_number": lot_number, "original_status": status }),
                ..RawRecord::default()
            })
        })
        .collect();
    (records, max_linked_page(&doc, &PAGINATION_LINK))
}

#[async_trait]
impl SourceAdapter for LelandsAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Lelands.name()
    }

    #[instrument(skip(self), fields(source = "lelands"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let (mut records, pages) = parse_gallery(&self.browser.render(GALLERY_URL).await?);
        info!(pages, first_page = records.len(), "Lelands gallery pages");

        for page in 2..=pages {
            if records.len() >= max_items {
                break;
            }
            let html = self.browser.render(&format!("{GALLERY_URL}?page={page}")).await?;
            let (more, _) = parse_gallery(&html);
            debug!(page, items = more.len(), "Rendered Lelands page");
            records.extend(more);
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.browser.render(GALLERY_URL).await.map(|html| parse_gallery(&html).0.len());
        HealthCheckResult::from_probe("Lelands", probe)
    }
}
