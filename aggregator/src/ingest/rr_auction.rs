use super::html::{absolute_url, attr, first_attr, first_text, sel};
use super::lelands::max_linked_page;
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

const SITE: &str = "https://www.rrauction.com";
const CALENDAR_URL: &str = "https://www.rrauction.com/auctions/auction-calendar";
const MAX_AUCTIONS: usize = 15;
const MAX_PAGES_PER_AUCTION: usize = 10;

static AUCTION_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href*='/auctions/details/']"));
static ITEM: Lazy<Selector> = Lazy::new(|| sel("div.auction-item.auction-item--skin"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| sel("a.auction-item__title"));
static TITLE: Lazy<Selector> = Lazy::new(|| sel("h2.title"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img.zoom-hover, img.img-fluid"));
static VALUE: Lazy<Selector> = Lazy::new(|| sel("p.value"));
static ESTIMATE: Lazy<Selector> = Lazy::new(|| sel("p.gallery-estimate"));
static PAGE_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href*='page=']"));

static LOT_DETAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/lot-detail/(\d+)-").expect("valid lot detail regex"));
static LOT_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.\s*").expect("valid lot prefix regex"));
static BID_COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\((\d+)\s*bids?\)").expect("valid bid count regex"));
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$?[\d,]+(?:\.\d{2})?").expect("valid amount regex"));

pub struct RrAuctionAdapter {
    browser: Arc<SharedBrowser>,
    http: HttpFetcher,
}

impl RrAuctionAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            browser: Arc::clone(&ctx.browser),
            http: ctx.fetcher(AdapterKind::RrAuction)?,
        })
    }

    async fn render(&self, url: &str) -> Result<String> {
        self.http.limiter().acquire().await;
        self.browser.render(url).await
    }
}

/// Open auctions linked from the calendar, at most [`MAX_AUCTIONS`].
fn auction_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut urls: Vec<String> = Vec::new();
    for href in doc.select(&AUCTION_LINK).filter_map(|a| attr(a, "href")) {
        let url = absolute_url(SITE, href.split('?').next().unwrap_or_default());
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls.truncate(MAX_AUCTIONS);
    urls
}

fn first_amount(text: &str) -> Option<rust_decimal::Decimal> {
    AMOUNT_RE
        .find_iter(text)
        .find_map(|m| parse_price(m.as_str()))
}

fn parse_gallery(html: &str) -> (Vec<RawRecord>, usize) {
    let doc = Html::parse_document(html);
    let records = doc
        .select(&ITEM)
        .map(|item| {
            let item_url = first_attr(item, &TITLE_LINK, "href").map(|h| absolute_url(SITE, &h));
            let external_id = attr(item, "id")
                .map(|id| id.trim_end_matches("-gallery").to_string())
                .or_else(|| {
                    item_url
                        .as_deref()
                        .and_then(|u| LOT_DETAIL_RE.captures(u))
                        .map(|c| c[1].to_string())
                });

            // Titles read "123. Babe Ruth signed ball"; the prefix is the lot number.
            let mut title = first_text(item, &TITLE);
            let mut lot_number = None;
            if let Some(full) = title.clone() {
                if let Some(caps) = LOT_PREFIX_RE.captures(&full) {
                    lot_number = Some(caps[1].to_string());
                    title = Some(full[caps[0].len()..].trim().to_string());
                }
            }

            let value = first_text(item, &VALUE).unwrap_or_default();
            RawRecord {
                external_id,
                lot_number: lot_number.clone(),
                title,
                current_bid: first_amount(&value),
                starting_bid: first_text(item, &ESTIMATE).and_then(|t| first_amount(&t)),
                bid_count: BID_COUNT_RE.captures(&value).and_then(|c| c[1].parse().ok()),
                status: Some(ItemStatus::Live),
                item_url,
                image_url: first_attr(item, &IMAGE, "src"),
                auction: Some(AuctionRef::new("rr-current", "RR Auction")),
                raw: json!({ "lot_number": lot_number }),
                ..RawRecord::default()
            }
        })
        .collect();
    (records, max_linked_page(&doc, &PAGE_LINK).min(MAX_PAGES_PER_AUCTION))
}

#[async_trait]
impl SourceAdapter for RrAuctionAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::RrAuction.name()
    }

    #[instrument(skip(self), fields(source = "rr_auction"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let auctions = auction_urls(&self.render(CALENDAR_URL).await?);
        info!(auctions = auctions.len(), "RR Auction open auctions");

        let mut records = Vec::new();
        'auctions: for auction in &auctions {
            if records.len() >= max_items {
                break;
            }
            let (items, pages) = parse_gallery(&self.render(auction).await?);
            debug!(auction, pages, items = items.len(), "Parsed auction page 1");
            records.extend(items);
            for page in 2..=pages {
                if records.len() >= max_items {
                    break 'auctions;
                }
                let html = self.render(&format!("{auction}?page={page}")).await?;
                records.extend(parse_gallery(&html).0);
            }
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.render(CALENDAR_URL).await.map(|html| auction_urls(&html).len());
        HealthCheckResult::from_probe("RR Auction", probe)
    }
}
