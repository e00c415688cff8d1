use super::html::{absolute_url, first_attr, first_text, sel};
use super::{AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SourceAdapter};
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::parse_price;
use async_trait::async_trait;
use auction_core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

const SITE: &str = "https://bid.collectrea.com";
const PAGE_SIZE: usize = 100;

static DIV: Lazy<Selector> = Lazy::new(|| sel("div"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| sel("h3 a"));
static MP_LABEL: Lazy<Selector> = Lazy::new(|| sel("p.font-bold"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img"));

static PRODUCT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"productId:\s*(\d+)").expect("valid product id regex"));
static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"price:\s*([\d.]+)").expect("valid price regex"));
static STATUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"status:\s*'(\w+)'").expect("valid status regex"));
static MP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"MP#\s*(\d+)").expect("valid mp regex"));
static PAGES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+)\s+pages total\)").expect("valid pages regex"));
static THUMB_SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"c_fit,e_sharpen:\d+,h_\d+,w_\d+/").expect("valid thumbnail regex"));

/// REA marketplace: fixed-price "Buy It Now" listings rendered as Livewire
/// tiles whose Alpine `x-data` carries the product id, price and status.
pub struct ReaAdapter {
    http: HttpFetcher,
}

fn page_url(page: usize) -> String {
    let base = format!("{SITE}/marketplace?sortBy=Lot_Number:desc&pageSize={PAGE_SIZE}");
    if page == 1 {
        base
    } else {
        format!("{base}&page={page}")
    }
}

#[derive(Debug, Default, PartialEq)]
struct AlpineData {
    product_id: Option<String>,
    price: Option<rust_decimal::Decimal>,
    status: Option<String>,
}

fn alpine_data(x_data: &str) -> AlpineData {
    AlpineData {
        product_id: PRODUCT_ID_RE.captures(x_data).map(|c| c[1].to_string()),
        price: PRICE_RE.captures(x_data).and_then(|c| parse_price(&c[1])),
        status: STATUS_RE.captures(x_data).map(|c| c[1].to_string()),
    }
}

fn parse_tiles(html: &str) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    doc.select(&DIV)
        .filter(|div| div.value().attr("wire:key").is_some_and(|key| key.starts_with("pr_")))
        .filter_map(|tile| {
            let data = alpine_data(tile.value().attr("x-data").unwrap_or_default());
            let product_id = data.product_id?;
            if data.status.as_deref() == Some("sold") {
                debug!(product_id, "Skipping sold listing");
                return None;
            }
            let mp_number = tile
                .select(&MP_LABEL)
                .find_map(|p| MP_RE.captures(&p.text().collect::<String>()).map(|c| c[1].to_string()));
            let image_url = first_attr(tile, &IMAGE, "src")
                .map(|src| THUMB_SIZE_RE.replace(&src, "c_fit,h_500,w_500/").into_owned());

            Some(RawRecord {
                external_id: mp_number.clone().or_else(|| Some(product_id.clone())),
                lot_number: mp_number.clone(),
                title: first_text(tile, &TITLE_LINK),
                current_bid: data.price,
                buy_now_price: data.price,
                status: Some(ItemStatus::Live),
                item_url: first_attr(tile, &TITLE_LINK, "href").map(|href| absolute_url(SITE, &href)),
                image_url,
                auction: Some(AuctionRef::new("rea-marketplace", "REA Marketplace - Buy It Now")),
                raw: json!({ "product_id": product_id, "mp_number": mp_number, "rea_status": data.status }),
                ..RawRecord::default()
            })
        })
        .collect()
}

/// From "Showing 1 to 100 of 842 matching items (9 pages total)", falling
/// back to the Livewire snapshot's `max`/`pageSize`.
fn total_pages(html: &str) -> usize {
    if let Some(caps) = PAGES_RE.captures(html) {
        if let Ok(pages) = caps[1].parse() {
            return pages;
        }
    }
    let doc = Html::parse_document(html);
    doc.select(&DIV)
        .find_map(|div| div.value().attr("wire:snapshot"))
        .and_then(|snapshot| serde_json::from_str::<Value>(snapshot).ok())
        .and_then(|snapshot| {
            let max = snapshot.pointer("/data/max")?.as_u64()?;
            let size = snapshot.pointer("/data/pageSize").and_then(Value::as_u64).unwrap_or(12);
            (size > 0).then(|| max.div_ceil(size) as usize)
        })
        .unwrap_or(1)
        .max(1)
}

impl ReaAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::Rea)?,
        })
    }
}

#[async_trait]
impl SourceAdapter for ReaAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Rea.name()
    }

    #[instrument(skip(self), fields(source = "rea"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let first = self.http.get_text(&page_url(1)).await?;
        let pages = total_pages(&first);
        info!(pages, "REA marketplace pages");

        let mut records = parse_tiles(&first);
        for page in 2..=pages {
            if records.len() >= max_items {
                break;
            }
            let html = self.http.get_text(&page_url(page)).await?;
            records.extend(parse_tiles(&html));
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self.http.get_text(&page_url(1)).await.map(|html| parse_tiles(&html).len());
        HealthCheckResult::from_probe("REA Marketplace", probe)
    }
}
