use super::html::{first_attr, first_text, sel};
use super::{AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SeenIds, SourceAdapter};
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::{extract_grading, from_unix, parse_price};
use async_trait::async_trait;
use auction_core::Result;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::json;
use tracing::{debug, info, instrument};

const SITE: &str = "https://www.pristineauction.com";
const PER_PAGE: usize = 60;

static PRODUCT: Lazy<Selector> = Lazy::new(|| sel("div.product[data-pristine-product-venue-id]"));
static THUMBNAIL: Lazy<Selector> = Lazy::new(|| sel("img.img-thumbnail"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| sel("a.title"));
static HIGH_BID: Lazy<Selector> = Lazy::new(|| sel("p.high-bid"));
static END_TIME: Lazy<Selector> = Lazy::new(|| sel("span.end-time"));
static SUBTITLE: Lazy<Selector> = Lazy::new(|| sel("p.subtitle"));

pub struct PristineAdapter {
    http: HttpFetcher,
}

/// Listing pages exclude ten-minute auctions, which live under their own type.
fn page_url(page: usize) -> String {
    format!("{SITE}/auction/page/{page}/per_page/{PER_PAGE}/category/all")
}

fn parse_products(html: &str) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    doc.select(&PRODUCT)
        .filter_map(|product| {
            let venue_id = product.value().attr("data-pristine-product-venue-id")?.trim().to_string();
            let title = product
                .value()
                .attr("data-pristine-title")
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            let subtitle = first_text(product, &SUBTITLE);

            let current_bid = product.select(&HIGH_BID).next().and_then(|bid| {
                bid.value()
                    .attr("data-high-bid")
                    .and_then(parse_price)
                    .or_else(|| parse_price(&bid.text().collect::<String>()))
            });
            let end_time = product.select(&END_TIME).next().and_then(|span| {
                span.value()
                    .attr("data-pristine-end-time")
                    .or_else(|| span.value().attr("data-timestamp"))
                    .and_then(|ts| ts.trim().parse::<i64>().ok())
                    .and_then(from_unix)
            });
            let grading = extract_grading(&format!("{title} {}", subtitle.as_deref().unwrap_or_default()));

            Some(RawRecord {
                lot_number: Some(venue_id.clone()),
                external_id: Some(venue_id.clone()),
                title: Some(title),
                description: subtitle.clone(),
                grading_company: grading.as_ref().map(|g| g.company.clone()),
                grade: grading.map(|g| g.grade),
                current_bid,
                end_time,
                status: Some(ItemStatus::Live),
                item_url: first_attr(product, &TITLE_LINK, "href").map(|href| super::html::absolute_url(SITE, &href)),
                image_url: first_attr(product, &THUMBNAIL, "src"),
                auction: Some(AuctionRef::new("pristine-all", "Pristine Auction - All Items")),
                raw: json!({ "venue_id": venue_id, "subtitle": subtitle }),
                ..RawRecord::default()
            })
        })
        .collect()
}

impl PristineAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::Pristine)?,
        })
    }
}

#[async_trait]
impl SourceAdapter for PristineAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Pristine.name()
    }

    #[instrument(skip(self), fields(source = "pristine"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let mut seen = SeenIds::default();
        let mut records = Vec::new();
        let mut page = 1;
        while records.len() < max_items {
            let html = self.http.get_text(&page_url(page)).await?;
            let products = parse_products(&html);
            if products.is_empty() {
                debug!(page, "Empty page, stopping");
                break;
            }
            let before = records.len();
            for product in products {
                if product.external_id.as_deref().is_some_and(|id| seen.admit(id)) {
                    records.push(product);
                }
            }
            // Past the last page the site repeats the final page.
            if records.len() == before {
                debug!(page, "Page repeated known listings, stopping");
                break;
            }
            page += 1;
        }
        info!(pages = page, items = records.len(), "Fetched Pristine listings");
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self
            .http
            .get_text(&page_url(1))
            .await
            .map(|html| parse_products(&html).len());
        HealthCheckResult::from_probe("Pristine Auction", probe)
    }
}
