use super::html::{absolute_url, attr, sel, text_of};
use super::{AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SeenIds, SourceAdapter};
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::parse_price;
use async_trait::async_trait;
use auction_core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use tracing::{debug, instrument};

const SITE: &str = "https://auctionofchampions.com";
const SEARCH_URL: &str = "https://auctionofchampions.com/lot/search";
/// Category pages are only walked when search returns fewer than this.
const SEARCH_FLOOR: usize = 100;
const CATEGORY_TAGS: &[&str] = &["daily", "card", "mvp", "all-star", "mystery"];

static LOT_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href*='/lot/']"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img"));
static LOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/lot/(\d+)-([^/?#]+)").expect("valid lot url regex"));
static BID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Bid:\s*(\$?[\d,]+(?:\.\d{2})?)").expect("valid bid regex"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Time:\s*(\d+[dhm](?:\s*\d+[dhm]){0,2})").expect("valid time regex"));

pub struct AuctionOfChampionsAdapter {
    http: HttpFetcher,
}

impl AuctionOfChampionsAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::AuctionOfChampions)?,
        })
    }
}

/// Nearest ancestor (within six levels) whose text mentions a bid or price.
fn lot_container(link: ElementRef<'_>) -> ElementRef<'_> {
    let mut container = link;
    for ancestor in link.ancestors().filter_map(ElementRef::wrap).take(6) {
        container = ancestor;
        let text = text_of(ancestor);
        if text.contains("Bid:") || text.contains('$') {
            break;
        }
    }
    container
}

fn parse_lots(html: &str, seen: &mut SeenIds) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    let mut records = Vec::new();
    for link in doc.select(&LOT_LINK) {
        let Some(href) = attr(link, "href") else { continue };
        let Some(caps) = LOT_RE.captures(&href) else { continue };
        let lot_id = caps[1].to_string();
        // Lot pages carry no title element; the slug is the title.
        let title = caps[2].replace('-', " ").trim().to_string();
        if title.len() < 5 || !seen.admit(&lot_id) {
            continue;
        }

        let container = lot_container(link);
        let text = text_of(container);
        let tag = CATEGORY_TAGS
            .iter()
            .find(|tag| text.to_lowercase().contains(*tag))
            .map(|tag| tag.to_string());

        records.push(RawRecord {
            external_id: Some(lot_id.clone()),
            lot_number: Some(lot_id),
            title: Some(title),
            sub_category: tag.clone(),
            current_bid: BID_RE.captures(&text).and_then(|c| parse_price(&c[1])),
            time_left: TIME_RE.captures(&text).map(|c| c[1].to_string()),
            status: Some(ItemStatus::Live),
            item_url: Some(absolute_url(SITE, &href)),
            image_url: container
                .select(&IMAGE)
                .find_map(|img| attr(img, "src").or_else(|| attr(img, "data-src"))),
            auction: Some(AuctionRef::new("aoc-current", "Auction of Champions")),
            raw: json!({ "category_tag": tag }),
            ..RawRecord::default()
        });
    }
    records
}

#[async_trait]
impl SourceAdapter for AuctionOfChampionsAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::AuctionOfChampions.name()
    }

    #[instrument(skip(self), fields(source = "auction_of_champions"))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let mut seen = SeenIds::default();
        let mut records = parse_lots(&self.http.get_text(SEARCH_URL).await?, &mut seen);
        if records.len() < SEARCH_FLOOR {
            for tag in CATEGORY_TAGS {
                if records.len() >= max_items {
                    break;
                }
                let html = self.http.get_text(&format!("{SITE}/auction/{tag}")).await?;
                let fresh = parse_lots(&html, &mut seen);
                debug!(category = tag, fresh = fresh.len(), "Parsed category page");
                records.extend(fresh);
            }
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self
            .http
            .get_text(SEARCH_URL)
            .await
            .map(|html| parse_lots(&html, &mut SeenIds::default()).len());
        HealthCheckResult::from_probe("Auction of Champions", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    #[test]
    fn lots_from_slugs() {
        let html = r#"
            <div class="lot-card">
              <a href="/lot/5521-2023-bowman-chrome-jackson-holliday-psa-10"><img src="https://aoc.cdn/5521.jpg"></a>
              <a href="/lot/5521-2023-bowman-chrome-jackson-holliday-psa-10">view</a>
              <p>Daily Auction</p><p>Bid: $1,210</p><p>Time: 3d 20h 41m</p>
            </div>
            <div class="lot-card"><a href="/lot/99-abc">x</a><p>Bid: $5</p></div>"#;

        let records = parse_lots(html, &mut SeenIds::default());

        assert_eq!(records.len(), 1);
        let lot = &records[0];
        assert_eq!(lot.external_id.as_deref(), Some("5521"));
        assert_eq!(lot.title.as_deref(), Some("2023 bowman chrome jackson holliday psa 10"));
        assert_eq!(lot.current_bid, Some(Decimal::new(1210, 0)));
        assert_eq!(lot.time_left.as_deref(), Some("3d 20h 41m"));
        assert_eq!(lot.sub_category.as_deref(), Some("daily"));
        assert_eq!(lot.image_url.as_deref(), Some("https://aoc.cdn/5521.jpg"));
        assert_eq!(lot.item_url.as_deref(), Some("https://auctionofchampions.com/lot/5521-2023-bowman-chrome-jackson-holliday-psa-10"));
    }
}
