use super::html::{absolute_url, attr, sel, text_of};
use super::{AdapterContext, AdapterKind, HealthCheckResult, HttpFetcher, ItemLocator, SeenIds, SourceAdapter};
use crate::browser::SharedBrowser;
use crate::model::{AuctionRef, ItemStatus, RawRecord};
use crate::normalize::{parse_local_time, parse_price};
use async_trait::async_trait;
use auction_core::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const SITE: &str = "https://sports.ha.com";
const SCRAPER_API: &str = "http://api.scraperapi.com";
const PER_PAGE: usize = 48;

static ITEM_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href*='/a/']"));
static TITLED: Lazy<Selector> = Lazy::new(|| sel("h3, h4, a, span"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img[src*='heritagestatic'], img[data-src*='heritagestatic']"));

static LOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/a/(\d+)-(\d+)").expect("valid lot url regex"));
static CURRENT_BID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Current Bid[:\s]*(\$[\d,]+)").expect("valid current bid regex"));
static ANY_PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$[\d,]+").expect("valid price regex"));
static ESTIMATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:Guide Value|Estimate)[:\s]*(\$[\d,]+)").expect("valid estimate regex"));
static ENDS_AT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Ends?[:\s]+([A-Za-z]{3}\s+\d{1,2},?\s+\d{4}\s+\d{1,2}:\d{2}\s*[AP]M)")
        .expect("valid end time regex")
});
static ENDS_IN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Ends?\s+in\s+(\d+d\s*\d+h)").expect("valid ends in regex"));
static IMAGE_WIDTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"w=\d+").expect("valid width regex"));
static IMAGE_HEIGHT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"h=\d+").expect("valid height regex"));

/// Heritage sports lots. Pages come through ScraperAPI's rendering endpoint
/// when a key is configured, otherwise through the shared browser.
pub struct HeritageAdapter {
    http: HttpFetcher,
    browser: Arc<SharedBrowser>,
    scraperapi_key: Option<String>,
}

impl HeritageAdapter {
    pub fn new(ctx: &AdapterContext) -> Result<Self> {
        Ok(Self {
            http: ctx.fetcher(AdapterKind::Heritage)?,
            browser: Arc::clone(&ctx.browser),
            scraperapi_key: ctx.sources.scraperapi_key.clone().filter(|k| !k.is_empty()),
        })
    }

    async fn page_html(&self, page: usize) -> Result<String> {
        match &self.scraperapi_key {
            Some(key) => {
                let target = search_url(page);
                self.http
                    .send("scraperapi", |client| {
                        client.get(SCRAPER_API).query(&[
                            ("api_key", key.as_str()),
                            ("url", target.as_str()),
                            ("render", "true"),
                            ("country_code", "us"),
                        ])
                    })
                    .await
            }
            None => {
                self.http.limiter().acquire().await;
                self.browser.render(&search_url(page)).await
            }
        }
    }
}

/// Open sports lots, 48 per page, `page` 1-based.
fn search_url(page: usize) -> String {
    format!(
        "{SITE}/c/search/results.zx?si=2&dept=3923&live_state=5318&item_type_sports=3927&mode=live&page={PER_PAGE}~{page}"
    )
}

/// Heritage prints "Dec 28, 2024 10:00 PM"; read as UTC.
fn parse_end(text: &str) -> Option<DateTime<Utc>> {
    let cleaned = text.replace(',', "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    parse_local_time(&cleaned, "%b %d %Y %I:%M %p", 0)
}

fn lot_container(link: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut ancestors = link.ancestors().filter_map(ElementRef::wrap).take(10);
    let marked = ancestors.find(|el| {
        el.value()
            .classes()
            .any(|c| c.contains("promo-item") || c.contains("item-block"))
    });
    marked.or_else(|| {
        link.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| matches!(el.value().name(), "div" | "article" | "li"))
    })
}

fn lot_title(link: ElementRef<'_>, container: ElementRef<'_>) -> Option<String> {
    let link_text = text_of(link);
    if link_text.len() > 25 && !link_text.contains("Bid Now") {
        return Some(link_text);
    }
    container
        .select(&TITLED)
        .filter(|el| {
            el.value()
                .classes()
                .any(|c| c.to_ascii_lowercase().contains("title") || c.to_ascii_lowercase().contains("name"))
        })
        .map(text_of)
        .find(|t| t.len() >= 20 && !t.starts_with("Guide Value"))
}

fn parse_results(html: &str, seen: &mut SeenIds) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    let mut records = Vec::new();
    for link in doc.select(&ITEM_LINK) {
        let Some(href) = attr(link, "href") else { continue };
        if ["auction-home", "browse.zx", "SampleItem", "OtherResults"]
            .iter()
            .any(|skip| href.contains(skip))
        {
            continue;
        }
        let Some(caps) = LOT_RE.captures(&href) else { continue };
        let (auction_id, lot_number) = (caps[1].to_string(), caps[2].to_string());
        let id = format!("{auction_id}-{lot_number}");
        let Some(container) = lot_container(link) else { continue };
        let Some(title) = lot_title(link, container) else { continue };
        if !seen.admit(&id) {
            continue;
        }

        let text = text_of(container);
        let image_url = container
            .select(&IMAGE)
            .find_map(|img| attr(img, "src").or_else(|| attr(img, "data-src")))
            .map(|src| {
                let src = IMAGE_WIDTH_RE.replace(&src, "w=400");
                IMAGE_HEIGHT_RE.replace(&src, "h=600").into_owned()
            });

        records.push(RawRecord {
            external_id: Some(id),
            lot_number: Some(lot_number),
            title: Some(title),
            current_bid: CURRENT_BID_RE
                .captures(&text)
                .and_then(|c| parse_price(&c[1]))
                .or_else(|| ANY_PRICE_RE.find(&text).and_then(|m| parse_price(m.as_str()))),
            starting_bid: ESTIMATE_RE.captures(&text).and_then(|c| parse_price(&c[1])),
            end_time: ENDS_AT_RE.captures(&text).and_then(|c| parse_end(&c[1])),
            time_left: ENDS_IN_RE.captures(&text).map(|c| c[1].to_string()),
            status: Some(ItemStatus::Live),
            item_url: Some(absolute_url(SITE, &href)),
            image_url,
            auction: Some(AuctionRef::new("heritage-sports", "Heritage Auctions - Sports")),
            raw: json!({ "auction_id": auction_id }),
            ..RawRecord::default()
        });
    }
    records
}

#[async_trait]
impl SourceAdapter for HeritageAdapter {
    fn source_name(&self) -> &'static str {
        AdapterKind::Heritage.name()
    }

    #[instrument(skip(self), fields(source = "heritage", via_scraperapi = self.scraperapi_key.is_some()))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let max_pages = max_items / PER_PAGE + 1;
        let mut seen = SeenIds::default();
        let mut records = Vec::new();
        for page in 1..=max_pages {
            let fresh = parse_results(&self.page_html(page).await?, &mut seen);
            debug!(page, fresh = fresh.len(), "Parsed Heritage page");
            if fresh.is_empty() {
                break;
            }
            records.extend(fresh);
            if records.len() >= max_items {
                break;
            }
        }
        info!(items = records.len(), "Fetched Heritage lots");
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self
            .page_html(1)
            .await
            .map(|html| parse_results(&html, &mut SeenIds::default()).len());
        HealthCheckResult::from_probe("Heritage Auctions", probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    const RESULTS: &str = r#"
        <div class="promo-item">
          <a href="/itm/baseball-cards/1952-topps-mickey-mantle-311-psa-vg-ex-4/a/7390-80123.s">
            1952 Topps Mickey Mantle #311 PSA VG-EX 4
          </a>
          <img src="https://images.heritagestatic.com/x.jpg?w=120&h=160">
          <span>Current Bid: $48,000</span>
          <span>Estimate: $60,000</span>
          <span>Ends: Dec 28, 2030 10:00 PM</span>
        </div>
        <div class="item-block">
          <a href="/a/7390-80124.s"><span class="item-title">1986 Fleer Michael Jordan #57 BGS 9</span></a>
          <span>$12,100</span><span>Ends in 3d 4h</span>
        </div>
        <div class="promo-item">
          <a href="/itm/SampleItem/a/7001-1.s">Sold 1933 Goudey Babe Ruth sample result card</a>
        </div>
        <div class="promo-item">
          <a href="/itm/x/a/7390-80123.s">1952 Topps Mickey Mantle #311 PSA VG-EX 4 (repeat)</a>
        </div>"#;

    #[test]
    fn parses_live_lots() {
        let mut seen = SeenIds::default();
        let records = parse_results(RESULTS, &mut seen);

        assert_eq!(records.len(), 2);
        let mantle = &records[0];
        assert_eq!(mantle.external_id.as_deref(), Some("7390-80123"));
        assert_eq!(mantle.current_bid, Some(Decimal::new(48000, 0)));
        assert_eq!(mantle.starting_bid, Some(Decimal::new(60000, 0)));
        assert_eq!(mantle.end_time, Some(Utc.with_ymd_and_hms(2030, 12, 28, 22, 0, 0).unwrap()));
        assert_eq!(
            mantle.image_url.as_deref(),
            Some("https://images.heritagestatic.com/x.jpg?w=400&h=600")
        );

        let jordan = &records[1];
        assert_eq!(jordan.title.as_deref(), Some("1986 Fleer Michael Jordan #57 BGS 9"));
        assert_eq!(jordan.current_bid, Some(Decimal::new(12100, 0)));
        assert_eq!(jordan.time_left.as_deref(), Some("3d 4h"));
        assert_eq!(jordan.end_time, None);

        // A later page repeating known lots yields nothing new.
        assert!(parse_results(RESULTS, &mut seen).is_empty());
    }

    #[test]
    fn search_pages() {
        assert!(search_url(3).ends_with("mode=live&page=48~3"));
    }
}
