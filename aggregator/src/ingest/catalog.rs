//! Sites running the same hosted `catalog.aspx` auction platform. One parser,
//! parameterized by site.

use super::html::{absolute_url, attr, first_text, sel, text_of};
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
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSite {
    pub kind: AdapterKind,
    pub base_url: &'static str,
    pub catalog_path: &'static str,
    pub auction_id: &'static str,
    pub auction_title: &'static str,
}

pub const DETROIT_CITY: CatalogSite = CatalogSite {
    kind: AdapterKind::DetroitCity,
    base_url: "https://auctions.detroitcitysports.com",
    catalog_path: "/catalog.aspx",
    auction_id: "detroitcity-current",
    auction_title: "Detroit City Sports",
};

pub const MILE_HIGH: CatalogSite = CatalogSite {
    kind: AdapterKind::MileHigh,
    base_url: "https://www.milehighcardco.com",
    catalog_path: "/Catalog.aspx",
    auction_id: "milehigh-current",
    auction_title: "Mile High Card Company",
};

pub const SIRIUS: CatalogSite = CatalogSite {
    kind: AdapterKind::Sirius,
    base_url: "https://siriussportsauctions.com",
    catalog_path: "/catalog.aspx",
    auction_id: "sirius-current",
    auction_title: "Sirius Sports Auctions",
};

impl CatalogSite {
    fn page_url(&self, page: usize) -> String {
        let catalog = format!("{}{}", self.base_url, self.catalog_path);
        if page == 1 {
            catalog
        } else {
            format!("{catalog}?page={page}")
        }
    }
}

static LOT: Lazy<Selector> = Lazy::new(|| sel("div.lot"));
static LOT_NUMBER: Lazy<Selector> = Lazy::new(|| sel("#LotNumber, .lotNumber, .lot-number"));
static LOT_NAME_LINK: Lazy<Selector> = Lazy::new(|| sel("#LotName a, .lotName a"));
static ANY_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static IMAGE: Lazy<Selector> = Lazy::new(|| sel("img.lotImage, img"));
static LOT_DATA: Lazy<Selector> = Lazy::new(|| sel("div.lotData"));
static PAGE_LINK: Lazy<Selector> = Lazy::new(|| sel("a[href*='page=']"));

static LOT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)LOT(\d+)\.aspx|[?&]id=(\d+)|lot[_-]?(\d+)").expect("valid lot id regex"));
static BIDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)#?\s?Bids:\s*(\d+)").expect("valid bids regex"));
static MIN_BID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:Min|Starting|Open(?:ing)?)\s*(?:Bid)?:\s*(\$?[\d,]+)").expect("valid min bid regex"));
static CURRENT_BID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:Current|High)\s*(?:Bid)?:\s*(\$?[\d,]+)").expect("valid current bid regex"));
static FINAL_PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:Final Price|Sold For|Won For):\s*\$?[\d,]+").expect("valid final price regex"));

/// External id from the lot URL, falling back to the digits of the lot number.
fn lot_id(url: Option<&str>, lot_number: Option<&str>) -> Option<String> {
    url.and_then(|u| LOT_ID_RE.captures(u))
        .and_then(|c| c.iter().skip(1).flatten().next().map(|m| m.as_str().to_string()))
        .or_else(|| {
            let digits: String = lot_number?.chars().filter(char::is_ascii_digit).collect();
            (!digits.is_empty()).then_some(digits)
        })
}

fn parse_catalog(site: &CatalogSite, html: &str) -> (Vec<RawRecord>, usize) {
    let doc = Html::parse_document(html);
    let records = doc
        .select(&LOT)
        .filter_map(|lot| {
            let link = lot
                .select(&LOT_NAME_LINK)
                .next()
                .or_else(|| lot.select(&ANY_LINK).next())?;
            let title = text_of(link);
            if title.len() < 5 {
                return None;
            }
            let item_url = attr(link, "href").map(|h| absolute_url(&format!("{}/", site.base_url), &h));
            let lot_number = first_text(lot, &LOT_NUMBER);
            let external_id = lot_id(item_url.as_deref(), lot_number.as_deref())?;

            let data = lot.select(&LOT_DATA).next().map(text_of).unwrap_or_else(|| text_of(lot));
            if FINAL_PRICE_RE.is_match(&data) {
                debug!(external_id, "Skipping closed lot");
                return None;
            }
            let amount = |re: &Regex| re.captures(&data).and_then(|c| parse_price(&c[1]));
            let min_bid = amount(&MIN_BID_RE);

            Some(RawRecord {
                external_id: Some(external_id),
                lot_number: lot_number.clone(),
                title: Some(title),
                current_bid: amount(&CURRENT_BID_RE).or(min_bid),
                starting_bid: min_bid,
                bid_count: BIDS_RE.captures(&data).and_then(|c| c[1].parse().ok()),
                status: Some(ItemStatus::Live),
                item_url,
                image_url: lot
                    .select(&IMAGE)
                    .find_map(|img| attr(img, "src"))
                    .map(|src| absolute_url(&format!("{}/", site.base_url), &src)),
                auction: Some(AuctionRef::new(site.auction_id, site.auction_title)),
                raw: json!({ "lot_number": lot_number }),
                ..RawRecord::default()
            })
        })
        .collect();
    (records, max_linked_page(&doc, &PAGE_LINK))
}

pub struct CatalogAdapter {
    site: CatalogSite,
    browser: Arc<SharedBrowser>,
}

impl CatalogAdapter {
    pub fn new(ctx: &AdapterContext, site: CatalogSite) -> Result<Self> {
        Ok(Self {
            site,
            browser: Arc::clone(&ctx.browser),
        })
    }
}

#[async_trait]
impl SourceAdapter for CatalogAdapter {
    fn source_name(&self) -> &'static str {
        self.site.kind.name()
    }

    #[instrument(skip(self), fields(source = self.site.kind.name()))]
    async fn fetch_listings(&self, max_items: usize) -> Result<Vec<RawRecord>> {
        let (mut records, pages) = parse_catalog(&self.site, &self.browser.render(&self.site.page_url(1)).await?);
        info!(pages, "Catalog pages");
        for page in 2..=pages {
            if records.len() >= max_items {
                break;
            }
            let html = self.browser.render(&self.site.page_url(page)).await?;
            records.extend(parse_catalog(&self.site, &html).0);
        }
        records.truncate(max_items);
        Ok(records)
    }

    async fn fetch_item_detail(&self, _item: &ItemLocator) -> Result<Option<RawRecord>> {
        Ok(None)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let probe = self
            .browser
            .render(&self.site.page_url(1))
            .await
            .map(|html| parse_catalog(&self.site, &html).0.len());
        HealthCheckResult::from_probe(self.site.kind.display_name(), probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    const CATALOG: &str = r#"
        <div class="lot">
          <span id="LotNumber">Lot #104</span>
          <span id="LotName"><a href="1952-Topps-Jackie-Robinson-LOT55123.aspx">1952 Topps Jackie Robinson SGC 4</a></span>
          <img class="lotImage" src="/images/55123.jpg">
          <div class="lotData"><span># Bids: 9</span><span>Min Bid: $500</span><span>Current Bid: $1,450</span></div>
        </div>
        <div class="lot">
          <span id="LotNumber">Lot #105</span>
          <span id="LotName"><a href="Another-LOT55124.aspx">1955 Topps Roberto Clemente</a></span>
          <div class="lotData"><span>Min Bid: $250</span></div>
        </div>
        <div class="lot">
          <span id="LotName"><a href="Closed-LOT55000.aspx">1909 T206 Cobb</a></span>
          <div class="lotData"><span>Final Price: $9,000</span></div>
        </div>
        <div class="lot"><span id="LotName"><a href="x.aspx">abc</a></span></div>
        <a href="catalog.aspx?page=2">2</a><a href="catalog.aspx?page=12">12</a>"#;

    #[test]
    fn parses_open_lots() {
        let (records, pages) = parse_catalog(&DETROIT_CITY, CATALOG);

        assert_eq!(pages, 12);
        assert_eq!(records.len(), 2);

        let robinson = &records[0];
        assert_eq!(robinson.external_id.as_deref(), Some("55123"));
        assert_eq!(robinson.lot_number.as_deref(), Some("Lot #104"));
        assert_eq!(robinson.bid_count, Some(9));
        assert_eq!(robinson.starting_bid, Some(Decimal::new(500, 0)));
        assert_eq!(robinson.current_bid, Some(Decimal::new(1450, 0)));
        assert_eq!(
            robinson.item_url.as_deref(),
            Some("https://auctions.detroitcitysports.com/1952-Topps-Jackie-Robinson-LOT55123.aspx")
        );
        assert_eq!(
            robinson.image_url.as_deref(),
            Some("https://auctions.detroitcitysports.com/images/55123.jpg")
        );

        // No current bid yet: the minimum stands in.
        assert_eq!(records[1].current_bid, Some(Decimal::new(250, 0)));
        assert_eq!(records[1].auction.as_ref().map(|a| a.external_id.as_str()), Some("detroitcity-current"));
    }

    #[test]
    fn lot_id_fallbacks() {
        assert_eq!(lot_id(Some("https://x/lot.aspx?id=77"), None), Some("77".into()));
        assert_eq!(lot_id(Some("https://x/item"), Some("Lot 31A")), Some("31".into()));
        assert_eq!(lot_id(None, None), None);
    }

    #[test]
    fn page_urls_per_site() {
        assert_eq!(MILE_HIGH.page_url(1), "https://www.milehighcardco.com/Catalog.aspx");
        assert_eq!(SIRIUS.page_url(3), "https://siriussportsauctions.com/catalog.aspx?page=3");
    }
}
