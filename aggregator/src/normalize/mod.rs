//! Extraction rules shared by every adapter. Adapters only pull raw fields
//! out of their markup or payloads; grading, sport, item type, prices and
//! end times are decided here.

mod item_type;
mod sport;

pub use item_type::detect_item_type;
pub use sport::detect_sport;

use crate::model::{CanonicalItem, ItemStatus, RawRecord};
use auction_core::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

static GRADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(PSA|BGS|Beckett|SGC|CGC|BCCG)\s+(?:[A-Za-z][\w\-\+]*\s+){0,2}(\d+(?:\.\d+)?)\b",
    )
    .expect("valid grading regex")
});

static PSA_CERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"psacard\.com/cert/(\d+)").expect("valid psa cert regex"));

static BECKETT_CERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"beckett\.com/.*cert[=/](\d+)").expect("valid beckett cert regex"));

static TITLE_CERT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#\s*(\d{7,10})\b").expect("valid cert regex"));

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-)?\$?\s*(\d[\d,]*(?:\.\d+)?)").expect("valid price regex"));

static DURATION_PART_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d+)\s*(days?|d|hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)\b",
    )
    .expect("valid duration regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grading {
    pub company: String,
    pub grade: String,
}

/// First grader + numeric grade in the text, with company synonyms folded.
pub fn extract_grading(text: &str) -> Option<Grading> {
    let caps = GRADING_RE.captures(text)?;
    let company = canonical_grader(&caps[1]);
    Some(Grading {
        company,
        grade: caps[2].to_string(),
    })
}

pub fn canonical_grader(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    match upper.as_str() {
        "BGS" | "BECKETT" | "BCCG" => "Beckett".to_string(),
        _ => upper,
    }
}

/// Cert number from a PSA/Beckett verification URL, falling back to a
/// `#`-prefixed 7 to 10 digit number in free text.
pub fn extract_cert_number(cert_url: Option<&str>, text: &str) -> Option<String> {
    if let Some(url) = cert_url {
        if let Some(caps) = PSA_CERT_RE.captures(url) {
            return Some(caps[1].to_string());
        }
        if let Some(caps) = BECKETT_CERT_RE.captures(url) {
            return Some(caps[1].to_string());
        }
    }
    TITLE_CERT_RE.captures(text).map(|caps| caps[1].to_string())
}

/// `$1,234.56`, `USD 1,234`, `1234.5` -> amount. Only the first number in
/// the text counts. Anything else is unknown, never zero.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let caps = PRICE_RE.captures(text)?;
    let digits = caps[2].replace(',', "");
    let amount = Decimal::from_str(&digits).ok()?;
    Some(if caps.get(1).is_some() { -amount } else { amount })
}

pub fn price_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::from_str(&f.to_string()).ok())),
        serde_json::Value::String(s) => parse_price(s),
        _ => None,
    }
}

pub fn price_from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// "3d 20h 41m", "2 days 5 hours", "45 min". Zero, unrecognized or out of
/// range -> None.
pub fn parse_relative_duration(text: &str) -> Option<Duration> {
    let mut total = Duration::zero();
    for caps in DURATION_PART_RE.captures_iter(text) {
        let amount: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_ascii_lowercase();
        let part = match unit.chars().next() {
            Some('d') => Duration::try_days(amount)?,
            Some('h') => Duration::try_hours(amount)?,
            Some('m') => Duration::try_minutes(amount)?,
            Some('s') => Duration::try_seconds(amount)?,
            _ => continue,
        };
        total = total.checked_add(&part)?;
    }
    (total > Duration::zero()).then_some(total)
}

/// Resolves a relative remaining time against `now`. Two calls seconds apart
/// yield end times seconds apart.
pub fn resolve_time_left(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    parse_relative_duration(text).and_then(|d| now.checked_add_signed(d))
}

pub fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Naive local timestamp in a fixed UTC offset (CardHobby reports UTC+8).
pub fn parse_local_time(text: &str, format: &str, utc_offset_hours: i32) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), format).ok()?;
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps a source's own status vocabulary onto Live/Ended. Unknown words map
/// to `None` so the stored status is left alone.
pub fn parse_status(text: &str) -> Option<ItemStatus> {
    match text.trim().to_ascii_lowercase().as_str() {
        "live" | "active" | "open" | "opened" | "running" | "bidding" | "upcoming" => {
            Some(ItemStatus::Live)
        }
        "ended" | "closed" | "sold" | "complete" | "completed" | "finished" | "unsold" => {
            Some(ItemStatus::Ended)
        }
        _ => None,
    }
}

/// Maps one adapter record to the canonical shape. Fails with `Parse` when
/// the record has no external id or title.
pub fn normalize_record(
    source_name: &str,
    raw: RawRecord,
    now: DateTime<Utc>,
) -> Result<CanonicalItem> {
    let external_id = raw
        .external_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::parse(source_name, "record has no external id"))?;
    let title = raw
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::parse(source_name, format!("record {external_id} has no title")))?;

    let mut grading_company = raw
        .grading_company
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .map(canonical_grader);
    let mut grade = raw.grade.filter(|g| !g.trim().is_empty());
    if grading_company.is_none() {
        if let Some(found) = extract_grading(&title) {
            grading_company = Some(found.company);
            grade = grade.or(Some(found.grade));
        }
    }

    let cert_number = raw
        .cert_number
        .filter(|c| !c.trim().is_empty())
        .or_else(|| extract_cert_number(raw.cert_url.as_deref(), &title));

    let sport = detect_sport(&title, raw.description.as_deref(), raw.category.as_deref());
    let item_type = detect_item_type(
        &title,
        raw.description.as_deref(),
        raw.category.as_deref(),
        grading_company.as_deref(),
    );

    let end_time = raw.end_time.or_else(|| {
        raw.time_left
            .as_deref()
            .and_then(|t| resolve_time_left(t, now))
    });

    let mut image_urls = raw.image_urls;
    let image_url = raw.image_url.or_else(|| image_urls.first().cloned());
    if image_urls.is_empty() {
        if let Some(url) = &image_url {
            image_urls.push(url.clone());
        }
    }

    Ok(CanonicalItem {
        source_name: source_name.to_string(),
        external_id,
        auction: raw.auction,
        lot_number: raw.lot_number,
        title,
        description: raw.description,
        category: raw.category,
        sub_category: raw.sub_category,
        sport,
        item_type,
        grading_company,
        grade,
        cert_number,
        current_bid: raw.current_bid,
        starting_bid: raw.starting_bid,
        reserve_price: raw.reserve_price,
        buy_now_price: raw.buy_now_price,
        bid_count: raw.bid_count.unwrap_or(0).max(0),
        end_time,
        status: raw.status,
        item_url: raw.item_url,
        image_url,
        image_urls,
        raw_data: raw.raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemType, Sport};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn dec(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    #[test]
    fn grading_examples() {
        assert_eq!(
            extract_grading("2020 Panini Prizm Justin Jefferson PSA 10"),
            Some(Grading {
                company: "PSA".into(),
                grade: "10".into()
            })
        );
        assert_eq!(
            extract_grading("BGS 9.5 Rookie"),
            Some(Grading {
                company: "Beckett".into(),
                grade: "9.5".into()
            })
        );
        assert_eq!(
            extract_grading("1986 Fleer Michael Jordan PSA GEM MT 10"),
            Some(Grading {
                company: "PSA".into(),
                grade: "10".into()
            })
        );
        assert_eq!(extract_grading("2023 Topps Chrome Raw Lot"), None);
    }

    #[test]
    fn cert_numbers_from_urls_and_titles() {
        assert_eq!(
            extract_cert_number(Some("https://www.psacard.com/cert/81234567"), ""),
            Some("81234567".into())
        );
        assert_eq!(
            extract_cert_number(
                Some("https://www.beckett.com/grading/card-lookup?cert=0012345678"),
                ""
            ),
            Some("0012345678".into())
        );
        assert_eq!(
            extract_cert_number(None, "Shohei Ohtani PSA 10 #72345678"),
            Some("72345678".into())
        );
        assert_eq!(extract_cert_number(None, "Card #23 of 99"), None);
    }

    #[test]
    fn prices_are_unknown_rather_than_zero() {
        assert_eq!(parse_price("$1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_price("USD 1,234"), Some(dec("1234")));
        assert_eq!(parse_price("Current Bid: $85"), Some(dec("85")));
        assert_eq!(parse_price("N/A"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("Est. $100"), Some(dec("100")));
        assert_eq!(parse_price("$1,200 (3 bids)"), Some(dec("1200")));
        assert_eq!(price_from_cents(125050), dec("1250.50"));
        assert_eq!(price_from_json(&serde_json::json!(42.5)), Some(dec("42.5")));
        assert_eq!(price_from_json(&serde_json::json!("$7")), Some(dec("7")));
        assert_eq!(price_from_json(&serde_json::Value::Null), None);
    }

    #[test]
    fn status_vocabulary() {
        assert_eq!(parse_status("Active"), Some(ItemStatus::Live));
        assert_eq!(parse_status(" closed "), Some(ItemStatus::Ended));
        assert_eq!(parse_status("preview"), None);
    }

    #[test]
    fn relative_durations() {
        assert_eq!(
            parse_relative_duration("3d 20h 41m"),
            Some(Duration::days(3) + Duration::hours(20) + Duration::minutes(41))
        );
        assert_eq!(
            parse_relative_duration("2 days 5 hours"),
            Some(Duration::days(2) + Duration::hours(5))
        );
        assert_eq!(parse_relative_duration("45 min"), Some(Duration::minutes(45)));
        assert_eq!(parse_relative_duration("0d 0h 0m"), None);
        assert_eq!(parse_relative_duration("Closed"), None);
    }

    #[test]
    fn oversized_durations_are_unknown() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_relative_duration("99999999999999d"), None);
        assert_eq!(parse_relative_duration("99999999999999999999d"), None);
        assert!(parse_relative_duration("100000000d").is_some());
        assert_eq!(resolve_time_left("100000000d", now), None);

        let raw = RawRecord {
            external_id: Some("7".into()),
            title: Some("Wax box".into()),
            time_left: Some("100000000d".into()),
            ..RawRecord::default()
        };
        let item = normalize_record("goldin", raw, now).unwrap();
        assert_eq!(item.end_time, None);
    }

    #[test]
    fn cardhobby_local_time_is_utc_plus_eight() {
        let parsed = parse_local_time("2024-05-01 20:00:00", "%Y-%m-%d %H:%M:%S", 8).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn normalize_fills_derived_fields() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let raw = RawRecord {
            external_id: Some(" 991 ".into()),
            title: Some("2020  Panini Prizm Justin Jefferson  PSA 10".into()),
            time_left: Some("1d 2h".into()),
            image_url: Some("https://img/1.jpg".into()),
            ..RawRecord::default()
        };

        let item = normalize_record("goldin", raw, now).unwrap();

        assert_eq!(item.external_id, "991");
        assert_eq!(item.title, "2020 Panini Prizm Justin Jefferson PSA 10");
        assert_eq!(item.grading_company.as_deref(), Some("PSA"));
        assert_eq!(item.grade.as_deref(), Some("10"));
        assert_eq!(item.sport, Sport::Football);
        assert_eq!(item.item_type, ItemType::Card);
        assert_eq!(item.end_time, Some(now + Duration::hours(26)));
        assert_eq!(item.image_urls, vec!["https://img/1.jpg".to_string()]);
        assert_eq!(item.status, None);
        assert_eq!(item.current_bid, None);
    }

    #[test]
    fn records_without_identity_are_parse_errors() {
        let now = Utc::now();
        let missing_id = RawRecord {
            title: Some("Something".into()),
            ..RawRecord::default()
        };
        let missing_title = RawRecord {
            external_id: Some("1".into()),
            title: Some("   ".into()),
            ..RawRecord::default()
        };

        assert!(matches!(
            normalize_record("rea", missing_id, now),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            normalize_record("rea", missing_title, now),
            Err(Error::Parse { .. })
        ));
    }

    proptest! {
        #[test]
        fn formatted_prices_parse_back(cents in 0i64..1_000_000_000) {
            let amount = Decimal::new(cents, 2);
            let whole = amount.trunc().to_string();
            let mut grouped = String::new();
            for (i, ch) in whole.chars().enumerate() {
                if i > 0 && (whole.len() - i) % 3 == 0 {
                    grouped.push(',');
                }
                grouped.push(ch);
            }
            let text = format!("${}.{:02}", grouped, cents % 100);
            prop_assert_eq!(parse_price(&text), Some(amount));
        }

        #[test]
        fn relative_time_is_additive(d in 0i64..30, h in 0i64..24, m in 0i64..60) {
            let text = format!("{d}d {h}h {m}m");
            let expected = Duration::days(d) + Duration::hours(h) + Duration::minutes(m);
            let parsed = parse_relative_duration(&text);
            if expected == Duration::zero() {
                prop_assert_eq!(parsed, None);
            } else {
                prop_assert_eq!(parsed, Some(expected));
            }
        }
    }
}
