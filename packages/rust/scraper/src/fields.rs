//! Field extraction from a rendered detail panel.
//!
//! Works on an HTML snapshot of the page. Each field has its own
//! selector-fallback chain and is independently best-effort.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use leadscout_shared::{ListingRecord, RawListing};

/// Selector chain for the official website link (attribute `href`).
const WEBSITE_SELECTORS: &[&str] = &[r#"[data-item-id="authority"]"#, r#"a[data-value="ウェブサイト"]"#];

/// Selector chain for the street address (inner text).
const ADDRESS_SELECTORS: &[&str] = &[
    r#"[data-item-id="address"] .fontBodyMedium"#,
    r#"button[data-item-id="address"]"#,
];

const PHONE_SELECTOR: &str = r#"[data-item-id^="phone"]"#;
const RATING_SELECTOR: &str = r#"[role="img"][aria-label*="つ星"]"#;
const REVIEWS_SELECTOR: &str = r#"[aria-label*="件のクチコミ"]"#;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\d\-]+").unwrap());
static RATING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([\d.]+)").unwrap());
static REVIEWS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([\d,]+)").unwrap());
static WARD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([^\s]+区)").unwrap());
static CITY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([^\s]+市)").unwrap());

/// Raw panel values before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelFields {
    pub url: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub rating: Option<f32>,
    pub review_count: Option<i64>,
}

/// Read every panel field from a page snapshot.
pub fn extract_fields(html: &str) -> PanelFields {
    let doc = Html::parse_document(html);

    PanelFields {
        url: first_attr(&doc, WEBSITE_SELECTORS, "href"),
        address: first_text(&doc, ADDRESS_SELECTORS),
        phone: first_text(&doc, &[PHONE_SELECTOR])
            .and_then(|text| PHONE_RE.find(&text).map(|m| m.as_str().to_string())),
        rating: first_attr(&doc, &[RATING_SELECTOR], "aria-label")
            .and_then(|label| capture(&RATING_RE, &label))
            .and_then(|n| n.parse().ok()),
        review_count: first_attr(&doc, &[REVIEWS_SELECTOR], "aria-label")
            .and_then(|label| capture(&REVIEWS_RE, &label))
            .and_then(|n| n.replace(',', "").parse().ok()),
    }
}

/// Administrative area from an address: ward first, then city, else empty.
pub fn derive_area(address: Option<&str>) -> String {
    let Some(address) = address else {
        return String::new();
    };
    capture(&WARD_RE, address)
        .or_else(|| capture(&CITY_RE, address))
        .unwrap_or_default()
}

/// Build a normalized record for `name` from the panel in `html`.
pub fn build_record(name: &str, html: &str) -> Option<ListingRecord> {
    let fields = extract_fields(html);
    let area = derive_area(fields.address.as_deref());
    ListingRecord::from_raw(RawListing {
        name: name.to_string(),
        url: fields.url,
        address: fields.address,
        phone: fields.phone,
        rating: fields.rating,
        review_count: fields.review_count,
        area: Some(area),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn first_match<'a>(doc: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next()
}

fn first_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|s| {
        first_match(doc, s)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

fn first_attr(doc: &Html, selectors: &[&str], attr: &str) -> Option<String> {
    selectors.iter().find_map(|s| {
        first_match(doc, s)
            .and_then(|el| el.value().attr(attr))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}
