//! HTML extraction of product candidates from catalog pages.
//!
//! A malformed block never aborts the page: blocks missing required fields
//! are skipped and counted, everything else goes through.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

lazy_static! {
    static ref DATE_YMD_DASH: Regex = Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})").unwrap();
    static ref DATE_YMD_SLASH: Regex = Regex::new(r"(\d{4})/(\d{1,2})/(\d{1,2})").unwrap();
    static ref DATE_YMD_KANJI: Regex =
        Regex::new(r"(\d{4})年\s*(\d{1,2})月\s*(\d{1,2})日").unwrap();
    static ref DATE_MDY_SLASH: Regex = Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})").unwrap();
}

/// A product candidate extracted from one block, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProduct {
    pub source_id: String,
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub images: Vec<String>,
    pub price: Option<i64>,
    pub event_date: Option<String>,
}

/// Result of parsing one page.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub products: Vec<ParsedProduct>,
    /// Blocks dropped for missing required fields.
    pub skipped: usize,
}

pub struct CatalogParser {
    product: Selector,
    title: Selector,
    link: Selector,
    content: Selector,
    image: Selector,
    price: Selector,
    date: Selector,
}

impl CatalogParser {
    pub fn new() -> Self {
        Self {
            product: Selector::parse(".product-item, .card").unwrap(),
            title: Selector::parse(".product-item__title, .card__title, h3").unwrap(),
            link: Selector::parse(r#"a[href*="/products/"]"#).unwrap(),
            content: Selector::parse(".product-item__description, .card__text").unwrap(),
            image: Selector::parse("img").unwrap(),
            price: Selector::parse(".price, .price-item").unwrap(),
            date: Selector::parse(".restock-date, .release-date, .date").unwrap(),
        }
    }

    /// Extract all product candidates from one page. Order-irrelevant;
    /// duplicates within the page collapse to the first occurrence.
    pub fn parse_page(&self, body: &str, page_url: &str) -> ParseOutcome {
        let document = Html::parse_document(body);
        let base = Url::parse(page_url).ok();

        let mut outcome = ParseOutcome::default();
        let mut seen = HashSet::new();

        for block in document.select(&self.product) {
            match self.parse_block(&block, base.as_ref()) {
                Some(product) => {
                    if seen.insert(product.source_id.clone()) {
                        outcome.products.push(product);
                    }
                }
                None => outcome.skipped += 1,
            }
        }

        outcome
    }

    fn parse_block(&self, block: &ElementRef, base: Option<&Url>) -> Option<ParsedProduct> {
        let title = block
            .select(&self.title)
            .next()
            .map(|el| collect_text(&el))
            .filter(|t| !t.is_empty())?;

        let href = block
            .select(&self.link)
            .next()
            .and_then(|el| el.value().attr("href"))?;
        let url = resolve_url(base, href)?;
        let source_id = source_id_for(&url);

        let content = block
            .select(&self.content)
            .next()
            .map(|el| collect_text(&el))
            .filter(|c| !c.is_empty());

        let mut images = Vec::new();
        for img in block.select(&self.image) {
            if let Some(src) = image_source(&img) {
                if let Some(resolved) = resolve_url(base, &src) {
                    if !images.contains(&resolved) {
                        images.push(resolved);
                    }
                }
            }
        }

        let price = block
            .select(&self.price)
            .next()
            .and_then(|el| parse_price(&collect_text(&el)));

        let event_date = block
            .select(&self.date)
            .next()
            .and_then(|el| normalize_event_date(&collect_text(&el)));

        Some(ParsedProduct {
            source_id,
            title,
            content,
            url,
            images,
            price,
            event_date,
        })
    }
}

impl Default for CatalogParser {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Stable product identifier: SHA-256 of the canonical URL.
pub fn source_id_for(canonical_url: &str) -> String {
    let digest = Sha256::digest(canonical_url.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolve an href against the page URL and canonicalize it: protocol-relative
/// links get https, query strings and fragments are stripped so the same
/// product always yields the same URL.
fn resolve_url(base: Option<&Url>, href: &str) -> Option<String> {
    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        base?.join(href).ok()?.to_string()
    };

    let mut url = Url::parse(&absolute).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// First usable image source, handling lazy-load attribute fallbacks.
fn image_source(img: &ElementRef) -> Option<String> {
    let value = img.value();
    if let Some(src) = value
        .attr("data-src")
        .or_else(|| value.attr("src"))
        .or_else(|| value.attr("data-lazy-src"))
    {
        return Some(src.to_string());
    }
    // srcset: "url1 640w, url2 1024w". Take the first candidate URL.
    value
        .attr("srcset")
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.split_whitespace().next())
        .map(|s| s.to_string())
}

/// Integer price from localized currency text ("¥1,980", "1,980円").
/// Non-numeric or absent text is simply no price.
fn parse_price(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Normalize a date found in page text to `YYYY-MM-DD`. Accepts the formats
/// the catalog uses interchangeably; anything unparseable is no date.
pub fn normalize_event_date(text: &str) -> Option<String> {
    let candidates = [
        (&*DATE_YMD_DASH, [1usize, 2, 3]),
        (&*DATE_YMD_SLASH, [1, 2, 3]),
        (&*DATE_YMD_KANJI, [1, 2, 3]),
        (&*DATE_MDY_SLASH, [3, 1, 2]),
    ];

    for (pattern, [y, m, d]) in candidates {
        if let Some(caps) = pattern.captures(text) {
            let year: i32 = caps.get(y)?.as_str().parse().ok()?;
            let month: u32 = caps.get(m)?.as_str().parse().ok()?;
            let day: u32 = caps.get(d)?.as_str().parse().ok()?;
            let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}
