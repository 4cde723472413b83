//! Turns raw scraped and imported fields into canonical price records.

use chrono::Utc;
use serde::{Deserialize, Deserializer};
use std::fmt;

use crate::config::CategoryConfig;
use crate::types::{
    Category, CommunityPriceRecord, ContributionSource, NATIONAL_REGION, RawListing, Retailer,
    ScrapedItem, Unit,
};

/// Prices above this are treated as parse garbage rather than real listings.
pub const MAX_SANE_PRICE: f64 = 100_000.0;

/// Why a record was skipped. Skips are bad source data, not system failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Parse a displayed price such as `"$1,234.56"`.
///
/// Everything except digits and `.` is stripped first. Returns `None` for
/// text that doesn't hold a positive price under [`MAX_SANE_PRICE`].
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let price: f64 = cleaned.parse().ok()?;
    if price.is_finite() && price > 0.0 && price <= MAX_SANE_PRICE {
        Some(price)
    } else {
        None
    }
}

/// Map a unit hint like `"$0.62 /ft"` onto a [`Unit`].
///
/// Patterns are checked in order since some overlap; anything unrecognized
/// is `each`.
pub fn normalize_unit(hint: &str) -> Unit {
    const PATTERNS: &[(&[&str], Unit)] = &[
        (&["/ft", "per ft", "linear"], Unit::Foot),
        (&["/sq"], Unit::Sqft),
        (&["/lb"], Unit::Lb),
        (&["/gal"], Unit::Gallon),
        (&["/job", "per job"], Unit::Job),
    ];

    let hint = hint.to_lowercase();
    PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| hint.contains(n)))
        .map(|(_, unit)| *unit)
        .unwrap_or(Unit::Each)
}

/// Join key for an item name. Never shown to users.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Two-letter state code, or the national region for anything else.
pub fn normalize_region(region: &str) -> String {
    let region = region.trim().to_uppercase();
    if region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()) {
        region
    } else {
        NATIONAL_REGION.to_string()
    }
}

/// Best-guess category from free text; defaults to materials.
pub fn guess_category(text: &str) -> Category {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    const FEES: &[&str] = &[
        "fee",
        "fees",
        "permit",
        "permits",
        "disposal",
        "delivery",
        "inspection",
        "labor",
    ];
    const EQUIPMENT: &[&str] = &["rental", "rent", "rentals", "equipment"];

    if has_any(&words, FEES) {
        Category::Fees
    } else if has_any(&words, EQUIPMENT) {
        Category::Equipment
    } else {
        Category::Materials
    }
}

fn has_any(words: &[&str], candidates: &[&str]) -> bool {
    words.iter().any(|w| candidates.iter().any(|c| c == w))
}

/// Normalize one listing card scraped from a category page.
pub fn normalize_listing(
    raw: &RawListing,
    retailer: Retailer,
    category: &CategoryConfig,
) -> Result<ScrapedItem, Rejection> {
    let name = raw.name.trim();
    if name.is_empty() {
        return Err(Rejection::new("missing name"));
    }
    let price = parse_price(&raw.price_text)
        .ok_or_else(|| Rejection::new(format!("invalid price '{}'", raw.price_text)))?;
    let unit = normalize_unit(&raw.unit_hint);

    Ok(ScrapedItem {
        source: retailer,
        source_sku: raw.sku.trim().to_string(),
        name: name.to_string(),
        category: category.category,
        subcategory: category.subcategory.clone(),
        price,
        unit,
        url: raw.url.clone(),
        scraped_at: Utc::now(),
    })
}

/// One row of a catalog export, as found in a bulk import file.
///
/// Identifier fields accept strings or numbers since exports disagree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sku: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub upc: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn catalog_price(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .filter(|p| p.is_finite() && *p > 0.0 && *p <= MAX_SANE_PRICE),
        serde_json::Value::String(s) => parse_price(s),
        _ => None,
    }
}

/// Normalize a catalog import row into a contribution keyed by
/// `(source, source_product_id)`.
pub fn normalize_catalog(record: &CatalogRecord) -> Result<CommunityPriceRecord, Rejection> {
    let identifier = record
        .product_id
        .clone()
        .or_else(|| record.sku.clone())
        .ok_or_else(|| Rejection::new("missing product_id or sku"))?;
    let name = record
        .product_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Rejection::new(format!("{}: missing product_name", identifier)))?;
    let cost = catalog_price(record.price.as_ref())
        .ok_or_else(|| Rejection::new(format!("{}: missing or invalid price", identifier)))?;

    let unit = match record.unit.as_deref() {
        Some(text) => text.parse::<Unit>().unwrap_or_else(|_| normalize_unit(text)),
        None => Unit::Each,
    };
    let category = record
        .category
        .as_deref()
        .and_then(|c| c.parse::<Category>().ok())
        .unwrap_or_else(|| {
            guess_category(&format!("{} {}", record.category.as_deref().unwrap_or(""), name))
        });
    let source = record
        .source
        .as_deref()
        .and_then(|s| s.parse::<ContributionSource>().ok())
        .unwrap_or(ContributionSource::Import);
    let display_name = match record.brand.as_deref().map(str::trim) {
        Some(brand) if !brand.is_empty() && !name.starts_with(brand) => {
            format!("{} {}", brand, name)
        }
        _ => name.to_string(),
    };

    Ok(CommunityPriceRecord {
        id: None,
        name_normalized: normalize_name(&display_name),
        name: display_name,
        category,
        unit,
        cost,
        region: normalize_region(record.region.as_deref().unwrap_or(NATIONAL_REGION)),
        zip_code: None,
        trade: None,
        source,
        source_product_id: Some(identifier),
        upc: record.upc.clone(),
        sku: record.sku.clone(),
        is_outlier: false,
        created_at: Utc::now(),
    })
}
