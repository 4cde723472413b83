//! Core records shared by the scraper, the importer and the price services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Region used when a record carries no state code.
pub const NATIONAL_REGION: &str = "US";

/// Retailers the scraper knows how to crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Retailer {
    HomeDepot,
    Lowes,
    Menards,
    Grainger,
}

impl Retailer {
    pub const ALL: [Retailer; 4] = [
        Retailer::HomeDepot,
        Retailer::Lowes,
        Retailer::Menards,
        Retailer::Grainger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Retailer::HomeDepot => "homedepot",
            Retailer::Lowes => "lowes",
            Retailer::Menards => "menards",
            Retailer::Grainger => "grainger",
        }
    }
}

impl fmt::Display for Retailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Retailer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Retailer::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source '{}'", s))
    }
}

/// Pricing category of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Materials,
    Equipment,
    Fees,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Materials, Category::Equipment, Category::Fees];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Materials => "materials",
            Category::Equipment => "equipment",
            Category::Fees => "fees",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "materials" => Ok(Category::Materials),
            "equipment" => Ok(Category::Equipment),
            "fees" => Ok(Category::Fees),
            other => Err(format!(
                "Invalid category '{}'. Must be one of: materials, equipment, fees",
                other
            )),
        }
    }
}

/// Unit a price is quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Each,
    Foot,
    Sqft,
    Gallon,
    Lb,
    Job,
}

impl Unit {
    pub const ALL: [Unit; 6] = [
        Unit::Each,
        Unit::Foot,
        Unit::Sqft,
        Unit::Gallon,
        Unit::Lb,
        Unit::Job,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Each => "each",
            Unit::Foot => "foot",
            Unit::Sqft => "sqft",
            Unit::Gallon => "gallon",
            Unit::Lb => "lb",
            Unit::Job => "job",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Unit::ALL
            .into_iter()
            .find(|u| u.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "Invalid unit '{}'. Must be one of: each, foot, sqft, gallon, lb, job",
                    wanted
                )
            })
    }
}

/// Where a community price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContributionSource {
    Manual,
    PriceTagScan,
    Import,
    Scraper(Retailer),
}

impl ContributionSource {
    pub fn label(&self) -> String {
        match self {
            ContributionSource::Manual => "manual".to_string(),
            ContributionSource::PriceTagScan => "price_tag_scan".to_string(),
            ContributionSource::Import => "import".to_string(),
            ContributionSource::Scraper(retailer) => format!("scraper_{}", retailer),
        }
    }
}

impl fmt::Display for ContributionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for ContributionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual" => Ok(ContributionSource::Manual),
            "price_tag_scan" => Ok(ContributionSource::PriceTagScan),
            "import" => Ok(ContributionSource::Import),
            other => match other.strip_prefix("scraper_") {
                Some(name) => name.parse().map(ContributionSource::Scraper),
                None => Err(format!("unknown contribution source '{}'", other)),
            },
        }
    }
}

impl TryFrom<String> for ContributionSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContributionSource> for String {
    fn from(value: ContributionSource) -> Self {
        value.label()
    }
}

/// One product card as it came off a listing page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawListing {
    pub name: String,
    pub price_text: String,
    pub sku: String,
    pub unit_hint: String,
    pub url: String,
}

/// A normalized retailer listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub source: Retailer,
    pub source_sku: String,
    pub name: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub price: f64,
    pub unit: Unit,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
}

/// A single community price contribution, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityPriceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub name_normalized: String,
    pub category: Category,
    pub unit: Unit,
    pub cost: f64,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade: Option<String>,
    pub source: ContributionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default)]
    pub is_outlier: bool,
    pub created_at: DateTime<Utc>,
}

impl CommunityPriceRecord {
    /// Converts a scraped listing into a national-region contribution.
    pub fn from_scraped(item: &ScrapedItem) -> Self {
        Self {
            id: None,
            name: item.name.clone(),
            name_normalized: crate::normalizer::normalize_name(&item.name),
            category: item.category,
            unit: item.unit,
            cost: item.price,
            region: NATIONAL_REGION.to_string(),
            zip_code: None,
            trade: None,
            source: ContributionSource::Scraper(item.source),
            source_product_id: Some(item.source_sku.clone()).filter(|s| !s.is_empty()),
            upc: None,
            sku: Some(item.source_sku.clone()).filter(|s| !s.is_empty()),
            is_outlier: false,
            created_at: item.scraped_at,
        }
    }
}

/// Columns an upsert de-duplicates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKey {
    /// `(name_normalized, region, category, unit)`, used for scrape data.
    NaturalKey,
    /// `(source, source_product_id)`, used for catalog imports.
    SourceProduct,
}

impl ConflictKey {
    pub fn columns(&self) -> &'static str {
        match self {
            ConflictKey::NaturalKey => "name_normalized,region,category,unit",
            ConflictKey::SourceProduct => "source,source_product_id",
        }
    }
}

/// How much to trust an aggregate, derived from its sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Aggregated statistics for one `(name_normalized, region, category, unit)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAggregate {
    pub name: String,
    pub name_normalized: String,
    pub region: String,
    pub category: Category,
    pub unit: Unit,
    pub avg_cost: f64,
    pub min_cost: f64,
    pub max_cost: f64,
    pub sample_size: u32,
    pub last_updated: DateTime<Utc>,
}

/// An aggregate that cleared the similarity threshold for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMatch {
    #[serde(flatten)]
    pub aggregate: PriceAggregate,
    pub similarity: f64,
}

/// A query that found nothing, kept for catalog-gap analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMiss {
    pub query: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contribution_source_labels_round_trip_through_strings() {
        let source = ContributionSource::Scraper(Retailer::HomeDepot);
        assert_eq!(source.label(), "scraper_homedepot");
        assert_eq!("scraper_lowes".parse(), Ok(ContributionSource::Scraper(Retailer::Lowes)));
        assert_eq!("price_tag_scan".parse(), Ok(ContributionSource::PriceTagScan));
        assert!("scraper_acme".parse::<ContributionSource>().is_err());
    }

    #[test]
    fn category_and_unit_reject_unknown_values() {
        assert_eq!(" Materials ".parse(), Ok(Category::Materials));
        assert!("tools".parse::<Category>().is_err());
        assert_eq!("SQFT".parse(), Ok(Unit::Sqft));
        assert!("meter".parse::<Unit>().is_err());
    }

    #[test]
    fn confidence_orders_by_trust() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn record_serializes_source_as_label() {
        let record = CommunityPriceRecord {
            id: None,
            name: "2x4 Stud".into(),
            name_normalized: "2x4 stud".into(),
            category: Category::Materials,
            unit: Unit::Each,
            cost: 3.98,
            region: "US".into(),
            zip_code: None,
            trade: None,
            source: ContributionSource::Scraper(Retailer::Menards),
            source_product_id: None,
            upc: None,
            sku: None,
            is_outlier: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["source"], "scraper_menards");
        assert_eq!(json["category"], "materials");
        assert!(json.get("zip_code").is_none());
    }
}
