//! Pipeline configuration.
//!
//! Every section has a working default, so a config file only needs to
//! mention what it overrides. Store credentials never live here; they come
//! from the environment through the CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{Category, Retailer};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub sites: Vec<SiteConfig>,
    pub search: SearchConfig,
    pub submit: SubmitConfig,
    pub upsert: UpsertConfig,
    pub migrate: MigrateConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        if config.sites.is_empty() {
            config.sites = default_sites();
        }
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults, including the stock retailer site definitions.
    pub fn with_default_sites() -> Self {
        Self {
            sites: default_sites(),
            ..Self::default()
        }
    }

    /// Check every section and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.crawl.max_pages == 0 {
            errors.push("crawl.max_pages must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.crawl.jitter) {
            errors.push("crawl.jitter must be in [0, 1)".to_string());
        }
        if self.crawl.full_page_threshold == 0 {
            errors.push("crawl.full_page_threshold must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            errors.push("search.similarity_threshold must be in [0, 1]".to_string());
        }
        if self.search.medium_confidence_samples > self.search.high_confidence_samples {
            errors.push(
                "search.medium_confidence_samples must not exceed high_confidence_samples"
                    .to_string(),
            );
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            errors.push("search.default_limit must be in 1..=max_limit".to_string());
        }
        if self.submit.outlier_low_multiplier >= self.submit.outlier_high_multiplier {
            errors.push(
                "submit.outlier_low_multiplier must be below outlier_high_multiplier".to_string(),
            );
        }
        if self.upsert.batch_size == 0 {
            errors.push("upsert.batch_size must be positive".to_string());
        }
        if self.migrate.progress_interval == 0 {
            errors.push("migrate.progress_interval must be positive".to_string());
        }
        for site in &self.sites {
            if url::Url::parse(&site.base_url).is_err() {
                errors.push(format!("sites.{}: base_url is not a valid URL", site.retailer));
            }
            if site.page_size == 0 {
                errors.push(format!("sites.{}: page_size must be positive", site.retailer));
            }
            if site.categories.is_empty() {
                errors.push(format!("sites.{}: at least one category is required", site.retailer));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn site(&self, retailer: Retailer) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.retailer == retailer)
    }
}

/// Crawl pacing and browser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// WebDriver endpoint (chromedriver/geckodriver)
    pub webdriver_url: String,
    pub headless: bool,
    /// Base delay between page requests (milliseconds)
    pub page_delay_ms: u64,
    /// Delay between categories (milliseconds)
    pub category_delay_ms: u64,
    /// Fraction of the delay applied as +/- random jitter
    pub jitter: f64,
    /// Hard cap on pages visited per category
    pub max_pages: u32,
    /// A page with fewer items than this is treated as the last one
    pub full_page_threshold: usize,
    pub navigation_timeout_secs: u64,
    pub selector_timeout_secs: u64,
    /// Where `--debug` writes per-page screenshots
    pub screenshot_dir: PathBuf,
}

impl CrawlConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn category_delay(&self) -> Duration {
        Duration::from_millis(self.category_delay_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            page_delay_ms: 3_000,
            category_delay_ms: 8_000,
            jitter: 0.2,
            max_pages: 10,
            full_page_threshold: 20,
            navigation_timeout_secs: 30,
            selector_timeout_secs: 15,
            screenshot_dir: PathBuf::from("debug-screenshots"),
        }
    }
}

/// One retailer: where its listings live and how its product cards look.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub retailer: Retailer,
    pub base_url: String,
    /// Waited on before the DOM is read
    pub grid_selector: String,
    pub card_selector: String,
    /// Tried in order when `card_selector` matches nothing
    #[serde(default)]
    pub fallback_card_selectors: Vec<String>,
    #[serde(default)]
    pub brand_selectors: Vec<String>,
    pub label_selectors: Vec<String>,
    pub dollars_selectors: Vec<String>,
    #[serde(default)]
    pub cents_selectors: Vec<String>,
    #[serde(default)]
    pub unit_selectors: Vec<String>,
    /// Card attributes holding the SKU, in priority order
    pub sku_attributes: Vec<String>,
    pub link_selectors: Vec<String>,
    /// Query parameter carrying the item offset for page N
    pub offset_param: String,
    /// Items the retailer shows per full page
    pub page_size: u32,
    pub categories: Vec<CategoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub path: String,
    pub category: Category,
    #[serde(default)]
    pub subcategory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Candidates below this trigram similarity are dropped
    pub similarity_threshold: f64,
    /// Sample size at or above which confidence is `high`
    pub high_confidence_samples: u32,
    /// Sample size at or above which confidence is `medium`
    pub medium_confidence_samples: u32,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            high_confidence_samples: 10,
            medium_confidence_samples: 3,
            default_limit: 10,
            max_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Costs strictly above `avg * high` are outliers
    pub outlier_high_multiplier: f64,
    /// Costs at or below `avg * low` are outliers
    pub outlier_low_multiplier: f64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            outlier_high_multiplier: 3.0,
            outlier_low_multiplier: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsertConfig {
    pub batch_size: usize,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self { batch_size: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Print progress every N records
    pub progress_interval: usize,
    /// Error reasons kept for the final report
    pub max_reported_errors: usize,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            progress_interval: 100,
            max_reported_errors: 10,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn category(name: &str, path: &str, category: Category, subcategory: &str) -> CategoryConfig {
    CategoryConfig {
        name: name.to_string(),
        path: path.to_string(),
        category,
        subcategory: Some(subcategory.to_string()),
    }
}

/// Stock site definitions.
pub fn default_sites() -> Vec<SiteConfig> {
    vec![SiteConfig {
        retailer: Retailer::HomeDepot,
        base_url: "https://www.homedepot.com".to_string(),
        grid_selector: "[data-testid='product-pod'], .browse-search__pod, [class*='product-pod']"
            .to_string(),
        card_selector: "[data-testid='product-pod']".to_string(),
        fallback_card_selectors: strings(&[
            ".browse-search__pod",
            "[data-component*='ProductPod']",
            "[class*='product-pod']",
        ]),
        brand_selectors: strings(&[
            "[data-testid='attribute-brandname-above']",
            ".product-header__title__brand--bold",
        ]),
        label_selectors: strings(&[
            "[data-testid='product-header'] .product-header__title-product",
            "[data-testid='product-header']",
            ".product-header__title-product",
        ]),
        dollars_selectors: strings(&[
            ".price-format__main-price span:nth-child(2)",
            "[data-testid='price-simple'] span:nth-child(2)",
        ]),
        cents_selectors: strings(&[
            ".price-format__main-price span:nth-child(3)",
            "[data-testid='price-simple'] span:nth-child(3)",
        ]),
        unit_selectors: strings(&[".price-detailed__unit-cover", "[class*='unit-of-measure']"]),
        sku_attributes: strings(&["data-product-id", "data-sku", "data-itemid"]),
        link_selectors: strings(&["[data-testid='product-header'] a", "a[href*='/p/']", "a"]),
        offset_param: "Nao".to_string(),
        page_size: 24,
        categories: vec![
            category(
                "Dimensional Lumber",
                "/b/Lumber-Composites-Dimensional-Lumber/N-5yc1vZc3tb",
                Category::Materials,
                "lumber",
            ),
            category(
                "Drywall",
                "/b/Building-Materials-Drywall/N-5yc1vZaqsa",
                Category::Materials,
                "drywall",
            ),
            category(
                "Interior Paint",
                "/b/Paint-Interior-Paint/N-5yc1vZbohn",
                Category::Materials,
                "paint",
            ),
            category(
                "Electrical Wire",
                "/b/Electrical-Wire/N-5yc1vZbm79",
                Category::Materials,
                "electrical",
            ),
            category(
                "Plumbing Pipe",
                "/b/Plumbing-Pipes-Fittings-Pipe/N-5yc1vZbqew",
                Category::Materials,
                "plumbing",
            ),
            category(
                "Roofing Shingles",
                "/b/Building-Materials-Roofing-Shingles/N-5yc1vZaq7u",
                Category::Materials,
                "roofing",
            ),
            category(
                "Tool Rental",
                "/b/Tool-Rental/N-5yc1vZbrjh",
                Category::Equipment,
                "rental",
            ),
        ],
    }]
}
