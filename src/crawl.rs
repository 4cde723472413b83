//! Crawl orchestration: categories one after another, pages in order,
//! with jittered pauses in between.

use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::config::{CategoryConfig, CrawlConfig, SiteConfig};
use crate::extractor::extract_category_page;
use crate::types::{CommunityPriceRecord, ScrapedItem};
use crate::upsert::BatchUpserter;

/// Run flags from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlMode {
    /// First category, first page only
    pub test: bool,
    /// Extract and log, never write
    pub dry_run: bool,
    /// Screenshot every page visited
    pub debug: bool,
}

/// Where a category is in its crawl.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryState {
    Pending,
    Scraping { page: u32 },
    Done { pages: u32 },
    Errored { page: u32, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryReport {
    pub name: String,
    pub state: CategoryState,
    pub items: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub total: usize,
    pub saved: usize,
    pub errors: usize,
}

/// `base` scaled by a random factor in `[1 - jitter, 1 + jitter]`.
pub fn jittered(base: Duration, jitter: f64) -> Duration {
    if base.is_zero() || jitter <= 0.0 {
        return base;
    }
    let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
    base.mul_f64(factor)
}

/// Drives one browser page across every configured category. The page is
/// exclusively owned for the whole run and visited strictly sequentially.
pub struct Crawler<P> {
    page: P,
    crawl: CrawlConfig,
    mode: CrawlMode,
    upserter: BatchUpserter,
    reports: Vec<CategoryReport>,
}

impl<P: PageDriver> Crawler<P> {
    pub fn new(page: P, crawl: CrawlConfig, mode: CrawlMode, upserter: BatchUpserter) -> Self {
        Self {
            page,
            crawl,
            mode,
            upserter,
            reports: Vec::new(),
        }
    }

    /// Crawl every category of every site and persist what was found.
    pub async fn run(&mut self, sites: &[SiteConfig]) -> CrawlSummary {
        let mut summary = CrawlSummary::default();
        let mut first = true;

        for site in sites {
            let categories = if self.mode.test {
                &site.categories[..site.categories.len().min(1)]
            } else {
                &site.categories[..]
            };
            self.reports.extend(categories.iter().map(|c| CategoryReport {
                name: c.name.clone(),
                state: CategoryState::Pending,
                items: 0,
            }));

            for category in categories {
                if !first {
                    self.pause(self.crawl.category_delay()).await;
                }
                first = false;

                info!(retailer = %site.retailer, category = %category.name, "scraping category");
                let (state, items) = self.crawl_category(site, category).await;
                if matches!(state, CategoryState::Errored { .. }) {
                    summary.errors += 1;
                }
                summary.total += items.len();
                self.set_report(&category.name, state, items.len());

                for item in &items {
                    self.upserter.push(CommunityPriceRecord::from_scraped(item)).await;
                }
            }

            if self.mode.test {
                break;
            }
        }

        self.upserter.flush().await;
        let totals = self.upserter.totals();
        summary.saved = totals.success;
        summary.errors += totals.errors.len();
        info!(
            total = summary.total,
            saved = summary.saved,
            errors = summary.errors,
            dry_run = self.mode.dry_run,
            "crawl finished"
        );
        summary
    }

    /// Page through one category until a short page, the page cap, or an
    /// error. Items from pages before an error are kept.
    pub async fn crawl_category(
        &mut self,
        site: &SiteConfig,
        category: &CategoryConfig,
    ) -> (CategoryState, Vec<ScrapedItem>) {
        let page_cap = if self.mode.test { 1 } else { self.crawl.max_pages };
        let mut items = Vec::new();
        let mut page_number = 1;

        loop {
            if page_number > 1 {
                self.pause(self.crawl.page_delay()).await;
            }
            self.set_report(
                &category.name,
                CategoryState::Scraping { page: page_number },
                items.len(),
            );

            let result =
                extract_category_page(&mut self.page, site, category, page_number, &self.crawl)
                    .await;
            if self.mode.debug {
                self.capture(site, category, page_number).await;
            }

            match result {
                Ok(page_items) => {
                    let count = page_items.len();
                    info!(
                        category = %category.name,
                        page = page_number,
                        items = count,
                        "page scraped"
                    );
                    items.extend(page_items);
                    if count < self.crawl.full_page_threshold || page_number >= page_cap {
                        return (CategoryState::Done { pages: page_number }, items);
                    }
                    page_number += 1;
                }
                Err(e) => {
                    warn!(
                        category = %category.name,
                        page = page_number,
                        error = %e,
                        "page failed, stopping category"
                    );
                    return (
                        CategoryState::Errored {
                            page: page_number,
                            error: e.to_string(),
                        },
                        items,
                    );
                }
            }
        }
    }

    pub fn reports(&self) -> &[CategoryReport] {
        &self.reports
    }

    /// Hand the page back so the caller can close the browser.
    pub fn into_page(self) -> P {
        self.page
    }

    fn set_report(&mut self, name: &str, state: CategoryState, items: usize) {
        if let Some(report) = self.reports.iter_mut().find(|r| r.name == name) {
            report.state = state;
            report.items = items;
        }
    }

    async fn pause(&self, base: Duration) {
        let delay = jittered(base, self.crawl.jitter);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "waiting");
            sleep(delay).await;
        }
    }

    async fn capture(&mut self, site: &SiteConfig, category: &CategoryConfig, page_number: u32) {
        let path = screenshot_path(&self.crawl.screenshot_dir, site, category, page_number);
        match self.page.screenshot(&path).await {
            Ok(()) => debug!(path = %path.display(), "saved screenshot"),
            Err(e) => warn!(path = %path.display(), error = %e, "screenshot failed"),
        }
    }
}

fn screenshot_path(
    dir: &std::path::Path,
    site: &SiteConfig,
    category: &CategoryConfig,
    page_number: u32,
) -> PathBuf {
    let slug: String = category
        .name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    dir.join(format!("{}-{}-p{}.png", site.retailer, slug, page_number))
}
