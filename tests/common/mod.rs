#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use pricefeed::browser::PageDriver;
use pricefeed::config::{CrawlConfig, SiteConfig, default_sites};
use pricefeed::error::{ScrapeError, StoreError};
use pricefeed::store::{MemoryStore, PriceStore, SearchQuery};
use pricefeed::types::{AggregateMatch, CommunityPriceRecord, ConflictKey, SearchMiss};

/// [`MemoryStore`] that counts every call and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    pub calls: AtomicUsize,
    pub upsert_calls: AtomicUsize,
    pub miss_calls: AtomicUsize,
    pub fail_upsert: AtomicBool,
    pub fail_miss_log: AtomicBool,
    pub stall_miss_log: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn miss_calls(&self) -> usize {
        self.miss_calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceStore for RecordingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.hit();
        Ok(())
    }

    async fn upsert(
        &self,
        records: &[CommunityPriceRecord],
        conflict: ConflictKey,
    ) -> Result<usize, StoreError> {
        self.hit();
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }
        self.inner.upsert(records, conflict).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<AggregateMatch>, StoreError> {
        self.hit();
        self.inner.search(query).await
    }

    async fn average_cost(
        &self,
        name_normalized: &str,
        region: &str,
    ) -> Result<Option<f64>, StoreError> {
        self.hit();
        self.inner.average_cost(name_normalized, region).await
    }

    async fn insert(&self, record: CommunityPriceRecord) -> Result<String, StoreError> {
        self.hit();
        self.inner.insert(record).await
    }

    async fn log_search_miss(&self, miss: &SearchMiss) -> Result<(), StoreError> {
        self.hit();
        self.miss_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_miss_log.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_miss_log.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("miss log offline".to_string()));
        }
        self.inner.log_search_miss(miss).await
    }
}

/// Listing page with `count` product cards whose names and SKUs start at
/// `offset`.
pub fn listing_html(offset: usize, count: usize) -> String {
    let mut body = String::from("<html><body><div class=\"grid\">");
    for i in offset..offset + count {
        body.push_str(&format!(
            r#"<div data-testid="product-pod" data-product-id="{i}">
                 <p data-testid="attribute-brandname-above">Acme</p>
                 <div data-testid="product-header"><a href="/p/{i}"><span class="product-header__title-product">Stud Board {i}</span></a></div>
                 <div class="price-format__main-price"><span>$</span><span>{dollars}</span><span>48</span></div>
               </div>"#,
            dollars = 3 + i % 7,
        ));
    }
    body.push_str("</div></body></html>");
    body
}

/// Browser double serving a category of 24 + 24 + 5 products, paged by
/// the `Nao` offset.
pub struct StubPage {
    pub visited: Vec<String>,
    pub page_sizes: Vec<usize>,
    pub fail_at: Option<usize>,
    pub stall_at: Option<usize>,
    pub screenshots: usize,
    current: Option<String>,
}

impl StubPage {
    pub fn new() -> Self {
        Self {
            visited: Vec::new(),
            page_sizes: vec![24, 24, 5],
            fail_at: None,
            stall_at: None,
            screenshots: 0,
            current: None,
        }
    }

    pub fn failing_at(visit: usize) -> Self {
        Self {
            fail_at: Some(visit),
            ..Self::new()
        }
    }

    /// Navigation on the given visit never finishes on its own.
    pub fn stalling_at(visit: usize) -> Self {
        Self {
            stall_at: Some(visit),
            ..Self::new()
        }
    }

    fn offset(url: &str) -> usize {
        url::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "Nao")
                    .and_then(|(_, v)| v.parse().ok())
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl PageDriver for StubPage {
    async fn navigate(&mut self, url: &str) -> Result<(), ScrapeError> {
        self.visited.push(url.to_string());
        if self.fail_at == Some(self.visited.len()) {
            return Err(ScrapeError::Browser("net::ERR_CONNECTION_RESET".to_string()));
        }
        if self.stall_at == Some(self.visited.len()) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<(), ScrapeError> {
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        let url = self.current.clone().unwrap_or_default();
        let offset = Self::offset(&url);
        let page_index = offset / 24;
        let count = self.page_sizes.get(page_index).copied().unwrap_or(0);
        Ok(listing_html(offset, count))
    }

    async fn screenshot(&mut self, _path: &Path) -> Result<(), ScrapeError> {
        self.screenshots += 1;
        Ok(())
    }
}

/// Crawl settings with every pause switched off.
pub fn fast_crawl() -> CrawlConfig {
    CrawlConfig {
        page_delay_ms: 0,
        category_delay_ms: 0,
        ..CrawlConfig::default()
    }
}

/// The stock Home Depot site narrowed to `categories` categories.
pub fn home_depot(categories: usize) -> SiteConfig {
    let mut site = default_sites().remove(0);
    site.categories.truncate(categories);
    site
}
