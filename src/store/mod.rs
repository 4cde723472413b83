//! Persistent price store.
//!
//! One handle is opened at process start and shared by the upserter, the
//! search service and the submission guard. Every call is a self-contained
//! request; there are no multi-statement transactions.

mod memory;
mod rest;
pub mod trigram;

pub use memory::MemoryStore;
pub use rest::RestStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{AggregateMatch, Category, CommunityPriceRecord, ConflictKey, SearchMiss};

/// Parameters for a fuzzy aggregate lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    pub region: String,
    pub category: Option<Category>,
    /// Minimum trigram similarity a candidate must reach
    pub threshold: f64,
    pub limit: usize,
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Cheap connectivity check, run before any work starts.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Insert or overwrite `records`, de-duplicating on `conflict`.
    /// Returns the number of rows written.
    async fn upsert(
        &self,
        records: &[CommunityPriceRecord],
        conflict: ConflictKey,
    ) -> Result<usize, StoreError>;

    /// Aggregates similar to the query in the region (national aggregates
    /// included), best match first.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<AggregateMatch>, StoreError>;

    /// Mean non-outlier cost for a normalized name in a region.
    async fn average_cost(
        &self,
        name_normalized: &str,
        region: &str,
    ) -> Result<Option<f64>, StoreError>;

    /// Insert one contribution and return its id.
    async fn insert(&self, record: CommunityPriceRecord) -> Result<String, StoreError>;

    async fn log_search_miss(&self, miss: &SearchMiss) -> Result<(), StoreError>;
}
