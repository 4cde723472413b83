//! Fuzzy lookup of community price aggregates.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::normalizer::{normalize_name, normalize_region};
use crate::store::{PriceStore, SearchQuery};
use crate::types::{AggregateMatch, Category, Confidence, SearchMiss, Unit};

/// Most terms a single pricing-hint lookup fans out to.
pub const MAX_HINT_TERMS: usize = 6;

/// Longest a search waits on the miss log before answering anyway.
pub const MISS_LOG_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Which surface asked, recorded on search misses
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub name: String,
    pub category: Category,
    pub unit: Unit,
    pub avg_cost: f64,
    pub min_cost: f64,
    pub max_cost: f64,
    pub sample_size: u32,
    pub similarity: f64,
    pub confidence: Confidence,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub region: String,
    pub has_match: bool,
    pub results: Vec<SearchResult>,
    pub suggestion: Option<String>,
}

/// Best community price for one term of a job description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingHint {
    pub term: String,
    pub best: Option<SearchResult>,
}

pub struct PriceSearchService {
    store: Arc<dyn PriceStore>,
    config: SearchConfig,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl PriceSearchService {
    pub fn new(store: Arc<dyn PriceStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// Confidence band for a sample size. Monotonic in `sample_size`.
    pub fn confidence(&self, sample_size: u32) -> Confidence {
        if sample_size >= self.config.high_confidence_samples {
            Confidence::High
        } else if sample_size >= self.config.medium_confidence_samples {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    fn to_result(&self, found: AggregateMatch) -> SearchResult {
        let aggregate = found.aggregate;
        SearchResult {
            name: aggregate.name,
            category: aggregate.category,
            unit: aggregate.unit,
            avg_cost: round_to(aggregate.avg_cost, 2),
            min_cost: round_to(aggregate.min_cost, 2),
            max_cost: round_to(aggregate.max_cost, 2),
            sample_size: aggregate.sample_size,
            similarity: round_to(found.similarity, 2),
            confidence: self.confidence(aggregate.sample_size),
            last_updated: aggregate.last_updated,
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::MissingField("query"));
        }
        let category = request
            .category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(str::parse::<Category>)
            .transpose()
            .map_err(SearchError::InvalidCategory)?;
        let region = normalize_region(&request.region);
        let limit = request
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);

        let matches = self
            .store
            .search(&SearchQuery {
                query: normalize_name(query),
                region: region.clone(),
                category,
                threshold: self.config.similarity_threshold,
                limit,
            })
            .await?;
        debug!(query, region = %region, matches = matches.len(), "price search");

        if matches.is_empty() {
            let miss = SearchMiss {
                query: query.to_string(),
                region: region.clone(),
                category,
                source: request.source.clone().unwrap_or_else(|| "search".to_string()),
                user_id: request.user_id.clone(),
            };
            info!(query, region = %region, "search miss");
            let logged = tokio::time::timeout(MISS_LOG_TIMEOUT, self.store.log_search_miss(&miss));
            match logged.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(query, error = %e, "failed to record search miss"),
                Err(_) => warn!(query, "search miss log timed out"),
            }
            return Ok(SearchResponse {
                query: query.to_string(),
                suggestion: Some(format!(
                    "No community prices yet for \"{}\" in {}. Add one to help other contractors.",
                    query, region
                )),
                region,
                has_match: false,
                results: Vec::new(),
            });
        }

        Ok(SearchResponse {
            query: query.to_string(),
            region,
            has_match: true,
            results: matches.into_iter().map(|m| self.to_result(m)).collect(),
            suggestion: None,
        })
    }

    /// Look up the best community price for each term concurrently.
    ///
    /// Terms are de-duplicated and capped at [`MAX_HINT_TERMS`]; hints come
    /// back in term order. A failed lookup yields a hint with no match.
    pub async fn pricing_hints(&self, terms: &[String], region: &str) -> Vec<PricingHint> {
        let mut unique: Vec<&str> = Vec::new();
        for term in terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if !unique.iter().any(|u| u.eq_ignore_ascii_case(term)) {
                unique.push(term);
            }
        }
        unique.truncate(MAX_HINT_TERMS);

        let lookups = unique.iter().map(|term| {
            let request = SearchRequest {
                query: term.to_string(),
                region: region.to_string(),
                limit: Some(1),
                source: Some("quote_builder".to_string()),
                ..Default::default()
            };
            async move {
                let best = match self.search(&request).await {
                    Ok(response) => response.results.into_iter().next(),
                    Err(e) => {
                        warn!(term = %request.query, error = %e, "pricing hint lookup failed");
                        None
                    }
                };
                PricingHint {
                    term: request.query,
                    best,
                }
            }
        });
        join_all(lookups).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> PriceSearchService {
        PriceSearchService::new(Arc::new(MemoryStore::new()), SearchConfig::default())
    }

    #[test]
    fn confidence_bands_are_monotonic() {
        let service = service();
        assert_eq!(service.confidence(0), Confidence::Low);
        assert_eq!(service.confidence(2), Confidence::Low);
        assert_eq!(service.confidence(3), Confidence::Medium);
        assert_eq!(service.confidence(9), Confidence::Medium);
        assert_eq!(service.confidence(10), Confidence::High);
        let bands: Vec<Confidence> = (0..50).map(|n| service.confidence(n)).collect();
        assert!(bands.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn rounds_to_places() {
        assert_eq!(round_to(0.456_789, 2), 0.46);
        assert_eq!(round_to(12.344, 2), 12.34);
    }

    #[tokio::test]
    async fn rejects_empty_query_and_unknown_category() {
        let service = service();
        let empty = SearchRequest {
            query: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(
            service.search(&empty).await,
            Err(SearchError::MissingField("query"))
        ));

        let bad_category = SearchRequest {
            query: "drywall".into(),
            category: Some("tools".into()),
            ..Default::default()
        };
        assert!(matches!(
            service.search(&bad_category).await,
            Err(SearchError::InvalidCategory(_))
        ));
    }
}
