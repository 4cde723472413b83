use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::trigram::similarity;
use super::{PriceStore, SearchQuery};
use crate::error::StoreError;
use crate::types::{
    AggregateMatch, Category, CommunityPriceRecord, ConflictKey, NATIONAL_REGION, PriceAggregate,
    SearchMiss, Unit,
};

#[derive(Default)]
struct Inner {
    records: Vec<CommunityPriceRecord>,
    misses: Vec<SearchMiss>,
    next_id: u64,
}

/// In-process [`PriceStore`] with the same upsert and search semantics as
/// the hosted backend. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

type AggregateKey = (String, String, Category, Unit);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn records(&self) -> Vec<CommunityPriceRecord> {
        self.lock().records.clone()
    }

    pub fn search_misses(&self) -> Vec<SearchMiss> {
        self.lock().misses.clone()
    }

    /// Roll non-outlier records up per `(name_normalized, region, category, unit)`.
    pub fn aggregates(&self) -> Vec<PriceAggregate> {
        let inner = self.lock();
        let mut groups: HashMap<AggregateKey, Vec<&CommunityPriceRecord>> = HashMap::new();
        for record in inner.records.iter().filter(|r| !r.is_outlier) {
            groups
                .entry((
                    record.name_normalized.clone(),
                    record.region.clone(),
                    record.category,
                    record.unit,
                ))
                .or_default()
                .push(record);
        }

        let mut aggregates: Vec<PriceAggregate> = groups
            .into_iter()
            .map(|((name_normalized, region, category, unit), rows)| {
                let latest = rows
                    .iter()
                    .max_by_key(|r| r.created_at)
                    .copied()
                    .unwrap_or(rows[0]);
                let total: f64 = rows.iter().map(|r| r.cost).sum();
                PriceAggregate {
                    name: latest.name.clone(),
                    name_normalized,
                    region,
                    category,
                    unit,
                    avg_cost: total / rows.len() as f64,
                    min_cost: rows.iter().map(|r| r.cost).fold(f64::INFINITY, f64::min),
                    max_cost: rows.iter().map(|r| r.cost).fold(f64::NEG_INFINITY, f64::max),
                    sample_size: rows.len() as u32,
                    last_updated: latest.created_at,
                }
            })
            .collect();
        aggregates.sort_by(|a, b| a.name_normalized.cmp(&b.name_normalized));
        aggregates
    }

    fn matches_conflict(
        existing: &CommunityPriceRecord,
        record: &CommunityPriceRecord,
        conflict: ConflictKey,
    ) -> bool {
        match conflict {
            ConflictKey::NaturalKey => {
                existing.name_normalized == record.name_normalized
                    && existing.region == record.region
                    && existing.category == record.category
                    && existing.unit == record.unit
            }
            ConflictKey::SourceProduct => {
                record.source_product_id.is_some()
                    && existing.source == record.source
                    && existing.source_product_id == record.source_product_id
            }
        }
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert(
        &self,
        records: &[CommunityPriceRecord],
        conflict: ConflictKey,
    ) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        for record in records {
            let position = inner
                .records
                .iter()
                .position(|existing| Self::matches_conflict(existing, record, conflict));
            match position {
                Some(index) => {
                    let id = inner.records[index].id.clone();
                    inner.records[index] = CommunityPriceRecord {
                        id,
                        ..record.clone()
                    };
                }
                None => {
                    inner.next_id += 1;
                    let id = Some(inner.next_id.to_string());
                    inner.records.push(CommunityPriceRecord {
                        id,
                        ..record.clone()
                    });
                }
            }
        }
        Ok(records.len())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<AggregateMatch>, StoreError> {
        let mut matches: Vec<AggregateMatch> = self
            .aggregates()
            .into_iter()
            .filter(|a| a.region == query.region || a.region == NATIONAL_REGION)
            .filter(|a| query.category.is_none_or(|c| a.category == c))
            .filter_map(|aggregate| {
                let score = similarity(&query.query, &aggregate.name_normalized);
                (score >= query.threshold).then_some(AggregateMatch {
                    aggregate,
                    similarity: score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| {
                    let a_local = a.aggregate.region == query.region;
                    let b_local = b.aggregate.region == query.region;
                    b_local.cmp(&a_local)
                })
                .then_with(|| b.aggregate.sample_size.cmp(&a.aggregate.sample_size))
        });
        matches.truncate(query.limit);
        Ok(matches)
    }

    async fn average_cost(
        &self,
        name_normalized: &str,
        region: &str,
    ) -> Result<Option<f64>, StoreError> {
        let inner = self.lock();
        let costs: Vec<f64> = inner
            .records
            .iter()
            .filter(|r| !r.is_outlier && r.name_normalized == name_normalized && r.region == region)
            .map(|r| r.cost)
            .collect();
        if costs.is_empty() {
            return Ok(None);
        }
        Ok(Some(costs.iter().sum::<f64>() / costs.len() as f64))
    }

    async fn insert(&self, mut record: CommunityPriceRecord) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id.to_string();
        record.id = Some(id.clone());
        inner.records.push(record);
        Ok(id)
    }

    async fn log_search_miss(&self, miss: &SearchMiss) -> Result<(), StoreError> {
        self.lock().misses.push(miss.clone());
        Ok(())
    }
}
