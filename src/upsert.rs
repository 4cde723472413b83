//! Batched, idempotent writes into the price store.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::PriceStore;
use crate::types::{CommunityPriceRecord, ConflictKey};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Result of writing one batch. A failed batch is failed as a whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub success: usize,
    pub failed: usize,
    pub error: Option<String>,
}

/// Running totals across every batch an upserter has written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertTotals {
    pub success: usize,
    pub failed: usize,
    pub batches: usize,
    pub errors: Vec<String>,
}

impl UpsertTotals {
    fn record(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.success += outcome.success;
        self.failed += outcome.failed;
        if let Some(error) = &outcome.error {
            self.errors.push(error.clone());
        }
    }
}

/// Accumulates records and writes them `batch_size` at a time, overwriting
/// existing rows that share the conflict key.
pub struct BatchUpserter {
    store: Arc<dyn PriceStore>,
    conflict: ConflictKey,
    batch_size: usize,
    dry_run: bool,
    pending: Vec<CommunityPriceRecord>,
    totals: UpsertTotals,
}

impl BatchUpserter {
    pub fn new(
        store: Arc<dyn PriceStore>,
        conflict: ConflictKey,
        batch_size: usize,
        dry_run: bool,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            conflict,
            batch_size,
            dry_run,
            pending: Vec::with_capacity(batch_size),
            totals: UpsertTotals::default(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Queue a record, writing the batch once it is full.
    pub async fn push(&mut self, record: CommunityPriceRecord) -> Option<BatchOutcome> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush().await
        } else {
            None
        }
    }

    /// Write whatever is queued. `None` when nothing was pending.
    pub async fn flush(&mut self) -> Option<BatchOutcome> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        let outcome = self.upsert_batch(&batch).await;
        self.totals.record(&outcome);
        Some(outcome)
    }

    /// Flush the tail and hand back the totals.
    pub async fn finish(mut self) -> UpsertTotals {
        self.flush().await;
        self.totals
    }

    pub fn totals(&self) -> &UpsertTotals {
        &self.totals
    }

    /// Write `records` in a single store call. Dry runs only log what would
    /// be written but report the same counts a successful write would.
    pub async fn upsert_batch(&self, records: &[CommunityPriceRecord]) -> BatchOutcome {
        if records.is_empty() {
            return BatchOutcome::default();
        }
        let rows = dedupe_by_key(records, self.conflict);

        if self.dry_run {
            info!(
                rows = rows.len(),
                on_conflict = self.conflict.columns(),
                "[dry-run] would upsert batch"
            );
            for row in &rows {
                debug!(
                    item = %row.name,
                    region = %row.region,
                    cost = row.cost,
                    source = %row.source,
                    "[dry-run] would upsert"
                );
            }
            return BatchOutcome {
                success: records.len(),
                failed: 0,
                error: None,
            };
        }

        match self.store.upsert(&rows, self.conflict).await {
            Ok(_) => {
                info!(rows = rows.len(), "upserted batch");
                BatchOutcome {
                    success: records.len(),
                    failed: 0,
                    error: None,
                }
            }
            Err(e) => {
                warn!(rows = records.len(), error = %e, "batch upsert failed");
                BatchOutcome {
                    success: 0,
                    failed: records.len(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// A single upsert statement can't touch the same row twice, so collapse
/// duplicate keys within a batch, keeping the last occurrence.
fn dedupe_by_key(
    records: &[CommunityPriceRecord],
    conflict: ConflictKey,
) -> Vec<CommunityPriceRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rows: Vec<CommunityPriceRecord> = Vec::with_capacity(records.len());
    for record in records {
        let key = match conflict {
            ConflictKey::NaturalKey => format!(
                "{}\u{1f}{}\u{1f}{}\u{1f}{}",
                record.name_normalized, record.region, record.category, record.unit
            ),
            ConflictKey::SourceProduct => match &record.source_product_id {
                Some(id) => format!("{}\u{1f}{}", record.source, id),
                None => {
                    rows.push(record.clone());
                    continue;
                }
            },
        };
        match index.get(&key) {
            Some(&at) => rows[at] = record.clone(),
            None => {
                index.insert(key, rows.len());
                rows.push(record.clone());
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Category, ContributionSource, Retailer, Unit};
    use chrono::Utc;

    fn record(name: &str, cost: f64) -> CommunityPriceRecord {
        CommunityPriceRecord {
            id: None,
            name: name.to_string(),
            name_normalized: name.to_lowercase(),
            category: Category::Materials,
            unit: Unit::Each,
            cost,
            region: "US".to_string(),
            zip_code: None,
            trade: None,
            source: ContributionSource::Scraper(Retailer::HomeDepot),
            source_product_id: None,
            upc: None,
            sku: None,
            is_outlier: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn flushes_on_full_batches() {
        let store = Arc::new(MemoryStore::new());
        let mut upserter = BatchUpserter::new(store.clone(), ConflictKey::NaturalKey, 2, false);

        assert!(upserter.push(record("a", 1.0)).await.is_none());
        let outcome = upserter.push(record("b", 2.0)).await.unwrap();
        assert_eq!(outcome.success, 2);
        assert_eq!(store.records().len(), 2);

        upserter.push(record("c", 3.0)).await;
        let totals = upserter.finish().await;
        assert_eq!(totals.batches, 2);
        assert_eq!(totals.success, 3);
        assert_eq!(store.records().len(), 3);
    }

    #[tokio::test]
    async fn dry_run_reports_counts_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let upserter = BatchUpserter::new(store.clone(), ConflictKey::NaturalKey, 50, true);
        let outcome = upserter
            .upsert_batch(&[record("a", 1.0), record("b", 2.0)])
            .await;
        assert_eq!(outcome, BatchOutcome { success: 2, failed: 0, error: None });
        assert!(store.records().is_empty());
    }

    #[test]
    fn duplicate_keys_in_one_batch_keep_the_last() {
        let rows = dedupe_by_key(
            &[record("a", 1.0), record("b", 2.0), record("a", 5.0)],
            ConflictKey::NaturalKey,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cost, 5.0);
    }
}
