//! Bulk import of a retailer catalog export.
//!
//! The export is a JSON array of catalog rows (a single object is accepted
//! as a one-row file). Rows are normalized, then written through a
//! [`BatchUpserter`] keyed on `(source, source_product_id)` so re-running an
//! import overwrites rather than duplicates.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{MigrateConfig, UpsertConfig};
use crate::error::MigrateError;
use crate::normalizer::{CatalogRecord, normalize_catalog};
use crate::store::PriceStore;
use crate::types::ConflictKey;
use crate::upsert::BatchUpserter;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// First few failure and rejection reasons
    pub errors: Vec<String>,
}

impl MigrationReport {
    fn note_error(&mut self, reason: String, cap: usize) {
        if self.errors.len() < cap {
            self.errors.push(reason);
        }
    }

    fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Read catalog rows from a JSON file.
pub fn read_catalog(path: &Path) -> Result<Vec<CatalogRecord>, MigrateError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(MigrateError::NotFound(display));
    }
    let content = std::fs::read_to_string(path).map_err(|source| MigrateError::Read {
        path: display.clone(),
        source,
    })?;
    parse_catalog(&content).map_err(|source| MigrateError::Parse {
        path: display,
        source,
    })
}

/// Parse a catalog export: an array of rows, or one bare row.
pub fn parse_catalog(content: &str) -> Result<Vec<CatalogRecord>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}

pub struct Migrator {
    store: Arc<dyn PriceStore>,
    batch_size: usize,
    config: MigrateConfig,
    dry_run: bool,
}

impl Migrator {
    pub fn new(
        store: Arc<dyn PriceStore>,
        upsert: &UpsertConfig,
        config: MigrateConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            batch_size: upsert.batch_size,
            config,
            dry_run,
        }
    }

    /// Normalize and upsert every row. Rejected rows are skipped; a failed
    /// batch counts all of its rows as failed and the import carries on.
    pub async fn run(&self, rows: &[CatalogRecord]) -> MigrationReport {
        let cap = self.config.max_reported_errors;
        let interval = self.config.progress_interval.max(1);
        let mut report = MigrationReport {
            total: rows.len(),
            ..Default::default()
        };
        let mut upserter = BatchUpserter::new(
            self.store.clone(),
            ConflictKey::SourceProduct,
            self.batch_size,
            self.dry_run,
        );

        info!(total = report.total, dry_run = self.dry_run, "starting import");

        for row in rows {
            match normalize_catalog(row) {
                Ok(record) => {
                    if let Some(outcome) = upserter.push(record).await {
                        report.successful += outcome.success;
                        report.failed += outcome.failed;
                        if let Some(error) = outcome.error {
                            report.note_error(error, cap);
                        }
                    }
                }
                Err(rejection) => {
                    debug!(%rejection, "skipping catalog row");
                    report.skipped += 1;
                    report.note_error(rejection.reason, cap);
                }
            }
            report.processed += 1;

            if report.processed % interval == 0 {
                info!(
                    "progress: {}/{} ({:.1}%), ok {}, failed {}, skipped {}",
                    report.processed,
                    report.total,
                    report.percent(),
                    report.successful,
                    report.failed,
                    report.skipped
                );
            }
        }

        if let Some(outcome) = upserter.flush().await {
            report.successful += outcome.success;
            report.failed += outcome.failed;
            if let Some(error) = outcome.error {
                report.note_error(error, cap);
            }
        }

        if report.failed > 0 {
            warn!(failed = report.failed, "some rows were not written");
        }
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            dry_run = self.dry_run,
            "import finished"
        );
        report
    }
}
