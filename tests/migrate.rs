mod common;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::RecordingStore;
use pricefeed::config::{MigrateConfig, UpsertConfig};
use pricefeed::error::MigrateError;
use pricefeed::migrate::{Migrator, read_catalog};
use pricefeed::types::ContributionSource;
use tempfile::NamedTempFile;

const CATALOG: &str = r#"[
  {"product_id": 1001, "product_name": "1/2 in. x 4 ft. x 8 ft. Drywall Panel", "brand": "USG", "price": "$14.98", "category": "materials"},
  {"product_id": "1002", "product_name": "Romex 12/2 Wire 250 ft.", "price": 112.0, "unit": "each"},
  {"sku": 77, "product_name": "Floor Sander Rental", "price": 65, "unit": "per job"},
  {"product_id": "1004", "price": 9.5},
  {"product_id": "1005", "product_name": "Wood Screws"},
  {"product_name": "Orphan Row", "price": 3.0}
]"#;

fn catalog_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn migrator(store: Arc<RecordingStore>, batch_size: usize, dry_run: bool) -> Migrator {
    Migrator::new(
        store,
        &UpsertConfig { batch_size },
        MigrateConfig {
            progress_interval: 2,
            max_reported_errors: 10,
        },
        dry_run,
    )
}

#[tokio::test]
async fn dry_run_matches_live_counts_without_writing() {
    let file = catalog_file(CATALOG);
    let rows = read_catalog(file.path()).unwrap();

    let dry_store = Arc::new(RecordingStore::new());
    let dry = migrator(dry_store.clone(), 2, true).run(&rows).await;

    let live_store = Arc::new(RecordingStore::new());
    let live = migrator(live_store.clone(), 2, false).run(&rows).await;

    assert_eq!(dry.total, 6);
    assert_eq!(dry.skipped, 3);
    assert_eq!(dry.successful, 3);
    assert_eq!(
        (dry.total, dry.skipped, dry.successful),
        (live.total, live.skipped, live.successful)
    );
    assert_eq!(dry.processed, 6);
    assert_eq!(dry_store.calls(), 0);
    assert_eq!(live_store.upsert_calls(), 2);
    assert_eq!(live_store.inner.records().len(), 3);
}

#[tokio::test]
async fn rejection_reasons_are_reported() {
    let rows = pricefeed::migrate::parse_catalog(CATALOG).unwrap();
    let report = migrator(Arc::new(RecordingStore::new()), 50, false)
        .run(&rows)
        .await;

    assert_eq!(
        report.errors,
        vec![
            "1004: missing product_name".to_string(),
            "1005: missing or invalid price".to_string(),
            "missing product_id or sku".to_string(),
        ]
    );
}

#[tokio::test]
async fn reimport_overwrites_by_source_product() {
    let rows = pricefeed::migrate::parse_catalog(CATALOG).unwrap();
    let store = Arc::new(RecordingStore::new());

    migrator(store.clone(), 50, false).run(&rows).await;
    migrator(store.clone(), 50, false).run(&rows).await;

    let records = store.inner.records();
    assert_eq!(records.len(), 3);
    let drywall = records
        .iter()
        .find(|r| r.source_product_id.as_deref() == Some("1001"))
        .unwrap();
    assert_eq!(drywall.name, "USG 1/2 in. x 4 ft. x 8 ft. Drywall Panel");
    assert_eq!(drywall.cost, 14.98);
    assert_eq!(drywall.source, ContributionSource::Import);
    assert_eq!(drywall.region, "US");
}

#[tokio::test]
async fn failed_batches_are_counted_not_fatal() {
    let rows = pricefeed::migrate::parse_catalog(CATALOG).unwrap();
    let store = Arc::new(RecordingStore::new());
    store.fail_upsert.store(true, Ordering::SeqCst);

    let report = migrator(store.clone(), 2, false).run(&rows).await;

    assert_eq!(report.successful, 0);
    assert_eq!(report.failed, 3);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.processed, 6);
    assert!(report.errors.iter().any(|e| e.contains("503")));
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_catalog(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, MigrateError::NotFound(_)));
}

#[test]
fn single_object_file_is_one_row() {
    let file = catalog_file(r#"{"sku": "A-1", "product_name": "Caulk", "price": 6.25}"#);
    let rows = read_catalog(file.path()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].sku.as_deref(), Some("A-1"));
}
