//! Community price aggregation: retail scraping, normalization, batched
//! upserts into a shared price store, fuzzy price search and user
//! submissions with outlier flagging.

pub mod browser;
pub mod config;
pub mod crawl;
pub mod error;
pub mod extractor;
pub mod migrate;
pub mod normalizer;
pub mod rpc;
pub mod search;
pub mod store;
pub mod submit;
pub mod types;
pub mod upsert;

pub use config::Config;
pub use crawl::{CrawlMode, CrawlSummary, Crawler};
pub use migrate::{MigrationReport, Migrator};
pub use search::PriceSearchService;
pub use store::{MemoryStore, PriceStore, RestStore};
pub use submit::SubmissionGuard;
pub use upsert::BatchUpserter;
