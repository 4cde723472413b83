//! Error types for each stage of the pipeline.

use std::time::Duration;
use thiserror::Error;

/// Failures while driving the browser through one listing page.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser error: {0}")]
    Browser(String),
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },
    #[error("selector '{selector}' not found within {timeout:?}")]
    SelectorTimeout { selector: String, timeout: Duration },
    #[error("invalid page url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to write screenshot: {0}")]
    Screenshot(#[from] std::io::Error),
}

impl From<thirtyfour::error::WebDriverError> for ScrapeError {
    fn from(err: thirtyfour::error::WebDriverError) -> Self {
        ScrapeError::Browser(err.to_string())
    }
}

/// Failures talking to the price store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected store response: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Reasons a price submission is turned away.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    InvalidCategory(String),
    #[error("{0}")]
    InvalidUnit(String),
    #[error("Cost must be a non-negative number")]
    InvalidCost,
    #[error("Invalid region '{0}'. Must be a two-letter state code or US")]
    InvalidRegion(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// True when the caller sent bad input, as opposed to a storage failure.
    pub fn is_validation(&self) -> bool {
        !matches!(self, SubmitError::Store(_))
    }
}

/// Reasons a search request is turned away.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    InvalidCategory(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SearchError {
    pub fn is_validation(&self) -> bool {
        !matches!(self, SearchError::Store(_))
    }
}

/// Problems found while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Problems reading a catalog export.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
