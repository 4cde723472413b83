use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{PriceStore, SearchQuery};
use crate::error::StoreError;
use crate::types::{AggregateMatch, CommunityPriceRecord, ConflictKey, SearchMiss};

const PRICES_TABLE: &str = "community_prices";
const AGGREGATES_VIEW: &str = "price_aggregates";
const MISSES_TABLE: &str = "search_misses";
const SEARCH_RPC: &str = "search_prices";

/// [`PriceStore`] over a hosted Postgres exposed through a PostgREST
/// (Supabase-style) HTTP API.
///
/// Fuzzy matching runs server side in the `search_prices` function, which
/// uses `pg_trgm` similarity over the `price_aggregates` view.
pub struct RestStore {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Deserialize)]
struct AverageRow {
    avg_cost: f64,
    sample_size: u32,
}

#[derive(Deserialize)]
struct InsertedRow {
    id: serde_json::Value,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)
            .and_then(|u| u.join("rest/v1/"))
            .map_err(|e| {
                StoreError::Unavailable(format!("invalid store url '{}': {}", base_url, e))
            })?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(path)
            .map_err(|e| StoreError::Unavailable(format!("invalid endpoint '{}': {}", path, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Union of keys across a bulk payload. PostgREST takes the column list of
/// a bulk insert from the first object unless `columns` names them all.
fn bulk_columns(rows: &serde_json::Value) -> String {
    let mut columns: BTreeSet<&str> = BTreeSet::new();
    if let Some(rows) = rows.as_array() {
        for row in rows.iter().filter_map(|r| r.as_object()) {
            columns.extend(row.keys().map(String::as_str));
        }
    }
    columns.into_iter().collect::<Vec<_>>().join(",")
}

#[async_trait]
impl PriceStore for RestStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut url = self.endpoint(PRICES_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "id")
            .append_pair("limit", "1");
        let response = self.authorized(self.client.get(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        records: &[CommunityPriceRecord],
        conflict: ConflictKey,
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let rows = serde_json::to_value(records)
            .map_err(|e| StoreError::Decode(format!("failed to encode rows: {}", e)))?;
        let columns = bulk_columns(&rows);
        let mut url = self.endpoint(PRICES_TABLE)?;
        url.query_pairs_mut()
            .append_pair("columns", &columns)
            .append_pair("on_conflict", conflict.columns());

        debug!(rows = records.len(), on_conflict = conflict.columns(), "upserting");
        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "resolution=merge-duplicates,missing=default,return=minimal")
            .json(&rows)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(records.len())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<AggregateMatch>, StoreError> {
        let url = self.endpoint(&format!("rpc/{}", SEARCH_RPC))?;
        let body = json!({
            "search_query": query.query,
            "search_region": query.region,
            "search_category": query.category,
            "similarity_threshold": query.threshold,
            "max_results": query.limit,
        });
        let response = self
            .authorized(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        response
            .json::<Vec<AggregateMatch>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn average_cost(
        &self,
        name_normalized: &str,
        region: &str,
    ) -> Result<Option<f64>, StoreError> {
        let mut url = self.endpoint(AGGREGATES_VIEW)?;
        url.query_pairs_mut()
            .append_pair("select", "avg_cost,sample_size")
            .append_pair("name_normalized", &format!("eq.{}", name_normalized))
            .append_pair("region", &format!("eq.{}", region));
        let response = self.authorized(self.client.get(url)).send().await?;
        let rows: Vec<AverageRow> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        // One row per (category, unit); weight by sample size.
        let samples: u32 = rows.iter().map(|r| r.sample_size).sum();
        if samples == 0 {
            return Ok(None);
        }
        let total: f64 = rows.iter().map(|r| r.avg_cost * r.sample_size as f64).sum();
        Ok(Some(total / samples as f64))
    }

    async fn insert(&self, record: CommunityPriceRecord) -> Result<String, StoreError> {
        let mut url = self.endpoint(PRICES_TABLE)?;
        url.query_pairs_mut().append_pair("select", "id");
        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await?;
        let rows: Vec<InsertedRow> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        match rows.into_iter().next().map(|row| row.id) {
            Some(serde_json::Value::String(id)) => Ok(id),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            _ => Err(StoreError::Decode("insert returned no id".to_string())),
        }
    }

    async fn log_search_miss(&self, miss: &SearchMiss) -> Result<(), StoreError> {
        let url = self.endpoint(MISSES_TABLE)?;
        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "return=minimal")
            .json(miss)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
