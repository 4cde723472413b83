//! User price submissions with outlier flagging.
//!
//! The average lookup and the insert are two separate store calls, so two
//! submissions for the same item can both be judged against the same
//! average. Outlier flags are advisory and this is tolerated.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SubmitConfig;
use crate::error::SubmitError;
use crate::normalizer::{normalize_name, normalize_region};
use crate::store::PriceStore;
use crate::types::{Category, CommunityPriceRecord, ContributionSource, Unit};

/// Slack on the inclusive lower bound so `avg * 0.3` rounding can't move it.
const BOUND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub trade: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub id: String,
    pub is_outlier: bool,
    pub message: String,
}

pub struct SubmissionGuard {
    store: Arc<dyn PriceStore>,
    config: SubmitConfig,
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, SubmitError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(SubmitError::MissingField(field))
}

impl SubmissionGuard {
    pub fn new(store: Arc<dyn PriceStore>, config: SubmitConfig) -> Self {
        Self { store, config }
    }

    /// Whether `cost` deviates sharply from `avg`: strictly above
    /// `avg * high`, or at or below `avg * low`.
    pub fn is_outlier(&self, cost: f64, avg: f64) -> bool {
        if avg <= 0.0 {
            return false;
        }
        cost > avg * self.config.outlier_high_multiplier
            || cost <= avg * self.config.outlier_low_multiplier + BOUND_EPSILON
    }

    /// Validate, flag and insert a submission. Nothing touches the store
    /// until every field has passed validation.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, SubmitError> {
        let name = required(&request.name, "name")?;
        let category_text = required(&request.category, "category")?;
        let unit_text = required(&request.unit, "unit")?;
        let cost = request.cost.ok_or(SubmitError::MissingField("cost"))?;
        let region_text = required(&request.region, "region")?;

        let category = category_text.parse::<Category>().map_err(SubmitError::InvalidCategory)?;
        let unit = unit_text.parse::<Unit>().map_err(SubmitError::InvalidUnit)?;
        if !cost.is_finite() || cost < 0.0 {
            return Err(SubmitError::InvalidCost);
        }
        if region_text.len() != 2 || !region_text.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SubmitError::InvalidRegion(region_text.to_string()));
        }

        let name_normalized = normalize_name(name);
        let region = normalize_region(region_text);

        let average = self.store.average_cost(&name_normalized, &region).await?;
        let is_outlier = average.is_some_and(|avg| self.is_outlier(cost, avg));

        let source = match request.source.as_deref() {
            None => ContributionSource::Manual,
            Some(text) => text.parse::<ContributionSource>().unwrap_or_else(|e| {
                warn!(source = text, error = %e, "unknown submission source, recording as manual");
                ContributionSource::Manual
            }),
        };

        let record = CommunityPriceRecord {
            id: None,
            name: name.to_string(),
            name_normalized,
            category,
            unit,
            cost,
            region,
            zip_code: request.zip_code.clone(),
            trade: request.trade.clone(),
            source,
            source_product_id: None,
            upc: request.upc.clone(),
            sku: request.sku.clone(),
            is_outlier,
            created_at: Utc::now(),
        };
        let id = self.store.insert(record).await?;
        info!(id = %id, item = name, cost, is_outlier, "price submitted");

        let message = if is_outlier {
            "Price submitted and flagged for review: it differs significantly from the \
             regional average."
        } else {
            "Thanks! Your price was added to the community database."
        };
        Ok(SubmitResponse {
            success: true,
            id,
            is_outlier,
            message: message.to_string(),
        })
    }
}
