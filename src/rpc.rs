//! JSON-over-HTTP entry point for search and submissions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::search::{PriceSearchService, PricingHint, SearchRequest, SearchResponse};
use crate::submit::{SubmissionGuard, SubmitRequest, SubmitResponse};

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<PriceSearchService>,
    pub submit: Arc<SubmissionGuard>,
}

/// Request body, dispatched on its `action` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RpcRequest {
    Search(SearchRequest),
    Submit(SubmitRequest),
    Hints {
        terms: Vec<String>,
        #[serde(default)]
        region: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Search(SearchResponse),
    Submit(SubmitResponse),
    Hints { hints: Vec<PricingHint> },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type RpcError = (StatusCode, Json<ErrorBody>);

fn bad_request(message: impl Into<String>) -> RpcError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn internal_error(message: impl Into<String>) -> RpcError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(dispatch))
        .route("/prices", post(dispatch))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn dispatch(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<RpcResponse>, RpcError> {
    let request: RpcRequest = serde_json::from_value(body).map_err(|e| {
        warn!(error = %e, "rejected rpc body");
        bad_request(format!("Invalid request: {}", e))
    })?;

    match request {
        RpcRequest::Search(request) => match state.search.search(&request).await {
            Ok(response) => Ok(Json(RpcResponse::Search(response))),
            Err(e) if e.is_validation() => Err(bad_request(e.to_string())),
            Err(e) => {
                error!(error = %e, "search failed");
                Err(internal_error(e.to_string()))
            }
        },
        RpcRequest::Submit(request) => match state.submit.submit(&request).await {
            Ok(response) => Ok(Json(RpcResponse::Submit(response))),
            Err(e) if e.is_validation() => Err(bad_request(e.to_string())),
            Err(e) => {
                error!(error = %e, "submission failed");
                Err(internal_error(e.to_string()))
            }
        },
        RpcRequest::Hints { terms, region } => {
            let hints = state.search.pricing_hints(&terms, &region).await;
            Ok(Json(RpcResponse::Hints { hints }))
        }
    }
}
