use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;

use pricefeed::config::{SearchConfig, SubmitConfig};
use pricefeed::rpc::{AppState, router};
use pricefeed::{MemoryStore, PriceSearchService, PriceStore, SubmissionGuard};

/// Serve a fresh in-memory app on an ephemeral port and return its base URL.
async fn spawn_app() -> String {
    let store: Arc<dyn PriceStore> = Arc::new(MemoryStore::new());
    let app = router(AppState {
        search: Arc::new(PriceSearchService::new(store.clone(), SearchConfig::default())),
        submit: Arc::new(SubmissionGuard::new(store, SubmitConfig::default())),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    format!("http://{addr}")
}

async fn post(base: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(format!("{base}{path}"))
        .json(&body)
        .send()
        .await
        .expect("send request");
    let status = response.status();
    (status, response.json().await.expect("json body"))
}

#[tokio::test]
async fn health_is_ok() {
    let base = spawn_app().await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn submit_then_search_round_trip() {
    let base = spawn_app().await;
    let (status, body) = post(
        &base,
        "/",
        json!({
            "action": "submit",
            "name": "Concrete Mix 80 lb",
            "category": "materials",
            "unit": "each",
            "cost": 6.48,
            "region": "co"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["is_outlier"], false);

    let (status, body) = post(
        &base,
        "/prices",
        json!({"action": "search", "query": "concrete mix 80 lb", "region": "CO"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_match"], true);
    assert_eq!(body["results"][0]["avg_cost"], 6.48);
    assert_eq!(body["results"][0]["confidence"], "low");
}

#[tokio::test]
async fn validation_errors_are_400_with_message() {
    let base = spawn_app().await;
    let (status, body) = post(
        &base,
        "/",
        json!({
            "action": "submit",
            "name": "Concrete Mix",
            "category": "materials",
            "unit": "each",
            "region": "CO"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required field: cost");

    let (status, body) = post(&base, "/", json!({"action": "search", "query": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required field: query");
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let base = spawn_app().await;
    let (status, body) = post(&base, "/", json!({"action": "delete", "id": "1"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request"));
}

#[tokio::test]
async fn hints_come_back_in_term_order() {
    let base = spawn_app().await;
    let (status, body) = post(
        &base,
        "/",
        json!({"action": "hints", "terms": ["copper pipe", "drywall"], "region": "TX"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hints"][0]["term"], "copper pipe");
    assert_eq!(body["hints"][1]["term"], "drywall");
    assert!(body["hints"][0]["best"].is_null());
}
