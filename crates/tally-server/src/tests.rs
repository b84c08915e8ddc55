//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use tally_core::{
    AIClient, CostEngine, Database, EngineConfig, MockBillingSource, PromptLibrary, RawBatch,
};

/// Three-entry billing batch: EC2 dominates spend, two days of history
fn sample_batch() -> RawBatch {
    serde_json::from_value(serde_json::json!({
        "entries": [
            {
                "service": "AmazonEC2",
                "amount": 600,
                "period_start": "2024-06-01",
                "period_end": "2024-06-02",
                "dimensions": { "region": "us-east-1" }
            },
            {
                "service": "AmazonS3",
                "amount": 150,
                "period_start": "2024-06-01",
                "period_end": "2024-06-02"
            },
            {
                "service": "AmazonEC2",
                "amount": 610,
                "period_start": "2024-06-02",
                "period_end": "2024-06-03"
            }
        ]
    }))
    .unwrap()
}

fn test_engine(batch: RawBatch) -> Arc<CostEngine> {
    let db = Database::in_memory().unwrap();
    let engine = CostEngine::with_prompts(
        db,
        AIClient::mock(),
        Arc::new(MockBillingSource::new(batch)),
        EngineConfig::default(),
        PromptLibrary::embedded_only(),
    )
    .unwrap();
    Arc::new(engine)
}

fn setup_test_app() -> Router {
    let config = ServerConfig {
        require_auth: false,
        allowed_origins: vec![],
        ..Default::default()
    };
    create_router(test_engine(sample_batch()), config)
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_body_text(response: axum::response::Response) -> String {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ========== Health & Summary Tests ==========

#[tokio::test]
async fn test_health_check() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_summary_empty() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/summary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["record_count"], 0);
    assert_eq!(json["total_insights"], 0);
}

// ========== Sync Tests ==========

#[tokio::test]
async fn test_run_sync() {
    let app = setup_test_app();

    // Empty body defaults to a 30-day window
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["records_ingested"], 3);
    assert_eq!(json["insights_generated"], 1);

    // The summary reflects the ingested records
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/summary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["record_count"], 3);
    assert_eq!(json["service_count"], 2);
}

#[tokio::test]
async fn test_sync_rejects_nonpositive_days() {
    let app = setup_test_app();

    let body = serde_json::json!({ "days": 0 });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "days must be positive");
}

// ========== Insight Tests ==========

#[tokio::test]
async fn test_list_insights_after_sync() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/insights")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // Two days of history: only the concentration rule fires
    let json = get_body_json(response).await;
    let insights = json.as_array().unwrap();
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0]["category"], "cost-optimization");
    assert_eq!(insights[0]["priority"], "high");
    assert_eq!(insights[0]["service"], "AmazonEC2");
}

#[tokio::test]
async fn test_list_insights_filtered() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/insights?priority=high&limit=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    // No low-priority insights exist in this data set
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/insights?priority=low")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_list_insights_invalid_category() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/insights?category=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "error");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("Unknown insight category"));
}

// ========== Ask Tests ==========

#[tokio::test]
async fn test_ask_question() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = serde_json::json!({ "question": "What is driving my EC2 spend?" });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ask")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert!(!json["response_text"].as_str().unwrap().is_empty());
    assert_eq!(json["degraded"], false);
    assert!(json.get("supporting_data").is_some());
}

#[tokio::test]
async fn test_ask_empty_question() {
    let app = setup_test_app();

    let body = serde_json::json!({ "question": "   " });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ask")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = get_body_json(response).await;
    assert_eq!(json["message"], "question must not be empty");
}

// ========== Report Tests ==========

#[tokio::test]
async fn test_get_report() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/report")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/markdown; charset=utf-8"
    );

    let report = get_body_text(response).await;
    assert!(report.starts_with("# Cloud Cost Optimization Report"));
}

// ========== Status & Maintenance Tests ==========

#[tokio::test]
async fn test_get_status() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["record_count"], 0);
    assert!(json["last_sync"].is_null());
    assert_eq!(json["ai_backend"]["healthy"], true);
    assert_eq!(json["ai_backend"]["model"], "mock");
}

#[tokio::test]
async fn test_status_after_sync() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["record_count"], 3);
    assert_eq!(json["last_sync"]["status"], "completed");
    assert_eq!(json["recent_syncs"].as_array().unwrap().len(), 1);
    assert!(json["index_size"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_clear_data() {
    let app = setup_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/clear")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/summary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let json = get_body_json(response).await;
    assert_eq!(json["record_count"], 0);
}

// ========== Authentication Tests ==========

fn setup_auth_app() -> Router {
    let config = ServerConfig {
        require_auth: true,
        allowed_origins: vec![],
        api_keys: vec!["secret-key".to_string()],
    };
    create_router(test_engine(sample_batch()), config)
}

#[tokio::test]
async fn test_auth_required() {
    let app = setup_auth_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/summary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "Authentication required");
}

#[tokio::test]
async fn test_auth_wrong_key() {
    let app = setup_auth_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/summary")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_valid_key() {
    let app = setup_auth_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/summary")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_requires_auth() {
    // The whole /api surface sits behind the same middleware
    let app = setup_auth_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_validate_api_key() {
    let keys = vec!["alpha".to_string(), "beta".to_string()];
    assert!(validate_api_key("alpha", &keys));
    assert!(validate_api_key("beta", &keys));
    assert!(!validate_api_key("gamma", &keys));
    assert!(!validate_api_key("", &keys));
    assert!(!validate_api_key("alpha", &[]));
}

// ========== Security Header Tests ==========

#[tokio::test]
async fn test_security_headers() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("content-security-policy").is_some());
}
