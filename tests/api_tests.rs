//! Integration tests for the HTTP API.
//!
//! Every test runs against an in-memory store and an offline model, so the
//! query path exercises the degraded answer.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt; // for `oneshot`

use prism_lib::api::build_router;
use prism_lib::db::{PrismDb, SharedDb};
use prism_lib::llm::scripted::ScriptedProvider;
use prism_lib::llm::LlmGateway;
use prism_lib::state::AppState;
use prism_lib::types::{Config, EntityKind};

/// Test helper: app over a fresh store, plus a handle for seeding.
fn setup_app() -> (Router, SharedDb) {
    let db: SharedDb = Arc::new(Mutex::new(
        PrismDb::open_in_memory().expect("Should open in-memory store"),
    ));
    let config = Config::default();
    let llm = Arc::new(LlmGateway::new(
        Arc::new(ScriptedProvider::offline()),
        &config.llm,
    ));
    let state = AppState::new(config, db.clone(), llm, CancellationToken::new());
    (build_router(state), db)
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Send a request and return the status with the parsed body.
async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

async fn create_deal(app: &Router, company: &str) -> String {
    let (status, body) = send(
        app,
        json_request("POST", "/api/deals", json!({ "companyName": company })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

// =============================================================================
// System
// =============================================================================

#[tokio::test]
async fn test_health_reports_degraded_without_model() {
    let (app, _db) = setup_app();

    let (status, body) = send(&app, test_request("GET", "/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["aiEnabled"], false);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_stats_on_empty_store() {
    let (app, _db) = setup_app();

    let (status, body) = send(&app, test_request("GET", "/api/stats")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());
}

// =============================================================================
// Error mapping
// =============================================================================

#[tokio::test]
async fn test_unknown_person_is_not_found() {
    let (app, _db) = setup_app();

    let (status, body) = send(&app, test_request("GET", "/api/people/missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_knowledge_type_is_rejected() {
    let (app, _db) = setup_app();

    let (status, body) = send(
        &app,
        test_request("GET", "/api/segments?knowledgeType=gossip"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["fields"], json!(["knowledgeType"]));
}

// =============================================================================
// Deals and MEDDPICC
// =============================================================================

#[tokio::test]
async fn test_meddpicc_edit_can_downgrade() {
    let (app, _db) = setup_app();
    let deal_id = create_deal(&app, "Globex").await;
    let uri = format!("/api/deals/{}/meddpicc/e", deal_id);

    let (status, body) = send(
        &app,
        json_request("PUT", &uri, json!({ "status": "identified", "evidence": "CFO signs" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let scorecard = body.as_array().unwrap();
    assert_eq!(scorecard.len(), 8);
    let economic_buyer = scorecard.iter().find(|e| e["letter"] == "E").unwrap();
    assert_eq!(economic_buyer["status"], "identified");
    assert_eq!(economic_buyer["evidence"], "CFO signs");

    let (status, body) = send(&app, json_request("PUT", &uri, json!({ "status": "unknown" }))).await;
    assert_eq!(status, StatusCode::OK);
    let economic_buyer = body
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["letter"] == "E")
        .unwrap()
        .clone();
    assert_eq!(economic_buyer["status"], "unknown");
}

#[tokio::test]
async fn test_meddpicc_bad_letter_is_rejected() {
    let (app, _db) = setup_app();
    let deal_id = create_deal(&app, "Globex").await;

    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            &format!("/api/deals/{}/meddpicc/x", deal_id),
            json!({ "status": "partial" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"], json!(["letter"]));
}

#[tokio::test]
async fn test_closing_deal_records_outcome_and_feeds_learner() {
    let (app, db) = setup_app();
    let deal_id = create_deal(&app, "Initech").await;

    let (status, body) = send(
        &app,
        json_request("PUT", &format!("/api/deals/{}", deal_id), json!({ "status": "won" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "won");
    assert!(body["closedAt"].is_string());
    assert_eq!(db.lock().outcomes_for(EntityKind::Deal).unwrap().len(), 1);

    let (status, body) = send(&app, test_request("POST", "/api/learning/analyze")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["runId"].is_number());

    let (status, body) = send(&app, test_request("GET", "/api/learning/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lastRun"]["trigger"], "manual");
    assert!(body["lastRun"]["finishedAt"].is_string());
}

#[tokio::test]
async fn test_insight_kinds_are_literal_routes() {
    let (app, _db) = setup_app();

    for kind in ["icp", "patterns", "coaching"] {
        let (status, body) = send(&app, test_request("GET", &format!("/api/insights/{}", kind))).await;
        assert_eq!(status, StatusCode::OK, "{}", kind);
        assert!(body.is_array());
    }

    let response = app
        .clone()
        .oneshot(test_request("GET", "/api/insights/personas"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/insights/missing/feedback",
            json!({ "feedback": "spot on", "status": "validated" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// =============================================================================
// Prospects
// =============================================================================

#[tokio::test]
async fn test_signals_rescore_prospect() {
    let (app, _db) = setup_app();
    let (status, body) = send(
        &app,
        json_request("POST", "/api/prospects", json!({ "companyName": "Hooli" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let signals_uri = format!("/api/prospects/{}/signals", body["id"].as_str().unwrap());

    let mut last = Value::Null;
    for signal_type in ["recent_funding", "hiring_signals", "tech_stack_fit"] {
        let (status, body) = send(
            &app,
            json_request("POST", &signals_uri, json!({ "signalType": signal_type })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        last = body;
    }
    assert_eq!(last["score"], 45.0);
    assert_eq!(last["tier"], 2);

    let (_, body) = send(
        &app,
        json_request("POST", &signals_uri, json!({ "signalType": "inbound_signal" })),
    )
    .await;
    assert_eq!(body["score"], 70.0);
    assert_eq!(body["tier"], 1);
}

#[tokio::test]
async fn test_unknown_signal_type_needs_weight() {
    let (app, _db) = setup_app();
    let (_, body) = send(
        &app,
        json_request("POST", "/api/prospects", json!({ "companyName": "Hooli" })),
    )
    .await;
    let signals_uri = format!("/api/prospects/{}/signals", body["id"].as_str().unwrap());

    let (status, body) = send(
        &app,
        json_request("POST", &signals_uri, json!({ "signalType": "podcast_mention" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"], json!(["weight"]));
}

// =============================================================================
// Ask
// =============================================================================

#[tokio::test]
async fn test_ask_degrades_without_model() {
    let (app, _db) = setup_app();
    let deal_id = create_deal(&app, "Acme").await;

    let (status, body) = send(
        &app,
        json_request("POST", "/api/ask", json!({ "query": "What's the status of Acme?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["degraded"], true);
    assert_eq!(body["intent"], "deal_status");
    assert!(body["sources"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["id"] == deal_id.as_str()));
    assert!(body["visualizations"]
        .as_array()
        .unwrap()
        .contains(&json!({ "type": "meddpicc_scorecard", "dealId": deal_id })));

    let (status, history) = send(&app, test_request("GET", "/api/ask/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/ask/{}/feedback", body["id"].as_str().unwrap()),
            json!({ "feedback": "helpful" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_ask_rejects_empty_query() {
    let (app, _db) = setup_app();

    let (status, body) = send(&app, json_request("POST", "/api/ask", json!({ "query": "   " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["fields"], json!(["query"]));
}

#[tokio::test]
async fn test_feedback_for_unknown_answer_is_not_found() {
    let (app, _db) = setup_app();

    let (status, body) = send(
        &app,
        json_request("POST", "/api/ask/nope/feedback", json!({ "feedback": "not_helpful" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
