mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tower::ServiceExt;

use accrual_engine::api::router::create_router;
use accrual_engine::lifecycle::PrincipalPolicy;
use accrual_engine::AppState;

fn build_test_app(api_token: Option<&str>) -> (axum::Router, Arc<AtomicBool>) {
    let engine = common::memory_engine(PrincipalPolicy::Hold);
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    let pause_flag = Arc::new(AtomicBool::new(false));

    let state = AppState {
        engine,
        metrics_handle,
        pause_flag: pause_flag.clone(),
        api_token: api_token.map(String::from),
    };
    (create_router(state), pause_flag)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn create_funded_user(app: &axum::Router, amount: &str) -> String {
    let (status, json) = send(app, "POST", "/api/users", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let id = json["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        app,
        "POST",
        &format!("/api/users/{id}/deposits"),
        Some(json!({ "amount": amount })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    id
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = build_test_app(None);
    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = build_test_app(Some("secret"));
    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let (app, _) = build_test_app(Some("secret"));

    let (status, json) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/stats")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_deposit_withdraw_and_balance() {
    let (app, _) = build_test_app(None);
    let id = create_funded_user(&app, "100").await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/users/{id}/withdrawals"),
        Some(json!({ "amount": "30" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["balance_after"], "70");

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/users/{id}/withdrawals"),
        Some(json!({ "amount": "71" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["success"], false);

    let (_, json) = send(&app, "GET", &format!("/api/users/{id}/balance"), None).await;
    assert_eq!(json["data"]["balance"], "70");

    let (_, json) = send(&app, "GET", &format!("/api/users/{id}/transactions"), None).await;
    let txs = json["data"].as_array().unwrap();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0]["kind"], "withdrawal");

    let (_, json) = send(&app, "GET", &format!("/api/users/{id}/ledger/verify"), None).await;
    assert_eq!(json["data"]["breaks"].as_array().unwrap().len(), 0);
    assert_eq!(json["data"]["replayed_balance"], "70");
}

#[tokio::test]
async fn test_unknown_user_is_404() {
    let (app, _) = build_test_app(None);
    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/users/{}/balance", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_position_lifecycle_over_http() {
    let (app, _) = build_test_app(None);
    let id = create_funded_user(&app, "1000").await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/positions",
        Some(json!({
            "user_id": id,
            "principal": "500",
            "plan": {
                "plan_id": null,
                "name": "Growth",
                "return_pct": "20",
                "duration_days": 10,
                "min_amount": "100",
                "max_amount": null
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "active");
    let position_id = json["data"]["id"].as_str().unwrap().to_string();

    let (_, json) = send(&app, "GET", &format!("/api/users/{id}/positions"), None).await;
    let views = json["data"].as_array().unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0]["days_remaining"], 10);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/positions/{position_id}/cancel"),
        Some(json!({ "refund_fraction": "0.5" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["position"]["status"], "cancelled");
    assert_eq!(json["data"]["refund"]["amount"], "250.0");

    let (status, _) = send(&app, "POST", &format!("/api/positions/{position_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_allocation_and_manual_accrual_run() {
    let (app, pause_flag) = build_test_app(None);
    let id = create_funded_user(&app, "1000").await;
    let strategy_id = uuid::Uuid::new_v4();

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/strategies/{strategy_id}"),
        Some(json!({ "name": "Mirror", "daily_rate": "0.01" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &app,
        "POST",
        "/api/allocations",
        Some(json!({ "user_id": id, "strategy_id": strategy_id, "amount": "400" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let allocation_id = json["data"]["id"].as_str().unwrap().to_string();

    // Pausing the loop does not block a manual run.
    send(&app, "POST", "/api/control/pause", None).await;
    assert!(pause_flag.load(Ordering::Relaxed));

    let (status, json) = send(&app, "POST", "/api/accrual/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["allocations"]["succeeded"], 1);
    assert_eq!(json["data"]["total_credited"], "4.00");

    let (status, json) = send(&app, "POST", &format!("/api/allocations/{allocation_id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "inactive");

    let (_, json) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(json["data"]["active_allocations"], 0);
    assert_eq!(json["data"]["copy_trading_earned"], "4.00");

    send(&app, "POST", "/api/control/resume", None).await;
    assert!(!pause_flag.load(Ordering::Relaxed));
}

#[tokio::test]
async fn test_allocation_against_missing_strategy_is_422() {
    let (app, _) = build_test_app(None);
    let id = create_funded_user(&app, "100").await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/allocations",
        Some(json!({ "user_id": id, "strategy_id": uuid::Uuid::new_v4(), "amount": "50" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
