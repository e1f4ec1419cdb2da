#![cfg(feature = "http")]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::util::ServiceExt;
use tradpoints::{FixedClock, LedgerHttpState, MemoryLedgerStore, PointsLedger, SecondFactor};

struct FixedCode;

#[async_trait]
impl SecondFactor for FixedCode {
    async fn validate(&self, code: &str) -> bool {
        code == "246810"
    }
}

fn app() -> (Router, MemoryLedgerStore, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(1_000));
    let store = MemoryLedgerStore::with_clock(clock.clone());
    let ledger = PointsLedger::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(FixedCode),
    );
    let state = LedgerHttpState::new(ledger)
        .with_admin_token("adm")
        .with_admin_read_token("ro")
        .with_default_actor("ops-default");
    (tradpoints::router(state), store, clock)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-admin-token", token)
        .body(Body::empty())
        .unwrap()
}

async fn award(app: &Router, user_id: &str, points: i64, reason: &str) -> String {
    let (status, body) = send(
        app,
        post_json(
            "/points/award",
            "adm",
            json!({"user_id": user_id, "points": points, "reason_code": reason}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["event_id"].as_str().expect("event id").to_string()
}

#[tokio::test]
async fn health_needs_no_token() {
    let (app, _, _) = app();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn award_and_balance_round_trip() {
    let (app, _, _) = app();
    award(&app, "u1", 100, "WELCOME").await;
    award(&app, "u1", -30, "ADJUST").await;

    let (status, body) = send(&app, get("/points/users/u1/balance", "ro")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"user_id": "u1", "balance": 70}));

    let (status, body) = send(&app, get("/points/users/u1/events", "ro")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn zero_award_is_bad_request() {
    let (app, store, _) = app();
    let (status, body) = send(
        &app,
        post_json(
            "/points/award",
            "adm",
            json!({"user_id": "u1", "points": 0, "reason_code": "X"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn dedup_key_returns_existing_award() {
    let (app, store, _) = app();
    let body = json!({"user_id": "u1", "points": 25, "reason_code": "REFERRAL", "dedup_key": "ref-9"});
    let (status, first) = send(&app, post_json("/points/award", "adm", body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = send(&app, post_json("/points/award", "adm", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["event_id"], second["event_id"]);
    assert_eq!(second["created"], false);
    assert_eq!(store.event_count(), 1);
}

#[tokio::test]
async fn out_of_range_balance_is_unprocessable() {
    let (app, _, _) = app();
    award(&app, "u1", i64::MAX, "BULK").await;
    award(&app, "u1", i64::MAX, "BULK").await;
    let (status, body) = send(&app, get("/points/users/u1/balance", "ro")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "points_overflow");

    award(&app, "u1", i64::MIN + 1, "BULK").await;
    let (status, body) = send(&app, get("/points/users/u1/balance", "ro")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], i64::MAX);
}

#[tokio::test]
async fn read_token_cannot_write() {
    let (app, _, _) = app();
    let (status, body) = send(
        &app,
        post_json(
            "/points/award",
            "ro",
            json!({"user_id": "u1", "points": 5, "reason_code": "X"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = send(&app, get("/points/users/u1/balance", "nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn search_groups_by_user() {
    let (app, _, clock) = app();
    award(&app, "u1", 10, "R").await;
    award(&app, "u1", 5, "S").await;
    clock.set(2_000);
    award(&app, "u2", 20, "R").await;

    let (status, body) = send(
        &app,
        get("/admin/points/search?reason_code=R&since_ms=1000&until_ms=2000", "ro"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let groups = body.as_array().expect("groups");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["user_id"], "u1");
    assert_eq!(groups[0]["subtotal"], 10);
    assert_eq!(groups[1]["user_id"], "u2");
    assert_eq!(groups[1]["subtotal"], 20);

    let (status, body) = send(
        &app,
        get("/admin/points/search?since_ms=5&until_ms=1", "ro"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn revoke_requires_second_factor() {
    let (app, store, _) = app();
    let event_id = award(&app, "u1", 150, "PROMO-X").await;

    let revoke = |code: &str| {
        json!({
            "selections": [{"kind": "events", "user_id": "u1", "event_ids": [event_id.clone()]}],
            "justification": "duplicate grant",
            "auth_factor": code,
        })
    };

    let (status, body) = send(
        &app,
        post_json("/admin/points/revoke", "adm", revoke("000000")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "second_factor_rejected");
    assert_eq!(store.event_count(), 1);
    assert_eq!(store.audit_count(), 0);

    let mut request = post_json("/admin/points/revoke", "adm", revoke("246810"));
    request
        .headers_mut()
        .insert("x-admin-actor", "alice".parse().unwrap());
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_points"], 150);
    assert_eq!(body["results"][0]["status"], "reversed");
    assert_eq!(body["audit"]["status"], "written");

    let (_, balance) = send(&app, get("/points/users/u1/balance", "ro")).await;
    assert_eq!(balance["balance"], 0);

    let (status, logs) = send(&app, get("/admin/audit?limit=10", "ro")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs[0]["actor"], "alice");
    assert_eq!(logs[0]["kind"], "POINTS_REVOKED");
}

#[tokio::test]
async fn double_reversals_are_listed() {
    let (app, _, _) = app();
    let event_id = award(&app, "u1", 10, "R").await;
    let body = json!({
        "selections": [{"kind": "events", "user_id": "u1", "event_ids": [event_id]}],
        "justification": "oops",
        "auth_factor": "246810",
    });
    for _ in 0..2 {
        let (status, _) = send(&app, post_json("/admin/points/revoke", "adm", body.clone())).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, doubles) = send(&app, get("/admin/points/double-reversals", "ro")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doubles[0]["original_event_id"], event_id);
    assert_eq!(doubles[0]["revoke_event_ids"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn audit_export_sets_content_type_and_chains() {
    let (app, _, _) = app();
    let event_id = award(&app, "u1", 10, "R").await;
    let body = json!({
        "selections": [{"kind": "events", "user_id": "u1", "event_ids": [event_id]}],
        "justification": "cleanup",
        "auth_factor": "246810",
        "batch_reason": "CLEANUP",
    });
    let (status, _) = send(&app, post_json("/admin/points/revoke", "adm", body)).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/admin/audit/export?format=jsonl", "ro"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/x-ndjson"
    );
    let raw = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let jsonl = String::from_utf8(raw.to_vec()).unwrap();
    assert_eq!(tradpoints::audit::verify_audit_chain(&jsonl).unwrap(), 1);

    let (status, body) = send(&app, get("/admin/audit/export?format=xml", "ro")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn metrics_report_counters() {
    let (app, _, _) = app();
    award(&app, "u1", 10, "R").await;
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["awards"], 1);
}

#[tokio::test]
async fn admin_routes_hidden_without_tokens() {
    let store = MemoryLedgerStore::new();
    let ledger = PointsLedger::new(
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(FixedCode),
    );
    let app = tradpoints::router(LedgerHttpState::new(ledger));
    let (status, body) = send(&app, get("/points/users/u1/balance", "adm")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_configured");
}
