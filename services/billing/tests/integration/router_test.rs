use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use bytes::Bytes;
use sea_orm::{DatabaseBackend, DatabaseConnection, DbErr, MockDatabase};
use serde_json::{Value, json};

use ledgerline_billing::config::BillingConfig;
use ledgerline_billing::domain::policy::DeliveryPolicy;
use ledgerline_billing::router::build_router;
use ledgerline_billing::state::AppState;
use ledgerline_testing::stripe::{TEST_WEBHOOK_SECRET, signed_header, signed_header_now};

use crate::helpers::org;

fn test_config() -> BillingConfig {
    BillingConfig {
        database_url: "postgres://unused".to_owned(),
        stripe_webhook_secret: TEST_WEBHOOK_SECRET.to_owned(),
        billing_port: 0,
        signature_tolerance_secs: 300,
        outbox_policy: DeliveryPolicy::default(),
        outbox_batch_size: 10,
        outbox_poll_interval_ms: 1000,
        notification_policy: DeliveryPolicy::default(),
        notification_batch_size: 10,
        notification_sweep_interval_ms: 1000,
        email_api_url: "http://127.0.0.1:9/send".to_owned(),
        email_api_key: "test".to_owned(),
        email_from: "billing@example.com".to_owned(),
        outbound_signing_secret: None,
        export_allowed_hosts: Vec::new(),
        adapter_timeout_ms: 1000,
        stuck_webhook_ttl_secs: 900,
        watchdog_interval_secs: 60,
    }
}

fn server_with(db: DatabaseConnection) -> TestServer {
    let state = AppState {
        db,
        http: reqwest::Client::new(),
        config: Arc::new(test_config()),
    };
    TestServer::new(build_router(state)).unwrap()
}

/// Router over a disconnected database, for requests that must not reach storage.
fn server() -> TestServer {
    server_with(DatabaseConnection::default())
}

/// Router whose first query fails with a driver error.
fn failing_storage_server() -> TestServer {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_errors([DbErr::Custom("connection reset by peer".to_owned())])
        .into_connection();
    server_with(db)
}

fn stripe_signature(value: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("stripe-signature"),
        HeaderValue::from_str(value).unwrap(),
    )
}

#[tokio::test]
async fn should_report_liveness() {
    server().get("/healthz").await.assert_status_ok();
}

#[tokio::test]
async fn should_report_not_ready_without_database() {
    server()
        .get("/readyz")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn should_reject_unsigned_webhook() {
    let response = server()
        .post("/webhooks/stripe")
        .bytes(Bytes::from_static(br#"{"id":"evt_1"}"#))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "MISSING_SIGNATURE");
}

#[tokio::test]
async fn should_reject_webhook_signed_with_other_secret() {
    let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
    let header = signed_header("whsec_someone_else", payload, chrono::Utc::now().timestamp());
    let (name, value) = stripe_signature(&header);

    let response = server()
        .post("/webhooks/stripe")
        .add_header(name, value)
        .bytes(Bytes::from_static(payload))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn should_reject_signed_body_that_is_not_an_event() {
    let payload = b"not json at all";
    let (name, value) = stripe_signature(&signed_header_now(payload));

    let response = server()
        .post("/webhooks/stripe")
        .add_header(name, value)
        .bytes(Bytes::from_static(payload))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "MALFORMED_PAYLOAD");
}

#[tokio::test]
async fn should_reject_blank_dedupe_key_before_storage() {
    let response = server()
        .post("/internal/outbox")
        .json(&json!({
            "org_id": org().to_string(),
            "kind": "webhook",
            "payload": { "url": "https://hooks.example.com", "event_type": "x" },
            "dedupe_key": "   "
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "MALFORMED_PAYLOAD");
}

#[tokio::test]
async fn should_echo_request_id() {
    let response = server()
        .get("/healthz")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("req-123"),
        )
        .await;

    assert_eq!(response.header("x-request-id"), "req-123");
}

#[tokio::test]
async fn should_assign_request_id_when_missing() {
    let response = server().get("/healthz").await;
    assert!(!response.header("x-request-id").is_empty());
}

#[tokio::test]
async fn should_hide_storage_failure_behind_internal_error() {
    let response = failing_storage_server()
        .get("/admin/dead-letters/outbox?per-page=5")
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["kind"], "INTERNAL");
    assert_eq!(body["message"], "internal error");
}
