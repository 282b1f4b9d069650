//! HTTP surface of the email outbox
//!
//! Routes:
//! - `POST /emails`: batch submission
//! - `GET /stale-emails`, `GET /invalid-emails`: recovery scans
//! - `POST /emails/:id/requeue`: force a stale submission back to a resumable status
//! - `POST /scan-and-set-ttl`: retention marking
//! - `GET /health-check`, `GET /metrics`

pub mod error;
pub mod handlers;
pub mod state;
pub mod validation;

pub use error::ApiError;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use email_outbox_metrics::metrics_router;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the service router; requests running past `request_timeout` are
/// dropped, which rolls back any uncommitted store work
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let metrics = metrics_router(state.metrics.clone());

    Router::new()
        .route("/emails", post(handlers::submit_emails))
        .route("/emails/:id/requeue", post(handlers::requeue_email))
        .route("/stale-emails", get(handlers::get_stale_emails))
        .route("/invalid-emails", get(handlers::get_invalid_emails))
        .route("/scan-and-set-ttl", post(handlers::scan_and_set_ttl))
        .route("/health-check", get(handlers::health_check))
        .with_state(state)
        .merge(metrics)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use email_outbox_metrics::MetricsCollector;
    use email_outbox_service::{FilePayloadStore, SubmissionService};
    use email_outbox_store::{InMemoryStore, OutboxSettings, OutboxStore, StoreError};
    use email_outbox_types::{
        EmailRecord, EmailStatus, ManualClock, StatusHistoryEntry, TtlScanResult,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const ID_A: &str = "3f1d2c4b-5a69-4e7f-8d0c-1b2a3c4d5e6f";
    const ID_B: &str = "9a8b7c6d-5e4f-4a3b-9c2d-1e0f2a3b4c5d";

    struct Harness {
        router: Router,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(
            InMemoryStore::new(OutboxSettings::new(30, 100)).with_clock(clock.clone()),
        );
        let payloads = Arc::new(FilePayloadStore::new(dir.path().join("payloads")));

        let state = AppState::new(
            SubmissionService::new(payloads, store.clone()),
            Arc::new(MetricsCollector::new().unwrap()),
            dir.path().join("attachments"),
        )
        .with_clock(clock.clone());

        Harness {
            router: build_router(state, std::time::Duration::from_secs(5)),
            store,
            clock,
            dir,
        }
    }

    fn email(id: &str) -> Value {
        json!({
            "id": id,
            "type": "email",
            "from": "billing@example.com",
            "reply_to": "support@example.com",
            "to": "customer@example.org",
            "subject": "Your receipt",
            "body_html": "<p>Thanks</p>",
            "attachments": ["receipts/r-1.pdf"],
            "custom_headers": {"X-Campaign": "spring"}
        })
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<String>,
    ) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn submit(router: &Router, ids: &[&str]) -> (StatusCode, Value) {
        let body = json!({ "data": ids.iter().map(|id| email(id)).collect::<Vec<_>>() });
        let (status, bytes) = send(router, "POST", "/emails", Some(body.to_string())).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = harness();
        let (status, body) = send(&h.router, "GET", "/health-check", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_submit_all_succeed() {
        let h = harness();
        let (status, body) = submit(&h.router, &[ID_A, ID_B]).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({}));

        let record = h.store.get(ID_A).await.unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::Accepted);
        let path = std::path::Path::new(&record.payload_file_path);
        assert!(path.parent().unwrap().ends_with("payloads/2026/March"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("{ID_A}.")) && name.ends_with(".json"));

        let payload: Value =
            serde_json::from_slice(&std::fs::read(&record.payload_file_path).unwrap()).unwrap();
        assert_eq!(payload["data"][0]["id"], ID_A);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let h = harness();
        let (status, body) =
            send(&h.router, "POST", "/emails", Some("{\"data\": [".to_string())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("invalid request body"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_bad_request() {
        let h = harness();
        let mut item = email("not-a-uuid");
        item["body_html"] = Value::Null;

        let body = json!({ "data": [item] }).to_string();
        let (status, bytes) = send(&h.router, "POST", "/emails", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("data[0].id"));
        assert!(message.contains("data[0].body"));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_resubmission_fails_every_item() {
        let h = harness();
        submit(&h.router, &[ID_A]).await;

        let (status, body) = submit(&h.router, &[ID_A]).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["summary"], json!({"total": 1, "successful": 0, "failed": 1}));
        assert_eq!(body["results"][0]["status"], "error");
        assert_eq!(body["results"][0]["error"]["code"], "DUPLICATED_ID");
    }

    #[tokio::test]
    async fn test_partial_success_reports_per_item() {
        let h = harness();
        submit(&h.router, &[ID_A]).await;

        let (status, body) = submit(&h.router, &[ID_B, ID_A]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], json!({"total": 2, "successful": 1, "failed": 1}));
        assert_eq!(body["results"][0], json!({"id": ID_B, "status": "success"}));
        assert_eq!(body["results"][1]["id"], ID_A);
        assert_eq!(
            body["results"][1]["error"]["message"],
            "Email with this ID already exists"
        );
    }

    #[tokio::test]
    async fn test_repeated_id_in_batch_first_occurrence_wins() {
        let h = harness();

        let (status, body) = submit(&h.router, &[ID_A, ID_A]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], json!({"total": 2, "successful": 1, "failed": 1}));
        assert_eq!(body["results"][0], json!({"id": ID_A, "status": "success"}));
        assert_eq!(body["results"][1]["id"], ID_A);
        assert_eq!(body["results"][1]["error"]["code"], "DUPLICATED_ID");
        assert_eq!(count_files(&h.dir.path().join("payloads")), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resubmissions_report_duplicate() {
        let h = harness();

        let (first, second) = tokio::join!(submit(&h.router, &[ID_A]), submit(&h.router, &[ID_A]));

        let mut statuses = vec![first.0, second.0];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::UNPROCESSABLE_ENTITY]);
        let rejected = if first.0 == StatusCode::CREATED { second.1 } else { first.1 };
        assert_eq!(rejected["results"][0]["error"]["code"], "DUPLICATED_ID");

        let record = h.store.get(ID_A).await.unwrap().unwrap();
        assert!(std::path::Path::new(&record.payload_file_path).exists());
        assert_eq!(count_files(&h.dir.path().join("payloads")), 1);
    }

    #[tokio::test]
    async fn test_stale_scan_and_requeue() {
        let h = harness();
        submit(&h.router, &[ID_A]).await;
        h.store
            .advance_status(ID_A, 1, EmailStatus::Intaking, None)
            .await
            .unwrap();

        let (_, bytes) = send(&h.router, "GET", "/stale-emails", None).await;
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!([]));

        h.clock.advance(ChronoDuration::minutes(31));

        let (status, bytes) = send(&h.router, "GET", "/stale-emails", None).await;
        assert_eq!(status, StatusCode::OK);
        let stale: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stale.as_array().unwrap().len(), 1);
        assert_eq!(stale[0]["id"], ID_A);
        assert_eq!(stale[0]["status"], "INTAKING");

        let uri = format!("/emails/{ID_A}/requeue");
        let (status, body) = send(&h.router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let record = h.store.get(ID_A).await.unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::Accepted);
        assert_eq!(record.version, 3);

        // the record is no longer in flight
        let (status, bytes) = send(&h.router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes).unwrap(),
            json!({"error": "error requeuing email"})
        );

        let (_, bytes) = send(&h.router, "GET", "/stale-emails", None).await;
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_requeue_blank_id_is_bad_request() {
        let h = harness();
        let (status, bytes) = send(&h.router, "POST", "/emails/%20/requeue", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes).unwrap(),
            json!({"error": "id parameter is required"})
        );
    }

    #[tokio::test]
    async fn test_requeue_unknown_id_is_internal_error() {
        let h = harness();
        let uri = format!("/emails/{ID_B}/requeue");
        let (status, _) = send(&h.router, "POST", &uri, None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_emails_carry_reason() {
        let h = harness();
        submit(&h.router, &[ID_A, ID_B]).await;
        h.store
            .advance_status(ID_A, 1, EmailStatus::Invalid, Some("mailbox does not exist".into()))
            .await
            .unwrap();

        let (status, bytes) = send(&h.router, "GET", "/invalid-emails", None).await;

        assert_eq!(status, StatusCode::OK);
        let invalid: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(invalid.as_array().unwrap().len(), 1);
        assert_eq!(invalid[0]["status"], "INVALID");
        assert_eq!(invalid[0]["error_message"], "mailbox does not exist");
    }

    #[tokio::test]
    async fn test_scan_and_set_ttl() {
        let h = harness();
        submit(&h.router, &[ID_A, ID_B]).await;
        for id in [ID_A, ID_B] {
            h.store
                .advance_status(id, 1, EmailStatus::Invalid, None)
                .await
                .unwrap();
        }

        let body = json!({"ttl_timestamp": 1_800_000_000, "max_records": 1}).to_string();
        let (status, bytes) = send(&h.router, "POST", "/scan-and-set-ttl", Some(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes).unwrap(),
            json!({"processed_records": 1, "total_records": 2, "has_more_records": true})
        );

        let body = json!({"ttl_timestamp": 0, "max_records": 0}).to_string();
        let (status, _) = send(&h.router, "POST", "/scan-and-set-ttl", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_are_merged() {
        let h = harness();
        submit(&h.router, &[ID_A]).await;

        let (status, bytes) = send(&h.router, "GET", "/metrics", None).await;

        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#"email_outbox_submissions_total{outcome="success"} 1"#));
    }

    fn count_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
            .sum()
    }

    /// Store whose every call fails
    struct UnavailableStore;

    fn unavailable() -> StoreError {
        StoreError::Database("no such table: emails".to_string())
    }

    #[async_trait]
    impl OutboxStore for UnavailableStore {
        async fn insert(&self, _id: &str, _path: &str) -> Result<(), StoreError> {
            Err(unavailable())
        }

        async fn get_stale_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
            Err(unavailable())
        }

        async fn get_invalid_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
            Err(unavailable())
        }

        async fn requeue_email(&self, _id: &str) -> Result<EmailStatus, StoreError> {
            Err(unavailable())
        }

        async fn advance_status(
            &self,
            _id: &str,
            _expected_version: i64,
            _to: EmailStatus,
            _reason: Option<String>,
        ) -> Result<EmailRecord, StoreError> {
            Err(unavailable())
        }

        async fn get(&self, _id: &str) -> Result<Option<EmailRecord>, StoreError> {
            Err(unavailable())
        }

        async fn get_history(&self, _id: &str) -> Result<Vec<StatusHistoryEntry>, StoreError> {
            Err(unavailable())
        }

        async fn scan_and_set_ttl(
            &self,
            _ttl_timestamp: i64,
            _max_records: usize,
        ) -> Result<TtlScanResult, StoreError> {
            Err(unavailable())
        }
    }

    #[tokio::test]
    async fn test_store_failures_map_to_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(
            SubmissionService::new(
                Arc::new(FilePayloadStore::new(dir.path())),
                Arc::new(UnavailableStore),
            ),
            Arc::new(MetricsCollector::new().unwrap()),
            dir.path(),
        );
        let router = build_router(state, std::time::Duration::from_secs(5));

        for (uri, message) in [
            ("/stale-emails", "error getting stale emails"),
            ("/invalid-emails", "error getting invalid emails"),
        ] {
            let (status, bytes) = send(&router, "GET", uri, None).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(
                serde_json::from_slice::<Value>(&bytes).unwrap(),
                json!({ "error": message })
            );
        }

        let (status, body) = submit(&router, &[ID_A]).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["results"][0]["error"]["code"], "DATABASE_ERROR");
        // the orphaned payload was removed
        assert_eq!(count_files(dir.path()), 0);
    }
}
