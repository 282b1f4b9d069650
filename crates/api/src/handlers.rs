//! Route handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use email_outbox_metrics::ScanKind;
use email_outbox_types::{EmailRequest, EmailSummary, SaveResult, TtlScanResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{
    validate_submission, validate_ttl_request, ScanAndSetTtlRequest, SubmitEmailsRequest,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemResult {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ItemError>,
}

impl From<&SaveResult> for ItemResult {
    fn from(result: &SaveResult) -> Self {
        let error = result.error_code.map(|code| ItemError {
            code: code.as_str().to_string(),
            message: result
                .error_message
                .clone()
                .unwrap_or_else(|| code.message().to_string()),
        });

        Self {
            id: result.message_id.clone(),
            status: if result.success { "success" } else { "error" }.to_string(),
            error,
        }
    }
}

/// Body of a partially or wholly failed submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitEmailsResponse {
    pub summary: BatchSummary,
    pub results: Vec<ItemResult>,
}

impl SubmitEmailsResponse {
    pub fn from_results(results: &[SaveResult]) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            summary: BatchSummary {
                total: results.len(),
                successful,
                failed: results.len() - successful,
            },
            results: results.iter().map(ItemResult::from).collect(),
        }
    }
}

/// Parse a JSON body so that malformed input is a 400
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

pub async fn submit_emails(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: SubmitEmailsRequest = parse_body(&body)?;
    validate_submission(&request)?;

    let now = state.clock.now();
    let mut batch = Vec::with_capacity(request.data.len());
    for item in &request.data {
        let message = item
            .to_message(&state.attachments_base, now)
            .map_err(|e| ApiError::BadRequest(format!("{}: {e}", item.id)))?;

        let payload = item.to_payload().map_err(|e| {
            error!(email_id = %item.id, error = %e, "Failed to encode payload");
            ApiError::Internal("error encoding email payload")
        })?;

        debug!(
            email_id = %message.message_id(),
            to = %message.to(),
            attachments = message.attachments().len(),
            "Accepted email for storage"
        );
        batch.push(EmailRequest::for_message(&message, payload));
    }

    state.metrics.record_batch(batch.len());
    let results = state.service.save(batch).await;
    for result in &results {
        state.metrics.record_submission(result);
    }

    let response = SubmitEmailsResponse::from_results(&results);
    info!(
        total = response.summary.total,
        successful = response.summary.successful,
        failed = response.summary.failed,
        "Submission handled"
    );

    Ok(match (response.summary.successful, response.summary.failed) {
        (_, 0) => (StatusCode::CREATED, Json(json!({}))).into_response(),
        (0, _) => (StatusCode::UNPROCESSABLE_ENTITY, Json(response)).into_response(),
        _ => (StatusCode::OK, Json(response)).into_response(),
    })
}

pub async fn get_stale_emails(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmailSummary>>, ApiError> {
    let records = state.service.get_stale_emails().await.map_err(|e| {
        error!(error = %e, "Failed to get stale emails");
        ApiError::Internal("error getting stale emails")
    })?;

    state.metrics.record_scan(ScanKind::Stale, records.len());
    Ok(Json(records.iter().map(|r| r.summary()).collect()))
}

pub async fn get_invalid_emails(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmailSummary>>, ApiError> {
    let records = state.service.get_invalid_emails().await.map_err(|e| {
        error!(error = %e, "Failed to get invalid emails");
        ApiError::Internal("error getting invalid emails")
    })?;

    state.metrics.record_scan(ScanKind::Invalid, records.len());
    Ok(Json(records.iter().map(|r| r.summary()).collect()))
}

pub async fn requeue_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("id parameter is required".to_string()));
    }

    match state.service.requeue_email(id).await {
        Ok(status) => {
            state.metrics.record_requeue("requeued");
            info!(email_id = %id, status = %status, "Email requeued");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            state.metrics.record_requeue(e.kind());
            warn!(email_id = %id, error = %e, kind = e.kind(), "Requeue failed");
            Err(ApiError::Internal("error requeuing email"))
        }
    }
}

pub async fn scan_and_set_ttl(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TtlScanResult>, ApiError> {
    let request: ScanAndSetTtlRequest = parse_body(&body)?;
    validate_ttl_request(&request)?;

    let result = state
        .service
        .scan_and_set_ttl(request.ttl_timestamp, request.max_records)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to scan and set ttl");
            ApiError::Internal("error scanning and setting ttl")
        })?;

    state.metrics.record_ttl_marked(result.processed_records);
    info!(
        processed = result.processed_records,
        total = result.total_records,
        has_more = result.has_more_records,
        "Retention scan completed"
    );
    Ok(Json(result))
}

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
