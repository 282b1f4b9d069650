use email_outbox_store::{OutboxStore, StoreError};
use email_outbox_types::{
    EmailRecord, EmailRequest, EmailStatus, ErrorCode, SaveResult, TtlScanResult,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::payload::PayloadStore;

/// Coordinates payload storage and the ledger for batch submissions
#[derive(Clone)]
pub struct SubmissionService {
    payloads: Arc<dyn PayloadStore>,
    outbox: Arc<dyn OutboxStore>,
}

impl SubmissionService {
    pub fn new(payloads: Arc<dyn PayloadStore>, outbox: Arc<dyn OutboxStore>) -> Self {
        Self { payloads, outbox }
    }

    /// Save a batch, one result per request in input order.
    ///
    /// Items are independent: a failed item never affects another, and the
    /// batch itself never fails. Distinct ids are saved concurrently; repeats
    /// of one id are saved in input order, so the first occurrence wins and
    /// later ones report [`ErrorCode::DuplicatedId`].
    pub async fn save(&self, requests: Vec<EmailRequest>) -> Vec<SaveResult> {
        let total = requests.len();

        let mut groups: Vec<Vec<(usize, EmailRequest)>> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for (index, request) in requests.into_iter().enumerate() {
            let slot = *group_of
                .entry(request.message_id.clone())
                .or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
            groups[slot].push((index, request));
        }

        let mut indexed: Vec<(usize, SaveResult)> =
            join_all(groups.into_iter().map(|group| self.save_group(group)))
                .await
                .into_iter()
                .flatten()
                .collect();
        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<SaveResult> = indexed.into_iter().map(|(_, result)| result).collect();

        let failed = results.iter().filter(|r| !r.success).count();
        info!(total, failed, "Processed submission batch");

        results
    }

    async fn save_group(&self, group: Vec<(usize, EmailRequest)>) -> Vec<(usize, SaveResult)> {
        let mut results = Vec::with_capacity(group.len());
        for (index, request) in group {
            results.push((index, self.save_one(request).await));
        }
        results
    }

    async fn save_one(&self, request: EmailRequest) -> SaveResult {
        let id = request.message_id;

        let path = match self
            .payloads
            .store(&request.storage_path, &request.payload)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!(email_id = %id, error = %e, code = %ErrorCode::StorageError, "Payload store failed");
                return SaveResult::failure(id, ErrorCode::StorageError);
            }
        };

        // the ledger insert is the only duplicate check
        match self.outbox.insert(&id, &path).await {
            Ok(()) => {
                debug!(email_id = %id, "Submission accepted");
                SaveResult::success(id)
            }
            Err(e) => {
                self.discard_payload(&id, &path).await;

                let code = classify(&e);
                warn!(email_id = %id, error = %e, code = %code, "Ledger insert failed");
                SaveResult::failure(id, code)
            }
        }
    }

    /// Best-effort removal of a payload no record references
    async fn discard_payload(&self, id: &str, path: &str) {
        if let Err(e) = self.payloads.delete(path).await {
            error!(email_id = %id, path = %path, error = %e, "Failed to delete orphaned payload");
        }
    }

    pub async fn get_stale_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
        self.outbox.get_stale_emails().await
    }

    pub async fn get_invalid_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
        self.outbox.get_invalid_emails().await
    }

    pub async fn requeue_email(&self, id: &str) -> Result<EmailStatus, StoreError> {
        self.outbox.requeue_email(id).await
    }

    pub async fn scan_and_set_ttl(
        &self,
        ttl_timestamp: i64,
        max_records: usize,
    ) -> Result<TtlScanResult, StoreError> {
        self.outbox.scan_and_set_ttl(ttl_timestamp, max_records).await
    }
}

/// Map a failed insert onto the code callers use to decide on retries
pub fn classify(error: &StoreError) -> ErrorCode {
    match error {
        StoreError::DuplicateId(_) => ErrorCode::DuplicatedId,
        e if e.is_transient() => ErrorCode::TransientError,
        _ => ErrorCode::DatabaseError,
    }
}
