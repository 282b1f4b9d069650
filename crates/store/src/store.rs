use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use email_outbox_types::{
    Clock, EmailRecord, EmailStatus, StatusHistoryEntry, SystemClock, TtlScanResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

// ═══════════════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════════════

/// Tuning for scans, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxSettings {
    /// In-flight records untouched for longer than this are stale
    pub stale_threshold_minutes: u64,

    /// Maximum rows fetched per page by full scans
    pub page_size: usize,
}

impl OutboxSettings {
    pub fn new(stale_threshold_minutes: u64, page_size: usize) -> Self {
        Self {
            stale_threshold_minutes,
            page_size: page_size.max(1),
        }
    }

    /// Records last updated strictly before this instant are stale
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(self.stale_threshold_minutes as i64)
    }
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self::new(30, 500)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email not found: {0}")]
    NotFound(String),

    #[error("duplicate email ID: {0}")]
    DuplicateId(String),

    #[error("cannot requeue email {id} with status: {status}")]
    NotRequeuable { id: String, status: EmailStatus },

    #[error("email {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: EmailStatus,
        to: EmailStatus,
    },

    #[error("email {0} was modified by another process")]
    ConcurrentModification(String),

    #[error("transient database error: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Backend overload or unavailability; the caller may retry later
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::DuplicateId(_) => "duplicate_id",
            StoreError::NotRequeuable { .. } => "not_requeuable",
            StoreError::InvalidTransition { .. } => "invalid_transition",
            StoreError::ConcurrentModification(_) => "concurrent_modification",
            StoreError::Transient(_) => "transient",
            StoreError::Database(_) => "database",
            StoreError::Serialization(_) => "serialization",
            StoreError::Connection(_) => "connection",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Submission ledger - can be implemented for different backends
///
/// Every mutating method writes the record change and its history entry as
/// one atomic unit. Dropping a pending future leaves nothing half-applied.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Create the record at `ACCEPTED`, version 1, with its first history entry
    async fn insert(&self, id: &str, payload_file_path: &str) -> Result<(), StoreError>;

    /// Every in-flight record last updated before now minus the stale threshold
    async fn get_stale_emails(&self) -> Result<Vec<EmailRecord>, StoreError>;

    /// Every record in `INVALID`, including its reason
    async fn get_invalid_emails(&self) -> Result<Vec<EmailRecord>, StoreError>;

    /// Force an in-flight record back to its resumable status.
    ///
    /// Returns the status the record was moved to.
    async fn requeue_email(&self, id: &str) -> Result<EmailStatus, StoreError>;

    /// Apply a forward transition reported by the delivery consumer,
    /// conditioned on `expected_version`
    async fn advance_status(
        &self,
        id: &str,
        expected_version: i64,
        to: EmailStatus,
        reason: Option<String>,
    ) -> Result<EmailRecord, StoreError>;

    /// Get record by ID
    async fn get(&self, id: &str) -> Result<Option<EmailRecord>, StoreError>;

    /// History entries for a record, oldest first
    async fn get_history(&self, id: &str) -> Result<Vec<StatusHistoryEntry>, StoreError>;

    /// Mark up to `max_records` terminal records lacking a TTL with `ttl_timestamp`
    async fn scan_and_set_ttl(
        &self,
        ttl_timestamp: i64,
        max_records: usize,
    ) -> Result<TtlScanResult, StoreError>;
}

/// Reason recorded on the record itself; only failure classifications keep one
pub(crate) fn record_reason(to: EmailStatus, reason: Option<String>) -> Option<String> {
    if to == EmailStatus::Invalid {
        reason
    } else {
        None
    }
}

pub(crate) fn requeue_reason(from: EmailStatus) -> String {
    format!("Requeued from {from}")
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Ledger {
    emails: HashMap<String, EmailRecord>,
    history: HashMap<String, Vec<StatusHistoryEntry>>,
}

impl Ledger {
    /// Version-conditioned update plus history append; caller holds the lock
    fn apply_transition(
        &mut self,
        id: &str,
        expected_version: i64,
        to: EmailStatus,
        status_reason: Option<String>,
        history_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<EmailRecord, StoreError> {
        let record = self
            .emails
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if record.version != expected_version {
            return Err(StoreError::ConcurrentModification(id.to_string()));
        }

        record.status = to;
        record.version += 1;
        record.reason = status_reason;
        record.updated_at = record.updated_at.max(now);

        let mut entry = StatusHistoryEntry::new(id, to, record.updated_at);
        entry.reason = history_reason;
        let updated = record.clone();

        self.history.entry(id.to_string()).or_default().push(entry);

        Ok(updated)
    }

    fn sorted(&self, filter: impl Fn(&EmailRecord) -> bool) -> Vec<EmailRecord> {
        let mut results: Vec<_> = self.emails.values().filter(|e| filter(e)).cloned().collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }
}

#[derive(Debug)]
pub struct InMemoryStore {
    ledger: Arc<RwLock<Ledger>>,
    settings: OutboxSettings,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(settings: OutboxSettings) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::default())),
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get number of records (for testing)
    pub async fn len(&self) -> usize {
        self.ledger.read().await.emails.len()
    }

    /// Check if store is empty (for testing)
    pub async fn is_empty(&self) -> bool {
        self.ledger.read().await.emails.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(OutboxSettings::default())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn insert(&self, id: &str, payload_file_path: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;

        if ledger.emails.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }

        let record = EmailRecord::new(id.to_string(), payload_file_path.to_string(), now);
        ledger.emails.insert(id.to_string(), record);
        ledger
            .history
            .entry(id.to_string())
            .or_default()
            .push(StatusHistoryEntry::new(id, EmailStatus::INITIAL, now));

        Ok(())
    }

    async fn get_stale_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
        let cutoff = self.settings.stale_cutoff(self.clock.now());
        let ledger = self.ledger.read().await;
        Ok(ledger.sorted(|e| e.is_stale(cutoff)))
    }

    async fn get_invalid_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
        let ledger = self.ledger.read().await;
        Ok(ledger.sorted(|e| e.status == EmailStatus::Invalid))
    }

    async fn requeue_email(&self, id: &str) -> Result<EmailStatus, StoreError> {
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;

        let (current, version) = match ledger.emails.get(id) {
            Some(record) => (record.status, record.version),
            None => return Err(StoreError::NotFound(id.to_string())),
        };

        let target = current.requeue_target().ok_or_else(|| StoreError::NotRequeuable {
            id: id.to_string(),
            status: current,
        })?;

        ledger.apply_transition(id, version, target, None, Some(requeue_reason(current)), now)?;

        Ok(target)
    }

    async fn advance_status(
        &self,
        id: &str,
        expected_version: i64,
        to: EmailStatus,
        reason: Option<String>,
    ) -> Result<EmailRecord, StoreError> {
        let now = self.clock.now();
        let mut ledger = self.ledger.write().await;

        let current = match ledger.emails.get(id) {
            Some(record) => record.status,
            None => return Err(StoreError::NotFound(id.to_string())),
        };

        if !current.can_advance_to(to) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to,
            });
        }

        ledger.apply_transition(
            id,
            expected_version,
            to,
            record_reason(to, reason.clone()),
            reason,
            now,
        )
    }

    async fn get(&self, id: &str) -> Result<Option<EmailRecord>, StoreError> {
        Ok(self.ledger.read().await.emails.get(id).cloned())
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        Ok(self
            .ledger
            .read()
            .await
            .history
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn scan_and_set_ttl(
        &self,
        ttl_timestamp: i64,
        max_records: usize,
    ) -> Result<TtlScanResult, StoreError> {
        let mut ledger = self.ledger.write().await;

        let mut eligible: Vec<String> = ledger
            .emails
            .values()
            .filter(|e| e.needs_ttl())
            .map(|e| e.id.clone())
            .collect();
        eligible.sort();

        let total_records = eligible.len();
        let mut processed_records = 0;
        for id in eligible.iter().take(max_records) {
            if let Some(record) = ledger.emails.get_mut(id) {
                record.expires_at = Some(ttl_timestamp);
                processed_records += 1;
            }
        }

        Ok(TtlScanResult {
            processed_records,
            total_records,
            has_more_records: total_records > processed_records,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
