use async_trait::async_trait;
use chrono::{DateTime, Utc};
use email_outbox_types::{
    Clock, EmailRecord, EmailStatus, StatusHistoryEntry, SystemClock, TtlScanResult,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::store::{record_reason, requeue_reason, OutboxSettings, OutboxStore, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    settings: OutboxSettings,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Connect using a `sqlite:` URL
    pub async fn connect(
        url: &str,
        max_connections: u32,
        settings: OutboxSettings,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if url.contains(":memory:") {
            return Self::with_options(options, 1, settings).await;
        }

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::with_options(options, max_connections, settings).await
    }

    /// Open (or create) a database file
    pub async fn open<P: AsRef<Path>>(db_path: P, settings: OutboxSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        Self::with_options(options, 5, settings).await
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory(settings: OutboxSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::with_options(options, 1, settings).await
    }

    async fn with_options(
        options: SqliteConnectOptions,
        max_connections: u32,
        settings: OutboxSettings,
    ) -> Result<Self, StoreError> {
        // every :memory: connection is its own database, so a single
        // connection must live for the whole pool lifetime
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options.busy_timeout(BUSY_TIMEOUT))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            settings,
            clock: Arc::new(SystemClock),
        };
        store.run_migrations().await?;

        info!(
            max_connections,
            stale_threshold_minutes = store.settings.stale_threshold_minutes,
            page_size = store.settings.page_size,
            "Outbox store ready"
        );

        Ok(store)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let migrations = [
            include_str!("../migrations/001_create_emails.sql"),
            include_str!("../migrations/002_create_email_statuses.sql"),
            include_str!("../migrations/003_create_status_index.sql"),
            include_str!("../migrations/004_create_history_index.sql"),
        ];

        for migration in migrations {
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(())
    }

    /// Read every matching row, one keyset page at a time
    async fn fetch_paged(
        &self,
        statuses: &[EmailStatus],
        updated_before: Option<i64>,
    ) -> Result<Vec<EmailRecord>, StoreError> {
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let mut sql = format!("SELECT * FROM emails WHERE status IN ({placeholders})");
        if updated_before.is_some() {
            sql.push_str(" AND updated_at < ?");
        }
        sql.push_str(" AND id > ? ORDER BY id LIMIT ?");

        let page_size = self.settings.page_size;
        let mut records = Vec::new();
        let mut after = String::new();

        loop {
            let mut query = sqlx::query(&sql);
            for status in statuses {
                query = query.bind(status.as_str());
            }
            if let Some(cutoff) = updated_before {
                query = query.bind(cutoff);
            }

            let rows = query
                .bind(&after)
                .bind(page_size as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(classify)?;

            let fetched = rows.len();
            for row in &rows {
                records.push(row_to_record(row)?);
            }

            match records.last() {
                Some(last) if fetched == page_size => after = last.id.clone(),
                _ => break,
            }
        }

        Ok(records)
    }
}

/// Version-conditioned update plus history append inside `tx`
async fn apply_transition(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    expected_version: i64,
    to: EmailStatus,
    status_reason: Option<String>,
    history_reason: Option<String>,
    now: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE emails
        SET status = ?, version = version + 1, reason = ?, updated_at = MAX(updated_at, ?)
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(to.as_str())
    .bind(&status_reason)
    .bind(now)
    .bind(id)
    .bind(expected_version)
    .execute(&mut **tx)
    .await
    .map_err(|e| classify_transition(id, e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::ConcurrentModification(id.to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO email_statuses (email_id, status, reason, recorded_at)
        SELECT id, status, ?, updated_at FROM emails WHERE id = ?
        "#,
    )
    .bind(&history_reason)
    .bind(id)
    .execute(&mut **tx)
    .await
    .map_err(|e| classify_transition(id, e))?;

    Ok(())
}

/// Current status and version, read inside `tx`
async fn current_state(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<(EmailStatus, i64), StoreError> {
    let row = sqlx::query("SELECT status, version FROM emails WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    let status = parse_status(&row.get::<String, _>("status"))?;
    Ok((status, row.get("version")))
}

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn insert(&self, id: &str, payload_file_path: &str) -> Result<(), StoreError> {
        let now = self.clock.now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let result = sqlx::query(
            r#"
            INSERT INTO emails (id, status, version, payload_file_path, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(EmailStatus::INITIAL.as_str())
        .bind(payload_file_path)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(StoreError::DuplicateId(id.to_string()));
            }
            Err(e) => return Err(classify(e)),
        }

        sqlx::query(
            "INSERT INTO email_statuses (email_id, status, reason, recorded_at) VALUES (?, ?, NULL, ?)",
        )
        .bind(id)
        .bind(EmailStatus::INITIAL.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;

        Ok(())
    }

    async fn get_stale_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
        let cutoff = self.settings.stale_cutoff(self.clock.now()).timestamp_millis();
        self.fetch_paged(&EmailStatus::IN_FLIGHT, Some(cutoff)).await
    }

    async fn get_invalid_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
        self.fetch_paged(&[EmailStatus::Invalid], None).await
    }

    async fn requeue_email(&self, id: &str) -> Result<EmailStatus, StoreError> {
        let now = self.clock.now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let (current, version) = current_state(&mut tx, id).await?;
        let target = current.requeue_target().ok_or_else(|| StoreError::NotRequeuable {
            id: id.to_string(),
            status: current,
        })?;

        apply_transition(
            &mut tx,
            id,
            version,
            target,
            None,
            Some(requeue_reason(current)),
            now,
        )
        .await?;

        tx.commit().await.map_err(|e| classify_transition(id, e))?;

        debug!(email_id = %id, from = %current, to = %target, "Requeued email");

        Ok(target)
    }

    async fn advance_status(
        &self,
        id: &str,
        expected_version: i64,
        to: EmailStatus,
        reason: Option<String>,
    ) -> Result<EmailRecord, StoreError> {
        let now = self.clock.now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let (current, _) = current_state(&mut tx, id).await?;
        if !current.can_advance_to(to) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to,
            });
        }

        apply_transition(
            &mut tx,
            id,
            expected_version,
            to,
            record_reason(to, reason.clone()),
            reason,
            now,
        )
        .await?;

        let row = sqlx::query("SELECT * FROM emails WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| classify_transition(id, e))?;
        let record = row_to_record(&row)?;

        tx.commit().await.map_err(|e| classify_transition(id, e))?;

        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<EmailRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM emails WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        match row {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT email_id, status, reason, recorded_at FROM email_statuses WHERE email_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|row| {
                Ok(StatusHistoryEntry {
                    email_id: row.get("email_id"),
                    status: parse_status(&row.get::<String, _>("status"))?,
                    reason: row.get("reason"),
                    recorded_at: from_millis(row.get("recorded_at"))?,
                })
            })
            .collect()
    }

    async fn scan_and_set_ttl(
        &self,
        ttl_timestamp: i64,
        max_records: usize,
    ) -> Result<TtlScanResult, StoreError> {
        let terminal = EmailStatus::TERMINAL;
        let placeholders = vec!["?"; terminal.len()].join(", ");
        let eligible = format!("status IN ({placeholders}) AND expires_at IS NULL");

        let mut tx = self.pool.begin().await.map_err(classify)?;

        let update_sql = format!(
            "UPDATE emails SET expires_at = ? WHERE id IN \
             (SELECT id FROM emails WHERE {eligible} ORDER BY id LIMIT ?)"
        );
        let mut update = sqlx::query(&update_sql).bind(ttl_timestamp);
        for status in terminal {
            update = update.bind(status.as_str());
        }
        let processed_records = update
            .bind(max_records as i64)
            .execute(&mut *tx)
            .await
            .map_err(classify)?
            .rows_affected() as usize;

        let count_sql = format!("SELECT COUNT(*) AS remaining FROM emails WHERE {eligible}");
        let mut count = sqlx::query(&count_sql);
        for status in terminal {
            count = count.bind(status.as_str());
        }
        let remaining: i64 = count
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?
            .get("remaining");

        tx.commit().await.map_err(classify)?;

        let total_records = processed_records + remaining as usize;
        debug!(processed_records, total_records, "TTL scan pass complete");

        Ok(TtlScanResult {
            processed_records,
            total_records,
            has_more_records: remaining > 0,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn row_to_record(row: &SqliteRow) -> Result<EmailRecord, StoreError> {
    Ok(EmailRecord {
        id: row.get("id"),
        status: parse_status(&row.get::<String, _>("status"))?,
        version: row.get("version"),
        payload_file_path: row.get("payload_file_path"),
        reason: row.get("reason"),
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
        expires_at: row.get("expires_at"),
    })
}

fn parse_status(s: &str) -> Result<EmailStatus, StoreError> {
    s.parse()
        .map_err(|e: email_outbox_types::UnknownStatus| StoreError::Serialization(e.to_string()))
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {millis}")))
}

fn sqlite_code(e: &sqlx::Error) -> Option<i32> {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().and_then(|c| c.parse().ok()),
        _ => None,
    }
}

/// Map driver errors; overload and unavailability become `Transient`
fn classify(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Transient(e.to_string())
        }
        sqlx::Error::Database(_) => match sqlite_code(&e).map(|code| code & 0xff) {
            Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => StoreError::Transient(e.to_string()),
            _ => StoreError::Database(e.to_string()),
        },
        _ => StoreError::Database(e.to_string()),
    }
}

/// Error from a transition's writes or commit.
///
/// The transaction already read the record, so a busy or locked database
/// here means another writer holds or has moved past that read. Callers
/// re-read and retry, the same as a version mismatch.
fn classify_transition(id: &str, e: sqlx::Error) -> StoreError {
    match sqlite_code(&e) {
        Some(code) if matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED) => {
            StoreError::ConcurrentModification(id.to_string())
        }
        _ => classify(e),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
