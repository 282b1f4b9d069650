use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EmailStatus;

// ═══════════════════════════════════════════════════════════════════════════
// LEDGER RECORDS
// ═══════════════════════════════════════════════════════════════════════════

/// One ledger record per accepted submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailRecord {
    pub id: String,
    pub status: EmailStatus,

    /// Optimistic-concurrency token; 1 after insert, +1 per accepted update
    pub version: i64,

    pub payload_file_path: String,

    /// Explanation for a failure classification such as `INVALID`
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Retention marker, set by the TTL scan on terminal records
    pub expires_at: Option<i64>,
}

impl EmailRecord {
    /// Create the record written at insert time
    pub fn new(id: String, payload_file_path: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: EmailStatus::INITIAL,
            version: 1,
            payload_file_path,
            reason: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    /// Check if the submission is in flight and has not moved since `threshold`
    pub fn is_stale(&self, threshold: DateTime<Utc>) -> bool {
        self.status.is_in_flight() && self.updated_at < threshold
    }

    /// Check if the record is eligible for retention marking
    pub fn needs_ttl(&self) -> bool {
        self.status.is_terminal() && self.expires_at.is_none()
    }

    pub fn summary(&self) -> EmailSummary {
        EmailSummary {
            id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            error_message: if self.status == EmailStatus::Invalid {
                self.reason.clone()
            } else {
                None
            },
        }
    }
}

/// Append-only audit entry, one per accepted transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryEntry {
    pub email_id: String,
    pub status: EmailStatus,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(email_id: impl Into<String>, status: EmailStatus, recorded_at: DateTime<Utc>) -> Self {
        Self {
            email_id: email_id.into(),
            status,
            reason: None,
            recorded_at,
        }
    }
}

/// Public view returned by the stale and invalid scans
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailSummary {
    pub id: String,
    pub status: EmailStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

/// Outcome of one retention-marking pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlScanResult {
    pub processed_records: usize,
    pub total_records: usize,
    pub has_more_records: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_new_record_defaults() {
        let record = EmailRecord::new("id-1".to_string(), "/p/id-1.json".to_string(), at(0));

        assert_eq!(record.status, EmailStatus::Accepted);
        assert_eq!(record.version, 1);
        assert_eq!(record.created_at, record.updated_at);
        assert!(record.reason.is_none());
    }

    #[test]
    fn test_is_stale() {
        let mut record = EmailRecord::new("id-1".to_string(), "/p".to_string(), at(0));
        let threshold = at(0) + Duration::minutes(1);

        // ACCEPTED is never stale
        assert!(!record.is_stale(threshold));

        record.status = EmailStatus::Processing;
        assert!(record.is_stale(threshold));

        // strictly older than the threshold
        assert!(!record.is_stale(at(0)));
    }

    #[test]
    fn test_summary_only_carries_invalid_reason() {
        let mut record = EmailRecord::new("id-1".to_string(), "/p".to_string(), at(0));
        record.reason = Some("bad recipient".to_string());
        record.status = EmailStatus::Processing;
        assert_eq!(record.summary().error_message, None);

        record.status = EmailStatus::Invalid;
        assert_eq!(
            record.summary().error_message.as_deref(),
            Some("bad recipient")
        );
    }

    #[test]
    fn test_summary_json_shape() {
        let record = EmailRecord::new("id-1".to_string(), "/p".to_string(), at(0));
        let json = serde_json::to_value(record.summary()).unwrap();

        assert_eq!(json["id"], "id-1");
        assert_eq!(json["status"], "ACCEPTED");
        assert!(json.get("error_message").is_none());
        assert!(json["created_at"].as_str().unwrap().starts_with("2026-03-01T12:00:00"));
    }
}
