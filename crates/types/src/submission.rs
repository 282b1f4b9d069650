use serde::{Deserialize, Serialize};
use std::fmt;

use crate::email::EmailMessage;

/// One item of a batch submission, ready for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRequest {
    pub message_id: String,
    /// Relative key the payload is stored under
    pub storage_path: String,
    pub payload: Vec<u8>,
}

impl EmailRequest {
    pub fn new(
        message_id: impl Into<String>,
        storage_path: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            storage_path: storage_path.into(),
            payload: payload.into(),
        }
    }

    /// Request for an accepted message, keyed by its dated storage path
    pub fn for_message(message: &EmailMessage, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(message.message_id(), message.storage_path(), payload)
    }
}

/// Machine-readable classification of a per-item save failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Id already present in the ledger; treat as already submitted
    DuplicatedId,
    /// Payload could not be written
    StorageError,
    /// Ledger write failed for any unclassified reason
    DatabaseError,
    /// Backend overloaded or unavailable; safe to retry the item later
    TransientError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DuplicatedId => "DUPLICATED_ID",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::TransientError => "TRANSIENT_ERROR",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::DuplicatedId => "Email with this ID already exists",
            ErrorCode::StorageError => "Failed to store email payload",
            ErrorCode::DatabaseError => "Failed to save email to database",
            ErrorCode::TransientError => "Temporary database error, retry possible",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::TransientError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item outcome of a batch save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    pub message_id: String,
    pub success: bool,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl SaveResult {
    pub fn success(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failure(message_id: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message_id: message_id.into(),
            success: false,
            error_code: Some(code),
            error_message: Some(code.message().to_string()),
        }
    }
}
