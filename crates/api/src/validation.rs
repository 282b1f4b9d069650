//! Request bodies and their boundary validation

use chrono::{DateTime, Utc};
use email_outbox_types::{EmailError, EmailFields, EmailMessage};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path};

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

/// Largest batch accepted by the retention scan
pub const MAX_TTL_RECORDS: usize = 10_000;

/// `POST /emails` body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitEmailsRequest {
    #[serde(default)]
    pub data: Vec<EmailItem>,
}

/// One email of a submission batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailItem {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub reply_to: String,

    #[serde(default)]
    pub to: String,

    #[serde(default)]
    pub subject: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_headers: HashMap<String, String>,

    /// curl command the consumer runs after delivery succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_on_success: Option<String>,

    /// curl command the consumer runs after delivery fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_on_failure: Option<String>,
}

impl EmailItem {
    /// Payload persisted for this item: a single-item submission document
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&SubmitEmailsRequest {
            data: vec![self.clone()],
        })
    }

    pub fn to_message(
        &self,
        attachments_base: &Path,
        date: DateTime<Utc>,
    ) -> Result<EmailMessage, EmailError> {
        EmailMessage::new(
            EmailFields {
                message_id: self.id.clone(),
                from: self.from.clone(),
                reply_to: self.reply_to.clone(),
                to: self.to.clone(),
                body_html: self.body_html.clone(),
                body_text: self.body_text.clone(),
                attachments: self.attachments.clone(),
            },
            attachments_base,
            date,
        )
    }
}

/// `POST /scan-and-set-ttl` body
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanAndSetTtlRequest {
    pub ttl_timestamp: i64,
    pub max_records: usize,
}

/// Every problem found in one request, reported together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    fn push(&mut self, field: impl AsRef<str>, message: impl AsRef<str>) {
        self.0.push(format!("{}: {}", field.as_ref(), message.as_ref()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

pub fn is_valid_email(address: &str) -> bool {
    EMAIL_REGEX.is_match(address)
}

pub fn validate_submission(request: &SubmitEmailsRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if request.data.is_empty() {
        errors.push("data", "no email data provided");
        return Err(errors);
    }

    for (i, item) in request.data.iter().enumerate() {
        validate_item(&format!("data[{i}]"), item, &mut errors);
    }

    errors.into_result()
}

fn validate_item(prefix: &str, item: &EmailItem, errors: &mut ValidationErrors) {
    if item.id.is_empty() {
        errors.push(format!("{prefix}.id"), "missing 'id' field");
    } else if uuid::Uuid::parse_str(&item.id).is_err() {
        errors.push(format!("{prefix}.id"), "must be a UUID");
    }

    if item.kind != "email" {
        errors.push(
            format!("{prefix}.type"),
            format!("invalid type '{}', expected 'email'", item.kind),
        );
    }

    for (field, value) in [
        ("from", &item.from),
        ("reply_to", &item.reply_to),
        ("to", &item.to),
    ] {
        if value.is_empty() {
            errors.push(format!("{prefix}.{field}"), format!("missing '{field}' field"));
        } else if !is_valid_email(value) {
            errors.push(format!("{prefix}.{field}"), "invalid email address");
        }
    }

    if item.subject.trim().is_empty() {
        errors.push(format!("{prefix}.subject"), "missing 'subject' field");
    }

    let has_html = item.body_html.as_deref().is_some_and(|b| !b.is_empty());
    let has_text = item.body_text.as_deref().is_some_and(|b| !b.is_empty());
    if !has_html && !has_text {
        errors.push(
            format!("{prefix}.body"),
            "either 'body_html' or 'body_text' must be provided",
        );
    }

    for (j, attachment) in item.attachments.iter().enumerate() {
        if !is_safe_relative_path(attachment) {
            errors.push(
                format!("{prefix}.attachments[{j}]"),
                "must be a non-empty relative path without '..'",
            );
        }
    }

    for (field, command) in [
        ("callback_on_success", &item.callback_on_success),
        ("callback_on_failure", &item.callback_on_failure),
    ] {
        if let Some(command) = command.as_deref().filter(|c| !c.is_empty()) {
            if !command.starts_with("curl ") {
                errors.push(format!("{prefix}.{field}"), "must be a curl command");
            }
        }
    }
}

fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

pub fn validate_ttl_request(request: &ScanAndSetTtlRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if request.ttl_timestamp < 1 {
        errors.push("ttl_timestamp", "must be at least 1");
    }
    if request.max_records == 0 || request.max_records > MAX_TTL_RECORDS {
        errors.push(
            "max_records",
            format!("must be between 1 and {MAX_TTL_RECORDS}"),
        );
    }

    errors.into_result()
}
