use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("either body_html or body_text must be provided")]
    MissingBody,
}

/// Outbound email accepted for dispatch.
///
/// Holds what the submission pipeline routes on; the full content travels
/// in the stored payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    message_id: String,
    to: String,
    attachments: Vec<PathBuf>,
    date: DateTime<Utc>,
}

/// Raw fields for [`EmailMessage::new`]
#[derive(Debug, Clone, Default)]
pub struct EmailFields {
    pub message_id: String,
    pub from: String,
    pub reply_to: String,
    pub to: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub attachments: Vec<String>,
}

impl EmailMessage {
    /// Build a message, resolving attachments against `attachments_base`.
    pub fn new(
        fields: EmailFields,
        attachments_base: &Path,
        date: DateTime<Utc>,
    ) -> Result<Self, EmailError> {
        let required = [
            ("id", &fields.message_id),
            ("from", &fields.from),
            ("reply_to", &fields.reply_to),
            ("to", &fields.to),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(EmailError::MissingField(name));
            }
        }

        let has_body = [&fields.body_html, &fields.body_text]
            .into_iter()
            .flatten()
            .any(|b| !b.is_empty());
        if !has_body {
            return Err(EmailError::MissingBody);
        }

        let attachments = fields
            .attachments
            .iter()
            .map(|a| attachments_base.join(a))
            .collect();

        Ok(Self {
            message_id: fields.message_id,
            to: fields.to,
            attachments,
            date,
        })
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn attachments(&self) -> &[PathBuf] {
        &self.attachments
    }

    /// Relative storage location, `<year>/<month name>/<id>`
    pub fn storage_path(&self) -> String {
        format!("{}/{}", self.date.format("%Y/%B"), self.message_id)
    }
}
