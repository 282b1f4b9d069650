//! Configuration validation

use crate::{AppConfig, ConfigError, Result};

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(ValidationError::new(
            "server.port",
            "port must be greater than 0",
        ));
    }

    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "server.request_timeout_secs",
            "must be greater than 0",
        ));
    }

    if let Err(e) = validate_database_url(&config.database.url) {
        errors.push(e);
    }

    if config.database.max_connections == 0 {
        errors.push(ValidationError::new(
            "database.max_connections",
            "must be greater than 0",
        ));
    }

    if config.payload_storage.path.as_os_str().is_empty() {
        errors.push(ValidationError::new(
            "payload_storage.path",
            "payload storage path is required",
        ));
    }

    if config.outbox.stale_threshold_minutes == 0 {
        errors.push(ValidationError::new(
            "outbox.stale_threshold_minutes",
            "must be greater than 0",
        ));
    }

    if config.outbox.scan_page_size == 0 {
        errors.push(ValidationError::new(
            "outbox.scan_page_size",
            "must be greater than 0",
        ));
    }

    if let Err(e) = validate_log_level(&config.logging.level) {
        errors.push(e);
    }

    if !errors.is_empty() {
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(message));
    }

    Ok(())
}

fn validate_database_url(url: &str) -> std::result::Result<(), ValidationError> {
    if url.starts_with("sqlite:") {
        Ok(())
    } else {
        Err(ValidationError::new(
            "database.url",
            format!("unsupported database url '{url}', expected a sqlite: url"),
        ))
    }
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "logging.level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}
