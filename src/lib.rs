//! Email outbox: a durable submission ledger for outbound email
//!
//! Submissions are accepted in batches, their payloads written to storage
//! and a ledger record created per email. A separate delivery consumer
//! advances records through the delivery lifecycle; the recovery scans and
//! requeue bring back submissions it abandoned mid-pipeline.

pub use email_outbox_api as api;
pub use email_outbox_config as config;
pub use email_outbox_metrics as metrics;
pub use email_outbox_service as service;
pub use email_outbox_store as store;
pub use email_outbox_types as types;
