//! Metrics and logging setup for the email outbox service
//!
//! # Features
//!
//! - Prometheus metrics in a collector-owned registry
//! - Router serving the text exposition format at `/metrics`
//! - Tracing subscriber setup with env-filter and JSON or pretty output
//!
//! # Example
//!
//! ```no_run
//! use email_outbox_metrics::{init_tracing, metrics_router, MetricsCollector};
//! use std::sync::Arc;
//!
//! init_tracing("info", false).unwrap();
//!
//! let collector = Arc::new(MetricsCollector::new().unwrap());
//! collector.record_batch(3);
//!
//! let app: axum::Router = metrics_router(collector);
//! ```

pub mod collector;
pub mod http;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError, ScanKind};
pub use http::metrics_router;
pub use crate::tracing::{init_tracing, TracingError};
