use email_outbox_types::SaveResult;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::metrics::OutboxMetrics;

/// Which recovery scan produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Stale,
    Invalid,
}

impl ScanKind {
    fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Stale => "stale",
            ScanKind::Invalid => "invalid",
        }
    }
}

/// Metrics collector for the email outbox service
pub struct MetricsCollector {
    registry: Registry,
    metrics: OutboxMetrics,
}

impl MetricsCollector {
    /// Create a collector with a fresh registry
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Create a collector registering into `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let metrics = OutboxMetrics::register(&registry)
            .map_err(|e| MetricsError::RegistryError(e.to_string()))?;
        Ok(Self { registry, metrics })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SUBMISSION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record the size of an accepted batch request
    pub fn record_batch(&self, size: usize) {
        self.metrics.batch_size.observe(size as f64);
    }

    /// Record one per-item save outcome
    pub fn record_submission(&self, result: &SaveResult) {
        let outcome = match result.error_code {
            Some(code) => code.as_str(),
            None => "success",
        };
        self.metrics.submissions.with_label_values(&[outcome]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_scan(&self, kind: ScanKind, records: usize) {
        self.metrics
            .scan_records
            .with_label_values(&[kind.as_str()])
            .set(records as i64);
    }

    /// Record a requeue attempt; `outcome` is `requeued` or an error kind
    pub fn record_requeue(&self, outcome: &str) {
        self.metrics.requeues.with_label_values(&[outcome]).inc();
    }

    pub fn record_ttl_marked(&self, records: usize) {
        self.metrics.ttl_marked.inc_by(records as u64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Render every registered metric in the Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
    #[error("registry error: {0}")]
    RegistryError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use email_outbox_types::ErrorCode;

    #[test]
    fn test_collectors_are_independent() {
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();

        a.record_requeue("requeued");

        assert!(a.export_metrics().unwrap().contains("email_outbox_requeues_total"));
        assert!(!b.export_metrics().unwrap().contains("email_outbox_requeues_total"));
    }

    #[test]
    fn test_record_submission_outcomes() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_submission(&SaveResult::success("a"));
        collector.record_submission(&SaveResult::failure("b", ErrorCode::DuplicatedId));
        collector.record_submission(&SaveResult::failure("c", ErrorCode::DuplicatedId));

        let output = collector.export_metrics().unwrap();
        assert!(output.contains(r#"email_outbox_submissions_total{outcome="success"} 1"#));
        assert!(output.contains(r#"email_outbox_submissions_total{outcome="DUPLICATED_ID"} 2"#));
    }

    #[test]
    fn test_record_scan_and_ttl() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_scan(ScanKind::Stale, 4);
        collector.record_scan(ScanKind::Stale, 2);
        collector.record_ttl_marked(7);
        collector.record_batch(3);

        let output = collector.export_metrics().unwrap();
        assert!(output.contains(r#"email_outbox_scan_records{scan="stale"} 2"#));
        assert!(output.contains("email_outbox_ttl_marked_total 7"));
        assert!(output.contains("email_outbox_batch_size_count 1"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        MetricsCollector::with_registry(registry.clone()).unwrap();

        assert!(matches!(
            MetricsCollector::with_registry(registry),
            Err(MetricsError::RegistryError(_))
        ));
    }
}
