use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

/// Every metric the service exports, registered into one registry
#[derive(Clone)]
pub struct OutboxMetrics {
    // ═══════════════════════════════════════════════════════════════════════════
    // SUBMISSION METRICS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Submitted items by outcome (`success` or error code)
    pub submissions: IntCounterVec,

    /// Items per batch request
    pub batch_size: Histogram,

    // ═══════════════════════════════════════════════════════════════════════════
    // RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════
    /// Size of the most recent scan result, by scan
    pub scan_records: IntGaugeVec,

    /// Requeue attempts by outcome
    pub requeues: IntCounterVec,

    /// Records marked by retention scans
    pub ttl_marked: IntCounter,
}

impl OutboxMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let submissions = IntCounterVec::new(
            Opts::new(
                "email_outbox_submissions_total",
                "Submitted emails by outcome",
            ),
            &["outcome"],
        )?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new("email_outbox_batch_size", "Emails per submission batch")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;

        let scan_records = IntGaugeVec::new(
            Opts::new(
                "email_outbox_scan_records",
                "Records returned by the most recent scan",
            ),
            &["scan"],
        )?;

        let requeues = IntCounterVec::new(
            Opts::new("email_outbox_requeues_total", "Requeue attempts by outcome"),
            &["outcome"],
        )?;

        let ttl_marked = IntCounter::new(
            "email_outbox_ttl_marked_total",
            "Terminal records marked with an expiry",
        )?;

        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(scan_records.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(ttl_marked.clone()))?;

        Ok(Self {
            submissions,
            batch_size,
            scan_records,
            requeues,
            ttl_marked,
        })
    }
}
