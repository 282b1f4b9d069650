use email_outbox_metrics::MetricsCollector;
use email_outbox_service::SubmissionService;
use email_outbox_types::{Clock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared handles for every request
#[derive(Clone)]
pub struct AppState {
    pub service: SubmissionService,
    pub metrics: Arc<MetricsCollector>,

    /// Base directory attachment paths are resolved against
    pub attachments_base: PathBuf,

    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        service: SubmissionService,
        metrics: Arc<MetricsCollector>,
        attachments_base: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service,
            metrics,
            attachments_base: attachments_base.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
