//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sink for user-visible progress during a pipeline run.
pub trait ProgressSink: Send + Sync {
    /// Overall progress in percent, reported before each feature.
    fn set_progress(&self, percent: f64);

    /// Informational message streamed during the run.
    fn push_info(&self, message: &str);

    /// Per-feature warning streamed during the run.
    fn push_warning(&self, message: &str);
}

/// Default sink that forwards progress to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn set_progress(&self, percent: f64) {
        debug!(percent, "Progress");
    }

    fn push_info(&self, message: &str) {
        info!("{message}");
    }

    fn push_warning(&self, message: &str) {
        warn!("{message}");
    }
}

/// Clonable cancellation flag, polled once at the top of each per-feature
/// iteration. An in-flight query is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Processing stops before the next feature starts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
