//! Vision backend seam

use async_trait::async_trait;
use sorter_core::{Detection, Frame, Result, SorterError};

/// Black-box classifier. An empty list means nothing was found; an error
/// means no answer could be produced.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Run CPU-bound model work off the async workers so callers can still
/// bound it with `tokio::time::timeout`.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SorterError::InferenceUnavailable(format!("inference task failed: {}", e)))?
}

/// Stand-in used when no model could be loaded
#[derive(Debug, Clone)]
pub struct UnavailableVision {
    reason: String,
}

impl UnavailableVision {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl VisionBackend for UnavailableVision {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        Err(SorterError::InferenceUnavailable(self.reason.clone()))
    }
}
