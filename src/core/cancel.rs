use crate::core::error::TaskmeshError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Caller-owned cancellation flag, checked at every backend boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` naming the stage that was about to run.
    pub fn check(&self, stage: &str) -> Result<(), TaskmeshError> {
        if self.is_cancelled() {
            return Err(TaskmeshError::Cancelled(format!("cancelled before {}", stage)));
        }
        Ok(())
    }
}
