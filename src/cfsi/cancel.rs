use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::{CfsiError, Result};

/// Cooperative cancellation flag shared between a caller and a bulk
/// extraction or repack.
///
/// Checked between entries only; an entry that has started is finished.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CfsiError::Cancelled);
        }
        Ok(())
    }
}
