//! Cooperative cancellation.
//!
//! Every pipeline stage polls the token at its start, and row-parsing and
//! OCR loops poll it per page. Cancellation is not an error condition: it
//! stops further side effects (no cache write, no further network calls)
//! and surfaces as `Cancelled` at the pipeline boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Signal that a pipeline run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Shared cancellation flag. Cloning is cheap; all clones observe the
/// same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out of the current stage if cancellation was requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
