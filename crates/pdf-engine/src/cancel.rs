//! Cancellation token for page renders
//!
//! A render runs on a worker thread while the viewer keeps handling input.
//! The viewer holds one clone of the token and the renderer holds another;
//! cancelling either side is observed by both.

use crate::PdfEngineError;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag shared between a render task and its owner.
///
/// # Example
///
/// ```
/// use pdf_engine::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// assert!(worker_token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once `cancel()` has been called on any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Early-exit helper for renderers: `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), PdfEngineError> {
        if self.is_cancelled() {
            Err(PdfEngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
