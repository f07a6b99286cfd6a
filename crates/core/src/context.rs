//! Ready-made execution contexts

use crate::error::{Error, Result};
use crate::traits::ExecutionContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Context for headless use: discards progress, never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullContext;

impl ExecutionContext for NullContext {
    fn report_progress(&self, _fraction: f64) {}

    fn report_message(&self, _message: &str) {}

    fn check_cancelled(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared cancellation flag.
///
/// Clones share the flag, so one clone can be handed to the retrieval while
/// another is kept by whoever decides to cancel.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl ExecutionContext for CancellationToken {
    fn report_progress(&self, _fraction: f64) {}

    fn report_message(&self, _message: &str) {}

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_context_never_cancels() {
        assert!(NullContext.check_cancelled().is_ok());
    }

    #[test]
    fn test_token_clones_share_flag() {
        let token = CancellationToken::new();
        let handed_out = token.clone();
        assert!(handed_out.check_cancelled().is_ok());

        token.cancel();
        assert!(matches!(handed_out.check_cancelled(), Err(Error::Cancelled)));
    }
}
