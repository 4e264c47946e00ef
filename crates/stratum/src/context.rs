//! Per-operation context and cancellation.
//!
//! Backends poll the context's [`CancellationToken`] while a blocking call
//! is in flight and abandon the call once it is cancelled.

use stratum_common::{StratumError, StratumResult};
use tokio_util::sync::CancellationToken;

/// Context passed to every lifecycle and backend operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
}

impl OpContext {
    /// A context that is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context bound to a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// The cancellation token of this context.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the caller gave up on this operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`StratumError::Cancelled`] if the caller gave up.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::Cancelled`] once the token is cancelled.
    pub fn check(&self, operation: &str) -> StratumResult<()> {
        if self.is_cancelled() {
            return Err(StratumError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}
