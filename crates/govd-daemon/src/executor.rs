//! Update-executor boundary.
//!
//! The governance core decides *whether* an update may run; something else
//! entirely — the catalog update service — actually runs it. That service is
//! reached through [`UpdateExecutor`], the only seam between the daemon and
//! the outside world. The queue invokes it with every governance lock
//! released, expects it to complete or fail within bounded time, and never
//! retries a failure on its own.

use govd_core::QueuedRequest;
use thiserror::Error;

/// Errors reported by an update executor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// The update ran and reported failure.
    #[error("update execution failed: {reason}")]
    Failed {
        /// Human-readable failure description.
        reason: String,
    },
}

/// The callable invoked for each dequeued update request.
#[async_trait::async_trait]
pub trait UpdateExecutor: Send + Sync {
    /// Execute the update described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] when the update fails; the queue records
    /// the failure and moves on.
    async fn execute(&self, request: &QueuedRequest) -> Result<(), ExecutionError>;
}

/// Executor stub that logs and reports success.
///
/// Stands in for the real update service when the daemon runs without one
/// wired up, keeping the governance path exercisable end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubUpdateExecutor;

#[async_trait::async_trait]
impl UpdateExecutor for StubUpdateExecutor {
    async fn execute(&self, request: &QueuedRequest) -> Result<(), ExecutionError> {
        tracing::info!(
            request_id = %request.id,
            requester_id = %request.requester_id,
            kind = request.kind.as_str(),
            "stub executor: update request acknowledged"
        );
        Ok(())
    }
}
