//! Error types for transaction execution and rollback

use std::time::Duration;

/// Boxed error type accepted from forward and reverse callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error taxonomy for steps and transactions.
///
/// Step-level failures are never swallowed: they propagate to the owning
/// [`Transaction`](crate::Transaction), which logs them and triggers
/// compensation. When compensation itself fails, the rollback error is
/// surfaced in place of the original (both are logged).
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// `execute` was called on a step that is not in `NotStarted`, or on a
    /// step that was barred from starting by an earlier rollback.
    #[error("{}: already executed and cannot be re-executed", step_label(.step))]
    AlreadyExecuted {
        /// Name of the offending step, if it has one
        step: Option<String>,
    },

    /// The forward callback failed.
    #[error("{}: failed to execute: {source}", step_label(.step))]
    ExecutionFailed {
        /// Name of the failed step, if it has one
        step: Option<String>,
        /// Underlying cause reported by the forward callback
        #[source]
        source: BoxError,
    },

    /// The reverse callback failed. Rollback is never retried; one failed
    /// rollback attempt is terminal for that step within this cycle.
    #[error("{}: failed to roll back: {source}", step_label(.step))]
    RollbackFailed {
        /// Name of the failed step, if it has one
        step: Option<String>,
        /// Underlying cause reported by the reverse callback
        #[source]
        source: BoxError,
    },

    /// Rollback gave up waiting for an in-flight forward call to settle.
    ///
    /// The caller is left not knowing whether the underlying effect
    /// eventually applied; this is a bounded-wait tradeoff, not a guarantee
    /// of eventual consistency.
    #[error("{}: timed out after {timeout:?} waiting for the forward call to settle", step_label(.step))]
    RollbackTimedOut {
        /// Name of the step, if it has one
        step: Option<String>,
        /// How long rollback waited before giving up
        timeout: Duration,
    },

    /// One or more rollbacks failed during
    /// [`rollback_all`](crate::Transaction::rollback_all). Every failure is
    /// collected, not just the first.
    #[error("rollback failed for {} of the completed steps", .errors.len())]
    RollbackAggregate {
        /// All individual rollback failures, in dispatch (descending) order
        errors: Vec<TransactionError>,
    },
}

fn step_label(step: &Option<String>) -> &str {
    step.as_deref().unwrap_or("transaction step")
}
