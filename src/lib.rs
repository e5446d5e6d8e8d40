//! Compensating Transactions (Sagas)
//!
//! A small coordinator for "all-or-nothing" semantics over operations that
//! cannot join a real atomic transaction: every [`Step`] pairs a forward
//! action with a reverse (compensating) action, and a [`Transaction`] runs
//! an ordered collection of steps either concurrently or in sequence,
//! automatically undoing completed steps when any step fails. True atomicity
//! is traded for best-effort compensation.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use transact::{Step, Transaction, TracingLogger};
//!
//! let mut tx = Transaction::new().with_logger(Arc::new(TracingLogger));
//!
//! tx.add(
//!     Step::new(
//!         |order: Option<Order>| async move { place_order(order).await },
//!         |order| async move { cancel_order(order).await },
//!     )
//!     .with_name("place_order"),
//! );
//! tx.add(
//!     Step::new(
//!         |order| async move { charge_card(order).await },
//!         |order| async move { refund_card(order).await },
//!     )
//!     .with_name("charge_card"),
//! );
//!
//! // State threads through the chain; on failure, completed steps are
//! // rolled back in reverse order and the original error is returned.
//! let final_state = tx.run_serial(Some(order)).await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod errors;
mod step;
mod transaction;

// === Observability ===
mod logger;

// === Snapshots ===
mod snapshot;

// === Re-exports ===

// Errors
pub use errors::{BoxError, TransactionError};

// Step
pub use step::{CompletionState, ForwardFn, ReverseFn, Step, DEFAULT_ROLLBACK_TIMEOUT};

// Transaction
pub use transaction::Transaction;

// Logging
pub use logger::{ConsoleLogger, NoopLogger, TracingLogger, TransactionLogger};

// Snapshots
pub use snapshot::{SnapshotError, StepSnapshot, TransactionSnapshot};
