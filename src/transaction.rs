//! Ordered step collections with parallel and serial execution strategies

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::errors::TransactionError;
use crate::logger::{ConsoleLogger, TransactionLogger};
use crate::snapshot::{SnapshotError, TransactionSnapshot};
use crate::step::Step;

/// An ordered collection of [`Step`]s executed together under a parallel or
/// serial strategy with aggregate rollback.
///
/// The transaction itself is a stateless orchestrator: it is constructed,
/// loaded with steps, and driven by [`run_parallel`](Transaction::run_parallel)
/// or [`run_serial`](Transaction::run_serial). On any step failure it rolls
/// every step back in reverse order and re-raises the original failure.
///
/// A transaction should be built fresh per execution cycle; re-running one
/// whose steps already completed or failed is unsupported.
pub struct Transaction<S> {
    id: String,
    items: Vec<Arc<Step<S>>>,
    logger: Arc<dyn TransactionLogger>,
}

impl<S> Transaction<S> {
    /// Create an empty transaction. The id defaults to the current UNIX
    /// epoch seconds and logging goes to the console.
    pub fn new() -> Self {
        Self {
            id: default_id(),
            items: Vec::new(),
            logger: Arc::new(ConsoleLogger),
        }
    }

    /// Replace the default id. The id is used only for log correlation.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the default console logger.
    pub fn with_logger(mut self, logger: Arc<dyn TransactionLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Bulk-load steps, then re-sort by order.
    pub fn with_steps(mut self, steps: Vec<Step<S>>) -> Self {
        for step in steps {
            self.add(step);
        }
        self.reorder();
        self
    }

    /// The transaction id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The steps, in current serial-execution order.
    pub fn items(&self) -> &[Arc<Step<S>>] {
        &self.items
    }

    /// Append a step, assigning `order = items.len()` when it has none.
    pub fn add(&mut self, mut step: Step<S>) {
        step.assign_order(self.items.len());
        self.items.push(Arc::new(step));
    }

    /// Remove all steps. Previously executed steps keep their own state.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Stable-sort the steps by order. Called after bulk construction and
    /// snapshot restore; public so callers that pre-set orders out of
    /// sequence can re-sort.
    pub fn reorder(&mut self) {
        self.items
            .sort_by_key(|item| item.order().unwrap_or(usize::MAX));
    }

    fn log(&self, message: &str) {
        self.logger.log(&format!("{}: {message}", self.id));
    }

    fn error(&self, message: &str) {
        self.logger.error(&format!("{}: {message}", self.id));
    }
}

impl<S> Default for Transaction<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone + Send + Sync + 'static> Transaction<S> {
    /// Execute every step concurrently, each receiving a clone of the same
    /// initial state.
    ///
    /// Resolves once all steps complete. On the first settled failure the
    /// remaining forward calls are left running (rollback waits on each
    /// step's completion latch), every step is rolled back in reverse order,
    /// and the original failure is returned.
    ///
    /// Steps sharing mutable state through `S` must arrange their own
    /// synchronization; the framework only hands each callback its own clone.
    ///
    /// # Errors
    ///
    /// The triggering step failure once rollback completes, or the rollback
    /// error when rollback itself fails (both are logged).
    pub async fn run_parallel(&self, initial_state: Option<S>) -> Result<(), TransactionError> {
        self.log("Transaction executing.");

        // Spawned so that a fast-failing sibling does not cancel in-flight
        // forward calls when we stop polling.
        let mut executions: FuturesUnordered<_> = self
            .items
            .iter()
            .map(|item| {
                let item = Arc::clone(item);
                let state = initial_state.clone();
                tokio::spawn(async move { item.execute(state).await })
            })
            .collect();

        while let Some(joined) = executions.next().await {
            let result = match joined {
                Ok(result) => result,
                // A panicking forward counts as a failed step.
                Err(join_error) => Err(TransactionError::ExecutionFailed {
                    step: None,
                    source: Box::new(join_error),
                }),
            };
            if let Err(error) = result {
                drop(executions);
                return Err(self.fail_and_roll_back(error).await);
            }
        }

        self.log("Transaction execution succeeded.");
        Ok(())
    }

    /// Execute the steps in ascending order, threading state through the
    /// chain: the first step receives `initial_state`, every subsequent step
    /// receives the state returned by its predecessor.
    ///
    /// The first failure aborts the chain, rolls back in reverse order, and
    /// the original failure is returned. On success, resolves with the final
    /// step's returned state (`None` when the transaction is empty).
    ///
    /// # Errors
    ///
    /// As [`run_parallel`](Transaction::run_parallel).
    pub async fn run_serial(&self, initial_state: Option<S>) -> Result<Option<S>, TransactionError> {
        if self.items.is_empty() {
            return Ok(None);
        }

        self.log("Transaction executing.");

        let mut carried = initial_state;
        for item in &self.items {
            match item.execute(carried.take()).await {
                Ok(new_state) => carried = Some(new_state),
                Err(error) => return Err(self.fail_and_roll_back(error).await),
            }
        }

        self.log("Transaction execution succeeded.");
        Ok(carried)
    }

    /// Roll back every step, dispatched concurrently in descending order.
    ///
    /// Waits for all rollbacks to settle regardless of individual outcomes.
    ///
    /// # Errors
    ///
    /// [`TransactionError::RollbackAggregate`] collecting every rollback
    /// failure, when there is at least one.
    pub async fn rollback_all(&self) -> Result<(), TransactionError> {
        let rollbacks: Vec<_> = self.items.iter().rev().map(|item| item.rollback()).collect();
        let errors: Vec<TransactionError> = future::join_all(rollbacks)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransactionError::RollbackAggregate { errors })
        }
    }

    async fn fail_and_roll_back(&self, error: TransactionError) -> TransactionError {
        self.error(&format!("Transaction failed. {error}"));
        match self.rollback_all().await {
            Ok(()) => {
                self.log("Transaction rolled back successfully.");
                error
            }
            Err(rollback_error) => {
                self.error(&format!("Transaction failed to roll back. {rollback_error}"));
                rollback_error
            }
        }
    }
}

impl<S: Clone> Transaction<S> {
    /// Structural snapshot of the transaction id and every step's plain
    /// fields, for audit and debugging. Callbacks are not captured.
    pub fn snapshot(&self) -> TransactionSnapshot<S> {
        TransactionSnapshot {
            transaction_id: self.id.clone(),
            items: self.items.iter().map(|item| item.snapshot()).collect(),
        }
    }
}

impl<S: Clone + serde::Serialize> Transaction<S> {
    /// Export the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// [`SnapshotError`] when the state type fails to serialize.
    pub fn serialize(&self) -> Result<String, SnapshotError> {
        self.snapshot().to_json()
    }
}

fn default_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .to_string()
}
