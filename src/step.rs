//! Reversible transaction steps with a latch-guarded rollback

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::errors::{BoxError, TransactionError};
use crate::snapshot::StepSnapshot;

/// Default bound on how long rollback waits for an in-flight forward call.
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Boxed forward callback: current state in, new state out.
pub type ForwardFn<S> =
    Box<dyn Fn(Option<S>) -> BoxFuture<'static, Result<S, BoxError>> + Send + Sync>;

/// Boxed reverse callback: undoes the effect of a completed forward call.
pub type ReverseFn<S> = Box<dyn Fn(S) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Where a step is in its forward lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    /// The forward call has not been dispatched
    NotStarted,
    /// The forward call is dispatched but has not settled
    InFlight,
    /// The forward call resolved successfully
    Completed,
    /// The forward call failed
    Failed,
}

/// Settled outcome of one execute cycle, published on the completion latch.
#[derive(Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Pending,
    Succeeded,
    Failed,
}

struct StepStatus {
    completion: CompletionState,
    in_rollback: bool,
}

/// One reversible unit of work: a forward/reverse callback pair plus the
/// step's own completion state machine.
///
/// The forward callback receives the effective state (the override passed to
/// [`execute`](Step::execute), or the stored state) and produces the new
/// state. The reverse callback receives the state the forward call produced
/// and undoes its effect. Reverse must never run against a forward call that
/// has not settled successfully; rollback enforces this by waiting on a
/// settle-once latch rather than polling the completion field.
pub struct Step<S> {
    forward: ForwardFn<S>,
    reverse: ReverseFn<S>,
    state: Mutex<Option<S>>,
    status: Mutex<StepStatus>,
    // One-shot per execute cycle; reset to Pending when a cycle starts.
    latch: watch::Sender<LatchState>,
    last_error: Mutex<Option<String>>,
    name: Option<String>,
    order: Option<usize>,
    timeout: Duration,
}

// Critical sections only ever assign plain fields, so a poisoned lock still
// holds consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> Step<S> {
    /// Create a step from a forward/reverse callback pair.
    ///
    /// Both callbacks must be async; the forward callback returns the new
    /// state, the reverse callback returns nothing.
    pub fn new<F, FFut, R, RFut>(forward: F, reverse: R) -> Self
    where
        F: Fn(Option<S>) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = Result<S, BoxError>> + Send + 'static,
        R: Fn(S) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let (latch, _) = watch::channel(LatchState::Pending);
        let forward: ForwardFn<S> = Box::new(move |s| Box::pin(forward(s)));
        let reverse: ReverseFn<S> = Box::new(move |s| Box::pin(reverse(s)));
        Self {
            forward,
            reverse,
            state: Mutex::new(None),
            status: Mutex::new(StepStatus {
                completion: CompletionState::NotStarted,
                in_rollback: false,
            }),
            latch,
            last_error: Mutex::new(None),
            name: None,
            order: None,
            timeout: DEFAULT_ROLLBACK_TIMEOUT,
        }
    }

    /// Seed the step with an initial state.
    pub fn with_state(self, state: S) -> Self {
        *lock(&self.state) = Some(state);
        self
    }

    /// Label the step; the name annotates error messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bound how long rollback waits for an in-flight forward call to settle.
    /// Defaults to [`DEFAULT_ROLLBACK_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pre-set the position within the owning transaction. Steps without an
    /// order are assigned one when added.
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    /// The step's label, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Position within the owning transaction.
    pub fn order(&self) -> Option<usize> {
        self.order
    }

    pub(crate) fn assign_order(&mut self, order: usize) {
        if self.order.is_none() {
            self.order = Some(order);
        }
    }

    /// Current position in the forward lifecycle.
    pub fn completion_state(&self) -> CompletionState {
        lock(&self.status).completion
    }

    /// Whether rollback barred this step from ever starting.
    pub fn in_rollback(&self) -> bool {
        lock(&self.status).in_rollback
    }

    /// Message of the last forward failure, retained for diagnostics.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }
}

impl<S: Clone + Send + 'static> Step<S> {
    /// Run the forward callback once.
    ///
    /// `override_state`, when given, replaces the stored state for this
    /// invocation before the forward callback runs. On success the returned
    /// value becomes the step's new state and is also handed back to the
    /// caller.
    ///
    /// # Errors
    ///
    /// [`TransactionError::AlreadyExecuted`] when the step is not in
    /// `NotStarted` or a sibling's rollback already barred it from starting;
    /// [`TransactionError::ExecutionFailed`] when the forward callback fails.
    pub async fn execute(&self, override_state: Option<S>) -> Result<S, TransactionError> {
        {
            let mut status = lock(&self.status);
            if status.completion != CompletionState::NotStarted || status.in_rollback {
                return Err(TransactionError::AlreadyExecuted {
                    step: self.name.clone(),
                });
            }
            status.completion = CompletionState::InFlight;
            // Fresh cycle: any rollback dispatched from here on waits for
            // this cycle's outcome.
            self.latch.send_replace(LatchState::Pending);
        }

        let effective = {
            let mut state = lock(&self.state);
            if let Some(s) = override_state {
                *state = Some(s);
            }
            state.clone()
        };

        match (self.forward)(effective).await {
            Ok(new_state) => {
                *lock(&self.state) = Some(new_state.clone());
                lock(&self.status).completion = CompletionState::Completed;
                self.latch.send_replace(LatchState::Succeeded);
                Ok(new_state)
            }
            Err(source) => {
                *lock(&self.last_error) = Some(source.to_string());
                lock(&self.status).completion = CompletionState::Failed;
                self.latch.send_replace(LatchState::Failed);
                Err(TransactionError::ExecutionFailed {
                    step: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Undo the effect of a completed forward call, if there is one.
    ///
    /// Safe to call regardless of the step's current state, including
    /// concurrently with an in-flight [`execute`](Step::execute):
    ///
    /// - never started: bars the step from starting and returns (nothing to
    ///   undo);
    /// - forward failed: nothing to undo, returns successfully;
    /// - in flight or completed: waits on the completion latch up to the
    ///   step's timeout, then invokes the reverse callback only when the
    ///   forward call settled successfully. A successful reverse resets the
    ///   step to `NotStarted`.
    ///
    /// # Errors
    ///
    /// [`TransactionError::RollbackTimedOut`] when the forward call does not
    /// settle in time (the reverse callback is not invoked, so whether the
    /// forward effect eventually applied is unknown);
    /// [`TransactionError::RollbackFailed`] when the reverse callback fails.
    pub async fn rollback(&self) -> Result<(), TransactionError> {
        {
            let mut status = lock(&self.status);
            match status.completion {
                CompletionState::NotStarted => {
                    status.in_rollback = true;
                    return Ok(());
                }
                CompletionState::Failed => return Ok(()),
                CompletionState::InFlight | CompletionState::Completed => {}
            }
        }

        let mut latch = self.latch.subscribe();
        let settled = tokio::time::timeout(
            self.timeout,
            latch.wait_for(|outcome| *outcome != LatchState::Pending),
        )
        .await;

        let outcome = match settled {
            Err(_elapsed) => {
                return Err(TransactionError::RollbackTimedOut {
                    step: self.name.clone(),
                    timeout: self.timeout,
                })
            }
            // The sender lives on self, so the channel cannot close while we
            // hold a reference to the step.
            Ok(Err(_closed)) => return Ok(()),
            Ok(Ok(outcome)) => *outcome,
        };

        if outcome != LatchState::Succeeded {
            // Forward never applied its effect; nothing to undo.
            return Ok(());
        }

        let state = lock(&self.state).clone();
        let Some(state) = state else {
            return Ok(());
        };

        match (self.reverse)(state).await {
            Ok(()) => {
                let mut status = lock(&self.status);
                status.completion = CompletionState::NotStarted;
                self.latch.send_replace(LatchState::Pending);
                Ok(())
            }
            Err(source) => Err(TransactionError::RollbackFailed {
                step: self.name.clone(),
                source,
            }),
        }
    }
}

impl<S: Clone> Step<S> {
    /// The step's current state: the seeded value until a forward call
    /// replaces it.
    pub fn state(&self) -> Option<S> {
        lock(&self.state).clone()
    }

    /// Structural snapshot of the step's plain fields. Callbacks are not
    /// part of the snapshot; they cannot be serialized.
    pub fn snapshot(&self) -> StepSnapshot<S> {
        StepSnapshot {
            state: lock(&self.state).clone(),
            order: self.order,
            name: self.name.clone(),
            completion_state: self.completion_state(),
            last_error: self.last_error(),
        }
    }
}

impl<S> std::fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("completion", &self.completion_state())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
