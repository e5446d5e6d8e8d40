//! Structural snapshots of transactions for audit and debugging
//!
//! Snapshots capture the plain fields of a transaction and its steps, not
//! the forward/reverse callbacks, so a deserialized snapshot is a passive
//! record: rebuilding a live transaction means re-attaching callbacks.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::step::CompletionState;

/// Plain-field snapshot of one [`Step`](crate::Step).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot<S> {
    /// The step's stored state at snapshot time
    pub state: Option<S>,
    /// Position within the owning transaction
    pub order: Option<usize>,
    /// Human-readable label
    pub name: Option<String>,
    /// Where the step was in its forward lifecycle
    pub completion_state: CompletionState,
    /// Message of the last forward failure, if any
    pub last_error: Option<String>,
}

/// Plain-field snapshot of a [`Transaction`](crate::Transaction) and its
/// steps. The logger is not part of the snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionSnapshot<S> {
    /// Id of the snapshotted transaction
    pub transaction_id: String,
    /// Step snapshots in the transaction's current order
    pub items: Vec<StepSnapshot<S>>,
}

/// Snapshot import/export failure.
#[derive(Debug, thiserror::Error)]
#[error("snapshot import/export failed: {0}")]
pub struct SnapshotError(#[from] serde_json::Error);

impl<S: Serialize> TransactionSnapshot<S> {
    /// Export as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// [`SnapshotError`] when the state type fails to serialize.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<S: DeserializeOwned> TransactionSnapshot<S> {
    /// Import from JSON, re-sorting the items by order.
    ///
    /// # Errors
    ///
    /// [`SnapshotError`] when the input is not a valid snapshot.
    pub fn deserialize(json: &str) -> Result<Self, SnapshotError> {
        let mut snapshot: Self = serde_json::from_str(json)?;
        snapshot
            .items
            .sort_by_key(|item| item.order.unwrap_or(usize::MAX));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoopLogger, Step, Transaction};
    use std::sync::Arc;

    fn sample_transaction() -> Transaction<i32> {
        let mut tx = Transaction::new()
            .with_id("tx-42")
            .with_logger(Arc::new(NoopLogger));
        tx.add(
            Step::new(
                |s: Option<i32>| async move { Ok(s.unwrap_or(0) + 1) },
                |_s| async move { Ok(()) },
            )
            .with_name("first")
            .with_state(3),
        );
        tx.add(Step::new(
            |s: Option<i32>| async move { Ok(s.unwrap_or(0) + 2) },
            |_s| async move { Ok(()) },
        ));
        tx
    }

    #[test]
    fn snapshot_captures_plain_fields() {
        let tx = sample_transaction();
        let snapshot = tx.snapshot();

        assert_eq!(snapshot.transaction_id, "tx-42");
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.items[0].name.as_deref(), Some("first"));
        assert_eq!(snapshot.items[0].state, Some(3));
        assert_eq!(snapshot.items[0].order, Some(0));
        assert_eq!(
            snapshot.items[0].completion_state,
            CompletionState::NotStarted
        );
        assert!(snapshot.items[0].last_error.is_none());
    }

    #[tokio::test]
    async fn round_trip_preserves_id_ordering_and_fields() -> anyhow::Result<()> {
        let tx = sample_transaction();
        tx.run_serial(Some(10)).await?;

        let json = tx.serialize()?;
        let restored: TransactionSnapshot<i32> = TransactionSnapshot::deserialize(&json)?;

        assert_eq!(restored, tx.snapshot());
        Ok(())
    }

    #[test]
    fn deserialize_resorts_items_by_order() -> anyhow::Result<()> {
        let snapshot = TransactionSnapshot {
            transaction_id: "shuffled".to_string(),
            items: vec![
                StepSnapshot {
                    state: Some(2),
                    order: Some(1),
                    name: Some("second".into()),
                    completion_state: CompletionState::Completed,
                    last_error: None,
                },
                StepSnapshot {
                    state: Some(1),
                    order: Some(0),
                    name: Some("first".into()),
                    completion_state: CompletionState::Completed,
                    last_error: None,
                },
            ],
        };

        let restored: TransactionSnapshot<i32> =
            TransactionSnapshot::deserialize(&snapshot.to_json()?)?;

        assert_eq!(restored.items[0].name.as_deref(), Some("first"));
        assert_eq!(restored.items[1].name.as_deref(), Some("second"));
        Ok(())
    }
}
