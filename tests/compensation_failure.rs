//! Surfacing rollback failures: aggregates and bounded waits

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use transact::{NoopLogger, Step, Transaction, TransactionError};

fn quiet() -> Transaction<()> {
    Transaction::new().with_logger(Arc::new(NoopLogger))
}

fn counter_step(counter: &Arc<AtomicI32>, value: i32) -> Step<()> {
    let fwd = Arc::clone(counter);
    let rev = Arc::clone(counter);
    Step::new(
        move |_s: Option<()>| {
            let counter = Arc::clone(&fwd);
            async move {
                counter.fetch_add(value, Ordering::SeqCst);
                Ok(())
            }
        },
        move |_s| {
            let counter = Arc::clone(&rev);
            async move {
                counter.fetch_sub(value, Ordering::SeqCst);
                Ok(())
            }
        },
    )
}

/// Forward adds `value`; reverse refuses to undo it.
fn sticky_step(counter: &Arc<AtomicI32>, value: i32, name: &str) -> Step<()> {
    let fwd = Arc::clone(counter);
    Step::new(
        move |_s: Option<()>| {
            let counter = Arc::clone(&fwd);
            async move {
                counter.fetch_add(value, Ordering::SeqCst);
                Ok(())
            }
        },
        |_s| async move { Err("reverse rejected".into()) },
    )
    .with_name(name)
}

fn failing_step() -> Step<()> {
    Step::new(
        |_s: Option<()>| async move { Err("forward rejected".into()) },
        |_s| async move { Ok(()) },
    )
}

#[tokio::test]
async fn failed_reverse_surfaces_an_aggregate_and_leaves_its_effect_applied() {
    let counter = Arc::new(AtomicI32::new(0));
    let mut tx = quiet();
    tx.add(counter_step(&counter, 5));
    tx.add(sticky_step(&counter, 10, "sticky"));
    tx.add(failing_step());

    let err = tx.run_serial(None).await.expect_err("transaction fails");

    // The rollback error replaces the original failure.
    let TransactionError::RollbackAggregate { errors } = err else {
        panic!("expected RollbackAggregate, got {err}");
    };
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        TransactionError::RollbackFailed { step: Some(ref name), .. } if name == "sticky"
    ));

    // Step one rolled back (5 -> 0 contribution); sticky's +10 stands.
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn every_rollback_failure_is_collected() {
    let counter = Arc::new(AtomicI32::new(0));
    let mut tx = quiet();
    tx.add(sticky_step(&counter, 1, "first"));
    tx.add(sticky_step(&counter, 2, "second"));
    tx.add(failing_step());

    let err = tx.run_serial(None).await.expect_err("transaction fails");

    let TransactionError::RollbackAggregate { errors } = err else {
        panic!("expected RollbackAggregate, got {err}");
    };
    assert_eq!(errors.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn rollback_gives_up_on_a_forward_that_never_settles() {
    let reversed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&reversed);

    let mut tx = quiet();
    tx.add(
        Step::new(
            |_s: Option<()>| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            },
            move |_s| {
                let flag = Arc::clone(&flag);
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .with_name("stuck")
        .with_timeout(Duration::from_millis(100)),
    );
    tx.add(failing_step());

    let err = tx.run_parallel(None).await.expect_err("transaction fails");

    let TransactionError::RollbackAggregate { errors } = err else {
        panic!("expected RollbackAggregate, got {err}");
    };
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        TransactionError::RollbackTimedOut { step: Some(ref name), timeout }
            if name == "stuck" && timeout == Duration::from_millis(100)
    ));
    // Reverse must not run against a forward call that never settled.
    assert!(!reversed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn serial_rollback_happens_even_when_only_the_first_step_completed() {
    let counter = Arc::new(AtomicI32::new(0));
    let mut tx = quiet();
    tx.add(counter_step(&counter, 42));
    tx.add(failing_step());
    tx.add(counter_step(&counter, 7));

    let err = tx.run_serial(None).await.expect_err("transaction fails");

    assert!(matches!(err, TransactionError::ExecutionFailed { .. }));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
