//! Poller properties under a virtual clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mesh_verifier::poll::{ConditionError, FnCondition, PollError, PollSpec, poll_until};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn spec(interval_secs: u64, timeout_secs: u64, immediate: bool) -> PollSpec {
    PollSpec {
        interval: Duration::from_secs(interval_secs),
        timeout: Duration::from_secs(timeout_secs),
        immediate,
    }
}

fn within_ms(actual: Duration, expected: Duration) -> bool {
    actual >= expected && actual <= expected + Duration::from_millis(1)
}

/// Never satisfied, counting evaluations.
fn never(calls: &AtomicU32) -> FnCondition<impl Fn() -> std::future::Ready<Result<bool, ConditionError>> + Send + Sync + '_> {
    FnCondition::new("never", move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(false))
    })
}

#[tokio::test(start_paused = true)]
async fn test_never_true_runs_full_timeout() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let err = poll_until(&spec(5, 60, true), &never(&calls), &CancellationToken::new())
        .await
        .unwrap_err();

    // Ticks at 0, 5, ..., 60.
    assert!(err.is_timeout());
    assert_eq!(err.ticks(), 13);
    assert_eq!(calls.load(Ordering::SeqCst), 13);
    assert!(within_ms(start.elapsed(), Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_never_true_without_immediate() {
    let calls = AtomicU32::new(0);
    let err = poll_until(&spec(5, 60, false), &never(&calls), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.ticks(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_shorter_than_interval_gets_one_immediate_tick() {
    let calls = AtomicU32::new(0);
    let start = Instant::now();
    let err = poll_until(&spec(10, 3, true), &never(&calls), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(within_ms(start.elapsed(), Duration::from_secs(3)));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_stops_immediately() {
    let calls = AtomicU32::new(0);
    let condition = FnCondition::new("fatal on second", || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n == 2 {
                Err(ConditionError::fatal("CSV failed"))
            } else {
                Ok(false)
            }
        }
    });

    let err = poll_until(&spec(5, 60, true), &condition, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Condition { tick: 2, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_keep_polling() {
    let calls = AtomicU32::new(0);
    let condition = FnCondition::new("flaky", || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 4 {
                Err(ConditionError::transient("apiserver unavailable"))
            } else {
                Ok(true)
            }
        }
    });

    let outcome = poll_until(&spec(5, 60, true), &condition, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.ticks, 4);
    assert!(within_ms(outcome.elapsed, Duration::from_secs(15)));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_last_transient_error() {
    let condition = FnCondition::new("always failing", || async {
        Err(ConditionError::transient("connection refused"))
    });
    let err = poll_until(&spec(5, 20, true), &condition, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        PollError::Timeout { last_error, .. } => {
            assert_eq!(last_error.as_deref(), Some("connection refused"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_evaluation_skips_missed_slots() {
    let calls = AtomicU32::new(0);
    let condition = FnCondition::new("slow", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            Ok(false)
        }
    });

    // Ticks start at 0, 15, 30, 45, 60; each runs 12s.
    let err = poll_until(&spec(5, 60, true), &condition, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_wait() {
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = poll_until(&spec(5, 600, true), &never(&calls), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Cancelled { ticks: 2, .. }));
    assert!(within_ms(start.elapsed(), Duration::from_secs(7)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_evaluation() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let condition = FnCondition::new("hangs", || async {
        futures::future::pending::<()>().await;
        Ok(true)
    });
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = poll_until(&spec(5, 600, true), &condition, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_no_concurrent_evaluation() {
    let in_flight = Arc::new(AtomicU32::new(0));
    let overlap = Arc::new(AtomicU32::new(0));
    let condition = {
        let in_flight = in_flight.clone();
        let overlap = overlap.clone();
        FnCondition::new("exclusive", move || {
            let in_flight = in_flight.clone();
            let overlap = overlap.clone();
            async move {
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_secs(7)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(false)
            }
        })
    };

    let _ = poll_until(&spec(5, 60, true), &condition, &CancellationToken::new()).await;
    assert_eq!(overlap.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_interval_rejected() {
    let calls = AtomicU32::new(0);
    let spec = PollSpec {
        interval: Duration::ZERO,
        timeout: Duration::from_secs(1),
        immediate: true,
    };
    let err = poll_until(&spec, &never(&calls), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::InvalidSpec(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
