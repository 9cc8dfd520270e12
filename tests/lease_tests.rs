//! Lease strategy behaviour against the memory backend.

use std::time::Duration;

use locker::{
    AcquisitionStrategy, HolderId, LeaseBackend, LockError, LockKey, LostReason, MemoryBackend,
    RecordBackend, RenewableLeaseLock, StrategyKind,
};
use tokio::time::Instant;

mod common;
use common::{fast_options, fast_runner, init_tracing, runner};

#[tokio::test]
async fn test_sequence_counts_acquisitions() {
    let backend = MemoryBackend::new();
    let runner = fast_runner(&backend, StrategyKind::Lease);

    let mut sequences = Vec::new();
    for _ in 0..10 {
        let sequence = runner
            .run("foo", |ctx| async move { ctx.sequence() })
            .await
            .unwrap()
            .unwrap();
        sequences.push(sequence.unwrap());
    }
    assert_eq!(sequences, (1..=10).collect::<Vec<i64>>());
    assert_eq!(backend.record("foo").unwrap().sequence, 10);
}

#[tokio::test]
async fn test_renewal_keeps_lease_past_lock_for() {
    let backend = MemoryBackend::new();
    let runner = fast_runner(&backend, StrategyKind::Lease);

    // lock_for is 500ms; the watchdog renews every 50ms
    let result = runner
        .run("long-job", |ctx| {
            let backend = backend.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1200)).await;
                let record = backend.record(ctx.key().as_str()).unwrap();
                record.holder == Some(ctx.holder().to_string())
            }
        })
        .await
        .unwrap();
    assert_eq!(result, Some(true));
}

#[tokio::test]
async fn test_stolen_lease_cancels_work() {
    init_tracing();
    let backend = MemoryBackend::new();
    let runner = fast_runner(&backend, StrategyKind::Lease);

    let start = Instant::now();
    let result = runner
        .run("stolen", |ctx| {
            let backend = backend.clone();
            async move {
                assert!(backend.steal(ctx.key().as_str(), "host:elsewhere pid:1 guid:0"));
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        })
        .await;

    match result {
        Err(LockError::LockLost { key, reason }) => {
            assert_eq!(key, "stolen");
            assert_eq!(reason, LostReason::Stolen);
        }
        other => panic!("expected LockLost, got {other:?}"),
    }
    // detected within one renew_every, well before the work would have ended
    assert!(start.elapsed() < Duration::from_secs(1));
    // release must not clear somebody else's claim
    let record = backend.record("stolen").unwrap();
    assert_eq!(record.holder.as_deref(), Some("host:elsewhere pid:1 guid:0"));
}

#[tokio::test]
async fn test_backend_outage_is_reported_as_check_failure() {
    let backend = MemoryBackend::new();
    let runner = fast_runner(&backend, StrategyKind::Lease);

    let result = runner
        .run("outage", |_| {
            let backend = backend.clone();
            async move {
                backend.set_available(false);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        })
        .await;
    backend.set_available(true);

    let err = result.unwrap_err();
    assert!(err.is_lock_lost());
    assert!(matches!(
        err,
        LockError::LockLost {
            reason: LostReason::CheckFailed(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_watchdog_disabled_does_not_notice_theft() {
    let backend = MemoryBackend::new();
    let options = fast_options(StrategyKind::Lease)
        .watchdog(false)
        .build()
        .unwrap();
    let runner = runner(&backend, options);

    let result = runner
        .run("unwatched", |ctx| {
            let backend = backend.clone();
            async move {
                backend.steal(ctx.key().as_str(), "thief");
                tokio::time::sleep(Duration::from_millis(200)).await;
                ctx.is_lost()
            }
        })
        .await
        .unwrap();
    assert_eq!(result, Some(false));
}

#[tokio::test]
async fn test_handle_reports_loss() {
    let backend = MemoryBackend::new();
    let runner = fast_runner(&backend, StrategyKind::Lease);

    let handle = runner.acquire("watched").await.unwrap().unwrap();
    assert_eq!(handle.sequence(), Some(1));
    assert!(handle.lost_reason().is_none());

    backend.steal("watched", "thief");
    let mut lost = handle.lost_token().clone();
    tokio::time::timeout(Duration::from_secs(1), lost.wait_for(Option::is_some))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.lost_reason(), Some(LostReason::Stolen));
    assert_eq!(handle.lost().await, LostReason::Stolen);

    // the thief still owns the record, so release reports nothing released
    assert!(!handle.release().await.unwrap());
}

#[tokio::test]
async fn test_expired_lease_can_be_taken_over() {
    let backend = MemoryBackend::new();
    let lease = RenewableLeaseLock::new(
        backend.clone(),
        Duration::from_millis(50),
        Duration::from_millis(100),
    )
    .unwrap();
    let key = LockKey::new("expiring").unwrap();
    let first = HolderId::generate();
    let second = HolderId::generate();

    let held = lease.try_acquire(&key, &first).await.unwrap().unwrap();
    assert!(lease.try_acquire(&key, &second).await.unwrap().is_none());

    // no watchdog here, so the lease lapses
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!lease.is_still_held(&held).await.unwrap());

    let taken = lease.try_acquire(&key, &second).await.unwrap().unwrap();
    assert_eq!(taken.sequence(), 2);
    assert_eq!(lease.check(&held).await.unwrap(), Some(LostReason::Stolen));
    assert!(lease.release(&taken).await.unwrap());
}

#[tokio::test]
async fn test_reclaim_by_holder_is_a_renewal() {
    let backend = MemoryBackend::new();
    let lease = RenewableLeaseLock::new(
        backend.clone(),
        Duration::from_secs(1),
        Duration::from_secs(3),
    )
    .unwrap();
    let key = LockKey::new("mine").unwrap();
    let holder = HolderId::generate();

    let first = lease.try_acquire(&key, &holder).await.unwrap().unwrap();
    let again = lease.try_acquire(&key, &holder).await.unwrap().unwrap();
    assert_eq!(first.sequence(), 1);
    assert_eq!(again.sequence(), 1);
    assert!(lease.renew(&again).await.unwrap());
}

#[tokio::test]
async fn test_lease_window_is_validated() {
    let backend = MemoryBackend::new();
    for (renew, lock_for) in [(0.0, 30.0), (1.0, 0.0), (4.0, 2.0), (1.0, 1.0)] {
        let result = RenewableLeaseLock::new(
            backend.clone(),
            Duration::from_secs_f64(renew),
            Duration::from_secs_f64(lock_for),
        );
        assert!(matches!(result, Err(LockError::Configuration(_))), "{renew}/{lock_for}");
    }
    assert!(matches!(
        RenewableLeaseLock::new(backend.clone(), Duration::from_secs(1), Duration::MAX),
        Err(LockError::Configuration(_))
    ));
    assert!(
        RenewableLeaseLock::new(
            backend,
            Duration::from_secs(1),
            Duration::from_secs_f64(1.00001)
        )
        .is_ok()
    );
}

#[tokio::test]
async fn test_concurrent_record_creation() {
    let backend = MemoryBackend::new();
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move { backend.ensure_record_exists("baz").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(backend.record_count(), 1);
    assert!(backend.fetch_record("baz").await.unwrap().is_some());

    let now = chrono::Utc::now();
    let holder = HolderId::generate();
    assert!(
        !backend
            .query_is_held_by_me("baz", &holder, now)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_lost_pends_while_lease_is_valid() {
    let backend = MemoryBackend::new();
    let runner = fast_runner(&backend, StrategyKind::Lease);

    let still_valid = runner
        .run("quiet", |ctx| async move {
            let waited = tokio::time::timeout(Duration::from_millis(200), ctx.lost()).await;
            waited.is_err() && !ctx.is_lost()
        })
        .await
        .unwrap();
    assert_eq!(still_valid, Some(true));
}
