//! End-to-end tests for exactly-once execution.
//!
//! Covers sequential duplicates, release on failure, expiry without sweep,
//! fail-closed store behavior, success policies, result replay, and actions
//! that outlive their claim.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use artisan_idempotency::{
    CacheStore, ClaimOutcome, ClaimStatus, Clock, DedupKey, ExecuteError, ExecuteOptions,
    Execution, IdempotencyCoordinator, IdempotencyRecord, IdempotencyStore, ManualClock,
    MemoryStore, OperationName, OwnerId, StoreError, StoreOperation, StoreResult, SuccessPolicy,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, thiserror::Error)]
#[error("payment gateway rejected the charge")]
struct GatewayError;

fn manual_coordinator() -> (IdempotencyCoordinator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (
        IdempotencyCoordinator::new(store).with_clock(clock.clone()),
        clock,
    )
}

/// Store whose every operation fails, as if the backing service were down.
struct UnreachableStore;

#[async_trait]
impl IdempotencyStore for UnreachableStore {
    async fn get(&self, key: &DedupKey) -> StoreResult<Option<IdempotencyRecord>> {
        Err(StoreError::unavailable(StoreOperation::Get, key.as_str(), "connection refused"))
    }

    async fn set(&self, key: &DedupKey, _: IdempotencyRecord, _: Duration) -> StoreResult<()> {
        Err(StoreError::unavailable(StoreOperation::Set, key.as_str(), "connection refused"))
    }

    async fn claim(
        &self,
        key: &DedupKey,
        _: IdempotencyRecord,
        _: Duration,
    ) -> StoreResult<ClaimOutcome> {
        Err(StoreError::unavailable(StoreOperation::Claim, key.as_str(), "connection refused"))
    }

    async fn delete(&self, key: &DedupKey) -> StoreResult<()> {
        Err(StoreError::unavailable(StoreOperation::Delete, key.as_str(), "connection refused"))
    }

    async fn sweep(&self) -> StoreResult<usize> {
        Err(StoreError::unavailable(StoreOperation::Sweep, "*", "connection refused"))
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(0)
    }
}

/// Memory store whose deletes fail, so cleanup cannot happen.
struct StickyStore {
    inner: MemoryStore,
    delete_attempts: AtomicUsize,
}

impl StickyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            delete_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdempotencyStore for StickyStore {
    async fn get(&self, key: &DedupKey) -> StoreResult<Option<IdempotencyRecord>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &DedupKey, record: IdempotencyRecord, ttl: Duration) -> StoreResult<()> {
        self.inner.set(key, record, ttl).await
    }

    async fn claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<ClaimOutcome> {
        self.inner.claim(key, record, ttl).await
    }

    async fn delete(&self, key: &DedupKey) -> StoreResult<()> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::unavailable(StoreOperation::Delete, key.as_str(), "read-only replica"))
    }

    async fn sweep(&self) -> StoreResult<usize> {
        self.inner.sweep().await
    }

    async fn len(&self) -> StoreResult<usize> {
        self.inner.len().await
    }
}

#[tokio::test]
async fn given_same_request_twice_when_executed_then_second_is_duplicate() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("create-post")?;
    let payload = json!({"text": "hi"});
    let options = ExecuteOptions::with_ttl(Duration::from_millis(5000));

    // When
    let first = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>("post-1")
        })
        .await?;
    let second = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>("post-2")
        })
        .await;

    // Then
    assert_eq!(first, "post-1");
    assert!(second.as_ref().is_err_and(ExecuteError::is_duplicate));
    Ok(())
}

#[tokio::test]
async fn given_failed_action_when_retried_then_retry_runs() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("pay")?;
    let payload = json!({"amount": 10});
    let options = ExecuteOptions::with_ttl(Duration::from_millis(5000));

    // When
    let failed = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Err::<&str, _>(GatewayError)
        })
        .await;
    let retried = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>("charged")
        })
        .await?;

    // Then
    let failed_with_gateway = matches!(failed, Err(ExecuteError::ActionFailed(GatewayError)));
    assert!(failed_with_gateway, "Original error must propagate unchanged");
    assert_eq!(retried, "charged");
    Ok(())
}

#[tokio::test]
async fn given_different_owners_when_same_payload_then_both_run() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
    let operation = OperationName::new("create-post")?;
    let payload = json!({"text": "hi"});
    let options = ExecuteOptions::default();
    let runs = AtomicUsize::new(0);

    // When
    for owner in [OwnerId::user("u1")?, OwnerId::user("u2")?, OwnerId::Anonymous] {
        coordinator
            .execute_once(&owner, &operation, &payload, options, || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GatewayError>(())
            })
            .await?;
    }

    // Then
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn given_reordered_payload_when_executed_then_duplicate() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("create-post")?;
    let options = ExecuteOptions::default();

    // When
    coordinator
        .execute_once(&owner, &operation, &json!({"a": 1, "b": 2}), options, || async {
            Ok::<_, GatewayError>(())
        })
        .await?;
    let reordered = coordinator
        .execute_once(&owner, &operation, &json!({"b": 2, "a": 1}), options, || async {
            Ok::<_, GatewayError>(())
        })
        .await;

    // Then
    assert!(reordered.is_err_and(|e| e.is_duplicate()));
    Ok(())
}

#[tokio::test]
async fn given_expired_claim_when_not_swept_then_new_call_succeeds() -> TestResult {
    // Given
    let (coordinator, clock) = manual_coordinator();
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("create-post")?;
    let payload = json!({"text": "hi"});
    let options = ExecuteOptions::with_ttl(Duration::from_millis(100));

    coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>(1)
        })
        .await?;

    // When
    clock.advance(Duration::from_millis(150));
    let again = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>(2)
        })
        .await?;

    // Then
    assert_eq!(again, 2);
    assert_eq!(coordinator.store().len().await?, 1, "Replaced in place, never swept");
    Ok(())
}

#[tokio::test]
async fn given_real_time_ttl_when_waited_out_then_new_call_succeeds() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(CacheStore::default()));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("create-post")?;
    let payload = json!({"text": "hi"});
    let options = ExecuteOptions::with_ttl(Duration::from_millis(100));

    coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>(1)
        })
        .await?;

    // When
    tokio::time::sleep(Duration::from_millis(150)).await;
    let again = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>(2)
        })
        .await?;

    // Then
    assert_eq!(again, 2);
    Ok(())
}

#[tokio::test]
async fn given_unreachable_store_when_executed_then_fails_closed() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(UnreachableStore));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("pay")?;
    let ran = AtomicBool::new(false);

    // When
    let result = coordinator
        .execute_once(&owner, &operation, &json!({"amount": 1}), ExecuteOptions::default(), || async {
            ran.store(true, Ordering::SeqCst);
            Ok::<_, GatewayError>(())
        })
        .await;

    // Then
    assert!(matches!(result, Err(ExecuteError::StoreUnavailable(_))));
    assert!(!ran.load(Ordering::SeqCst), "Action must not run without a claim");
    Ok(())
}

#[tokio::test]
async fn given_failing_cleanup_when_action_fails_then_action_error_wins() -> TestResult {
    // Given
    let store = Arc::new(StickyStore::new());
    let coordinator = IdempotencyCoordinator::new(store.clone());
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("pay")?;
    let payload = json!({"amount": 3});
    let options = ExecuteOptions::default();

    // When
    let result = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Err::<(), _>(GatewayError)
        })
        .await;

    // Then
    assert!(matches!(result, Err(ExecuteError::ActionFailed(GatewayError))));
    assert_eq!(store.delete_attempts.load(Ordering::SeqCst), 1);

    let retry = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>(())
        })
        .await;
    assert!(
        retry.is_err_and(|e| e.is_duplicate()),
        "Unreleased claim holds until TTL"
    );
    Ok(())
}

#[tokio::test]
async fn given_failing_cleanup_when_release_policy_then_success_is_returned() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(StickyStore::new()));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("notify")?;
    let options = ExecuteOptions::default().on_success(SuccessPolicy::Release);

    // When
    let result = coordinator
        .execute_once(&owner, &operation, &json!({}), options, || async {
            Ok::<_, GatewayError>("sent")
        })
        .await?;

    // Then
    assert_eq!(result, "sent");
    Ok(())
}

#[tokio::test]
async fn given_release_policy_when_sequential_then_each_call_runs() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
    let owner = OwnerId::Anonymous;
    let operation = OperationName::new("ping")?;
    let options = ExecuteOptions::default().on_success(SuccessPolicy::Release);
    let runs = AtomicUsize::new(0);

    // When
    for _ in 0..3 {
        coordinator
            .execute_once(&owner, &operation, &json!(null), options, || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GatewayError>(())
            })
            .await?;
    }

    // Then
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(coordinator.store().is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn given_retain_policy_when_duplicate_then_claim_time_is_reported() -> TestResult {
    // Given
    let (coordinator, clock) = manual_coordinator();
    let owner = OwnerId::user("u9")?;
    let operation = OperationName::new("create-post")?;
    let payload = json!({"text": "hi"});
    let claimed_at = clock.now();
    let options = ExecuteOptions::with_ttl(Duration::from_secs(60));

    coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>(())
        })
        .await?;

    // When
    clock.advance(Duration::from_secs(30));
    let duplicate = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            Ok::<_, GatewayError>(())
        })
        .await;

    // Then
    match duplicate {
        Err(ExecuteError::DuplicateOperation {
            key,
            created_at,
            status,
        }) => {
            assert_eq!(key, DedupKey::for_payload(&owner, &operation, &payload)?);
            assert_eq!(created_at, claimed_at);
            assert_eq!(status, ClaimStatus::InProgress);
        }
        other => return Err(format!("expected a duplicate, got {other:?}").into()),
    }
    Ok(())
}

#[tokio::test]
async fn given_completed_operation_when_replayed_then_stored_result_returned() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("checkout")?;
    let payload = json!({"cart": [1, 2, 3]});
    let ttl = Duration::from_secs(60);
    let runs = AtomicUsize::new(0);

    // When
    let fresh = coordinator
        .execute_or_replay(&owner, &operation, &payload, ttl, || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GatewayError>(json!({"order": "o-1"}))
        })
        .await?;
    let replayed = coordinator
        .execute_or_replay(&owner, &operation, &payload, ttl, || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GatewayError>(json!({"order": "o-2"}))
        })
        .await?;

    // Then
    assert_eq!(fresh, Execution::Fresh(json!({"order": "o-1"})));
    assert_eq!(replayed, Execution::Replayed(json!({"order": "o-1"})));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn given_in_flight_operation_when_replay_requested_then_duplicate() -> TestResult {
    // Given
    let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("checkout")?;
    let payload = json!({"cart": [4]});
    let ttl = Duration::from_secs(60);
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();

    let first = {
        let coordinator = coordinator.clone();
        let owner = owner.clone();
        let operation = operation.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            coordinator
                .execute_or_replay(&owner, &operation, &payload, ttl, || async move {
                    let _ = started_tx.send(());
                    let _ = finish_rx.await;
                    Ok::<_, GatewayError>(7_u32)
                })
                .await
                .map(Execution::into_inner)
                .map_err(|e| e.to_string())
        })
    };

    // When
    started_rx.await?;
    let overlapping = coordinator
        .execute_or_replay(&owner, &operation, &payload, ttl, || async {
            Ok::<_, GatewayError>(8_u32)
        })
        .await;
    let _ = finish_tx.send(());

    // Then
    assert!(overlapping.is_err_and(|e| e.is_duplicate()));
    assert_eq!(first.await?, Ok(7));
    Ok(())
}

#[tokio::test]
async fn given_config_defaults_when_coordinator_built_then_options_follow() -> TestResult {
    // Given
    let config: artisan_idempotency::IdempotencyConfig =
        serde_json::from_value(json!({"default_ttl_ms": 1500, "on_success": "release"}))?;
    let store = config.build_store(Arc::new(artisan_idempotency::SystemClock));

    // When
    let coordinator = IdempotencyCoordinator::from_config(store, &config);

    // Then
    assert_eq!(coordinator.options().ttl, Duration::from_millis(1500));
    assert_eq!(coordinator.options().on_success, SuccessPolicy::Release);
    Ok(())
}

#[tokio::test]
async fn given_action_outliving_ttl_when_it_fails_then_successor_claim_survives() -> TestResult {
    // Given
    let (coordinator, clock) = manual_coordinator();
    let owner = OwnerId::user("u1")?;
    let operation = OperationName::new("pay")?;
    let payload = json!({"amount": 25});
    let options = ExecuteOptions::with_ttl(Duration::from_millis(100));
    let runs = Arc::new(AtomicUsize::new(0));

    let (slow_started_tx, slow_started_rx) = tokio::sync::oneshot::channel::<()>();
    let (slow_fail_tx, slow_fail_rx) = tokio::sync::oneshot::channel::<()>();
    let slow = {
        let coordinator = coordinator.clone();
        let (owner, operation, payload) = (owner.clone(), operation.clone(), payload.clone());
        let runs = Arc::clone(&runs);
        tokio::spawn(async move {
            coordinator
                .execute_once(&owner, &operation, &payload, options, || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let _ = slow_started_tx.send(());
                    let _ = slow_fail_rx.await;
                    Err::<(), _>(GatewayError)
                })
                .await
                .map_err(|e| e.to_string())
        })
    };
    slow_started_rx.await?;

    clock.advance(Duration::from_millis(150));

    let (successor_started_tx, successor_started_rx) = tokio::sync::oneshot::channel::<()>();
    let (successor_finish_tx, successor_finish_rx) = tokio::sync::oneshot::channel::<()>();
    let successor = {
        let coordinator = coordinator.clone();
        let (owner, operation, payload) = (owner.clone(), operation.clone(), payload.clone());
        let runs = Arc::clone(&runs);
        tokio::spawn(async move {
            coordinator
                .execute_once(&owner, &operation, &payload, options, || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let _ = successor_started_tx.send(());
                    let _ = successor_finish_rx.await;
                    Ok::<_, GatewayError>("charged")
                })
                .await
                .map_err(|e| e.to_string())
        })
    };
    successor_started_rx.await?;

    // When
    let _ = slow_fail_tx.send(());
    let slow_result = slow.await?;
    let third = coordinator
        .execute_once(&owner, &operation, &payload, options, || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GatewayError>("charged again")
        })
        .await;
    let _ = successor_finish_tx.send(());

    // Then
    assert_eq!(slow_result, Err(GatewayError.to_string()));
    assert!(
        third.is_err_and(|e| e.is_duplicate()),
        "A late failure must not free a key claimed by someone else"
    );
    assert_eq!(successor.await?, Ok("charged"));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    Ok(())
}
