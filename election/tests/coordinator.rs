use async_trait::async_trait;
use election::{
    record::LockRecord,
    store::{LockKey, Observed, StoreResult, Version},
    test_utils::{FlakyStore, PausedClock, RecordingCallbacks},
    Coordinator, ElectionConfig, ElectionPhase, Error, LockStore, MemoryStore, TransitionEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

fn config(identity: &str) -> ElectionConfig {
    ElectionConfig::new("coordinator-lock")
        .with_identity(identity)
        .with_jitter_factor(0.0)
}

/// Remembers when each write reached the store.
#[derive(Debug, Default)]
struct TimedStore {
    inner: MemoryStore,
    writes: Mutex<Vec<Instant>>,
}

#[async_trait]
impl LockStore for TimedStore {
    async fn get(&self, key: &LockKey) -> StoreResult<Option<Observed>> {
        self.inner.get(key).await
    }

    async fn create_or_update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Option<&Version>,
    ) -> StoreResult<Version> {
        self.writes.lock().push(Instant::now());
        self.inner.create_or_update(key, record, expected).await
    }
}

fn coordinator(
    config: ElectionConfig,
    store: Arc<dyn election::LockStore>,
    callbacks: Arc<RecordingCallbacks>,
) -> Coordinator {
    Coordinator::new(config, store, callbacks)
        .unwrap()
        .with_clock(Arc::new(PausedClock::new()))
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_leads_and_publishes_status() {
    let store = Arc::new(MemoryStore::new());
    let callbacks = Arc::new(RecordingCallbacks::new());
    let coordinator = coordinator(config("node-a"), store.clone(), callbacks.clone());
    let mut status = coordinator.status();
    let key = coordinator.config().lock_key();

    let cancel = CancellationToken::new();
    let handle = coordinator.spawn(cancel.clone());

    let leading = status.wait_for(|s| s.is_leader).await.unwrap().clone();
    assert_eq!(leading.leader.as_deref(), Some("node-a"));
    assert_eq!(leading.phase, ElectionPhase::Leading);
    assert!(leading.lease_expires_at.is_some());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(callbacks.events(), vec![TransitionEvent::StartedLeading]);
    assert!(store.record(&key).unwrap().is_held_by("node-a"));

    cancel.cancel();
    handle.await.unwrap();
    assert_eq!(
        callbacks.events(),
        vec![TransitionEvent::StartedLeading, TransitionEvent::StoppedLeading]
    );
    assert!(store.record(&key).unwrap().is_released());
    assert!(!status.borrow().is_leader);
}

#[tokio::test(start_paused = true)]
async fn test_leader_renews_on_fixed_period_despite_jitter() {
    let store = Arc::new(TimedStore::default());
    let callbacks = Arc::new(RecordingCallbacks::new());
    // Default jitter factor applies.
    let config = ElectionConfig::new("coordinator-lock").with_identity("node-a");
    let retry = config.retry_period;
    let coordinator = coordinator(config, store.clone(), callbacks);

    let cancel = CancellationToken::new();
    let handle = coordinator.spawn(cancel.clone());
    sleep(Duration::from_secs(120)).await;
    cancel.cancel();
    handle.await.unwrap();

    // Drop the release write made on shutdown.
    let mut writes = store.writes.lock().clone();
    writes.pop();
    assert!(writes.len() >= 60, "only {} writes in 120s", writes.len());
    for gap in writes.windows(2).map(|w| w[1] - w[0]) {
        assert!(gap <= retry, "renewal gap {gap:?} exceeds retry period {retry:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_exits_promptly_and_cancels_leader_work() {
    let store = Arc::new(MemoryStore::new());
    let callbacks = Arc::new(RecordingCallbacks::new());
    let coordinator = coordinator(config("node-a"), store, callbacks.clone());
    let mut status = coordinator.status();

    let cancel = CancellationToken::new();
    let handle = coordinator.spawn(cancel.clone());
    status.wait_for(|s| s.is_leader).await.unwrap();

    let leading = callbacks.leading_token().unwrap();
    assert!(!leading.is_cancelled());

    cancel.cancel();
    // Well under one retry period.
    timeout(Duration::from_millis(500), handle)
        .await
        .expect("coordinator did not stop")
        .unwrap();
    assert!(leading.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_follower_takes_over_after_release() {
    let store = Arc::new(MemoryStore::new());
    let a_callbacks = Arc::new(RecordingCallbacks::new());
    let b_callbacks = Arc::new(RecordingCallbacks::new());
    let a = coordinator(config("node-a"), store.clone(), a_callbacks.clone());
    let mut a_status = a.status();
    let a_cancel = CancellationToken::new();
    let a_handle = a.spawn(a_cancel.clone());
    a_status.wait_for(|s| s.is_leader).await.unwrap();

    let b = coordinator(config("node-b"), store.clone(), b_callbacks.clone());
    let mut b_status = b.status();
    let b_cancel = CancellationToken::new();
    let b_handle = b.spawn(b_cancel.clone());
    b_status
        .wait_for(|s| s.leader.as_deref() == Some("node-a"))
        .await
        .unwrap();

    a_cancel.cancel();
    a_handle.await.unwrap();

    // Released leases are claimable at once, so B needs one retry period,
    // not the rest of A's lease.
    timeout(Duration::from_secs(3), b_status.wait_for(|s| s.is_leader))
        .await
        .expect("follower never took over")
        .unwrap();
    assert_eq!(
        b_callbacks.events(),
        vec![
            TransitionEvent::NewLeader("node-a".to_string()),
            TransitionEvent::StartedLeading
        ]
    );

    b_cancel.cancel();
    b_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_without_release_the_lease_is_left_to_expire() {
    let store = Arc::new(MemoryStore::new());
    let callbacks = Arc::new(RecordingCallbacks::new());
    let coordinator = coordinator(
        config("node-a").with_release_on_cancel(false),
        store.clone(),
        callbacks.clone(),
    );
    let key = coordinator.config().lock_key();
    let mut status = coordinator.status();

    let cancel = CancellationToken::new();
    let handle = coordinator.spawn(cancel.clone());
    status.wait_for(|s| s.is_leader).await.unwrap();

    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(callbacks.count(&TransitionEvent::StoppedLeading), 1);
    assert!(store.record(&key).unwrap().is_held_by("node-a"));
}

#[tokio::test(start_paused = true)]
async fn test_losing_the_lease_can_stop_the_process() {
    let store = Arc::new(MemoryStore::new());
    let link = Arc::new(FlakyStore::new(store));
    let cancel = CancellationToken::new();
    let callbacks = Arc::new(RecordingCallbacks::cancelling_on_stop(cancel.clone()));
    let coordinator = coordinator(config("node-a"), link.clone(), callbacks.clone());
    let mut status = coordinator.status();

    let handle = coordinator.spawn(cancel.clone());
    status.wait_for(|s| s.is_leader).await.unwrap();

    link.partition();
    timeout(Duration::from_secs(30), handle)
        .await
        .expect("coordinator kept running after losing the lease")
        .unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(
        callbacks.events(),
        vec![TransitionEvent::StartedLeading, TransitionEvent::StoppedLeading]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_never_acquires() {
    let store = Arc::new(MemoryStore::new());
    let callbacks = Arc::new(RecordingCallbacks::new());
    let coordinator = coordinator(config("node-a"), store.clone(), callbacks.clone());
    let key = coordinator.config().lock_key();

    let cancel = CancellationToken::new();
    cancel.cancel();
    coordinator.run(cancel).await;

    assert!(callbacks.events().is_empty());
    assert!(store.record(&key).is_none());
}

#[tokio::test]
async fn test_invalid_config_is_rejected_up_front() {
    let config = ElectionConfig::new("coordinator-lock")
        .with_lease_duration(Duration::from_secs(5))
        .with_renew_deadline(Duration::from_secs(10));
    let result = Coordinator::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingCallbacks::new()),
    );

    assert!(matches!(result, Err(Error::ConfigInvalid(_))));
}
