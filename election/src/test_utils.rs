//! Simulated clocks, stores, callbacks and clusters for tests.
//!
//! Public so integration tests and downstream crates can drive elections
//! deterministically.

use crate::{
    callbacks::LeaderCallbacks,
    config::ElectionConfig,
    elector::{Elector, TransitionEvent},
    error::StoreError,
    record::LockRecord,
    store::{LockKey, LockStore, MemoryStore, Observed, StoreResult, Version},
    time::{to_chrono, Clock, Timestamp},
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A fixed, arbitrary starting point for simulated clocks.
pub fn epoch() -> Timestamp {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += to_chrono(by);
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(epoch())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Wall clock derived from tokio's clock, so paused-time tests
/// (`#[tokio::test(start_paused = true)]`) move it by sleeping.
#[derive(Debug)]
pub struct PausedClock {
    base: Timestamp,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub fn new() -> Self {
        Self {
            base: epoch(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Timestamp {
        self.base + to_chrono(self.start.elapsed())
    }
}

/// Store wrapper simulating a candidate's link to the shared store.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn LockStore>,
    partitioned: AtomicBool,
    latency_ms: AtomicU64,
    failed_calls: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn LockStore>) -> Self {
        Self {
            inner,
            partitioned: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
        }
    }

    pub fn partition(&self) {
        self.partitioned.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.partitioned.store(false, Ordering::SeqCst);
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Calls rejected because of a partition.
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::SeqCst)
    }

    async fn link(&self) -> StoreResult<()> {
        if self.is_partitioned() {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("network partition".to_string()));
        }
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            sleep(Duration::from_millis(latency)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn get(&self, key: &LockKey) -> StoreResult<Option<Observed>> {
        self.link().await?;
        self.inner.get(key).await
    }

    async fn create_or_update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Option<&Version>,
    ) -> StoreResult<Version> {
        self.link().await?;
        self.inner.create_or_update(key, record, expected).await
    }
}

/// Callbacks that remember every transition they saw.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<TransitionEvent>>,
    leading: Mutex<Option<CancellationToken>>,
    cancel_on_stop: Option<CancellationToken>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels `token` from inside `on_stopped_leading`, the way a process
    /// shuts itself down after losing the lease.
    pub fn cancelling_on_stop(token: CancellationToken) -> Self {
        Self {
            cancel_on_stop: Some(token),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &TransitionEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Token handed to the most recent `on_started_leading`.
    pub fn leading_token(&self) -> Option<CancellationToken> {
        self.leading.lock().clone()
    }
}

impl LeaderCallbacks for RecordingCallbacks {
    fn on_started_leading(&self, leading: CancellationToken) {
        *self.leading.lock() = Some(leading);
        self.events.lock().push(TransitionEvent::StartedLeading);
    }

    fn on_stopped_leading(&self) {
        self.events.lock().push(TransitionEvent::StoppedLeading);
        if let Some(token) = &self.cancel_on_stop {
            token.cancel();
        }
    }

    fn on_new_leader(&self, identity: &str) {
        self.events.lock().push(TransitionEvent::NewLeader(identity.to_string()));
    }
}

/// One simulated candidate process.
#[derive(Debug)]
pub struct Member {
    pub elector: Elector,
    pub link: Arc<FlakyStore>,
    pub crashed: bool,
    pub events: Vec<TransitionEvent>,
}

/// Candidates sharing one [`MemoryStore`] and one [`ManualClock`].
#[derive(Debug)]
pub struct TestCluster {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub members: Vec<Member>,
    key: LockKey,
}

impl TestCluster {
    /// Builds `size` candidates named `node-0`, `node-1`, ... from `config`.
    pub fn new(size: usize, config: &ElectionConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let members = (0..size)
            .map(|i| {
                let link = Arc::new(FlakyStore::new(store.clone()));
                let config = config.clone().with_identity(format!("node-{i}"));
                let elector = Elector::new(&config, link.clone())
                    .unwrap_or_else(|e| panic!("invalid cluster config: {e}"));
                Member {
                    elector,
                    link,
                    crashed: false,
                    events: Vec::new(),
                }
            })
            .collect();

        Self {
            clock: Arc::new(ManualClock::default()),
            store,
            members,
            key: config.lock_key(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Ticks one live member; crashed members stay silent.
    pub async fn tick(&mut self, index: usize) -> Option<TransitionEvent> {
        let now = self.clock.now();
        let member = &mut self.members[index];
        if member.crashed {
            return None;
        }
        let event = member.elector.tick(now).await;
        if let Some(event) = &event {
            member.events.push(event.clone());
        }
        event
    }

    pub async fn tick_all(&mut self) {
        for i in 0..self.members.len() {
            self.tick(i).await;
        }
    }

    pub fn crash(&mut self, index: usize) {
        self.members[index].crashed = true;
    }

    /// Identities of live members that believe they lead.
    pub fn leaders(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| !m.crashed && m.elector.is_leader())
            .map(|m| m.elector.identity().to_string())
            .collect()
    }

    pub fn record(&self) -> Option<LockRecord> {
        self.store.record(&self.key)
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }
}
