//! Per-candidate election state machine.

use crate::{
    config::ElectionConfig,
    error::StoreError,
    record::{self, LockRecord},
    store::{LockKey, LockStore, Observed, Version},
    time::{to_chrono, Timestamp},
    Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Leader,
}

/// Where the candidate is in the current election cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Idle,
    Observing,
    Acquiring,
    Leading,
    Renewing,
    /// Leadership given up voluntarily
    Released,
    /// Leadership lost to a failed renewal or a takeover
    Lost,
}

/// A leadership change the caller is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    StartedLeading,
    StoppedLeading,
    NewLeader(String),
}

/// Process-local view of one candidate. Never persisted.
#[derive(Debug, Clone)]
pub struct CandidateState {
    pub identity: String,
    pub role: Role,
    pub last_observed_record: Option<LockRecord>,
    pub last_renew_success: Option<Timestamp>,
}

/// The election state machine for a single candidate and lock.
///
/// Each [`tick`](Elector::tick) reads the lock record once, decides whether to
/// claim, renew or merely observe it, and reports at most one transition.
/// Store failures never escape: they become retry or step-down decisions.
#[derive(Debug)]
pub struct Elector {
    state: CandidateState,
    phase: ElectionPhase,
    key: LockKey,
    store: Arc<dyn LockStore>,
    lease_duration: Duration,
    renew_deadline: chrono::Duration,
    store_timeout: Duration,
    observed_version: Option<Version>,
    reported_leader: Option<String>,
}

impl Elector {
    pub fn new(config: &ElectionConfig, store: Arc<dyn LockStore>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            state: CandidateState {
                identity: config.identity.clone(),
                role: Role::Follower,
                last_observed_record: None,
                last_renew_success: None,
            },
            phase: ElectionPhase::Idle,
            key: config.lock_key(),
            store,
            lease_duration: config.lease_duration,
            renew_deadline: to_chrono(config.renew_deadline),
            store_timeout: config.store_timeout,
            observed_version: None,
            reported_leader: None,
        })
    }

    pub fn identity(&self) -> &str {
        &self.state.identity
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn is_leader(&self) -> bool {
        self.state.role == Role::Leader
    }

    pub fn phase(&self) -> ElectionPhase {
        self.phase
    }

    pub fn state(&self) -> &CandidateState {
        &self.state
    }

    pub fn observed_record(&self) -> Option<&LockRecord> {
        self.state.last_observed_record.as_ref()
    }

    pub fn last_renew_success(&self) -> Option<Timestamp> {
        self.state.last_renew_success
    }

    /// Identity of the leader as far as this candidate knows.
    pub fn leader(&self) -> Option<&str> {
        if self.is_leader() {
            Some(&self.state.identity)
        } else {
            self.reported_leader.as_deref()
        }
    }

    pub fn lock_key(&self) -> &LockKey {
        &self.key
    }

    /// Runs one election round at wall-clock time `now`.
    pub async fn tick(&mut self, now: Timestamp) -> Option<TransitionEvent> {
        let observed = match self.read().await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(identity = %self.state.identity, lock = %self.key, error = %e, "failed to read lock record");
                return self.on_store_failure(now);
            }
        };

        self.observed_version = observed.as_ref().map(|o| o.version.clone());
        let current = observed.and_then(|o| o.record);
        self.state.last_observed_record.clone_from(&current);

        if self.is_leader() {
            return self.renew(current, now).await;
        }

        self.phase = ElectionPhase::Observing;
        if record::can_acquire(current.as_ref(), &self.state.identity, now) {
            return self.acquire(current, now).await;
        }

        current.and_then(|r| self.report_leader(&r.holder_identity))
    }

    /// Gives the lease up with one best-effort conditional write.
    ///
    /// Returns `StoppedLeading` if this candidate was leading. A failed write
    /// is only logged: the lease then expires on its own.
    pub async fn release(&mut self, now: Timestamp) -> Option<TransitionEvent> {
        if !self.is_leader() {
            return None;
        }

        let released = self
            .state
            .last_observed_record
            .as_ref()
            .filter(|current| current.is_held_by(&self.state.identity))
            .map(|current| record::next_record_on_release(current, now));
        let Some(released) = released else {
            return self.demote(ElectionPhase::Released);
        };

        match self.write(&released, self.observed_version.as_ref()).await {
            Ok(version) => {
                info!(identity = %self.state.identity, lock = %self.key, "released leadership");
                self.observed_version = Some(version);
                self.state.last_observed_record = Some(released);
            }
            Err(e) => {
                warn!(identity = %self.state.identity, lock = %self.key, error = %e, "failed to release lease, leaving it to expire");
            }
        }

        self.demote(ElectionPhase::Released)
    }

    /// Stops leading without touching the store, leaving the lease to expire.
    pub fn step_down(&mut self) -> Option<TransitionEvent> {
        if self.is_leader() {
            self.demote(ElectionPhase::Released)
        } else {
            None
        }
    }

    async fn acquire(&mut self, current: Option<LockRecord>, now: Timestamp) -> Option<TransitionEvent> {
        self.phase = ElectionPhase::Acquiring;
        let next = record::next_record_on_acquire(
            current.as_ref(),
            &self.state.identity,
            self.lease_duration,
            now,
        );

        match self.write(&next, self.observed_version.as_ref()).await {
            Ok(version) => {
                info!(
                    identity = %self.state.identity,
                    lock = %self.key,
                    transitions = next.leader_transitions,
                    "acquired leadership"
                );
                self.observed_version = Some(version);
                self.state.last_observed_record = Some(next);
                self.state.last_renew_success = Some(now);
                self.state.role = Role::Leader;
                self.phase = ElectionPhase::Leading;
                self.reported_leader = Some(self.state.identity.clone());
                Some(TransitionEvent::StartedLeading)
            }
            Err(StoreError::Conflict) => {
                debug!(identity = %self.state.identity, lock = %self.key, "lost race for lock record");
                self.phase = ElectionPhase::Observing;
                current.and_then(|r| self.report_leader(&r.holder_identity))
            }
            Err(e) => {
                warn!(identity = %self.state.identity, lock = %self.key, error = %e, "failed to acquire lease");
                self.phase = ElectionPhase::Observing;
                None
            }
        }
    }

    async fn renew(&mut self, current: Option<LockRecord>, now: Timestamp) -> Option<TransitionEvent> {
        let next = match &current {
            Some(current) if current.is_held_by(&self.state.identity) => {
                record::next_record_on_renew(current, now)
            }
            Some(current) if !current.is_released() => {
                warn!(
                    identity = %self.state.identity,
                    lock = %self.key,
                    holder = %current.holder_identity,
                    "lease was taken over by another candidate"
                );
                return self.demote(ElectionPhase::Lost);
            }
            // Missing, corrupt or released while we lead: claim it back.
            _ => record::next_record_on_acquire(
                current.as_ref(),
                &self.state.identity,
                self.lease_duration,
                now,
            ),
        };

        self.phase = ElectionPhase::Renewing;
        match self.write(&next, self.observed_version.as_ref()).await {
            Ok(version) => {
                debug!(identity = %self.state.identity, lock = %self.key, "renewed lease");
                self.observed_version = Some(version);
                self.state.last_observed_record = Some(next);
                self.state.last_renew_success = Some(now);
                self.phase = ElectionPhase::Leading;
                None
            }
            Err(e) => {
                if e.is_conflict() {
                    debug!(identity = %self.state.identity, lock = %self.key, "renewal raced with another writer");
                } else {
                    warn!(identity = %self.state.identity, lock = %self.key, error = %e, "failed to renew lease");
                }
                self.on_store_failure(now)
            }
        }
    }

    /// A leader that has not renewed within `renew_deadline` steps down;
    /// anything short of that is retried on the next tick.
    fn on_store_failure(&mut self, now: Timestamp) -> Option<TransitionEvent> {
        if !self.is_leader() {
            self.phase = ElectionPhase::Observing;
            return None;
        }

        let overdue = self
            .state
            .last_renew_success
            .map_or(true, |last| now - last >= self.renew_deadline);
        if overdue {
            warn!(identity = %self.state.identity, lock = %self.key, "renew deadline exceeded, stepping down");
            return self.demote(ElectionPhase::Lost);
        }

        self.phase = ElectionPhase::Renewing;
        None
    }

    fn demote(&mut self, phase: ElectionPhase) -> Option<TransitionEvent> {
        info!(identity = %self.state.identity, lock = %self.key, ?phase, "stopped leading");
        self.state.role = Role::Follower;
        self.phase = phase;
        self.reported_leader = None;
        Some(TransitionEvent::StoppedLeading)
    }

    fn report_leader(&mut self, holder: &str) -> Option<TransitionEvent> {
        if holder.is_empty() || holder == self.state.identity {
            return None;
        }
        if self.reported_leader.as_deref() == Some(holder) {
            return None;
        }

        info!(identity = %self.state.identity, lock = %self.key, holder, "observed new leader");
        self.reported_leader = Some(holder.to_string());
        Some(TransitionEvent::NewLeader(holder.to_string()))
    }

    async fn read(&self) -> std::result::Result<Option<Observed>, StoreError> {
        tokio::time::timeout(self.store_timeout, self.store.get(&self.key))
            .await
            .unwrap_or_else(|_| Err(self.timed_out("read")))
    }

    async fn write(
        &self,
        record: &LockRecord,
        expected: Option<&Version>,
    ) -> std::result::Result<Version, StoreError> {
        tokio::time::timeout(
            self.store_timeout,
            self.store.create_or_update(&self.key, record, expected),
        )
        .await
        .unwrap_or_else(|_| Err(self.timed_out("write")))
    }

    fn timed_out(&self, op: &str) -> StoreError {
        StoreError::Unavailable(format!("{op} timed out after {:?}", self.store_timeout))
    }
}
