//! Lock record and the pure lease arithmetic built on it.
//!
//! Nothing in here performs I/O: the elector reads a record through a
//! `LockStore`, asks these functions what to do, and writes the result back.

use crate::{error::Result, time::Timestamp, Error};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lease duration written into a released record.
pub const RELEASED_LEASE_SECONDS: u32 = 1;

/// The persisted record encoding current leadership.
///
/// Serialised as JSON with camelCase keys, the same shape Kubernetes uses for
/// the `control-plane.alpha.kubernetes.io/leader` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Identity of the current holder; empty once released
    pub holder_identity: String,

    /// How long the lease stays valid after `renew_time`
    pub lease_duration_seconds: u32,

    /// When the current holder first acquired the lease
    pub acquire_time: Timestamp,

    /// Last successful renewal by the holder
    pub renew_time: Timestamp,

    /// Number of times the holder identity has changed
    pub leader_transitions: u32,
}

impl LockRecord {
    /// Instant after which the lease may be claimed by someone else.
    ///
    /// Saturates at the last representable instant; records read from a store
    /// never get that far because [`validate`](Self::validate) rejects them.
    pub fn expires_at(&self) -> Timestamp {
        self.checked_expires_at().unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn checked_expires_at(&self) -> Option<Timestamp> {
        self.renew_time
            .checked_add_signed(Duration::seconds(i64::from(self.lease_duration_seconds)))
    }

    /// True when the holder gave the lease up explicitly.
    pub fn is_released(&self) -> bool {
        self.holder_identity.is_empty()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        !self.is_released() && self.holder_identity == identity
    }

    /// Schema checks applied to every record read from a store.
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration_seconds == 0 {
            return Err(Error::RecordCorrupt(
                "leaseDurationSeconds must be positive".to_string(),
            ));
        }
        if self.renew_time < self.acquire_time {
            return Err(Error::RecordCorrupt(format!(
                "renewTime {} precedes acquireTime {}",
                self.renew_time, self.acquire_time
            )));
        }
        if self.checked_expires_at().is_none() {
            return Err(Error::RecordCorrupt(format!(
                "renewTime {} plus {}s is out of range",
                self.renew_time, self.lease_duration_seconds
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes and validates a stored payload.
    ///
    /// Any failure is reported as [`Error::RecordCorrupt`].
    pub fn from_json(payload: &str) -> Result<Self> {
        let record: LockRecord =
            serde_json::from_str(payload).map_err(|e| Error::RecordCorrupt(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }
}

/// Converts a configured lease duration into whole seconds, rounding up.
pub fn lease_seconds(duration: std::time::Duration) -> u32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX).max(1)
}

pub fn is_expired(record: &LockRecord, now: Timestamp) -> bool {
    now > record.expires_at()
}

/// Whether `candidate` may write a claim over `record` at `now`.
pub fn can_acquire(record: Option<&LockRecord>, candidate: &str, now: Timestamp) -> bool {
    match record {
        None => true,
        Some(record) => {
            record.is_released() || is_expired(record, now) || record.holder_identity == candidate
        }
    }
}

/// The record a candidate writes when claiming (or re-claiming) the lock.
pub fn next_record_on_acquire(
    old: Option<&LockRecord>,
    candidate: &str,
    lease_duration: std::time::Duration,
    now: Timestamp,
) -> LockRecord {
    let (acquire_time, leader_transitions) = match old {
        None => (now, 0),
        Some(old) if old.holder_identity == candidate => (old.acquire_time, old.leader_transitions),
        Some(old) => (now, old.leader_transitions.saturating_add(1)),
    };

    LockRecord {
        holder_identity: candidate.to_string(),
        lease_duration_seconds: lease_seconds(lease_duration),
        acquire_time,
        renew_time: now,
        leader_transitions,
    }
}

/// The record the current holder writes to extend its lease.
pub fn next_record_on_renew(old: &LockRecord, now: Timestamp) -> LockRecord {
    LockRecord {
        renew_time: now.max(old.acquire_time),
        ..old.clone()
    }
}

/// The record the holder writes when giving the lease up on shutdown.
pub fn next_record_on_release(old: &LockRecord, now: Timestamp) -> LockRecord {
    LockRecord {
        holder_identity: String::new(),
        lease_duration_seconds: RELEASED_LEASE_SECONDS,
        acquire_time: now,
        renew_time: now,
        leader_transitions: old.leader_transitions,
    }
}
