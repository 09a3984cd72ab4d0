//! Lock record storage with optimistic concurrency, and an in-memory store.

use crate::{error::StoreError, record::LockRecord};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Location of a lock record in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub namespace: String,
    pub name: String,
}

impl LockKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Opaque optimistic-concurrency token assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(pub String);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub version: Version,
    /// `None` when the stored payload failed to decode or validate.
    pub record: Option<LockRecord>,
}

impl Observed {
    /// Decodes a raw payload; corrupt payloads are kept as `record: None` so
    /// they can still be overwritten conditionally.
    pub fn decode(key: &LockKey, version: Version, payload: &str) -> Self {
        let record = match LockRecord::from_json(payload) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(lock = %key, version = %version, error = %e, "ignoring corrupt lock record");
                None
            }
        };
        Self { version, record }
    }
}

/// Shared, strongly-consistent home of lock records.
///
/// `create_or_update` with `expected == None` creates the record and fails
/// with [`StoreError::Conflict`] if it already exists. With `Some(version)`
/// it replaces the record only if the stored version still matches, failing
/// with `Conflict` otherwise and `NotFound` if the record is gone.
#[async_trait]
pub trait LockStore: Send + Sync + fmt::Debug {
    async fn get(&self, key: &LockKey) -> StoreResult<Option<Observed>>;

    async fn create_or_update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Option<&Version>,
    ) -> StoreResult<Version>;
}

#[derive(Debug)]
struct Slot {
    version: Version,
    payload: String,
}

/// In-process store with compare-and-swap semantics.
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<LockKey, Slot>,
    next_version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_version: AtomicU64::new(1),
        }
    }

    fn bump(&self) -> Version {
        Version(self.next_version.fetch_add(1, Ordering::SeqCst).to_string())
    }

    /// Overwrites the stored payload unconditionally.
    pub fn put_raw(&self, key: &LockKey, payload: impl Into<String>) -> Version {
        let version = self.bump();
        self.records.insert(
            key.clone(),
            Slot {
                version: version.clone(),
                payload: payload.into(),
            },
        );
        version
    }

    /// Current decoded record, if present and valid.
    pub fn record(&self, key: &LockKey) -> Option<LockRecord> {
        self.records
            .get(key)
            .and_then(|slot| LockRecord::from_json(&slot.payload).ok())
    }

    pub fn version(&self, key: &LockKey) -> Option<Version> {
        self.records.get(key).map(|slot| slot.version.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn get(&self, key: &LockKey) -> StoreResult<Option<Observed>> {
        Ok(self
            .records
            .get(key)
            .map(|slot| Observed::decode(key, slot.version.clone(), &slot.payload)))
    }

    async fn create_or_update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Option<&Version>,
    ) -> StoreResult<Version> {
        let payload = record
            .to_json()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // The entry guard holds the shard lock, making check-and-set atomic.
        match (self.records.entry(key.clone()), expected) {
            (Entry::Vacant(slot), None) => {
                let version = self.bump();
                slot.insert(Slot {
                    version: version.clone(),
                    payload,
                });
                Ok(version)
            }
            (Entry::Vacant(_), Some(_)) => Err(StoreError::NotFound),
            (Entry::Occupied(_), None) => Err(StoreError::Conflict),
            (Entry::Occupied(mut slot), Some(expected)) => {
                if slot.get().version != *expected {
                    return Err(StoreError::Conflict);
                }
                let version = self.bump();
                slot.insert(Slot {
                    version: version.clone(),
                    payload,
                });
                Ok(version)
            }
        }
    }
}
