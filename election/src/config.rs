//! Election configuration and its timing validation.

use crate::{store::LockKey, Error, Result};
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_JITTER_FACTOR: f64 = 1.2;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for one coordinator instance.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Unique identity of this candidate
    pub identity: String,
    /// Namespace holding the lock record
    pub namespace: String,
    /// Name of the lock record
    pub lock_name: String,
    /// How long a non-holder waits after the last renewal before claiming
    pub lease_duration: Duration,
    /// How long the holder keeps retrying renewal before stepping down
    pub renew_deadline: Duration,
    /// Interval between election attempts
    pub retry_period: Duration,
    /// Clear the holder identity when the coordinator is cancelled
    pub release_on_cancel: bool,
    /// Each wait is stretched by a random amount up to `jitter_factor * retry_period`
    pub jitter_factor: f64,
    /// Upper bound on any single store call
    pub store_timeout: Duration,
}

impl ElectionConfig {
    /// Creates a config for `lock_name` with a freshly generated identity.
    pub fn new(lock_name: impl Into<String>) -> Self {
        Self {
            identity: uuid::Uuid::new_v4().to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            lock_name: lock_name.into(),
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            retry_period: DEFAULT_RETRY_PERIOD,
            release_on_cancel: true,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_renew_deadline(mut self, renew_deadline: Duration) -> Self {
        self.renew_deadline = renew_deadline;
        self
    }

    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }

    pub fn with_release_on_cancel(mut self, release_on_cancel: bool) -> Self {
        self.release_on_cancel = release_on_cancel;
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn lock_key(&self) -> LockKey {
        LockKey::new(self.namespace.clone(), self.lock_name.clone())
    }

    /// Checks identity, naming and `lease_duration > renew_deadline > jitter * retry_period`.
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(invalid("identity must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(invalid("namespace must not be empty"));
        }
        if self.lock_name.trim().is_empty() {
            return Err(invalid("lock name must not be empty"));
        }
        if self.retry_period.is_zero() {
            return Err(invalid("retry_period must be positive"));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid("store_timeout must be positive"));
        }
        if !self.jitter_factor.is_finite() || self.jitter_factor < 0.0 {
            return Err(invalid("jitter_factor must be a non-negative number"));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(invalid(format!(
                "lease_duration ({:?}) must be greater than renew_deadline ({:?})",
                self.lease_duration, self.renew_deadline
            )));
        }
        let max_jittered_retry = self.retry_period.mul_f64(self.jitter_factor.max(1.0));
        if self.renew_deadline <= max_jittered_retry {
            return Err(invalid(format!(
                "renew_deadline ({:?}) must be greater than retry_period with jitter ({:?})",
                self.renew_deadline, max_jittered_retry
            )));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::ConfigInvalid(reason.into())
}
