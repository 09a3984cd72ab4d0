//! Error types.

use crate::time::Timestamp;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid election config: {0}")]
    ConfigInvalid(String),

    #[error("Lock record is corrupt: {0}")]
    RecordCorrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lease held by {identity:?} expired at {expired_at} and was not renewed")]
    LeaseOverdue {
        identity: String,
        expired_at: Timestamp,
    },
}

/// Failures reported by a [`LockStore`](crate::store::LockStore).
///
/// `Conflict` must stay distinguishable from the other variants: the elector
/// treats it as lost contention, never as a store outage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Conditional write rejected: record version changed")]
    Conflict,

    #[error("Lock record not found")]
    NotFound,

    #[error("Lock store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_codec_error_keeps_source() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_conflict_is_distinguishable() {
        assert!(StoreError::Conflict.is_conflict());
        assert!(!StoreError::NotFound.is_conflict());
        assert!(!StoreError::Unavailable("timeout".to_string()).is_conflict());
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::ConfigInvalid("lease_duration must exceed renew_deadline".to_string());
        assert_eq!(
            format!("{err}"),
            "Invalid election config: lease_duration must exceed renew_deadline"
        );
    }
}
