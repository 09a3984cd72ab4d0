#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Lease-based leader election over a shared lock record.
//!
//! Candidates race to write a [`LockRecord`](record::LockRecord) through a
//! [`LockStore`](store::LockStore) using conditional writes. The holder keeps
//! renewing it; everyone else waits for it to expire or be released.
//!
//! ```ignore
//! use election::{callbacks::Callbacks, config::ElectionConfig, coordinator::Coordinator, store::MemoryStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let callbacks = Callbacks::new()
//!     .with_started_leading(|leading| { tokio::spawn(async move { leading.cancelled().await }); })
//!     .with_stopped_leading(|| tracing::info!("lost leadership"));
//! let coordinator = Coordinator::new(
//!     ElectionConfig::new("my-lock"),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(callbacks),
//! )?;
//! coordinator.run(CancellationToken::new()).await;
//! ```

pub mod callbacks;
pub mod config;
pub mod coordinator;
pub mod elector;
pub mod error;
#[cfg(feature = "kubernetes")]
pub mod k8s;
pub mod record;
pub mod store;
pub mod time;

pub mod test_utils;

pub use callbacks::{Callbacks, LeaderCallbacks};
pub use config::ElectionConfig;
pub use coordinator::{Coordinator, ElectionStatus};
pub use elector::{ElectionPhase, Elector, Role, TransitionEvent};
pub use error::{Error, Result, StoreError};
pub use record::LockRecord;
pub use store::{LockKey, LockStore, MemoryStore};
