//! The election loop: ticks the elector on a timer, fires callbacks and
//! publishes an [`ElectionStatus`] after every round.

use crate::{
    callbacks::{Dispatcher, LeaderCallbacks},
    config::ElectionConfig,
    elector::{ElectionPhase, Elector},
    record::LockRecord,
    store::LockStore,
    time::{to_chrono, Clock, SystemClock, Timestamp},
    Error, Result,
};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Snapshot of a coordinator's view, published after every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionStatus {
    pub identity: String,
    pub is_leader: bool,
    pub leader: Option<String>,
    pub phase: ElectionPhase,
    pub lease_expires_at: Option<Timestamp>,
}

impl ElectionStatus {
    /// Fails when this candidate still believes it leads although its lease
    /// ran out more than `tolerance` ago, i.e. the election loop is wedged.
    pub fn check_health(&self, now: Timestamp, tolerance: Duration) -> Result<()> {
        if !self.is_leader {
            return Ok(());
        }
        let Some(expired_at) = self.lease_expires_at else {
            return Ok(());
        };
        // Past the last representable instant nothing is overdue.
        let overdue_at = expired_at.checked_add_signed(to_chrono(tolerance));
        match overdue_at {
            Some(overdue_at) if now > overdue_at => Err(Error::LeaseOverdue {
                identity: self.identity.clone(),
                expired_at,
            }),
            _ => Ok(()),
        }
    }
}

/// Drives an [`Elector`] on a jittered period until cancelled.
pub struct Coordinator {
    config: ElectionConfig,
    elector: Elector,
    callbacks: Arc<dyn LeaderCallbacks>,
    clock: Arc<dyn Clock>,
    status_tx: watch::Sender<ElectionStatus>,
}

impl Coordinator {
    /// Validates `config`; an invalid config never starts a loop.
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn LockStore>,
        callbacks: Arc<dyn LeaderCallbacks>,
    ) -> Result<Self> {
        let elector = Elector::new(&config, store)?;
        let (status_tx, _) = watch::channel(snapshot(&elector));

        Ok(Self {
            config,
            elector,
            callbacks,
            clock: Arc::new(SystemClock),
            status_tx,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn identity(&self) -> &str {
        self.elector.identity()
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn status(&self) -> watch::Receiver<ElectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Runs the election loop until `cancel` fires, then releases the lease if
    /// configured to and returns.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut dispatcher = Dispatcher::new(self.callbacks.clone(), cancel.clone());
        info!(
            identity = %self.elector.identity(),
            lock = %self.elector.lock_key(),
            "starting leader election"
        );

        while !cancel.is_cancelled() {
            let now = self.clock.now();
            if let Some(event) = self.elector.tick(now).await {
                dispatcher.dispatch(&event);
            }
            self.publish();

            let wait = self.next_wait();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }
        }

        self.shutdown(&mut dispatcher).await;
    }

    async fn shutdown(&mut self, dispatcher: &mut Dispatcher) {
        let event = if self.config.release_on_cancel {
            self.elector.release(self.clock.now()).await
        } else {
            self.elector.step_down()
        };
        if let Some(event) = event {
            dispatcher.dispatch(&event);
        }
        self.publish();
        info!(identity = %self.elector.identity(), "leader election stopped");
    }

    fn publish(&self) {
        self.status_tx.send_replace(snapshot(&self.elector));
    }

    /// The leader renews on a fixed `retry_period`; only candidates trying to
    /// acquire spread out with jitter.
    fn next_wait(&self) -> Duration {
        let retry = self.config.retry_period;
        if self.elector.is_leader() || self.config.jitter_factor <= 0.0 {
            return retry;
        }
        let stretch = rand::thread_rng().gen::<f64>() * self.config.jitter_factor;
        let wait = retry + retry.mul_f64(stretch);
        debug!(?wait, "waiting for next election round");
        wait
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("elector", &self.elector)
            .finish_non_exhaustive()
    }
}

fn snapshot(elector: &Elector) -> ElectionStatus {
    ElectionStatus {
        identity: elector.identity().to_string(),
        is_leader: elector.is_leader(),
        leader: elector.leader().map(str::to_string),
        phase: elector.phase(),
        lease_expires_at: elector.observed_record().map(LockRecord::expires_at),
    }
}
