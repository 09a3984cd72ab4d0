//! Caller hooks and the dispatcher that fires them.
//!
//! Hooks run synchronously on the coordinator task, one at a time, so a slow
//! hook delays the next renewal. Leader work belongs on its own task, watching
//! the token handed to [`LeaderCallbacks::on_started_leading`].

use crate::elector::TransitionEvent;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hooks invoked on leadership transitions.
pub trait LeaderCallbacks: Send + Sync {
    /// Called once this candidate holds the lease. `leading` is cancelled the
    /// moment leadership is lost or the coordinator shuts down.
    fn on_started_leading(&self, leading: CancellationToken);

    /// Called once leadership is lost or given up.
    fn on_stopped_leading(&self);

    /// Called when another candidate is observed holding the lease.
    fn on_new_leader(&self, _identity: &str) {}
}

type StartedFn = Box<dyn Fn(CancellationToken) + Send + Sync>;
type StoppedFn = Box<dyn Fn() + Send + Sync>;
type NewLeaderFn = Box<dyn Fn(&str) + Send + Sync>;

/// Closure-backed [`LeaderCallbacks`]; unset hooks do nothing.
#[derive(Default)]
pub struct Callbacks {
    started: Option<StartedFn>,
    stopped: Option<StoppedFn>,
    new_leader: Option<NewLeaderFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_started_leading(mut self, f: impl Fn(CancellationToken) + Send + Sync + 'static) -> Self {
        self.started = Some(Box::new(f));
        self
    }

    pub fn with_stopped_leading(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.stopped = Some(Box::new(f));
        self
    }

    pub fn with_new_leader(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.new_leader = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("started", &self.started.is_some())
            .field("stopped", &self.stopped.is_some())
            .field("new_leader", &self.new_leader.is_some())
            .finish()
    }
}

impl LeaderCallbacks for Callbacks {
    fn on_started_leading(&self, leading: CancellationToken) {
        if let Some(f) = &self.started {
            f(leading);
        }
    }

    fn on_stopped_leading(&self) {
        if let Some(f) = &self.stopped {
            f();
        }
    }

    fn on_new_leader(&self, identity: &str) {
        if let Some(f) = &self.new_leader {
            f(identity);
        }
    }
}

/// Maps each [`TransitionEvent`] onto exactly one hook and owns the
/// cancellation token of the current leadership term.
pub struct Dispatcher {
    callbacks: Arc<dyn LeaderCallbacks>,
    parent: CancellationToken,
    leading: Option<CancellationToken>,
}

impl Dispatcher {
    /// Leadership tokens are children of `parent`, so cancelling the
    /// coordinator also cancels leader work.
    pub fn new(callbacks: Arc<dyn LeaderCallbacks>, parent: CancellationToken) -> Self {
        Self {
            callbacks,
            parent,
            leading: None,
        }
    }

    pub fn dispatch(&mut self, event: &TransitionEvent) {
        debug!(?event, "dispatching leadership transition");
        match event {
            TransitionEvent::StartedLeading => {
                let token = self.parent.child_token();
                if let Some(previous) = self.leading.replace(token.clone()) {
                    previous.cancel();
                }
                self.callbacks.on_started_leading(token);
            }
            TransitionEvent::StoppedLeading => {
                // Preempt leader work before telling the caller.
                if let Some(token) = self.leading.take() {
                    token.cancel();
                }
                self.callbacks.on_stopped_leading();
            }
            TransitionEvent::NewLeader(identity) => self.callbacks.on_new_leader(identity),
        }
    }

    /// Token of the current leadership term, if leading.
    pub fn leading_token(&self) -> Option<&CancellationToken> {
        self.leading.as_ref()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("leading", &self.leading.is_some())
            .finish_non_exhaustive()
    }
}
