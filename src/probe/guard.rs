//! First-resolution-wins bookkeeping for event driven channels.
//!
//! A channel that listens to several event sources (transport events, its own
//! watchdog timer) hands a clone of the [`ProbeGuard`] to each of them. The
//! first `resolve` moves the guard from pending to resolved and delivers the
//! outcome; every later call is a no-op.
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::{ProbeOutcome, ProbeTarget, Signal};

enum ProbeState {
    Pending(oneshot::Sender<ProbeOutcome>),
    Resolved,
}

/// Shared handle that resolves a probe at most once.
#[derive(Clone)]
pub struct ProbeGuard {
    target: ProbeTarget,
    started: Instant,
    state: Arc<Mutex<ProbeState>>,
}

/// Receiving half of a [`ProbeGuard`].
pub struct PendingOutcome {
    target: ProbeTarget,
    started: Instant,
    rx: oneshot::Receiver<ProbeOutcome>,
}

impl ProbeGuard {
    /// Starts the clock for `target`.
    pub fn start(target: ProbeTarget) -> (Self, PendingOutcome) {
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        let guard = Self {
            target: target.clone(),
            started,
            state: Arc::new(Mutex::new(ProbeState::Pending(tx))),
        };
        (guard, PendingOutcome { target, started, rx })
    }

    /// Resolves the probe with `signal`. Returns `false` if it was already
    /// resolved, in which case nothing is delivered.
    pub fn resolve(&self, signal: Signal, detail: Option<String>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, ProbeState::Resolved) {
            ProbeState::Pending(tx) => {
                let outcome = ProbeOutcome {
                    target: self.target.clone(),
                    elapsed: self.started.elapsed(),
                    signal,
                    detail,
                };
                // receiver gone means the probe itself was dropped
                let _ = tx.send(outcome);
                true
            }
            ProbeState::Resolved => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            ProbeState::Resolved
        )
    }
}

impl PendingOutcome {
    /// Waits for the outcome. If every guard was dropped without resolving,
    /// the probe counts as an error rather than hanging.
    pub async fn wait(self) -> ProbeOutcome {
        let Self {
            target,
            started,
            rx,
        } = self;
        rx.await.unwrap_or_else(|_| {
            ProbeOutcome::new(target, started.elapsed(), Signal::Error)
                .with_detail("probe abandoned before any event")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Scheme;
    use std::net::Ipv4Addr;

    fn target() -> ProbeTarget {
        ProbeTarget::new(Scheme::Ws, Ipv4Addr::new(10, 0, 0, 1), None)
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let (guard, pending) = ProbeGuard::start(target());
        let timer = guard.clone();

        assert!(guard.resolve(Signal::Error, Some("refused".into())));
        assert!(!timer.resolve(Signal::TimedOut, None));
        assert!(timer.is_resolved());

        let outcome = pending.wait().await;
        assert_eq!(outcome.signal, Signal::Error);
        assert_eq!(outcome.detail.as_deref(), Some("refused"));
    }

    #[tokio::test]
    async fn same_tick_races_deliver_once() {
        let (guard, pending) = ProbeGuard::start(target());
        let handles = (0..8)
            .map(|i| {
                let guard = guard.clone();
                let signal = if i % 2 == 0 { Signal::Error } else { Signal::TimedOut };
                tokio::spawn(async move { guard.resolve(signal, None) })
            })
            .collect::<Vec<_>>();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);

        let outcome = pending.wait().await;
        assert!(matches!(outcome.signal, Signal::Error | Signal::TimedOut));
    }

    #[tokio::test]
    async fn abandoned_guard_reports_error() {
        let (guard, pending) = ProbeGuard::start(target());
        drop(guard);
        let outcome = pending.wait().await;
        assert_eq!(outcome.signal, Signal::Error);
    }
}
