//! Drives a set of probe targets through one channel under a concurrency
//! policy. Every target produces exactly one outcome, and the outcomes are
//! recorded into the [`ScanSession`] of the scan they belong to.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered};
use futures::{FutureExt, Stream, StreamExt};
use log::{debug, warn};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::classifier::ScanResult;
use crate::probe::{ProbeChannel, ProbeOutcome, ProbeTarget, Signal};
use crate::timing::TimingStore;

/// Extra time granted to a channel past its own timeout before the scheduler
/// gives up on it.
pub const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Connection ceiling shared by every scan that uses it.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A held pool slot, released on drop.
#[derive(Debug)]
pub struct PoolSlot(#[allow(dead_code)] OwnedSemaphorePermit);

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn try_enter(&self) -> Option<PoolSlot> {
        Arc::clone(&self.slots).try_acquire_owned().ok().map(PoolSlot)
    }
}

#[derive(Debug, Clone)]
pub enum SchedulePolicy {
    /// Keep the shared pool topped up, checking every `interval`.
    PoolRefill { pool: ConnectionPool, interval: Duration },
    /// Launch up to `max_in_flight` probes, checking every `interval`.
    Throttled {
        max_in_flight: usize,
        interval: Duration,
    },
    /// Launch everything at once.
    Unbounded,
}

/// State of one scan invocation: how many results it expects, the results so
/// far and the scan's own timing record.
#[derive(Debug)]
pub struct ScanSession {
    total: usize,
    results: Vec<ScanResult>,
    timings: TimingStore,
}

impl ScanSession {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            results: Vec::with_capacity(total),
            timings: TimingStore::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.total
    }

    /// Timing record the probes of this session write to.
    pub fn timings(&self) -> &TimingStore {
        &self.timings
    }

    pub fn record(&mut self, result: ScanResult) {
        self.results.push(result);
    }

    /// Records every outcome of `outcomes` as it arrives, turned into a result
    /// by `on_outcome`.
    pub async fn record_all<S, F>(&mut self, mut outcomes: S, mut on_outcome: F)
    where
        S: Stream<Item = ProbeOutcome> + Unpin,
        F: FnMut(&ProbeOutcome) -> ScanResult,
    {
        while let Some(outcome) = outcomes.next().await {
            self.record(on_outcome(&outcome));
        }
    }

    /// Results in completion order.
    pub fn into_results(self) -> Vec<ScanResult> {
        self.results
    }
}

pub struct ConnectionScheduler {
    policy: SchedulePolicy,
    timeout: Duration,
}

impl ConnectionScheduler {
    pub fn new(policy: SchedulePolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    /// Launches `targets` on `channel` and yields their outcomes in completion
    /// order. The stream ends once every target has produced one.
    pub fn outcomes<'a>(
        &'a self,
        targets: Vec<ProbeTarget>,
        channel: &'a dyn ProbeChannel,
        timings: &TimingStore,
    ) -> BoxStream<'a, ProbeOutcome> {
        debug!(
            "Scheduling {} targets on {:?} with {:?}",
            targets.len(),
            channel.kind(),
            self.policy
        );
        let mut launcher = Launcher {
            scheduler: self,
            channel,
            timings: timings.clone(),
            pending: targets.into(),
            in_flight: FuturesUnordered::new(),
            ticker: None,
        };
        launcher.start();

        stream::unfold(launcher, |mut launcher| async move {
            let outcome = launcher.next_outcome().await?;
            Some((outcome, launcher))
        })
        .boxed()
    }
}

/// Launch state of one [`ConnectionScheduler::outcomes`] stream.
struct Launcher<'a> {
    scheduler: &'a ConnectionScheduler,
    channel: &'a dyn ProbeChannel,
    timings: TimingStore,
    pending: VecDeque<ProbeTarget>,
    in_flight: FuturesUnordered<BoxFuture<'a, ProbeOutcome>>,
    ticker: Option<Interval>,
}

impl Launcher<'_> {
    fn start(&mut self) {
        let scheduler = self.scheduler;
        match &scheduler.policy {
            SchedulePolicy::Unbounded => {
                while let Some(target) = self.pending.pop_front() {
                    self.launch(target, None);
                }
            }
            SchedulePolicy::PoolRefill { interval, .. } | SchedulePolicy::Throttled { interval, .. } => {
                let mut ticker = time::interval(*interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
            }
        }
    }

    async fn next_outcome(&mut self) -> Option<ProbeOutcome> {
        loop {
            if self.pending.is_empty() && self.in_flight.is_empty() {
                debug!("All targets on {:?} settled", self.channel.kind());
                return None;
            }
            tokio::select! {
                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    return Some(outcome);
                }
                () = next_tick(&mut self.ticker) => {
                    self.top_up();
                }
            }
        }
    }

    fn top_up(&mut self) {
        let scheduler = self.scheduler;
        match &scheduler.policy {
            SchedulePolicy::PoolRefill { pool, .. } => {
                while !self.pending.is_empty() {
                    let Some(slot) = pool.try_enter() else {
                        break;
                    };
                    if let Some(target) = self.pending.pop_front() {
                        self.launch(target, Some(slot));
                    }
                }
            }
            SchedulePolicy::Throttled { max_in_flight, .. } => {
                while self.in_flight.len() < *max_in_flight {
                    let Some(target) = self.pending.pop_front() else {
                        break;
                    };
                    self.launch(target, None);
                }
            }
            SchedulePolicy::Unbounded => {}
        }
    }

    fn launch(&mut self, target: ProbeTarget, slot: Option<PoolSlot>) {
        let channel = self.channel;
        let timeout = self.scheduler.timeout;
        let timings = self.timings.clone();
        let probe = async move {
            let _slot = slot;
            let start = Instant::now();
            let settled = time::timeout(timeout + PROBE_GRACE, channel.probe(&target, timeout, &timings)).await;
            match settled {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("{:?} channel never settled {target}, counting it as timed out", channel.kind());
                    ProbeOutcome::new(target, start.elapsed(), Signal::TimedOut)
                        .with_detail("channel did not settle")
                }
            }
        };
        self.in_flight.push(probe.boxed());
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
