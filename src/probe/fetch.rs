//! Opaque `GET` channel.
//!
//! The response is never inspected, only whether one arrived before the timer.
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use tokio::time::{self, Instant};

use super::{http_client, unsupported, ChannelKind, ProbeChannel, ProbeOutcome, ProbeTarget, Signal};
use crate::timing::TimingStore;

pub struct OpaqueFetchChannel {
    client: Option<Client>,
}

impl OpaqueFetchChannel {
    pub fn new() -> Self {
        Self {
            client: http_client("opaque fetches"),
        }
    }
}

impl Default for OpaqueFetchChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeChannel for OpaqueFetchChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Fetch
    }

    async fn probe(&self, target: &ProbeTarget, timeout: Duration, timings: &TimingStore) -> ProbeOutcome {
        let Some(client) = &self.client else {
            return unsupported(target);
        };

        let url = target.url();
        let request = client
            .get(&url)
            .header(CACHE_CONTROL, "no-store")
            .header(PRAGMA, "no-cache")
            .send();

        let start = Instant::now();
        let result = time::timeout(timeout, request).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(_)) => {
                timings.record(url, start, Some(Instant::now()));
                ProbeOutcome::new(target.clone(), elapsed, Signal::DataReceived)
            }
            Ok(Err(e)) => {
                debug!("fetch {url} failed: {e}");
                timings.record(url, start, None);
                ProbeOutcome::new(target.clone(), elapsed, Signal::Error).with_detail(e.to_string())
            }
            Err(_) => {
                timings.record(url, start, None);
                ProbeOutcome::new(target.clone(), elapsed, Signal::TimedOut)
            }
        }
    }
}
