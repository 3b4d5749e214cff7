//! `HEAD` request channel.
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use tokio::time::Instant;

use super::{http_client, unsupported, ChannelKind, ProbeChannel, ProbeOutcome, ProbeTarget, Signal};
use crate::timing::TimingStore;

/// Sends a bodyless `HEAD` request. Any HTTP response, whatever the status,
/// counts as data received.
pub struct HeadRequestChannel {
    client: Option<Client>,
}

impl HeadRequestChannel {
    pub fn new() -> Self {
        Self {
            client: http_client("HEAD requests"),
        }
    }
}

impl Default for HeadRequestChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeChannel for HeadRequestChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Head
    }

    async fn probe(&self, target: &ProbeTarget, timeout: Duration, timings: &TimingStore) -> ProbeOutcome {
        let Some(client) = &self.client else {
            return unsupported(target);
        };

        let url = target.url();
        let start = Instant::now();
        let result = client.head(&url).timeout(timeout).send().await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) => {
                debug!("HEAD {url} answered {} in {elapsed:?}", response.status());
                timings.record(url, start, Some(Instant::now()));
                ProbeOutcome::new(target.clone(), elapsed, Signal::DataReceived)
            }
            Err(e) if e.is_timeout() => {
                timings.record(url, start, None);
                ProbeOutcome::new(target.clone(), elapsed, Signal::TimedOut)
            }
            Err(e) => {
                debug!("HEAD {url} failed: {e}");
                timings.record(url, start, None);
                ProbeOutcome::new(target.clone(), elapsed, Signal::Error).with_detail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Scheme;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn any_status_is_data_received() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let timings = TimingStore::new();
        let channel = HeadRequestChannel::new();
        let target = ProbeTarget::new(Scheme::Http, Ipv4Addr::LOCALHOST, Some(port));
        let outcome = channel.probe(&target, Duration::from_secs(5), &timings).await;

        assert_eq!(outcome.signal, Signal::DataReceived);
        assert_eq!(timings.len(), 1);
        assert!(timings.resource_entries()[0].transferred());
    }

    #[tokio::test]
    async fn refused_connection_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let channel = HeadRequestChannel::new();
        let target = ProbeTarget::new(Scheme::Http, Ipv4Addr::LOCALHOST, Some(port));
        let outcome = channel.probe(&target, Duration::from_secs(5), &TimingStore::new()).await;

        assert_eq!(outcome.signal, Signal::Error);
        assert!(outcome.detail.is_some());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _keep = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let channel = HeadRequestChannel::new();
        let target = ProbeTarget::new(Scheme::Http, Ipv4Addr::LOCALHOST, Some(port));
        let outcome = channel
            .probe(&target, Duration::from_millis(200), &TimingStore::new())
            .await;

        assert_eq!(outcome.signal, Signal::TimedOut);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_client_always_errors() {
        let channel = HeadRequestChannel { client: None };
        let timings = TimingStore::new();
        let target = ProbeTarget::new(Scheme::Http, Ipv4Addr::LOCALHOST, Some(80));
        let outcome = channel.probe(&target, Duration::from_secs(5), &timings).await;

        assert_eq!(outcome.signal, Signal::Error);
        assert_eq!(
            outcome.detail.as_deref(),
            Some("primitive unavailable in this environment")
        );
        assert!(timings.is_empty());
    }
}
