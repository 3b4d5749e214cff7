//! Raw resource load over TCP.
//!
//! Loads `http://` targets with a minimal request and `ftp://` targets by
//! waiting for the greeting banner. The first byte back counts as a finished
//! load.
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use super::{ChannelKind, ProbeChannel, ProbeOutcome, ProbeTarget, Scheme, Signal};
use crate::error::ProbeError;
use crate::timing::TimingStore;

#[derive(Debug, Default)]
pub struct ResourceLoadChannel;

impl ResourceLoadChannel {
    async fn load(target: &ProbeTarget) -> Result<usize, ProbeError> {
        let mut stream = TcpStream::connect(target.socket_addr()).await?;

        if target.scheme() != Scheme::Ftp {
            let request = format!(
                "GET / HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n",
                target.authority()
            );
            stream.write_all(request.as_bytes()).await?;
        }

        let mut buf = [0u8; 512];
        match stream.read(&mut buf).await? {
            0 => Err(ProbeError::Transport("connection closed without data".into())),
            n => Ok(n),
        }
    }
}

#[async_trait]
impl ProbeChannel for ResourceLoadChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Resource
    }

    async fn probe(&self, target: &ProbeTarget, timeout: Duration, timings: &TimingStore) -> ProbeOutcome {
        let start = Instant::now();
        // the load future owns the socket, dropping it on timeout cancels the load
        let result = time::timeout(timeout, Self::load(target)).await;
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(Ok(n)) => {
                debug!("loaded {n} bytes from {target}");
                ProbeOutcome::new(target.clone(), elapsed, Signal::DataReceived)
            }
            Ok(Err(e)) => ProbeOutcome::from_error(target.clone(), elapsed, &e),
            Err(_) => ProbeOutcome::new(target.clone(), elapsed, Signal::TimedOut),
        };

        if target.scheme() == Scheme::Http {
            let end = (outcome.signal == Signal::DataReceived).then(Instant::now);
            timings.record(target.url(), start, end);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn ftp_banner_is_a_load() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"220 ready\r\n").await.unwrap();
        });

        let timings = TimingStore::new();
        let target = ProbeTarget::new(Scheme::Ftp, Ipv4Addr::LOCALHOST, Some(port));
        let outcome = ResourceLoadChannel
            .probe(&target, Duration::from_secs(5), &timings)
            .await;

        assert_eq!(outcome.signal, Signal::DataReceived);
        assert!(timings.is_empty());
    }

    #[tokio::test]
    async fn http_response_is_a_load() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await;
            stream.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
        });

        let timings = TimingStore::new();
        let target = ProbeTarget::new(Scheme::Http, Ipv4Addr::LOCALHOST, Some(port));
        let outcome = ResourceLoadChannel
            .probe(&target, Duration::from_secs(5), &timings)
            .await;

        assert_eq!(outcome.signal, Signal::DataReceived);
        assert!(timings.resource_entries()[0].transferred());
    }

    #[tokio::test]
    async fn close_without_data_is_error() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let target = ProbeTarget::new(Scheme::Ftp, Ipv4Addr::LOCALHOST, Some(port));
        let outcome = ResourceLoadChannel
            .probe(&target, Duration::from_secs(5), &TimingStore::new())
            .await;

        assert_eq!(outcome.signal, Signal::Error);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (listener, port) = listener().await;
        let _keep = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let target = ProbeTarget::new(Scheme::Ftp, Ipv4Addr::LOCALHOST, Some(port));
        let outcome = ResourceLoadChannel
            .probe(&target, Duration::from_millis(100), &TimingStore::new())
            .await;

        assert_eq!(outcome.signal, Signal::TimedOut);
    }
}
