//! WebSocket opening handshake channel.
//!
//! The handshake is driven by a background task that reports transport
//! events (open, error, close) over a channel. A watchdog task injects a close
//! with a sentinel code once the timeout expires. The first terminal event
//! resolves the probe, after which both tasks are aborted. Dropping the probe
//! early aborts them too.
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::task::AbortOnDropHandle;

use super::{ChannelKind, ProbeChannel, ProbeGuard, ProbeOutcome, ProbeTarget, Signal};
use crate::timing::TimingStore;

/// Close code the watchdog uses to mark an expired probe.
pub const TIMEOUT_CLOSE_CODE: u16 = 4999;
/// Reason sent along with [`TIMEOUT_CLOSE_CODE`].
pub const TIMEOUT_CLOSE_REASON: &str = "NETWORK TIMEOUT";
/// Abnormal closure, the peer went away without a close frame.
const ABNORMAL_CLOSE_CODE: u16 = 1006;

const MAX_RESPONSE_HEAD: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SocketEvent {
    Open,
    Error(String),
    Close { code: u16, reason: String },
}

impl SocketEvent {
    fn into_signal(self) -> (Signal, Option<String>) {
        match self {
            Self::Open => (Signal::Connected, None),
            Self::Error(reason) => (Signal::Error, Some(reason)),
            Self::Close { code, reason }
                if code == TIMEOUT_CLOSE_CODE && reason == TIMEOUT_CLOSE_REASON =>
            {
                (Signal::TimedOut, None)
            }
            Self::Close { code, reason } if reason.is_empty() => {
                (Signal::Disconnected, Some(format!("close code {code}")))
            }
            Self::Close { code, reason } => {
                (Signal::Disconnected, Some(format!("close code {code}: {reason}")))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SocketHandshakeChannel;

#[async_trait]
impl ProbeChannel for SocketHandshakeChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    async fn probe(&self, target: &ProbeTarget, timeout: Duration, timings: &TimingStore) -> ProbeOutcome {
        let (guard, pending) = ProbeGuard::start(target.clone());
        let (tx, mut events) = mpsc::channel(4);

        let driver = AbortOnDropHandle::new(tokio::spawn(drive_handshake(
            target.clone(),
            tx.clone(),
            timings.clone(),
        )));
        let watchdog = AbortOnDropHandle::new(tokio::spawn(async move {
            time::sleep(timeout).await;
            let _ = tx
                .send(SocketEvent::Close {
                    code: TIMEOUT_CLOSE_CODE,
                    reason: TIMEOUT_CLOSE_REASON.to_owned(),
                })
                .await;
        }));

        while let Some(event) = events.recv().await {
            let (signal, detail) = event.into_signal();
            if guard.resolve(signal, detail) {
                break;
            }
        }
        drop((driver, watchdog));

        pending.wait().await
    }
}

async fn drive_handshake(target: ProbeTarget, events: mpsc::Sender<SocketEvent>, timings: TimingStore) {
    let start = Instant::now();
    let event = match handshake(&target).await {
        Ok(Some(status_line)) => {
            timings.record(target.url(), start, Some(Instant::now()));
            if status_line.starts_with("HTTP/1.1 101") {
                SocketEvent::Open
            } else {
                SocketEvent::Error(format!("handshake rejected: {status_line}"))
            }
        }
        Ok(None) => {
            timings.record(target.url(), start, None);
            SocketEvent::Close {
                code: ABNORMAL_CLOSE_CODE,
                reason: String::new(),
            }
        }
        Err(e) => {
            debug!("handshake with {target} failed: {e}");
            timings.record(target.url(), start, None);
            SocketEvent::Error(e.to_string())
        }
    };
    let _ = events.send(event).await;
}

/// Performs the upgrade and returns the response status line, `None` when the
/// peer closed before sending anything.
async fn handshake(target: &ProbeTarget) -> std::io::Result<Option<String>> {
    let mut stream = TcpStream::connect(target.socket_addr()).await?;
    stream.write_all(upgrade_request(target).as_bytes()).await?;

    let mut head = Vec::with_capacity(512);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_RESPONSE_HEAD {
            break;
        }
    }

    if head.is_empty() {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&head);
    Ok(Some(text.lines().next().unwrap_or_default().trim().to_owned()))
}

fn upgrade_request(target: &ProbeTarget) -> String {
    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        target.authority(),
        STANDARD.encode(nonce)
    )
}
