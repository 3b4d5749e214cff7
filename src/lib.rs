//! This crate exposes the functionality of the netsweep reachability
//! scanner.
//!
//! netsweep finds live hosts and reachable ports without raw sockets or any
//! privilege. It only uses ordinary connection primitives (HTTP requests,
//! WebSocket handshakes, plain resource loads) and infers the status of a
//! target from the signal each attempt produces and how long it took.
//!
//! ## Architecture Overview
//!
//! The scanning behaviour is managed by [`Scanner`](crate::scanner::Scanner):
//!
//! 1. **Range expansion**: address ranges and port lists are expanded into
//!    probe targets ([`address`])
//! 2. **Scheduling**: a [`ConnectionScheduler`](crate::scheduler::ConnectionScheduler)
//!    drives the targets through one [`ProbeChannel`](crate::probe::ProbeChannel)
//!    under that channel's concurrency policy
//! 3. **Classification**: each outcome becomes a [`ScanResult`](crate::classifier::ScanResult)
//!    as soon as it completes ([`classifier`])
//! 4. **Correlation**: results the heuristics could not settle are upgraded
//!    when the timing record proves a response arrived ([`timing`])
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use netsweep::config::ScanConfig;
//! use netsweep::probe::ChannelKind;
//! use netsweep::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scanner = Scanner::new(ScanConfig::load(None)?);
//!
//!     let hosts = scanner
//!         .scan_hosts_by_range("192.168.1.1-254", ChannelKind::Fetch, None)
//!         .await?;
//!     for host in &hosts {
//!         println!("{host}");
//!     }
//!
//!     let ports = scanner
//!         .scan_ports_on_host("192.168.1.1", "21,22,80,443,8000-8100", ChannelKind::default())
//!         .await?;
//!     println!("{} ports classified", ports.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only input errors reach the caller, before any probe is dispatched. A scan
//! that has started always completes: every failure of a single probe is
//! folded into its result's `info` text.
#![allow(clippy::needless_doctest_main)]

pub mod address;

pub mod candidate;

pub mod classifier;

pub mod config;

pub mod discovery;

pub mod error;

pub mod probe;

pub mod scanner;

pub mod scheduler;

pub mod timing;

pub use classifier::{ScanMode, ScanResult, Status};
pub use error::ScanError;
pub use probe::ChannelKind;
pub use scanner::Scanner;
