//! This crate exposes the internal functionality of the `bugscan` host
//! scanner.
//!
//! bugscan pushes large host lists through one of several probes and reports
//! the hosts that answer in a useful way: a plain HTTP(S) response, a TLS
//! handshake under a chosen SNI, a relay that forwards an injected request to
//! another host, or a CDN front that upgrades such a request to a WebSocket.
//!
//! ## Architecture Overview
//!
//! The core scanning behaviour is managed by
//! [`Scanner`](crate::scanner::Scanner), which runs one
//! [`Probe`](crate::probe::Probe) over every queued target with a fixed
//! number of workers:
//!
//! 1. **Input Processing**: host lists are read, CIDR blocks expanded and
//!    duplicates dropped ([`address`]).
//! 2. **Probing**: each worker hands a target to the probe, which does its
//!    own timeout-bounded network I/O ([`probe`]).
//! 3. **Result Processing**: hits are counted, appended to the output file
//!    and printed above the status line ([`scanner::ScanContext`]).
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use bugscan::address::Resolver;
//! use bugscan::probe::{PingConfig, PingProbe};
//! use bugscan::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() {
//!     let resolver = Resolver::from_opts(None).await;
//!     let probe = PingProbe::new(PingConfig::default(), resolver);
//!
//!     let mut scanner = Scanner::new(16, probe);
//!     scanner.add(["127.0.0.1".to_owned(), "example.com".to_owned()]);
//!
//!     let summary = scanner.run().await;
//!     println!("{} of {} hosts answered", summary.success, summary.total);
//! }
//! ```
#![allow(clippy::needless_doctest_main)]
#![doc(html_root_url = "https://docs.rs/bugscan/0.3.0")]

pub mod tui;

pub mod input;

pub mod scanner;

pub mod probe;

pub mod payload;

pub mod address;
