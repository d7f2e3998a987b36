//! Wire-level probes and the plumbing they share.
//!
//! Every probe kind implements [`Probe`]: it receives one target and the
//! shared [`ScanContext`], performs its own network I/O with its own
//! timeouts, and returns the result line for a hit. Connections are owned by
//! the probe invocation and are closed when it returns or is dropped.
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;

use crate::address::Resolver;
use crate::scanner::ScanContext;

pub mod cdn_tls;
pub mod direct;
pub mod ping;
pub mod relay;
pub mod sni;

pub use cdn_tls::{CdnTlsConfig, CdnTlsProbe};
pub use direct::{DirectConfig, DirectProbe};
pub use ping::{PingConfig, PingProbe};
pub use relay::{RelayConfig, RelayProbe, RelayTarget};
pub use sni::{SniConfig, SniProbe};

/// Default number of connect attempts when every attempt times out.
pub const DEFAULT_TRIES: u8 = 3;

/// Upper bound on header lines read from a relay before giving up.
const MAX_HEADER_LINES: usize = 128;
/// Longer header lines are cut at this length; the rest reads as further lines.
const MAX_LINE_BYTES: u64 = 8192;

/// One kind of probe, run by the [`Scanner`](crate::scanner::Scanner) once
/// per target.
pub trait Probe: Send + Sync + 'static {
    type Target: Send + 'static;

    /// Short name of `target` for the progress line.
    fn label(&self, target: &Self::Target) -> String;

    /// Probes `target`, returning the result line when it is a hit.
    fn probe(
        &self,
        ctx: &ScanContext,
        target: Self::Target,
    ) -> impl Future<Output = Option<String>> + Send;
}

/// Why a connection could not be established.
#[derive(Debug)]
pub enum DialError {
    /// The host name did not resolve.
    Resolve,
    /// The connect attempt did not finish in time.
    Timeout,
    /// The network of the host is unreachable.
    Unreachable,
    Other(io::Error),
}

impl DialError {
    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
                Self::Unreachable
            }
            _ => Self::Other(e),
        }
    }
}

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => write!(f, "could not resolve host"),
            Self::Timeout => write!(f, "dial timeout"),
            Self::Unreachable => write!(f, "network is unreachable"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

/// Runs `attempt` until it succeeds or fails with anything but a timeout,
/// at most `tries` times.
///
/// Only [`DialError::Timeout`] is retried; resolution failures, unreachable
/// networks and other errors end the loop at once.
pub async fn retry_on_timeout<T, F, Fut>(tries: u8, mut attempt: F) -> Result<T, DialError>
where
    F: FnMut(u8) -> Fut,
    Fut: Future<Output = Result<T, DialError>>,
{
    let tries = tries.max(1);
    for nr_try in 1..=tries {
        match attempt(nr_try).await {
            Err(DialError::Timeout) => {
                debug!("Dial timeout, attempt {nr_try} of {tries}");
            }
            other => return other,
        }
    }
    Err(DialError::Timeout)
}

/// Resolves `host` and opens a TCP connection to `port`, retrying timeouts.
pub async fn dial(
    resolver: &Resolver,
    host: &str,
    port: u16,
    timeout: Duration,
    tries: u8,
) -> Result<(TcpStream, IpAddr), DialError> {
    let ip = resolver
        .lookup(host)
        .await
        .and_then(|ips| ips.into_iter().next())
        .ok_or(DialError::Resolve)?;

    let socket = SocketAddr::new(ip, port);
    let stream = retry_on_timeout(tries, |_| connect(socket, timeout)).await?;
    Ok((stream, ip))
}

/// `host:port`, bracketing IPv6 literals.
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// A single timeout-bounded connect.
pub async fn connect(socket: SocketAddr, timeout: Duration) -> Result<TcpStream, DialError> {
    match time::timeout(timeout, TcpStream::connect(socket)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(DialError::from_io(e)),
        Err(_) => Err(DialError::Timeout),
    }
}

/// TLS connector for scanning: certificates and host names are not verified,
/// the goal is handshake completion rather than trust.
pub fn insecure_tls_connector() -> Result<tokio_native_tls::TlsConnector> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    Ok(tokio_native_tls::TlsConnector::from(connector))
}

/// The interesting lines of a relayed HTTP response head: the status line
/// followed by any `Location` and `Server` headers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    lines: Vec<String>,
}

impl ResponseHead {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut head = Self::default();
        for line in lines {
            head.push(line.into());
        }
        head
    }

    fn push(&mut self, line: String) {
        if self.lines.is_empty() || is_header(&line, "location") || is_header(&line, "server") {
            self.lines.push(line);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn status_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// True when the status line carries `code` as a separate word.
    pub fn has_status(&self, code: u16) -> bool {
        self.status_line()
            .is_some_and(|line| line.contains(&format!(" {code} ")))
    }

    /// The kept lines joined with ` -- `.
    pub fn summary(&self) -> String {
        self.lines.join(" -- ")
    }
}

fn is_header(line: &str, name: &str) -> bool {
    line.len() >= name.len()
        && line.is_char_boundary(name.len())
        && line[..name.len()].eq_ignore_ascii_case(name)
}

/// Writes `payload` to `stream` and reads the response head line by line up
/// to the first blank line. Bytes that are not UTF-8 are replaced, not rejected.
pub async fn exchange<S>(stream: S, payload: &[u8]) -> io::Result<ResponseHead>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    reader.get_mut().write_all(payload).await?;
    reader.get_mut().flush().await?;

    let mut head = ResponseHead::default();
    let mut line = Vec::new();
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            break;
        }
        // Servers are free to send Latin-1 in header values.
        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        head.push(trimmed.to_owned());
    }
    Ok(head)
}
