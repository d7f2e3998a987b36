//! Plain HTTP(S) request/response probe.
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tokio_native_tls::TlsConnector;

use super::{connect, insecure_tls_connector, Probe};
use crate::address::Resolver;
use crate::scanner::ScanContext;

/// Bytes of the response kept for parsing.
pub const RESPONSE_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectConfig {
    pub scheme: Scheme,
    pub method: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Bounds the TLS handshake with [`Scheme::Https`].
    pub handshake_timeout: Duration,
    pub read_timeout: Duration,
    /// Responses redirecting here are not hits.
    pub ignore_location: Option<String>,
}

impl DirectConfig {
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme,
            method: "HEAD".to_owned(),
            port: scheme.default_port(),
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
            ignore_location: None,
        }
    }

    /// A response is a hit unless it redirects to the ignored location.
    pub fn accepts(&self, head: &HttpHead) -> bool {
        head.location.is_empty() || self.ignore_location.as_deref() != Some(head.location.as_str())
    }
}

/// Status code plus the two headers the direct probe reports.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HttpHead {
    pub status_code: u16,
    pub server: String,
    pub location: String,
}

impl HttpHead {
    /// Parses the start of a raw response.
    ///
    /// The status code is the second word of the first line, 0 when missing.
    /// Header scanning stops at the first blank line or the end of `raw`, and
    /// the first `Server`/`Location` line wins.
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.lines();

        let status_code = lines
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .unwrap_or(0);

        let mut server = None;
        let mut location = None;
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if server.is_none() && name.eq_ignore_ascii_case("server") {
                server = Some(value.trim().to_owned());
            } else if location.is_none() && name.eq_ignore_ascii_case("location") {
                location = Some(value.trim().to_owned());
            }
        }

        Self {
            status_code,
            server: server.unwrap_or_default(),
            location: location.unwrap_or_default(),
        }
    }
}

pub fn build_request(method: &str, domain: &str) -> String {
    format!("{method} / HTTP/1.1\r\nHost: {domain}\r\nConnection: close\r\n\r\n")
}

pub fn format_hit(ip: IpAddr, head: &HttpHead, domain: &str) -> String {
    format!(
        "{:<15}  {:<4}  {:<16}  {}",
        ip.to_string(),
        head.status_code,
        head.server,
        domain
    )
}

pub struct DirectProbe {
    config: DirectConfig,
    resolver: Resolver,
    tls: Option<TlsConnector>,
}

impl DirectProbe {
    pub fn new(config: DirectConfig, resolver: Resolver) -> Result<Self> {
        let tls = match config.scheme {
            Scheme::Https => Some(insecure_tls_connector()?),
            Scheme::Http => None,
        };
        Ok(Self {
            config,
            resolver,
            tls,
        })
    }

    async fn fetch(&self, ip: IpAddr, domain: &str) -> Option<Vec<u8>> {
        let socket = SocketAddr::new(ip, self.config.port);
        let stream = match connect(socket, self.config.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("{domain}: {e}");
                return None;
            }
        };
        let request = build_request(&self.config.method, domain);

        match &self.tls {
            None => read_response(stream, request.as_bytes(), self.config.read_timeout).await,
            Some(tls) => {
                let handshake =
                    time::timeout(self.config.handshake_timeout, tls.connect(domain, stream));
                match handshake.await {
                    Ok(Ok(stream)) => {
                        read_response(stream, request.as_bytes(), self.config.read_timeout).await
                    }
                    Ok(Err(e)) => {
                        debug!("{domain}: TLS handshake failed: {e}");
                        None
                    }
                    Err(_) => {
                        debug!("{domain}: TLS handshake timeout");
                        None
                    }
                }
            }
        }
    }
}

impl Probe for DirectProbe {
    type Target = String;

    fn label(&self, domain: &String) -> String {
        format!("{}://{}", self.config.scheme.as_str(), domain)
    }

    async fn probe(&self, _ctx: &ScanContext, domain: String) -> Option<String> {
        let Some(ip) = self.resolver.lookup_ipv4(&domain).await else {
            debug!("{domain}: no IPv4 address");
            return None;
        };
        let ip = IpAddr::V4(ip);

        let raw = self.fetch(ip, &domain).await?;
        let head = HttpHead::parse(&raw);
        if !self.config.accepts(&head) {
            debug!("{domain}: ignored redirect to {}", head.location);
            return None;
        }

        Some(format_hit(ip, &head, &domain))
    }
}

/// Sends `request` and reads until the header block is complete, the buffer
/// is full or the peer closes. Nothing read means no response.
async fn read_response<S>(mut stream: S, request: &[u8], timeout: Duration) -> Option<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        stream.write_all(request).await?;
        let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
            if headers_complete(&buf[..filled]) {
                break;
            }
        }
        buf.truncate(filled);
        Ok::<_, io::Error>(buf)
    };

    match time::timeout(timeout, exchange).await {
        Ok(Ok(buf)) if !buf.is_empty() => Some(buf),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("Reading response failed: {e}");
            None
        }
        Err(_) => {
            debug!("Response timeout");
            None
        }
    }
}

fn headers_complete(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.windows(2).any(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::{build_request, format_hit, headers_complete, DirectConfig, HttpHead, Scheme};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    #[test]
    fn parse_status_server_and_location() {
        let head = HttpHead::parse(
            b"HTTP/1.1 200 OK\r\nServer: nginx\r\nLocation: https://x\r\n\r\n<body>",
        );

        assert_eq!(head.status_code, 200);
        assert_eq!(head.server, "nginx");
        assert_eq!(head.location, "https://x");
    }

    #[test]
    fn parse_empty_response() {
        assert_eq!(HttpHead::parse(b""), HttpHead::default());
    }

    #[test]
    fn parse_unparseable_status() {
        let head = HttpHead::parse(b"garbage\r\n\r\n");
        assert_eq!(head.status_code, 0);
        assert!(head.server.is_empty());
    }

    #[test]
    fn header_names_are_case_insensitive_and_first_wins() {
        let head = HttpHead::parse(
            b"HTTP/1.0 301 Moved\nSERVER: cloudflare\nserver: other\nlocation: /a\nLocation: /b\n\n",
        );

        assert_eq!(head.status_code, 301);
        assert_eq!(head.server, "cloudflare");
        assert_eq!(head.location, "/a");
    }

    #[test]
    fn headers_after_blank_line_are_ignored() {
        let head = HttpHead::parse(b"HTTP/1.1 204 No Content\r\n\r\nServer: body\r\n");
        assert_eq!(head.status_code, 204);
        assert!(head.server.is_empty());
    }

    #[test]
    fn ignored_location_is_not_a_hit() {
        let mut config = DirectConfig::new(Scheme::Http);
        config.ignore_location = Some("https://portal.example/".to_owned());

        let redirected = HttpHead {
            status_code: 302,
            location: "https://portal.example/".to_owned(),
            ..HttpHead::default()
        };
        let elsewhere = HttpHead {
            location: "https://other.example/".to_owned(),
            ..redirected.clone()
        };

        assert!(!config.accepts(&redirected));
        assert!(config.accepts(&elsewhere));
        assert!(config.accepts(&HttpHead::default()));
    }

    #[test]
    fn every_response_is_a_hit_without_ignored_location() {
        let config = DirectConfig::new(Scheme::Https);
        let head = HttpHead {
            status_code: 302,
            location: "https://anything/".to_owned(),
            ..HttpHead::default()
        };
        assert!(config.accepts(&head));
        assert_eq!(config.port, 443);
    }

    #[test]
    fn handshake_has_its_own_timeout() {
        let config = DirectConfig::new(Scheme::Https);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn request_is_minimal_http11() {
        assert_eq!(
            build_request("HEAD", "a.example"),
            "HEAD / HTTP/1.1\r\nHost: a.example\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn hit_line_is_aligned() {
        let head = HttpHead {
            status_code: 200,
            server: "nginx".to_owned(),
            location: String::new(),
        };
        let line = format_hit(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), &head, "a.example");
        assert_eq!(line, "10.0.0.1         200   nginx             a.example");
    }

    #[test]
    fn header_terminator_detection() {
        assert!(headers_complete(b"HTTP/1.1 200 OK\r\n\r\n"));
        assert!(!headers_complete(b"HTTP/1.1 200 OK\r\nServer: x\r\n"));
    }
}
