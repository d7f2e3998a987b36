//! TLS handshake probe: a host is a hit when a handshake using it as SNI
//! completes.
use std::net::IpAddr;
use std::time::Duration;

use anyhow::Result;
use log::debug;
use tokio::time;
use tokio_native_tls::TlsConnector;

use super::{dial, host_port, insecure_tls_connector, Probe, DEFAULT_TRIES};
use crate::address::Resolver;
use crate::scanner::ScanContext;

#[derive(Debug, Clone)]
pub struct SniConfig {
    pub port: u16,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub tries: u8,
}

impl Default for SniConfig {
    fn default() -> Self {
        Self {
            port: 443,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            tries: DEFAULT_TRIES,
        }
    }
}

/// `ip domain`, in the column layout shared with the ping probe.
pub fn format_hit(ip: IpAddr, domain: &str) -> String {
    format!("{:<16} {:<20}", ip.to_string(), domain)
}

pub struct SniProbe {
    config: SniConfig,
    resolver: Resolver,
    tls: TlsConnector,
}

impl SniProbe {
    pub fn new(config: SniConfig, resolver: Resolver) -> Result<Self> {
        Ok(Self {
            config,
            resolver,
            tls: insecure_tls_connector()?,
        })
    }
}

impl Probe for SniProbe {
    type Target = String;

    fn label(&self, domain: &String) -> String {
        host_port(domain, self.config.port)
    }

    async fn probe(&self, _ctx: &ScanContext, domain: String) -> Option<String> {
        let (stream, ip) = match dial(
            &self.resolver,
            &domain,
            self.config.port,
            self.config.connect_timeout,
            self.config.tries,
        )
        .await
        {
            Ok(dialed) => dialed,
            Err(e) => {
                debug!("{domain}: {e}");
                return None;
            }
        };

        match time::timeout(self.config.handshake_timeout, self.tls.connect(&domain, stream)).await {
            Ok(Ok(_)) => Some(format_hit(ip, &domain)),
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

#[cfg(test)]
mod tests {
    use super::{format_hit, SniConfig};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn hit_line_pads_both_columns() {
        let line = format_hit(IpAddr::V4(Ipv4Addr::new(104, 16, 0, 1)), "a.example");
        assert_eq!(line, format!("{:<16} {:<20}", "104.16.0.1", "a.example"));
        assert_eq!(line.len(), 16 + 1 + 20);
    }

    #[test]
    fn defaults_target_https() {
        let config = SniConfig::default();
        assert_eq!(config.port, 443);
        assert_eq!(config.tries, 3);
    }
}
