//! TCP reachability: a host is a hit when a connect to the port succeeds.
use std::net::SocketAddr;
use std::time::Duration;

use log::debug;

use super::{connect, host_port, sni::format_hit, Probe};
use crate::address::Resolver;
use crate::scanner::ScanContext;

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub port: u16,
    pub timeout: Duration,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            port: 80,
            timeout: Duration::from_secs(2),
        }
    }
}

pub struct PingProbe {
    config: PingConfig,
    resolver: Resolver,
}

impl PingProbe {
    pub const fn new(config: PingConfig, resolver: Resolver) -> Self {
        Self { config, resolver }
    }
}

impl Probe for PingProbe {
    type Target = String;

    fn label(&self, host: &String) -> String {
        host_port(host, self.config.port)
    }

    async fn probe(&self, _ctx: &ScanContext, host: String) -> Option<String> {
        let ip = self.resolver.lookup(&host).await?.into_iter().next()?;
        match connect(SocketAddr::new(ip, self.config.port), self.config.timeout).await {
            Ok(_) => Some(format_hit(ip, &host)),
            Err(e) => {
                debug!("{host}: {e}");
                None
            }
        }
    }
}
