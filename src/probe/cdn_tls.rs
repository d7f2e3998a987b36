//! WebSocket upgrade through a TLS-terminating CDN front ("cdn-ssl" scan).
//!
//! Same request as the relay probe, but sent inside a TLS session whose SNI
//! is the bug host. Only a `101` answer is a hit; anything else is logged.
use std::time::Duration;

use anyhow::Result;
use log::debug;
use tokio::time;
use tokio_native_tls::TlsConnector;

use super::relay::format_result;
use super::{
    dial, exchange, host_port, insecure_tls_connector, Probe, RelayConfig, RelayTarget, ResponseHead,
};
use crate::address::Resolver;
use crate::scanner::ScanContext;

#[derive(Debug, Clone)]
pub struct CdnTlsConfig {
    pub relay: RelayConfig,
    pub handshake_timeout: Duration,
}

impl CdnTlsConfig {
    pub fn new(target: &str) -> Self {
        let mut relay = RelayConfig::new(target).with_path("[scheme][bug]");
        relay.port = 443;
        relay.method = "HEAD".to_owned();
        relay.scheme = "ws://".to_owned();
        Self {
            relay,
            handshake_timeout: Duration::from_secs(3),
        }
    }
}

/// Hit line for a `101`, otherwise the line to log.
pub fn classify_upgrade(host_port: &str, head: &ResponseHead) -> Result<String, String> {
    let line = format_result(host_port, head);
    if head.has_status(101) {
        Ok(line)
    } else {
        Err(line)
    }
}

pub struct CdnTlsProbe {
    config: CdnTlsConfig,
    resolver: Resolver,
    tls: TlsConnector,
}

impl CdnTlsProbe {
    pub fn new(config: CdnTlsConfig, resolver: Resolver) -> Result<Self> {
        Ok(Self {
            config,
            resolver,
            tls: insecure_tls_connector()?,
        })
    }
}

impl Probe for CdnTlsProbe {
    type Target = RelayTarget;

    fn label(&self, target: &RelayTarget) -> String {
        format!(
            "{} - {}",
            host_port(&target.host, self.config.relay.port),
            target.bug
        )
    }

    async fn probe(&self, ctx: &ScanContext, target: RelayTarget) -> Option<String> {
        let relay = &self.config.relay;
        let front = host_port(&target.host, relay.port);

        let (stream, _) = match dial(
            &self.resolver,
            &target.host,
            relay.port,
            relay.connect_timeout,
            relay.tries,
        )
        .await
        {
            Ok(dialed) => dialed,
            Err(e) => {
                debug!("{front}: {e}");
                return None;
            }
        };

        let stream = match time::timeout(
            self.config.handshake_timeout,
            self.tls.connect(&target.bug, stream),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("{front}: TLS handshake with SNI {} failed: {e}", target.bug);
                return None;
            }
            Err(_) => {
                debug!("{front}: TLS handshake timeout");
                return None;
            }
        };

        let payload = relay.payload_for(&target.bug);
        let head = match time::timeout(relay.result_timeout, exchange(stream, payload.as_bytes())).await
        {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                debug!("{front}: exchange failed: {e}");
                return None;
            }
            Err(_) => {
                debug!("{front}: no answer within {:?}", relay.result_timeout);
                return None;
            }
        };

        match classify_upgrade(&front, &head) {
            Ok(line) => Some(line),
            Err(line) => {
                ctx.log(line);
                None
            }
        }
    }
}
