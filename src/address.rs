//! Provides functions to read host lists, expand CIDRs and resolve hosts.

use std::io::IsTerminal;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cidr_utils::cidr::IpCidr;
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::debug;
use rand::seq::SliceRandom;
use tokio::fs::{self, File};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time;

use crate::input::ScanOrder;

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Reads a newline-delimited host list, skipping blank lines.
///
/// `None` or `-` reads standard input, which must not be a terminal.
///
/// ```rust,no_run
/// # async fn demo() -> anyhow::Result<()> {
/// use std::path::Path;
/// let hosts = bugscan::address::read_lines(Some(Path::new("hosts.txt"))).await?;
/// # Ok(())
/// # }
/// ```
pub async fn read_lines(path: Option<&Path>) -> Result<Vec<String>> {
    match path {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)
                .await
                .with_context(|| format!("could not open host list {}", path.display()))?;
            collect_lines(file).await
        }
        _ => {
            if std::io::stdin().is_terminal() {
                bail!("no input provided: use -f or pipe hosts via stdin");
            }
            collect_lines(io::stdin()).await
        }
    }
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<String>> {
    let mut lines = BufReader::new(reader).lines();
    let mut hosts = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            hosts.push(line.to_owned());
        }
    }
    Ok(hosts)
}

/// Lists every host address of a CIDR block.
///
/// The network and broadcast addresses are dropped when the block holds more
/// than one address, so a `/32` yields just itself.
///
/// ```rust
/// # use bugscan::address::expand_cidr;
/// let ips = expand_cidr("192.168.0.0/30").unwrap();
/// assert_eq!(ips, ["192.168.0.1", "192.168.0.2"]);
/// ```
pub fn expand_cidr(cidr: &str) -> Result<Vec<String>> {
    let cidr = IpCidr::from_str(cidr.trim())
        .map_err(|e| anyhow::anyhow!("invalid CIDR {cidr:?}: {e}"))?;

    let mut ips = cidr
        .iter()
        .map(|c| c.address().to_string())
        .collect::<Vec<_>>();

    if ips.len() > 1 {
        ips.pop();
        ips.remove(0);
    }
    Ok(ips)
}

/// Keeps the last `depth` dot-separated labels of `host`.
///
/// A depth of 0, or one larger than the number of labels, leaves the host
/// untouched.
pub fn collapse_to_depth(host: &str, depth: usize) -> String {
    if depth == 0 {
        return host.to_owned();
    }
    let labels = host.split('.').collect::<Vec<_>>();
    if labels.len() < depth {
        return host.to_owned();
    }
    labels[labels.len() - depth..].join(".")
}

/// Drops duplicate hosts, keeping the first occurrence, then applies `order`.
pub fn order_targets(hosts: impl IntoIterator<Item = String>, order: ScanOrder) -> Vec<String> {
    let mut hosts = hosts.into_iter().unique().collect::<Vec<_>>();
    if order == ScanOrder::Random {
        hosts.shuffle(&mut rand::rng());
    }
    hosts
}

/// Returns true when `host` is an IP literal rather than a name.
pub fn is_ip(host: &str) -> bool {
    IpAddr::from_str(host).is_ok()
}

/// Host name resolution shared by all probes.
///
/// The system resolver is tried first, then a hickory resolver built from
/// `--resolver` (or the system config, or Cloudflare as a last resort).
#[derive(Clone)]
pub struct Resolver {
    backup: TokioAsyncResolver,
    timeout: Duration,
}

impl Resolver {
    /// Derive a DNS resolver.
    ///
    /// 1. if the `resolver` parameter has been set:
    ///     1. assume the parameter is a path and attempt to read IPs.
    ///     2. parse the input as a comma-separated list of IPs.
    /// 2. if `resolver` is not set:
    ///    1. attempt to derive a resolver from the system config. (e.g.
    ///       `/etc/resolv.conf` on *nix).
    ///    2. finally, build a CloudFlare-based resolver.
    pub async fn from_opts(resolver: Option<&str>) -> Self {
        let backup = match resolver {
            Some(r) => {
                let mut config = ResolverConfig::new();
                let resolver_ips = match read_resolver_from_file(r).await {
                    Ok(ips) => ips,
                    Err(_) => r
                        .split(',')
                        .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                        .collect::<Vec<_>>(),
                };
                for ip in resolver_ips {
                    config.add_name_server(NameServerConfig::new(
                        SocketAddr::new(ip, 53),
                        Protocol::Udp,
                    ));
                }
                TokioAsyncResolver::tokio(config, ResolverOpts::default())
            }
            None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
                TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
            }),
        };

        Self {
            backup,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every address `host` resolves to, or `None` when resolution fails.
    pub async fn lookup(&self, host: &str) -> Option<Vec<IpAddr>> {
        if let Ok(ip) = IpAddr::from_str(host) {
            return Some(vec![ip]);
        }

        match time::timeout(self.timeout, self.resolve(host)).await {
            Ok(ips) if !ips.is_empty() => Some(ips),
            Ok(_) => {
                debug!("Host {host:?} could not be resolved");
                None
            }
            Err(_) => {
                debug!("Resolving {host:?} timed out");
                None
            }
        }
    }

    /// First IPv4 address of `host`.
    pub async fn lookup_ipv4(&self, host: &str) -> Option<Ipv4Addr> {
        self.lookup(host).await?.into_iter().find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
    }

    async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        if let Ok(addrs) = tokio::net::lookup_host((host, 80)).await {
            let ips = addrs.map(|x| x.ip()).collect_vec();
            if !ips.is_empty() {
                return ips;
            }
        }
        match self.backup.lookup_ip(host).await {
            Ok(addrs) => addrs.iter().collect_vec(),
            Err(_) => Vec::new(),
        }
    }
}

/// Parses and input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
