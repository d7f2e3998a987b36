#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::if_not_else, clippy::non_ascii_literal)]

use bugscan::address::{collapse_to_depth, expand_cidr, order_targets, read_lines, Resolver};
use bugscan::input::{
    CdnSslArgs, Command, Config, DirectArgs, Opts, PingArgs, ProxyArgs, RelaySource, SniArgs,
};
use bugscan::probe::direct::Scheme;
use bugscan::probe::{
    CdnTlsConfig, CdnTlsProbe, DirectConfig, DirectProbe, PingConfig, PingProbe, Probe,
    RelayConfig, RelayProbe, SniConfig, SniProbe,
};
use bugscan::scanner::{ScanSummary, Scanner};
use bugscan::tui::{print_direct_header, print_host_header};
use bugscan::{detail, output, warning};

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use log::debug;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
// Safest thread count for systems with a low open file limit.
#[cfg(unix)]
const AVERAGE_THREADS: u64 = 64;

#[tokio::main]
#[allow(clippy::too_many_lines)]
/// Reads the command line and config file, then runs the selected scan.
async fn main() -> Result<()> {
    env_logger::init();

    let mut opts: Opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    if opts.accessible {
        colored::control::set_override(false);
    }

    #[cfg(unix)]
    let threads = {
        let ulimit = adjust_ulimit_size(&opts);
        infer_threads(&opts, ulimit)
    };
    #[cfg(not(unix))]
    let threads = opts.threads;

    let resolver = Resolver::from_opts(opts.resolver.as_deref()).await;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let summary = match opts.command.clone() {
        Command::Direct(args) => run_direct(&opts, args, resolver, threads, cancel).await?,
        Command::Sni(args) => run_sni(&opts, args, resolver, threads, cancel).await?,
        Command::Proxy(args) => run_proxy(&opts, args, resolver, threads, cancel).await?,
        Command::CdnSsl(args) => run_cdn_ssl(&opts, args, resolver, threads, cancel).await?,
        Command::Ping(args) => run_ping(&opts, args, resolver, threads, cancel).await?,
    };

    println!();
    if summary.cancelled {
        warning!(
            format!(
                "Interrupted after {} of {} targets.",
                summary.completed, summary.total
            ),
            opts.accessible
        );
    }
    output!(
        format!(
            "Scanned {} targets, {} {}.",
            summary.completed,
            summary.success,
            if summary.success == 1 { "hit" } else { "hits" }
        ),
        opts.accessible
    );

    Ok(())
}

async fn run_direct(
    opts: &Opts,
    args: DirectArgs,
    resolver: Resolver,
    threads: usize,
    cancel: CancellationToken,
) -> Result<ScanSummary> {
    let hosts = read_lines(args.filename.as_deref()).await?;

    let scheme = if args.https { Scheme::Https } else { Scheme::Http };
    let mut config = DirectConfig::new(scheme);
    config.method = args.method;
    if let Some(port) = args.port {
        config.port = port;
    }
    config.connect_timeout = Duration::from_secs(args.timeout);
    config.handshake_timeout = Duration::from_secs(args.handshake_timeout);
    config.read_timeout = Duration::from_secs(args.read_timeout);
    config.ignore_location = args.ignore_location;

    let probe = DirectProbe::new(config, resolver)?;
    print_direct_header();
    Ok(scan(opts, probe, order_targets(hosts, opts.scan_order), args.output, threads, cancel).await)
}

async fn run_sni(
    opts: &Opts,
    args: SniArgs,
    resolver: Resolver,
    threads: usize,
    cancel: CancellationToken,
) -> Result<ScanSummary> {
    let domains = read_lines(args.filename.as_deref())
        .await?
        .into_iter()
        .map(|domain| collapse_to_depth(&domain, args.deep));

    let config = SniConfig {
        port: args.port,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        handshake_timeout: Duration::from_secs(args.timeout),
        ..SniConfig::default()
    };

    let probe = SniProbe::new(config, resolver)?;
    print_host_header("SNI");
    Ok(scan(opts, probe, order_targets(domains, opts.scan_order), args.output, threads, cancel).await)
}

async fn run_proxy(
    opts: &Opts,
    args: ProxyArgs,
    resolver: Resolver,
    threads: usize,
    cancel: CancellationToken,
) -> Result<ScanSummary> {
    let hosts = order_targets(relay_hosts(&args.source).await?, opts.scan_order);

    let mut config = RelayConfig::new(&args.target)
        .with_path(&args.path)
        .with_payload(&args.payload);
    config.port = args.port;
    config.method = args.method;
    config.protocol = args.protocol;
    config.connect_timeout = Duration::from_secs(args.timeout);
    config.result_timeout = Duration::from_secs(args.result_timeout);

    let targets = config.targets(hosts, args.bug.as_deref());
    print_payload(&config.preview());

    let probe = RelayProbe::new(config, resolver);
    Ok(scan(opts, probe, targets, args.output, threads, cancel).await)
}

async fn run_cdn_ssl(
    opts: &Opts,
    args: CdnSslArgs,
    resolver: Resolver,
    threads: usize,
    cancel: CancellationToken,
) -> Result<ScanSummary> {
    let hosts = order_targets(relay_hosts(&args.source).await?, opts.scan_order);

    let mut config = CdnTlsConfig::new(&args.target);
    config.relay = config.relay.with_path(&args.path).with_payload(&args.payload);
    config.relay.port = args.port;
    config.relay.method = args.method;
    config.relay.scheme = args.scheme;
    config.relay.protocol = args.protocol;
    config.relay.connect_timeout = Duration::from_secs(args.connect_timeout);
    config.relay.result_timeout = Duration::from_secs(args.result_timeout);
    config.handshake_timeout = Duration::from_secs(args.timeout);

    let targets = config.relay.targets(hosts, args.bug.as_deref());
    print_payload(&config.relay.preview());

    let probe = CdnTlsProbe::new(config, resolver)?;
    Ok(scan(opts, probe, targets, args.output, threads, cancel).await)
}

async fn run_ping(
    opts: &Opts,
    args: PingArgs,
    resolver: Resolver,
    threads: usize,
    cancel: CancellationToken,
) -> Result<ScanSummary> {
    let hosts = read_lines(args.filename.as_deref()).await?;

    let config = PingConfig {
        port: args.port,
        timeout: Duration::from_secs(args.timeout),
    };

    let probe = PingProbe::new(config, resolver);
    print_host_header("Host");
    Ok(scan(opts, probe, order_targets(hosts, opts.scan_order), args.output, threads, cancel).await)
}

async fn scan<P: Probe>(
    opts: &Opts,
    probe: P,
    targets: Vec<P::Target>,
    output: Option<PathBuf>,
    threads: usize,
    cancel: CancellationToken,
) -> ScanSummary {
    let mut scanner = Scanner::new(threads, probe).with_cancellation(cancel);
    scanner.add(targets);
    scanner.set_quiet(opts.quiet);
    if let Some(path) = output {
        scanner.set_output_file(path);
    }
    debug!("Scanning {} targets with {threads} workers", scanner.len());
    scanner.run().await
}

/// Merges every given relay source. Without any, hosts are read from stdin.
async fn relay_hosts(source: &RelaySource) -> Result<Vec<String>> {
    if source.is_empty() {
        return read_lines(None).await;
    }

    let mut hosts = Vec::new();
    if let Some(proxy) = &source.proxy {
        hosts.push(proxy.trim().to_owned());
    }
    if let Some(path) = &source.filename {
        hosts.extend(read_lines(Some(path.as_path())).await?);
    }
    if let Some(cidr) = &source.cidr {
        hosts.extend(expand_cidr(cidr)?);
    }
    Ok(hosts)
}

fn print_payload(preview: &str) {
    println!("{}\n", preview.bold());
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.accessible
            );
        } else {
            warning!("ERROR. Failed to set ulimit value.", opts.accessible);
        }
    }

    Resource::NOFILE
        .get()
        .map_or(DEFAULT_FILE_DESCRIPTORS_LIMIT, |(soft, _)| soft)
}

/// Lowers the worker count when every worker's socket would not fit in the
/// open file limit.
#[cfg(unix)]
fn infer_threads(opts: &Opts, ulimit: u64) -> usize {
    let threads = u64::try_from(opts.threads).unwrap_or(u64::MAX);
    let budget = ulimit / 2;

    if threads <= budget {
        return opts.threads;
    }

    warning!(
        "File limit is lower than the thread count. Consider upping it with --ulimit.",
        opts.accessible
    );
    let lowered = if budget < AVERAGE_THREADS {
        budget
    } else if ulimit > DEFAULT_FILE_DESCRIPTORS_LIMIT {
        AVERAGE_THREADS
    } else {
        budget
    };
    usize::try_from(lowered.max(1)).unwrap_or(1)
}
