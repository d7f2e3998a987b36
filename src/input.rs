//! Provides a means to read, parse and hold configuration options for scans.
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::payload::DEFAULT_PAYLOAD;

/// Represents the strategy in which the targets will be scanned.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

/// Upper-cases an HTTP method given on the command line.
pub fn parse_method(input: &str) -> Result<String, String> {
    let method = input.trim();
    if method.is_empty() || method.contains(char::is_whitespace) {
        return Err(format!("Invalid HTTP method '{input}'"));
    }
    Ok(method.to_uppercase())
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bugscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}\n\nCOMMANDS:\n{subcommands}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Concurrent host scanner: direct HTTP, SNI handshakes, payload relays and CDN-TLS upgrades.
/// WARNING Only scan hosts you are allowed to test.
pub struct Opts {
    /// Number of probes running at the same time.
    #[arg(short, long, default_value = "64", global = true)]
    pub threads: usize,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long, global = true)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser, global = true)]
    pub config_path: Option<PathBuf>,

    /// Accessible mode. Turns off colors and decorations.
    #[arg(long, global = true)]
    pub accessible: bool,

    /// Hide the progress line.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long, global = true)]
    pub resolver: Option<String>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long, global = true)]
    pub ulimit: Option<u64>,

    /// The order in which hosts are scanned. "serial" keeps the input order
    /// (duplicates removed) while "random" shuffles it.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial", global = true)]
    pub scan_order: ScanOrder,

    #[command(subcommand)]
    pub command: Command,
}

/// One subcommand per probe kind.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send a plain HTTP(S) request to every host and report the answer.
    Direct(DirectArgs),
    /// Complete a TLS handshake using every host as SNI.
    Sni(SniArgs),
    /// Inject a payload through relay hosts towards a target.
    Proxy(ProxyArgs),
    /// Inject a payload over TLS through CDN relays, expecting a 101 upgrade.
    #[command(name = "cdn-ssl")]
    CdnSsl(CdnSslArgs),
    /// Check TCP reachability of every host.
    Ping(PingArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DirectArgs {
    /// Host list file, one host per line. Reads stdin when omitted or "-".
    #[arg(short, long)]
    pub filename: Option<PathBuf>,

    /// Use https instead of http.
    #[arg(long)]
    pub https: bool,

    /// HTTP method.
    #[arg(short, long, default_value = "HEAD", value_parser = parse_method)]
    pub method: String,

    /// Port to connect to. Defaults to 80, or 443 with --https.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "3")]
    pub timeout: u64,

    /// TLS handshake timeout in seconds, used with --https.
    #[arg(long, default_value = "3")]
    pub handshake_timeout: u64,

    /// Response timeout in seconds.
    #[arg(long, default_value = "5")]
    pub read_timeout: u64,

    /// Hide hosts redirecting to this Location.
    #[arg(long)]
    pub ignore_location: Option<String>,

    /// Append hits to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SniArgs {
    /// Domain list file, one domain per line. Reads stdin when omitted or "-".
    #[arg(short, long)]
    pub filename: Option<PathBuf>,

    /// Keep only the last N labels of every domain before scanning.
    #[arg(short, long, default_value = "0")]
    pub deep: usize,

    /// TLS port.
    #[arg(short, long, default_value = "443")]
    pub port: u16,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "3")]
    pub connect_timeout: u64,

    /// TLS handshake timeout in seconds.
    #[arg(long, default_value = "3")]
    pub timeout: u64,

    /// Append hits to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Where relay hosts come from. All given sources are merged.
#[derive(Args, Debug, Clone, Default)]
pub struct RelaySource {
    /// CIDR block of relays, e.g. 104.16.0.0/24.
    #[arg(short, long)]
    pub cidr: Option<String>,

    /// A single relay host, without port.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Relay list file, one host per line, without port.
    #[arg(short, long)]
    pub filename: Option<PathBuf>,
}

impl RelaySource {
    pub const fn is_empty(&self) -> bool {
        self.cidr.is_none() && self.proxy.is_none() && self.filename.is_none()
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProxyArgs {
    #[command(flatten)]
    pub source: RelaySource,

    /// Relay port.
    #[arg(short, long, default_value = "80")]
    pub port: u16,

    /// Host to use as [bug] when the relay is an IP.
    #[arg(short = 'B', long)]
    pub bug: Option<String>,

    /// HTTP method substituted for [method].
    #[arg(short = 'M', long, default_value = "GET", value_parser = parse_method)]
    pub method: String,

    /// Target expected to answer behind the relay, substituted for [host].
    #[arg(long)]
    pub target: String,

    /// Request path substituted for [path].
    #[arg(long, default_value = "/")]
    pub path: String,

    /// Request protocol substituted for [protocol].
    #[arg(long, default_value = "HTTP/1.1")]
    pub protocol: String,

    /// Payload template written to every relay.
    #[arg(long, default_value = DEFAULT_PAYLOAD)]
    pub payload: String,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "3")]
    pub timeout: u64,

    /// Timeout in seconds for the payload exchange.
    #[arg(long, default_value = "10")]
    pub result_timeout: u64,

    /// Append hits to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CdnSslArgs {
    #[command(flatten)]
    pub source: RelaySource,

    /// Relay port.
    #[arg(short, long, default_value = "443")]
    pub port: u16,

    /// Host to use as SNI and [bug] when the relay is an IP.
    #[arg(short = 'B', long)]
    pub bug: Option<String>,

    /// HTTP method substituted for [method].
    #[arg(short = 'M', long, default_value = "HEAD", value_parser = parse_method)]
    pub method: String,

    /// Target domain behind the CDN, substituted for [host].
    #[arg(long)]
    pub target: String,

    /// Request path substituted for [path]; may use [scheme], [bug] and [host].
    #[arg(long, default_value = "[scheme][bug]")]
    pub path: String,

    /// Request scheme substituted for [scheme].
    #[arg(long, default_value = "ws://")]
    pub scheme: String,

    /// Request protocol substituted for [protocol].
    #[arg(long, default_value = "HTTP/1.1")]
    pub protocol: String,

    /// Payload template written to every relay.
    #[arg(long, default_value = DEFAULT_PAYLOAD)]
    pub payload: String,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "3")]
    pub connect_timeout: u64,

    /// TLS handshake timeout in seconds.
    #[arg(long, default_value = "3")]
    pub timeout: u64,

    /// Timeout in seconds for the payload exchange.
    #[arg(long, default_value = "10")]
    pub result_timeout: u64,

    /// Append hits to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PingArgs {
    /// Host list file, one host per line. Reads stdin when omitted or "-".
    #[arg(short, long)]
    pub filename: Option<PathBuf>,

    /// Port to connect to.
    #[arg(short, long, default_value = "80")]
    pub port: u16,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "2")]
    pub timeout: u64,

    /// Append hits to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merges the values found within the user configuration file into the
    /// parsed command line.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(threads, accessible, quiet, scan_order);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(resolver, ulimit);
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    threads: Option<usize>,
    accessible: Option<bool>,
    quiet: Option<bool>,
    scan_order: Option<ScanOrder>,
    resolver: Option<String>,
    ulimit: Option<u64>,
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// threads = 128
    /// accessible = false
    /// scan_order = "Random"
    /// resolver = "1.1.1.1,8.8.8.8"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("could not read {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid configuration file {}", config_path.display()))
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let mut config_path = dirs::home_dir().unwrap_or_default();
    config_path.push(".bugscan.toml");
    config_path
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use parameterized::parameterized;
    use std::path::PathBuf;

    use super::{parse_method, Command, Config, Opts, ScanOrder};
    use crate::payload::DEFAULT_PAYLOAD;

    fn direct_opts() -> Opts {
        Opts::parse_from(["bugscan", "direct", "-f", "hosts.txt"])
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[parameterized(input = {
        "get", "Head", "POST", " patch ",
    }, expected = {
        "GET", "HEAD", "POST", "PATCH",
    })]
    fn methods_are_upper_cased(input: &str, expected: &str) {
        assert_eq!(parse_method(input), Ok(expected.to_owned()));
    }

    #[test]
    fn empty_method_is_rejected() {
        assert!(parse_method("").is_err());
        assert!(parse_method("GE T").is_err());
    }

    #[test]
    fn direct_defaults() {
        let opts = Opts::parse_from(["bugscan", "direct", "-f", "hosts.txt", "-m", "get"]);
        assert_eq!(opts.threads, 64);
        let Command::Direct(args) = opts.command else {
            panic!("expected direct");
        };
        assert_eq!(args.filename, Some(PathBuf::from("hosts.txt")));
        assert_eq!(args.method, "GET");
        assert!(!args.https);
        assert_eq!(args.port, None);
        assert_eq!(args.timeout, 3);
        assert_eq!(args.handshake_timeout, 3);
    }

    #[test]
    fn direct_timeouts_are_separate() {
        let opts = Opts::parse_from([
            "bugscan",
            "direct",
            "--https",
            "--timeout",
            "1",
            "--handshake-timeout",
            "7",
        ]);
        let Command::Direct(args) = opts.command else {
            panic!("expected direct");
        };
        assert_eq!(args.timeout, 1);
        assert_eq!(args.handshake_timeout, 7);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let opts = Opts::parse_from(["bugscan", "sni", "-f", "d.txt", "-t", "8", "--deep", "2"]);
        assert_eq!(opts.threads, 8);
        let Command::Sni(args) = opts.command else {
            panic!("expected sni");
        };
        assert_eq!(args.deep, 2);
        assert_eq!(args.port, 443);
    }

    #[test]
    fn proxy_defaults() {
        let opts = Opts::parse_from(["bugscan", "proxy", "--cidr", "10.0.0.0/30", "--target", "t.example"]);
        let Command::Proxy(args) = opts.command else {
            panic!("expected proxy");
        };
        assert_eq!(args.source.cidr.as_deref(), Some("10.0.0.0/30"));
        assert_eq!(args.port, 80);
        assert_eq!(args.method, "GET");
        assert_eq!(args.path, "/");
        assert_eq!(args.protocol, "HTTP/1.1");
        assert_eq!(args.payload, DEFAULT_PAYLOAD);
        assert_eq!(args.timeout, 3);
        assert_eq!(args.result_timeout, 10);
    }

    #[test]
    fn cdn_ssl_defaults() {
        let opts = Opts::parse_from(["bugscan", "cdn-ssl", "--proxy", "1.1.1.1", "--target", "t.example"]);
        let Command::CdnSsl(args) = opts.command else {
            panic!("expected cdn-ssl");
        };
        assert_eq!(args.port, 443);
        assert_eq!(args.method, "HEAD");
        assert_eq!(args.path, "[scheme][bug]");
        assert_eq!(args.scheme, "ws://");
    }

    #[test]
    fn proxy_requires_target() {
        assert!(Opts::try_parse_from(["bugscan", "proxy", "--proxy", "1.1.1.1"]).is_err());
    }

    #[test]
    fn opts_no_merge_when_config_is_ignored() {
        let mut opts = Opts::parse_from(["bugscan", "--no-config", "ping", "-f", "h.txt"]);
        let config = Config::read(Some(PathBuf::from("fixtures/config.toml"))).unwrap();

        opts.merge(&config);

        assert_eq!(opts.threads, 64);
        assert!(!opts.accessible);
        assert_eq!(opts.scan_order, ScanOrder::Serial);
        assert_eq!(opts.resolver, None);
    }

    #[test]
    fn opts_merge_config_file() {
        let mut opts = direct_opts();
        let config = Config::read(Some(PathBuf::from("fixtures/config.toml"))).unwrap();

        opts.merge(&config);

        assert_eq!(opts.threads, 16);
        assert!(opts.accessible);
        assert!(!opts.quiet);
        assert_eq!(opts.scan_order, ScanOrder::Random);
        assert_eq!(opts.resolver.as_deref(), Some("1.1.1.1"));
        assert_eq!(opts.ulimit, None);
    }

    #[test]
    fn missing_config_file_is_empty() {
        let mut opts = direct_opts();
        let config = Config::read(Some(PathBuf::from("fixtures/nope.toml"))).unwrap();

        opts.merge(&config);

        assert_eq!(opts.threads, 64);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        assert!(Config::read(Some(PathBuf::from("fixtures/hosts.txt"))).is_err());
    }
}
