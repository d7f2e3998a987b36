//! Payload injection through a relay host ("proxy" scan).
//!
//! The relay is dialed with a short connect timeout; only timeouts are
//! retried. The rendered payload is then written and the response head read,
//! all within one overall result timeout. Dropping the exchange on expiry
//! closes the connection, so nothing keeps running in the background.
use std::time::Duration;

use log::debug;
use tokio::time;

use super::{dial, exchange, host_port, DialError, Probe, ResponseHead, DEFAULT_TRIES};
use crate::address::{is_ip, Resolver};
use crate::payload::{PayloadTemplate, PayloadVars};
use crate::scanner::ScanContext;

/// One relay host together with the bug value chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub host: String,
    pub bug: String,
}

/// Request settings shared by the relay and CDN-TLS probes.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub method: String,
    /// Host expected to answer behind the relay, substituted for `[host]`.
    pub target: String,
    /// Rendered first, with `[scheme]`, `[bug]` and `[host]`, then used as
    /// the value of `[path]`.
    pub path: PayloadTemplate,
    pub scheme: String,
    pub protocol: String,
    pub payload: PayloadTemplate,
    pub connect_timeout: Duration,
    pub tries: u8,
    pub result_timeout: Duration,
}

impl RelayConfig {
    pub fn new(target: &str) -> Self {
        Self {
            port: 80,
            method: "GET".to_owned(),
            target: target.to_owned(),
            path: PayloadTemplate::root_path(),
            scheme: String::new(),
            protocol: "HTTP/1.1".to_owned(),
            payload: PayloadTemplate::default(),
            connect_timeout: Duration::from_secs(3),
            tries: DEFAULT_TRIES,
            result_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = PayloadTemplate::parse(path);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = PayloadTemplate::parse(payload);
        self
    }

    /// Picks the bug for `host`.
    ///
    /// A root path always uses the target. Otherwise an explicit bug wins,
    /// then the target for IP relays, then the relay host name itself.
    pub fn bug_for(&self, host: &str, configured: Option<&str>) -> String {
        if self.path.as_str() == "/" {
            return self.target.clone();
        }
        match configured.filter(|bug| !bug.is_empty()) {
            Some(bug) => bug.to_owned(),
            None if is_ip(host) => self.target.clone(),
            None => host.to_owned(),
        }
    }

    pub fn targets(
        &self,
        hosts: impl IntoIterator<Item = String>,
        configured_bug: Option<&str>,
    ) -> Vec<RelayTarget> {
        hosts
            .into_iter()
            .map(|host| RelayTarget {
                bug: self.bug_for(&host, configured_bug),
                host,
            })
            .collect()
    }

    /// The bytes written to a relay for `bug`.
    pub fn payload_for(&self, bug: &str) -> String {
        let path = self.path.render(&self.vars("", bug));
        self.payload.render(&self.vars(&path, bug))
    }

    /// The payload with per-target values and line breaks left as tokens.
    pub fn preview(&self) -> String {
        let path = self.path.preview(&PayloadVars {
            host: "[host]",
            ..self.vars("", "[bug]")
        });
        self.payload.preview(&PayloadVars {
            host: "[host]",
            ..self.vars(&path, "[bug]")
        })
    }

    fn vars<'a>(&'a self, path: &'a str, bug: &'a str) -> PayloadVars<'a> {
        PayloadVars {
            method: &self.method,
            path,
            protocol: &self.protocol,
            scheme: &self.scheme,
            host: &self.target,
            bug,
        }
    }
}

/// What a relay's response head amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayVerdict {
    /// Nothing came back.
    NoResponse,
    /// A 302, the usual captive-portal answer.
    Redirect(String),
    Hit(String),
}

/// Any answer but a 302 counts, upgrades included.
pub fn classify(host_port: &str, head: &ResponseHead) -> RelayVerdict {
    if head.is_empty() {
        RelayVerdict::NoResponse
    } else if head.has_status(302) {
        RelayVerdict::Redirect(format_result(host_port, head))
    } else {
        RelayVerdict::Hit(format_result(host_port, head))
    }
}

pub fn format_result(host_port: &str, head: &ResponseHead) -> String {
    format!("{host_port:<32}  {}", head.summary())
}

pub struct RelayProbe {
    config: RelayConfig,
    resolver: Resolver,
}

impl RelayProbe {
    pub const fn new(config: RelayConfig, resolver: Resolver) -> Self {
        Self { config, resolver }
    }
}

impl Probe for RelayProbe {
    type Target = RelayTarget;

    fn label(&self, target: &RelayTarget) -> String {
        format!(
            "{} - {}",
            host_port(&target.host, self.config.port),
            self.config.target
        )
    }

    async fn probe(&self, ctx: &ScanContext, target: RelayTarget) -> Option<String> {
        let relay = host_port(&target.host, self.config.port);
        let stream = match dial(
            &self.resolver,
            &target.host,
            self.config.port,
            self.config.connect_timeout,
            self.config.tries,
        )
        .await
        {
            Ok((stream, _)) => stream,
            Err(DialError::Timeout) => {
                debug!("{relay}: gave up after {} dial timeouts", self.config.tries);
                return None;
            }
            Err(e) => {
                debug!("{relay}: {e}");
                return None;
            }
        };

        let payload = self.config.payload_for(&target.bug);
        let head = match time::timeout(
            self.config.result_timeout,
            exchange(stream, payload.as_bytes()),
        )
        .await
        {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                debug!("{relay}: exchange failed: {e}");
                return None;
            }
            Err(_) => {
                debug!("{relay}: no answer within {:?}", self.config.result_timeout);
                return None;
            }
        };

        match classify(&relay, &head) {
            RelayVerdict::NoResponse => {
                debug!("{relay}: empty response");
                None
            }
            RelayVerdict::Redirect(_) => {
                ctx.log(format!("{relay:<32} Skipping 302 Response"));
                None
            }
            RelayVerdict::Hit(line) => Some(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, RelayConfig, RelayTarget, RelayVerdict};
    use crate::probe::ResponseHead;

    fn config(path: &str) -> RelayConfig {
        RelayConfig::new("target.example").with_path(path)
    }

    #[test]
    fn root_path_always_uses_target_as_bug() {
        let config = config("/");
        assert_eq!(config.bug_for("relay.example", Some("explicit.example")), "target.example");
        assert_eq!(config.bug_for("10.0.0.1", None), "target.example");
    }

    #[test]
    fn ip_relay_without_bug_uses_target() {
        let config = config("/ws");
        assert_eq!(config.bug_for("10.0.0.1", None), "target.example");
        assert_eq!(config.bug_for("10.0.0.1", Some("")), "target.example");
    }

    #[test]
    fn named_relay_without_bug_uses_itself() {
        let config = config("/ws");
        assert_eq!(config.bug_for("relay.example", None), "relay.example");
    }

    #[test]
    fn explicit_bug_wins_off_root() {
        let config = config("/ws");
        assert_eq!(config.bug_for("10.0.0.1", Some("bug.example")), "bug.example");
        assert_eq!(config.bug_for("relay.example", Some("bug.example")), "bug.example");
    }

    #[test]
    fn targets_carry_their_bug() {
        let config = config("/ws");
        let targets = config.targets(["10.0.0.1".to_owned(), "relay.example".to_owned()], None);
        assert_eq!(
            targets,
            vec![
                RelayTarget {
                    host: "10.0.0.1".to_owned(),
                    bug: "target.example".to_owned()
                },
                RelayTarget {
                    host: "relay.example".to_owned(),
                    bug: "relay.example".to_owned()
                },
            ]
        );
    }

    #[test]
    fn payload_substitutes_target_and_crlf() {
        let config = config("/");
        assert_eq!(
            config.payload_for("target.example"),
            "GET / HTTP/1.1\r\nHost: target.example\r\nUpgrade: websocket\r\n\r\n"
        );
    }

    #[test]
    fn path_template_is_expanded_before_payload() {
        let mut config = config("[scheme][bug]");
        config.scheme = "ws://".to_owned();
        config.method = "HEAD".to_owned();

        assert_eq!(
            config.payload_for("bug.example"),
            "HEAD ws://bug.example HTTP/1.1\r\nHost: target.example\r\nUpgrade: websocket\r\n\r\n"
        );
    }

    #[test]
    fn preview_leaves_per_target_tokens() {
        let config = config("/");
        assert_eq!(
            config.preview(),
            "GET / HTTP/1.1[crlf]Host: [host][crlf]Upgrade: websocket[crlf][crlf]"
        );
    }

    #[test]
    fn redirect_is_never_a_hit() {
        let head = ResponseHead::from_lines([
            "HTTP/1.1 302 Found",
            "Location: http://portal/",
            "Server: relay",
        ]);
        assert!(matches!(classify("10.0.0.1:80", &head), RelayVerdict::Redirect(_)));
    }

    #[test]
    fn upgrade_and_other_statuses_are_hits() {
        for status in ["HTTP/1.1 101 Switching Protocols", "HTTP/1.1 200 OK", "HTTP/1.1 403 Forbidden"] {
            let head = ResponseHead::from_lines([status]);
            match classify("10.0.0.1:80", &head) {
                RelayVerdict::Hit(line) => assert!(line.ends_with(status)),
                other => panic!("{status}: {other:?}"),
            }
        }
    }

    #[test]
    fn empty_head_is_no_response() {
        assert_eq!(
            classify("10.0.0.1:80", &ResponseHead::default()),
            RelayVerdict::NoResponse
        );
    }

    #[test]
    fn hit_line_pads_relay_column() {
        let head = ResponseHead::from_lines(["HTTP/1.1 200 OK", "Server: x"]);
        let RelayVerdict::Hit(line) = classify("10.0.0.1:80", &head) else {
            panic!("expected hit");
        };
        assert_eq!(line, format!("{:<32}  HTTP/1.1 200 OK -- Server: x", "10.0.0.1:80"));
    }
}
