//! Payload templates written to relay connections.
//!
//! A template is plain text with `[name]` placeholders. The recognised names
//! are `method`, `path`, `protocol`, `scheme`, `host`, `bug`, `crlf`, `cr` and
//! `lf`, spelled exactly. Any other bracketed text, such as an IPv6 literal or
//! a JSON array, is copied through unchanged.
//!
//! Rendering is a single pass over the parsed template, so a substituted
//! value is never scanned for placeholders again: a target named `[crlf]`
//! stays the literal text `[crlf]`.
//!
//! ```rust
//! use bugscan::payload::{PayloadTemplate, PayloadVars};
//!
//! let template = PayloadTemplate::parse("[method] [path] [protocol][crlf]Host: [host][crlf][crlf]");
//! let vars = PayloadVars {
//!     method: "GET",
//!     path: "/",
//!     protocol: "HTTP/1.1",
//!     scheme: "",
//!     host: "example.com",
//!     bug: "example.com",
//! };
//! assert_eq!(template.render(&vars), "GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
//! ```

/// Payload sent to every relay when no `--payload` is given.
pub const DEFAULT_PAYLOAD: &str =
    "[method] [path] [protocol][crlf]Host: [host][crlf]Upgrade: websocket[crlf][crlf]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Method,
    Path,
    Protocol,
    Scheme,
    Host,
    Bug,
    Crlf,
    Cr,
    Lf,
}

const PLACEHOLDERS: [(&str, Placeholder); 9] = [
    ("[method]", Placeholder::Method),
    ("[path]", Placeholder::Path),
    ("[protocol]", Placeholder::Protocol),
    ("[scheme]", Placeholder::Scheme),
    ("[host]", Placeholder::Host),
    ("[bug]", Placeholder::Bug),
    ("[crlf]", Placeholder::Crlf),
    ("[cr]", Placeholder::Cr),
    ("[lf]", Placeholder::Lf),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Value(Placeholder),
}

/// Per-request values substituted into a [`PayloadTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct PayloadVars<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub protocol: &'a str,
    pub scheme: &'a str,
    pub host: &'a str,
    pub bug: &'a str,
}

impl<'a> PayloadVars<'a> {
    fn value(&self, placeholder: Placeholder, line_breaks: LineBreaks) -> &'a str {
        match (placeholder, line_breaks) {
            (Placeholder::Method, _) => self.method,
            (Placeholder::Path, _) => self.path,
            (Placeholder::Protocol, _) => self.protocol,
            (Placeholder::Scheme, _) => self.scheme,
            (Placeholder::Host, _) => self.host,
            (Placeholder::Bug, _) => self.bug,
            (Placeholder::Crlf, LineBreaks::Bytes) => "\r\n",
            (Placeholder::Cr, LineBreaks::Bytes) => "\r",
            (Placeholder::Lf, LineBreaks::Bytes) => "\n",
            (Placeholder::Crlf, LineBreaks::Tokens) => "[crlf]",
            (Placeholder::Cr, LineBreaks::Tokens) => "[cr]",
            (Placeholder::Lf, LineBreaks::Tokens) => "[lf]",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LineBreaks {
    Bytes,
    Tokens,
}

/// A parsed payload template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    text: String,
    segments: Vec<Segment>,
}

impl PayloadTemplate {
    /// Splits `text` into literal runs and known placeholders.
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(open) = rest.find('[') {
            literal.push_str(&rest[..open]);
            rest = &rest[open..];

            if let Some((name, placeholder)) = PLACEHOLDERS
                .iter()
                .find(|(name, _)| rest.starts_with(name))
            {
                if !literal.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Value(*placeholder));
                rest = &rest[name.len()..];
            } else {
                literal.push('[');
                rest = &rest[1..];
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }

        Self {
            text: text.to_owned(),
            segments,
        }
    }

    /// Expands every placeholder, producing the bytes written to the wire.
    pub fn render(&self, vars: &PayloadVars<'_>) -> String {
        self.fill(vars, LineBreaks::Bytes)
    }

    /// Like [`render`](Self::render) but keeps line-break tokens visible, for
    /// printing the payload before a scan.
    pub fn preview(&self, vars: &PayloadVars<'_>) -> String {
        self.fill(vars, LineBreaks::Tokens)
    }

    /// The bare request path `/`.
    pub fn root_path() -> Self {
        Self::parse("/")
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn fill(&self, vars: &PayloadVars<'_>, line_breaks: LineBreaks) -> String {
        let mut out = String::with_capacity(self.text.len() + 64);
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Value(placeholder) => out.push_str(vars.value(*placeholder, line_breaks)),
            }
        }
        out
    }
}

impl Default for PayloadTemplate {
    fn default() -> Self {
        Self::parse(DEFAULT_PAYLOAD)
    }
}
