//! Raw HTTP response preamble parsing.
//!
//! Probe commands such as `curl -s -o /dev/null -D - <url>` print the status
//! line and headers of the response they received. This module decodes that
//! text into a status code and a case-insensitive header map.
//!
//! Parsing is strict: a malformed status line or header line is an error,
//! never a silent default.

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

/// Errors that can occur while decoding a response preamble.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Failed to compile regex: {0}")]
    RegexCompilation(String),

    #[error("Response is empty")]
    Empty,

    #[error("Malformed status line: {0:?}")]
    MalformedStatusLine(String),

    #[error("Invalid status code {0}")]
    InvalidStatusCode(u16),

    #[error("Malformed header on line {line_number}: {line:?}")]
    MalformedHeader { line_number: usize, line: String },
}

/// Response headers with case-insensitive names.
///
/// The most recent value wins when a name repeats. The spelling of the last
/// occurrence is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: BTreeMap<String, (String, String)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any previous value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()));
    }

    /// Look up a header value by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` pairs in case-insensitive name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Decoded status line and header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePreamble {
    pub status_code: u16,
    /// Reason phrase, if the server sent one.
    pub reason: Option<String>,
    pub headers: ResponseHeaders,
}

/// Parse the preamble of a raw HTTP/1.x response.
///
/// The first line must be `HTTP/1.x <3-digit code> [reason]`. Each following
/// line up to the first blank line (or end of input) is split once on its
/// first colon into a header name and value. Anything after the blank line
/// is body and is ignored. Both `\r\n` and `\n` line endings are accepted.
///
/// # Example
/// ```
/// use mesh_verifier::exec::response::parse_preamble;
///
/// let raw = "HTTP/1.1 200 OK\r\nServer: envoy\r\nContent-Length: 0\r\n\r\n";
/// let preamble = parse_preamble(raw).unwrap();
/// assert_eq!(preamble.status_code, 200);
/// assert_eq!(preamble.headers.get("server"), Some("envoy"));
/// ```
pub fn parse_preamble(raw: &str) -> Result<ResponsePreamble, ParseError> {
    let status_regex = Regex::new(r"^HTTP/1\.[01] (\d{3})(?: (.*))?$")
        .map_err(|e| ParseError::RegexCompilation(e.to_string()))?;

    let mut lines = raw.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let status_line = match lines.next() {
        Some(line) if !line.trim().is_empty() => line,
        _ => return Err(ParseError::Empty),
    };

    let caps = status_regex
        .captures(status_line)
        .ok_or_else(|| ParseError::MalformedStatusLine(status_line.to_string()))?;

    let status_code: u16 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| ParseError::MalformedStatusLine(status_line.to_string()))?;
    if !(100..=599).contains(&status_code) {
        return Err(ParseError::InvalidStatusCode(status_code));
    }

    let reason = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .filter(|r| !r.is_empty());

    let mut headers = ResponseHeaders::new();
    for (index, line) in lines.enumerate() {
        if line.trim().is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .map(|(n, v)| (n.trim(), v.trim()))
            .filter(|(n, _)| !n.is_empty())
            .ok_or_else(|| ParseError::MalformedHeader {
                // Status line is line 1.
                line_number: index + 2,
                line: line.to_string(),
            })?;
        headers.insert(name, value);
    }

    Ok(ResponsePreamble {
        status_code,
        reason,
        headers,
    })
}

/// Parse a preamble from captured process output.
///
/// Invalid UTF-8 is replaced rather than rejected; header values from probe
/// tools are ASCII in practice.
pub fn parse_preamble_bytes(raw: &[u8]) -> Result<ResponsePreamble, ParseError> {
    parse_preamble(&String::from_utf8_lossy(raw))
}
