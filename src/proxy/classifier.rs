//! Failure classification
//!
//! Turns raw failure text or error values into a [`ProxyError`] of the fixed
//! taxonomy. Matching is ordered: the first rule that hits wins.

use std::io;
use std::time::Duration;

use http::StatusCode;

use crate::error::{ErrorKind, ProxyError};
use crate::models::Proxy;

/// Maps raw failures onto the error taxonomy
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str, proxy: Option<&Proxy>) -> ProxyError;

    /// Classify an error value, consulting I/O error kinds in its source chain
    /// before falling back to the combined message text
    fn classify_error(
        &self,
        error: &(dyn std::error::Error + 'static),
        proxy: Option<&Proxy>,
    ) -> ProxyError {
        let mut parts = Vec::new();
        let mut io_kind = None;
        let mut current = Some(error);
        while let Some(e) = current {
            parts.push(e.to_string());
            if io_kind.is_none() {
                io_kind = e
                    .downcast_ref::<io::Error>()
                    .and_then(|io| kind_for_io(io.kind()));
            }
            current = e.source();
        }
        let message = parts.join(": ");

        match io_kind {
            Some(kind) => build_error(kind, &message, proxy),
            None => self.classify(&message, proxy),
        }
    }
}

fn kind_for_io(kind: io::ErrorKind) -> Option<ErrorKind> {
    match kind {
        io::ErrorKind::TimedOut => Some(ErrorKind::ConnectionTimeout),
        io::ErrorKind::ConnectionReset => Some(ErrorKind::ConnectionReset),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe => Some(ErrorKind::Connection),
        _ => None,
    }
}

/// One ordered matching rule
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub kind: ErrorKind,
    /// Lowercase substrings, any of which selects this rule
    pub patterns: Vec<&'static str>,
    /// HTTP statuses that select this rule when found in the message
    pub statuses: Vec<u16>,
}

impl ClassificationRule {
    pub fn new(kind: ErrorKind, patterns: &[&'static str], statuses: &[u16]) -> Self {
        Self {
            kind,
            patterns: patterns.to_vec(),
            statuses: statuses.to_vec(),
        }
    }

    fn matches(&self, lowered: &str, status: Option<u16>) -> bool {
        status.is_some_and(|s| self.statuses.contains(&s))
            || self.patterns.iter().any(|p| lowered.contains(p))
    }
}

/// Ordered substring classifier
pub struct PatternClassifier {
    rules: Vec<ClassificationRule>,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, message: &str, proxy: Option<&Proxy>) -> ProxyError {
        let lowered = message.to_lowercase();
        let status = extract_status(message);

        let kind = self
            .rules
            .iter()
            .find(|rule| rule.matches(&lowered, status))
            .map(|rule| rule.kind)
            .unwrap_or(match status {
                Some(_) => ErrorKind::HttpStatus,
                None => ErrorKind::Unknown,
            });

        build_error(kind, message, proxy)
    }
}

fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            ErrorKind::ConnectionTimeout,
            &["timeout", "timed out", "etimedout"],
            &[408, 504],
        ),
        ClassificationRule::new(
            ErrorKind::ConnectionReset,
            &["reset", "econnreset", "hang up"],
            &[],
        ),
        ClassificationRule::new(
            ErrorKind::Connection,
            &["refused", "econnrefused", "socket", "unreachable", "broken pipe"],
            &[],
        ),
        ClassificationRule::new(
            ErrorKind::Dns,
            &["dns", "resolve", "enotfound", "getaddrinfo", "name or service not known"],
            &[],
        ),
        ClassificationRule::new(ErrorKind::Tls, &["ssl", "tls", "certificate", "handshake"], &[]),
        ClassificationRule::new(
            ErrorKind::AuthenticationFailed,
            &["unauthorized", "authentication", "proxy-authenticate"],
            &[401, 407],
        ),
        ClassificationRule::new(
            ErrorKind::RateLimited,
            &["rate limit", "ratelimit", "too many requests"],
            &[429],
        ),
        ClassificationRule::new(
            ErrorKind::Blocked,
            &["blocked", "banned", "forbidden", "captcha"],
            &[403],
        ),
        ClassificationRule::new(ErrorKind::InvalidHeaders, &["invalid header", "malformed header"], &[]),
        ClassificationRule::new(ErrorKind::InvalidContentLength, &["content-length", "content length"], &[]),
        ClassificationRule::new(ErrorKind::InvalidResponse, &["invalid response", "malformed response"], &[]),
    ]
}

fn build_error(kind: ErrorKind, message: &str, proxy: Option<&Proxy>) -> ProxyError {
    let mut error = ProxyError::new(kind, message);
    if let Some(proxy) = proxy {
        error = error.with_target(proxy.host.clone(), proxy.port);
    }
    if let Some(status) = extract_status(message).and_then(|s| StatusCode::from_u16(s).ok()) {
        error = error.with_status(status);
        if kind == ErrorKind::HttpStatus {
            error = error.with_retryable(status.is_server_error());
        }
    }
    if let Some(retry_after) = extract_retry_after(message) {
        error = error.with_retry_after(retry_after);
    }
    error
}

/// Words that introduce an HTTP status when they directly precede it
const STATUS_MARKERS: &[&str] = &["http", "https", "status", "code", "returned", "responded", "said", "got"];

/// Byte ranges of the maximal ASCII digit runs in `message`
fn digit_runs(message: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let bytes = message.as_bytes();
    let mut i = 0;
    std::iter::from_fn(move || {
        while i < bytes.len() {
            if !bytes[i].is_ascii_digit() {
                i += 1;
                continue;
            }
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            return Some((start, i));
        }
        None
    })
}

/// Whether the text before a number marks it as a status code
fn introduces_status(prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches(|c: char| c.is_whitespace() || c == ':' || c == '=');
    let Some(word) = prefix.split_whitespace().next_back() else {
        return true;
    };
    let word = word
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_ascii_lowercase();
    word.starts_with("http/") || STATUS_MARKERS.contains(&word.as_str())
}

/// First three-digit HTTP status in `message`
///
/// A number counts only when it starts the message or follows a status
/// marker such as `HTTP`, `HTTP/1.1` or `status`. Digits that are part of an
/// address, port or decimal are skipped.
pub fn extract_status(message: &str) -> Option<u16> {
    digit_runs(message)
        .filter(|&(start, end)| {
            let before = message[..start].chars().next_back();
            let after = message[end..].chars().next();
            end - start == 3
                && !matches!(before, Some('.' | ':'))
                && !matches!(after, Some('.' | ':'))
                && introduces_status(&message[..start])
        })
        .filter_map(|(start, end)| message[start..end].parse::<u16>().ok())
        .find(|code| (100..=599).contains(code))
}

/// Seconds after a `retry-after` marker, if any
pub fn extract_retry_after(message: &str) -> Option<Duration> {
    let lowered = message.to_lowercase();
    let start = ["retry-after", "retry after", "retry_after"]
        .iter()
        .filter_map(|marker| lowered.find(marker).map(|idx| idx + marker.len()))
        .min()?;

    let rest = &lowered[start..];
    let seconds = digit_runs(rest)
        .next()
        .and_then(|(from, to)| rest[from..to].parse::<u64>().ok());
    seconds.map(Duration::from_secs)
}
