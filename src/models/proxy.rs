use std::fmt;

use serde::{Deserialize, Serialize};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" | "socks4a" => Some(ProxyProtocol::Socks4),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much of the client identity a proxy reveals, least to most private
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anonymity {
    Transparent,
    Anonymous,
    Elite,
}

/// Proxy authentication credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An upstream proxy: identity plus source-reported metadata
///
/// Identity is `host:port`; everything else is descriptive and never changes
/// once a proxy has been fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    /// Source-reported speed rating, larger is faster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymity: Option<Anonymity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_websocket: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_socks4: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_socks5: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            country: None,
            region: None,
            isp: None,
            speed: None,
            anonymity: None,
            supports_websocket: None,
            supports_socks4: None,
            supports_socks5: None,
            credentials: None,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Identity key, `host:port`
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Socket address string used to dial the proxy
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            self.key()
        }
    }

    /// Get proxy URL with optional authentication
    pub fn url(&self) -> String {
        let scheme = match self.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => "http",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        };

        match &self.credentials {
            Some(creds) => format!(
                "{}://{}:{}@{}",
                scheme,
                creds.username,
                creds.password,
                self.address()
            ),
            None => format!("{}://{}", scheme, self.address()),
        }
    }

    pub fn supports_socks(&self) -> bool {
        self.protocol.is_socks()
            || self.supports_socks4.unwrap_or(false)
            || self.supports_socks5.unwrap_or(false)
    }

    /// Check if proxy matches filter criteria
    pub fn matches(&self, filter: &ProxyFilter) -> bool {
        if !filter.protocols.is_empty() && !filter.protocols.contains(&self.protocol) {
            return false;
        }

        if filter.https_only && self.protocol != ProxyProtocol::Https {
            return false;
        }

        if !matches_allow_list(&filter.countries, self.country.as_deref())
            || !matches_allow_list(&filter.regions, self.region.as_deref())
            || !matches_allow_list(&filter.isps, self.isp.as_deref())
        {
            return false;
        }

        if let Some(min_speed) = filter.min_speed {
            if self.speed.map_or(true, |speed| speed < min_speed) {
                return false;
            }
        }

        if let Some(require_auth) = filter.require_auth {
            if self.credentials.is_some() != require_auth {
                return false;
            }
        }

        if let Some(min_anonymity) = filter.min_anonymity {
            if self.anonymity.map_or(true, |level| level < min_anonymity) {
                return false;
            }
        }

        if filter.require_websocket && !self.supports_websocket.unwrap_or(false) {
            return false;
        }

        if filter.require_socks && !self.supports_socks() {
            return false;
        }

        true
    }
}

fn matches_allow_list(allowed: &[String], value: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match value {
        Some(value) => allowed.iter().any(|a| a.eq_ignore_ascii_case(value)),
        None => false,
    }
}

/// Criteria for fetching and validating proxies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyFilter {
    /// How many proxies the caller wants; `None` means all
    pub count: Option<usize>,
    pub protocols: Vec<ProxyProtocol>,
    pub https_only: bool,
    pub countries: Vec<String>,
    pub regions: Vec<String>,
    pub isps: Vec<String>,
    pub min_speed: Option<u32>,
    /// `Some(true)` keeps only authenticated proxies, `Some(false)` only open ones
    pub require_auth: Option<bool>,
    pub min_anonymity: Option<Anonymity>,
    pub require_websocket: bool,
    pub require_socks: bool,
}

impl ProxyFilter {
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// The same criteria without a count limit
    pub fn unlimited(&self) -> Self {
        Self {
            count: None,
            ..self.clone()
        }
    }
}
