//! Single-proxy validation checks

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, ProxyError};
use crate::models::Proxy;
use crate::proxy::classifier::{ErrorClassifier, PatternClassifier};
use crate::proxy::transport::{read_response_head, ProxyTransport};

/// Checks whether one proxy can reach a test URL
#[async_trait]
pub trait ProxyChecker: Send + Sync {
    /// Returns the observed response time on success
    async fn check(
        &self,
        proxy: &Proxy,
        test_url: &str,
        timeout: Duration,
    ) -> Result<Duration, ProxyError>;
}

/// Checks a proxy by opening a tunnel to the test URL's host
///
/// For `http` URLs a GET is sent through the tunnel and any 2xx or 3xx status
/// counts as success. For other schemes an established tunnel is enough.
pub struct TunnelChecker {
    classifier: Arc<dyn ErrorClassifier>,
}

impl TunnelChecker {
    pub fn new() -> Self {
        Self::with_classifier(Arc::new(PatternClassifier::new()))
    }

    pub fn with_classifier(classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self { classifier }
    }

    async fn run(&self, proxy: &Proxy, target: &CheckTarget) -> Result<(), ProxyError> {
        let mut stream = ProxyTransport::connect(proxy, &target.host, target.port)
            .await
            .map_err(|e| self.classifier.classify_error(&*e, Some(proxy)))?;

        if target.scheme != "http" {
            return Ok(());
        }

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: proxy-pool\r\nConnection: close\r\n\r\n",
            target.path, target.host
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| self.classifier.classify_error(&e, Some(proxy)))?;

        let head = read_response_head(&mut stream)
            .await
            .map_err(|e| self.classifier.classify_error(&*e, Some(proxy)))?;
        let status_line = head.lines().next().unwrap_or_default();
        let status = parse_status_line(status_line).ok_or_else(|| {
            ProxyError::new(
                ErrorKind::InvalidResponse,
                format!("invalid response status line: {:?}", status_line),
            )
            .with_target(proxy.host.clone(), proxy.port)
        })?;

        if (200..400).contains(&status) {
            Ok(())
        } else {
            Err(self
                .classifier
                .classify(&format!("test request returned HTTP {}", status), Some(proxy)))
        }
    }
}

impl Default for TunnelChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyChecker for TunnelChecker {
    #[instrument(skip(self, proxy), fields(proxy = %proxy.key()))]
    async fn check(
        &self,
        proxy: &Proxy,
        test_url: &str,
        check_timeout: Duration,
    ) -> Result<Duration, ProxyError> {
        let target = CheckTarget::parse(test_url)?;
        let started = Instant::now();

        match timeout(check_timeout, self.run(proxy, &target)).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                debug!(elapsed_ms = elapsed.as_millis() as u64, "proxy check passed");
                Ok(elapsed)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProxyError::timeout(format!(
                "check timed out after {}ms",
                check_timeout.as_millis()
            ))
            .with_target(proxy.host.clone(), proxy.port)),
        }
    }
}

struct CheckTarget {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl CheckTarget {
    fn parse(test_url: &str) -> Result<Self, ProxyError> {
        let invalid = |reason: &str| {
            ProxyError::new(
                ErrorKind::ValidationFailed,
                format!("invalid test url {}: {}", test_url, reason),
            )
            .with_retryable(false)
        };

        let url = url::Url::parse(test_url).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?.to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
            path,
        })
    }
}

fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
