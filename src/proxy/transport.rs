//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Opens a TCP tunnel to a target through an upstream proxy. Failures are
//! returned unclassified; callers run them through an `ErrorClassifier`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};

use crate::error::BoxError;
use crate::models::{Proxy, ProxyProtocol};

/// Upper bound on a CONNECT response head
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Stateless connector through upstream proxies
pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect to a target through the specified proxy
    #[instrument(skip(proxy), fields(proxy = %proxy.key(), target = %target_host))]
    pub async fn connect(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> std::result::Result<TcpStream, BoxError> {
        match proxy.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                Self::connect_http(proxy, target_host, target_port).await
            }
            ProxyProtocol::Socks4 => Self::connect_socks4(proxy, target_host, target_port).await,
            ProxyProtocol::Socks5 => Self::connect_socks5(proxy, target_host, target_port).await,
        }
    }

    /// Connect through HTTP CONNECT method
    async fn connect_http(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> std::result::Result<TcpStream, BoxError> {
        debug!("Connecting to HTTP proxy at {}", proxy.address());

        let mut stream = TcpStream::connect(proxy.address()).await?;
        let connect_request = Self::build_connect_request(proxy, target_host, target_port);
        stream.write_all(connect_request.as_bytes()).await?;

        let head = read_response_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or_default().to_string();
        if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
            return Err(format!("CONNECT rejected: {}", status_line).into());
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(proxy: &Proxy, target_host: &str, target_port: u16) -> String {
        let mut request = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n",
            host = target_host,
            port = target_port
        );

        if let Some(credentials) = &proxy.credentials {
            let encoded = BASE64.encode(format!("{}:{}", credentials.username, credentials.password));
            request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encoded));
        }

        request.push_str("\r\n");
        request
    }

    /// Connect through SOCKS4 proxy; the username doubles as the user id
    async fn connect_socks4(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> std::result::Result<TcpStream, BoxError> {
        debug!("Connecting to SOCKS4 proxy at {}", proxy.address());

        let proxy_addr = proxy.address();
        let target = (target_host, target_port);
        let stream = match &proxy.credentials {
            Some(credentials) => {
                Socks4Stream::connect_with_userid(proxy_addr.as_str(), target, &credentials.username)
                    .await?
            }
            None => Socks4Stream::connect(proxy_addr.as_str(), target).await?,
        };

        debug!("SOCKS4 connection established");
        Ok(stream.into_inner())
    }

    /// Connect through SOCKS5 proxy
    async fn connect_socks5(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> std::result::Result<TcpStream, BoxError> {
        debug!("Connecting to SOCKS5 proxy at {}", proxy.address());

        let proxy_addr = proxy.address();
        let target = (target_host, target_port);
        let stream = match &proxy.credentials {
            Some(credentials) => {
                Socks5Stream::connect_with_password(
                    proxy_addr.as_str(),
                    target,
                    &credentials.username,
                    &credentials.password,
                )
                .await?
            }
            None => Socks5Stream::connect(proxy_addr.as_str(), target).await?,
        };

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }
}

/// Read up to the blank line ending an HTTP response head
pub(crate) async fn read_response_head(
    stream: &mut TcpStream,
) -> std::result::Result<String, BoxError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Err("empty response from proxy".into());
            }
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_CONNECT_RESPONSE {
            return Err("invalid response: header section too large".into());
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
