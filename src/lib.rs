//! Proxy Pool - scored proxy pool with adaptive rotation
//!
//! Maintains a pool of upstream proxies, scores their reliability and hands
//! out the next proxy to use.
//!
//! ## Features
//!
//! - Composite reliability score per proxy, updated from every outcome
//! - Rotation strategies: round-robin, random, weighted, geographic,
//!   website-specific and an adaptive bandit
//! - Bounded-concurrency validation with progress reporting
//! - Failure classification and retry with exponential backoff
//! - Periodic health snapshots of the pool
//! - HTTP, HTTPS, SOCKS4 and SOCKS5 upstream proxies

pub mod analytics;
pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;
pub mod sources;

pub use config::Config;
pub use error::{Error, ErrorKind, ProxyError, Result};
pub use manager::{ProxyManager, ProxyManagerBuilder};
pub use models::{HealthSnapshot, Proxy, ProxyFilter, ProxyProtocol, ProxyScore};
pub use proxy::rotation::{DomainFingerprint, RotationStrategy};
