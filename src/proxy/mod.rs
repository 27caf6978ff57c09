//! Proxy selection, checking and failure handling
//!
//! This module provides the pool internals:
//! - Rotation strategies and the shared score board
//! - Tunnel transport and single-proxy checks
//! - Bounded-concurrency batch validation
//! - Error classification and retry with backoff

pub mod checker;
pub mod classifier;
pub mod retry;
pub mod rotation;
pub mod scoreboard;
pub mod transport;
pub mod validator;

pub use checker::{ProxyChecker, TunnelChecker};
pub use classifier::{ErrorClassifier, PatternClassifier};
pub use retry::{RetryPolicy, RetryableError};
pub use rotation::{create_selector, DynamicProxySelector, ProxySelector, RotationStrategy};
pub use scoreboard::ScoreBoard;
pub use transport::ProxyTransport;
pub use validator::{ParallelValidator, ValidationReport, ValidationResult};
