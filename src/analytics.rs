//! Usage analytics
//!
//! The manager always records into its own [`InMemoryAnalytics`] and forwards
//! the same events to an optional external [`AnalyticsSink`].

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use crate::models::{AnalyticsSnapshot, Proxy};

/// Receiver of pool usage events
pub trait AnalyticsSink: Send + Sync {
    fn record_fetch(&self, proxies: &[Proxy]);

    /// `results[i]` is the outcome for `proxies[i]`
    fn record_validation(&self, proxies: &[Proxy], results: &[bool]);

    fn record_request(
        &self,
        proxy: &Proxy,
        success: bool,
        response_time: Option<Duration>,
        source: &str,
    );
}

/// Analytics kept in process memory
pub struct InMemoryAnalytics {
    inner: RwLock<AnalyticsSnapshot>,
}

impl InMemoryAnalytics {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AnalyticsSnapshot::empty(Utc::now())),
        }
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        self.inner.read().clone()
    }

    pub fn reset(&self) {
        *self.inner.write() = AnalyticsSnapshot::empty(Utc::now());
    }

    /// Drop per-proxy counters for proxies no longer in the pool
    pub fn retain_proxies(&self, keys: &HashSet<String>) {
        self.inner.write().proxies.retain(|key, _| keys.contains(key));
    }
}

impl Default for InMemoryAnalytics {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticsSink for InMemoryAnalytics {
    fn record_fetch(&self, proxies: &[Proxy]) {
        let mut inner = self.inner.write();
        inner.fetch_operations += 1;
        inner.proxies_fetched += proxies.len() as u64;
    }

    fn record_validation(&self, proxies: &[Proxy], results: &[bool]) {
        let mut inner = self.inner.write();
        for (_, passed) in proxies.iter().zip(results) {
            inner.validations += 1;
            if *passed {
                inner.validations_passed += 1;
            } else {
                inner.validations_failed += 1;
            }
        }
    }

    fn record_request(
        &self,
        proxy: &Proxy,
        success: bool,
        response_time: Option<Duration>,
        source: &str,
    ) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        inner.total_requests += 1;
        if success {
            inner.successful_requests += 1;
        } else {
            inner.failed_requests += 1;
        }
        *inner
            .requests_by_source
            .entry(source.to_string())
            .or_insert(0) += 1;

        if let Some(rt) = response_time {
            inner.timed_requests += 1;
            let ms = rt.as_secs_f64() * 1000.0;
            inner.avg_response_time += (ms - inner.avg_response_time) / inner.timed_requests as f64;
        }

        let usage = inner.proxies.entry(proxy.key()).or_default();
        usage.requests += 1;
        if success {
            usage.successful_requests += 1;
        } else {
            usage.failed_requests += 1;
        }
        if let Some(rt) = response_time {
            usage.timed_requests += 1;
            let ms = rt.as_secs_f64() * 1000.0;
            usage.avg_response_time += (ms - usage.avg_response_time) / usage.timed_requests as f64;
        }
    }
}
