use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Usage counters for a single proxy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyUsage {
    pub requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Mean over requests that reported a response time
    pub avg_response_time: f64,
    #[serde(skip)]
    pub(crate) timed_requests: u64,
}

impl ProxyUsage {
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.requests as f64
        }
    }
}

/// Aggregate usage statistics since the last reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub fetch_operations: u64,
    pub proxies_fetched: u64,
    pub validations: u64,
    pub validations_passed: u64,
    pub validations_failed: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time: f64,
    pub requests_by_source: HashMap<String, u64>,
    pub proxies: HashMap<String, ProxyUsage>,
    pub since: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) timed_requests: u64,
}

impl AnalyticsSnapshot {
    pub fn empty(since: DateTime<Utc>) -> Self {
        Self {
            fetch_operations: 0,
            proxies_fetched: 0,
            validations: 0,
            validations_passed: 0,
            validations_failed: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_time: 0.0,
            requests_by_source: HashMap::new(),
            proxies: HashMap::new(),
            since,
            timed_requests: 0,
        }
    }

    /// Validation pass rate as a percentage
    pub fn validation_pass_rate(&self) -> f64 {
        if self.validations == 0 {
            0.0
        } else {
            self.validations_passed as f64 / self.validations as f64 * 100.0
        }
    }

    /// Request success rate as a percentage
    pub fn request_success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}
