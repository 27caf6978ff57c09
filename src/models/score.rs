//! Composite reliability score for a single proxy
//!
//! `ProxyScore` is a value type: every transform returns a new instance and
//! leaves the receiver untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response time (ms) at which the response-time factor reaches zero
pub const WORST_ACCEPTABLE_RESPONSE_MS: f64 = 2000.0;

/// Fraction of the remaining gap closed (or decayed) per observation
const ADJUSTMENT_RATE: f64 = 0.1;

const SUCCESS_RATE_WEIGHT: f64 = 0.30;
const RESPONSE_TIME_WEIGHT: f64 = 0.20;
const UPTIME_WEIGHT: f64 = 0.15;
const STABILITY_WEIGHT: f64 = 0.15;
const AGE_WEIGHT: f64 = 0.05;
const GEO_WEIGHT: f64 = 0.05;
const CONSECUTIVE_WEIGHT: f64 = 0.10;

const AGE_RAMP_HOURS: f64 = 24.0;
const AGE_PLATEAU_END_HOURS: f64 = 72.0;
const AGE_DECAY_HOURS: f64 = 168.0;
const CONSECUTIVE_SATURATION: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyScore {
    /// Successful / total requests, 0 when nothing was observed
    pub success_rate: f64,
    /// Running mean over successful requests, in milliseconds
    pub average_response_time: f64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub uptime: f64,
    pub stability: f64,
    /// Hours since `first_seen`, as of the last record or refresh
    pub age_hours: f64,
    /// When the pool first saw this proxy
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    pub geo_distance_score: f64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Default for ProxyScore {
    fn default() -> Self {
        Self {
            success_rate: 0.0,
            average_response_time: 0.0,
            successful_requests: 0,
            failed_requests: 0,
            last_used: None,
            uptime: 1.0,
            stability: 1.0,
            age_hours: 0.0,
            first_seen: None,
            geo_distance_score: 0.5,
            consecutive_successes: 0,
            consecutive_failures: 0,
        }
    }
}

impl ProxyScore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Neutral score for a proxy that entered the pool at `now`
    pub fn first_seen_at(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: Some(now),
            ..Self::default()
        }
    }

    /// Refresh `age_hours` as of `now`; an unset `first_seen` becomes `now`
    pub fn aged_at(&self, now: DateTime<Utc>) -> Self {
        let first_seen = self.first_seen.unwrap_or(now);
        let age_ms = (now - first_seen).num_milliseconds().max(0);
        Self {
            first_seen: Some(first_seen),
            age_hours: age_ms as f64 / 3_600_000.0,
            ..self.clone()
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.successful_requests + self.failed_requests
    }

    pub fn response_time_score(&self) -> f64 {
        1.0 - (self.average_response_time / WORST_ACCEPTABLE_RESPONSE_MS).clamp(0.0, 1.0)
    }

    /// Ramps 0→1 over the first day, holds until day three, then decays to 0
    /// over the following week.
    pub fn age_score(&self) -> f64 {
        let hours = self.age_hours.max(0.0);
        if hours < AGE_RAMP_HOURS {
            hours / AGE_RAMP_HOURS
        } else if hours <= AGE_PLATEAU_END_HOURS {
            1.0
        } else {
            (1.0 - (hours - AGE_PLATEAU_END_HOURS) / AGE_DECAY_HOURS).clamp(0.0, 1.0)
        }
    }

    pub fn consecutive_success_score(&self) -> f64 {
        (self.consecutive_successes as f64 / CONSECUTIVE_SATURATION).clamp(0.0, 1.0)
    }

    /// Weighted composite in [0, 1]; unobserved proxies score 0
    pub fn calculate_score(&self) -> f64 {
        if self.total_requests() == 0 {
            return 0.0;
        }

        let score = self.success_rate * SUCCESS_RATE_WEIGHT
            + self.response_time_score() * RESPONSE_TIME_WEIGHT
            + self.uptime * UPTIME_WEIGHT
            + self.stability * STABILITY_WEIGHT
            + self.age_score() * AGE_WEIGHT
            + self.geo_distance_score * GEO_WEIGHT
            + self.consecutive_success_score() * CONSECUTIVE_WEIGHT;

        score.clamp(0.0, 1.0)
    }

    pub fn record_success(&self, response_time_ms: f64) -> Self {
        self.record_success_at(response_time_ms, Utc::now())
    }

    pub fn record_success_at(&self, response_time_ms: f64, now: DateTime<Utc>) -> Self {
        self.aged_at(now).apply_success(response_time_ms, now)
    }

    fn apply_success(&self, response_time_ms: f64, now: DateTime<Utc>) -> Self {
        let sample = response_time_ms.max(0.0);
        let successful_requests = self.successful_requests + 1;

        let closeness = if self.successful_requests == 0 || self.average_response_time <= 0.0 {
            1.0
        } else {
            let deviation = (sample - self.average_response_time).abs() / self.average_response_time;
            1.0 - deviation.clamp(0.0, 1.0)
        };

        let average_response_time = self.average_response_time
            + (sample - self.average_response_time) / successful_requests as f64;

        Self {
            success_rate: success_rate(successful_requests, self.failed_requests),
            average_response_time,
            successful_requests,
            last_used: Some(now),
            uptime: (self.uptime + (1.0 - self.uptime) * ADJUSTMENT_RATE).clamp(0.0, 1.0),
            stability: (self.stability + (1.0 - self.stability) * ADJUSTMENT_RATE * closeness)
                .clamp(0.0, 1.0),
            consecutive_successes: self.consecutive_successes.saturating_add(1),
            consecutive_failures: 0,
            ..self.clone()
        }
    }

    pub fn record_failure(&self) -> Self {
        self.record_failure_at(Utc::now())
    }

    pub fn record_failure_at(&self, now: DateTime<Utc>) -> Self {
        self.aged_at(now).apply_failure(now)
    }

    fn apply_failure(&self, now: DateTime<Utc>) -> Self {
        let failed_requests = self.failed_requests + 1;

        Self {
            success_rate: success_rate(self.successful_requests, failed_requests),
            failed_requests,
            last_used: Some(now),
            uptime: (self.uptime * (1.0 - ADJUSTMENT_RATE)).clamp(0.0, 1.0),
            stability: (self.stability * (1.0 - ADJUSTMENT_RATE)).clamp(0.0, 1.0),
            consecutive_successes: 0,
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn with_geo_distance_score(&self, geo_distance_score: f64) -> Self {
        Self {
            geo_distance_score: geo_distance_score.clamp(0.0, 1.0),
            ..self.clone()
        }
    }
}

fn success_rate(successful: u64, failed: u64) -> f64 {
    let total = successful + failed;
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    }
}
