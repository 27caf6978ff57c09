use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Proxy, ProxyScore};

/// Bucketed pool health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 80.0 {
            HealthStatus::Excellent
        } else if percentage >= 60.0 {
            HealthStatus::Good
        } else if percentage >= 40.0 {
            HealthStatus::Fair
        } else if percentage >= 20.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "Excellent",
            HealthStatus::Good => "Good",
            HealthStatus::Fair => "Fair",
            HealthStatus::Poor => "Poor",
            HealthStatus::Critical => "Critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits a proxy must meet, all at once, to count as healthy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub min_success_rate: f64,
    pub max_response_time_ms: f64,
    pub min_uptime: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.7,
            max_response_time_ms: 2000.0,
            min_uptime: 0.8,
        }
    }
}

impl HealthThresholds {
    pub fn is_healthy(&self, score: &ProxyScore) -> bool {
        score.success_rate >= self.min_success_rate
            && score.average_response_time <= self.max_response_time_ms
            && score.uptime >= self.min_uptime
    }
}

/// One entry of the top/bottom rankings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProxy {
    pub key: String,
    pub score: f64,
    pub success_rate: f64,
    pub average_response_time: f64,
}

/// Point-in-time aggregate view of pool quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub total_proxies: usize,
    pub healthy_proxies: usize,
    pub unhealthy_proxies: usize,
    pub health_percentage: f64,
    pub health_status: HealthStatus,
    /// Number of proxies with at least one observed request
    pub scored_proxies: usize,
    pub average_success_rate: f64,
    pub average_response_time: f64,
    pub average_uptime: f64,
    pub top_proxies: Vec<RankedProxy>,
    pub bottom_proxies: Vec<RankedProxy>,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Compute a snapshot from the pool and whatever scores exist for it
    pub fn compute(
        entries: &[(Proxy, Option<ProxyScore>)],
        thresholds: &HealthThresholds,
        rank_size: usize,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let total_proxies = entries.len();
        let healthy_proxies = entries
            .iter()
            .filter(|(_, score)| score.as_ref().is_some_and(|s| thresholds.is_healthy(s)))
            .count();

        let scored: Vec<(&Proxy, &ProxyScore)> = entries
            .iter()
            .filter_map(|(proxy, score)| score.as_ref().map(|s| (proxy, s)))
            .filter(|(_, score)| score.total_requests() > 0)
            .collect();

        let mean = |f: fn(&ProxyScore) -> f64| {
            if scored.is_empty() {
                0.0
            } else {
                scored.iter().map(|(_, s)| f(s)).sum::<f64>() / scored.len() as f64
            }
        };
        let average_success_rate = mean(|s| s.success_rate);
        let average_response_time = mean(|s| s.average_response_time);
        let average_uptime = mean(|s| s.uptime);

        let mut ranked: Vec<RankedProxy> = entries
            .iter()
            .map(|(proxy, score)| {
                let score = score.clone().unwrap_or_default();
                RankedProxy {
                    key: proxy.key(),
                    score: score.calculate_score(),
                    success_rate: score.success_rate,
                    average_response_time: score.average_response_time,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });

        let top_proxies: Vec<RankedProxy> = ranked.iter().take(rank_size).cloned().collect();
        let bottom_proxies: Vec<RankedProxy> =
            ranked.iter().rev().take(rank_size).cloned().collect();

        let health_percentage = if total_proxies == 0 {
            0.0
        } else {
            healthy_proxies as f64 / total_proxies as f64 * 100.0
        };

        Self {
            total_proxies,
            healthy_proxies,
            unhealthy_proxies: total_proxies - healthy_proxies,
            health_percentage,
            health_status: HealthStatus::from_percentage(health_percentage),
            scored_proxies: scored.len(),
            average_success_rate,
            average_response_time,
            average_uptime,
            top_proxies,
            bottom_proxies,
            timestamp,
        }
    }
}
