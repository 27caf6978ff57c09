//! Proxy rotation strategies
//!
//! This module provides various strategies for selecting proxies from the pool.
//! Every strategy keeps its per-proxy state behind a single lock so concurrent
//! `select`/`record_*` calls never lose updates.

mod adaptive;
mod dynamic;
mod geographic;
mod random;
mod round_robin;
mod website;
mod weighted;

pub use adaptive::{AdaptiveSelector, AdaptiveStats, Decision};
pub use dynamic::DynamicProxySelector;
pub use geographic::GeographicSelector;
pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;
pub use website::{normalize_domain, DomainFingerprint, WebsiteSelector};
pub use weighted::WeightedSelector;

use rand::Rng;

use crate::config::RotationConfig;
use crate::error::Result;
use crate::models::{Proxy, ProxyScore};
use crate::proxy::scoreboard::ScoreBoard;

/// Strategy types for proxy rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RotationStrategy {
    RoundRobin,
    Random,
    Weighted,
    Geographic,
    WebsiteSpecific,
    #[default]
    Adaptive,
}

impl RotationStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" | "roundrobin" | "round-robin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "weighted" => Some(Self::Weighted),
            "geographic" | "geo" => Some(Self::Geographic),
            "website_specific" | "website-specific" | "website" | "domain" => {
                Some(Self::WebsiteSpecific)
            }
            "adaptive" | "bandit" => Some(Self::Adaptive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::Weighted => "weighted",
            Self::Geographic => "geographic",
            Self::WebsiteSpecific => "website_specific",
            Self::Adaptive => "adaptive",
        }
    }
}

/// What a selection may consult besides the candidate list
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionContext<'a> {
    /// Scores to weigh candidates by; `None` disables score-based weighting
    pub scores: Option<&'a ScoreBoard>,
    /// Target domain, used by the website-specific strategy
    pub domain: Option<&'a str>,
}

impl<'a> SelectionContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scores(mut self, scores: &'a ScoreBoard) -> Self {
        self.scores = Some(scores);
        self
    }

    pub fn with_domain(mut self, domain: &'a str) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Score of a proxy that has at least one observation
    pub fn observed_score(&self, proxy: &Proxy) -> Option<ProxyScore> {
        self.scores
            .and_then(|board| board.get(&proxy.key()))
            .filter(|score| score.total_requests() > 0)
    }

    pub fn composite(&self, proxy: &Proxy) -> Option<f64> {
        self.observed_score(proxy).map(|s| s.calculate_score())
    }
}

/// Trait for proxy selection strategies
///
/// Implementations of this trait provide different algorithms for
/// selecting proxies from the available pool.
pub trait ProxySelector: Send + Sync {
    /// Select a proxy from `candidates`
    ///
    /// Returns `NoProxiesAvailable` if `candidates` is empty
    fn select(&self, candidates: &[Proxy], ctx: &SelectionContext<'_>) -> Result<Proxy>;

    /// Report that a request through `proxy` succeeded
    fn record_success(&self, proxy: &Proxy, ctx: &SelectionContext<'_>);

    /// Report that a request through `proxy` failed
    fn record_failure(&self, proxy: &Proxy, ctx: &SelectionContext<'_>);

    /// Replace the working set, dropping state for proxies no longer present
    fn update_proxies(&self, proxies: &[Proxy]);

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;

    /// Apply a domain fingerprint; returns `false` if the strategy ignores them
    fn apply_fingerprint(&self, _domain: &str, _fingerprint: &DomainFingerprint) -> bool {
        false
    }
}

/// Create a proxy selector based on the strategy type
pub fn create_selector(strategy: RotationStrategy, config: &RotationConfig) -> Box<dyn ProxySelector> {
    match strategy {
        RotationStrategy::RoundRobin => Box::new(RoundRobinSelector::new()),
        RotationStrategy::Random => Box::new(RandomSelector::new()),
        RotationStrategy::Weighted => Box::new(WeightedSelector::new(config.floor_weight)),
        RotationStrategy::Geographic => {
            Box::new(GeographicSelector::new(config.latency_weighted))
        }
        RotationStrategy::WebsiteSpecific => Box::new(WebsiteSelector::new(
            config.domain_success_threshold,
            config.floor_weight,
        )),
        RotationStrategy::Adaptive => Box::new(AdaptiveSelector::new(config.adaptive)),
    }
}

/// Sample an index proportionally to `weights`
///
/// Non-positive and non-finite weights never win unless every weight is,
/// in which case the pick is uniform. Returns `None` only for an empty slice.
pub(crate) fn weighted_index<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    let usable = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
    let total: f64 = weights.iter().map(|&w| usable(w)).sum();
    if total <= 0.0 {
        return Some(rng.gen_range(0..weights.len()));
    }

    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (i, &w) in weights.iter().enumerate() {
        let w = usable(w);
        if w == 0.0 {
            continue;
        }
        cumulative += w;
        last_positive = i;
        if target < cumulative {
            return Some(i);
        }
    }

    Some(last_positive)
}
