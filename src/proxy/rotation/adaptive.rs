//! Adaptive (multi-armed bandit) proxy selection strategy

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::trace;

use super::{weighted_index, ProxySelector, SelectionContext};
use crate::config::AdaptiveConfig;
use crate::error::{Error, Result};
use crate::models::Proxy;

/// Outcomes remembered per proxy
const HISTORY_LEN: usize = 10;
/// Idle time after which a weight starts decaying
const DECAY_AFTER_HOURS: i64 = 1;
/// Cap on the minutes-since-last-use freshness bonus
const MAX_FRESHNESS_MINUTES: f64 = 5.0;

/// How a selection was made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Explore,
    Exploit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdaptiveStats {
    pub selections: u64,
    pub explorations: u64,
    pub exploitations: u64,
}

#[derive(Debug, Clone)]
struct Arm {
    weight: f64,
    history: VecDeque<bool>,
    last_used: Option<DateTime<Utc>>,
    decayed_at: Option<DateTime<Utc>>,
}

impl Arm {
    fn new() -> Self {
        Self {
            weight: 1.0,
            history: VecDeque::with_capacity(HISTORY_LEN),
            last_used: None,
            decayed_at: None,
        }
    }

    fn push_outcome(&mut self, success: bool) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(success);
    }

    fn recent_success_rate(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let successes = self.history.iter().filter(|s| **s).count();
        Some(successes as f64 / self.history.len() as f64)
    }
}

struct AdaptiveState {
    arms: HashMap<String, Arm>,
    rng: StdRng,
    stats: AdaptiveStats,
}

/// Epsilon-greedy selection over learned per-proxy weights
///
/// With probability `exploration_rate` a uniformly random candidate is
/// returned; otherwise candidates are sampled by weight, boosted by composite
/// score and by time since last use. Successes and failures grow or shrink a
/// proxy's weight by `learning_rate`, inside `[min_weight, max_weight]`.
/// Weights of proxies idle for more than an hour decay toward `min_weight`.
pub struct AdaptiveSelector {
    config: AdaptiveConfig,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveSelector {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic selector for reproducible runs
    pub fn with_seed(config: AdaptiveConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: AdaptiveConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: Mutex::new(AdaptiveState {
                arms: HashMap::new(),
                rng,
                stats: AdaptiveStats::default(),
            }),
        }
    }

    pub fn select_with_decision(
        &self,
        candidates: &[Proxy],
        ctx: &SelectionContext<'_>,
    ) -> Result<(Proxy, Decision)> {
        self.select_at(candidates, ctx, Utc::now())
    }

    pub(crate) fn select_at(
        &self,
        candidates: &[Proxy],
        ctx: &SelectionContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<(Proxy, Decision)> {
        if candidates.is_empty() {
            return Err(Error::NoProxiesAvailable);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.apply_decay(&mut state.arms, now);

        let explore = state.rng.gen::<f64>() < self.config.exploration_rate;
        let idx = if explore {
            state.rng.gen_range(0..candidates.len())
        } else {
            let weights: Vec<f64> = candidates
                .iter()
                .map(|p| {
                    let arm = state.arms.get(&p.key());
                    let weight = arm.map_or(1.0, |a| a.weight);
                    let composite = ctx.composite(p).unwrap_or(0.0);
                    let idle_minutes = arm
                        .and_then(|a| a.last_used)
                        .map_or(MAX_FRESHNESS_MINUTES, |t| {
                            (now - t).num_milliseconds() as f64 / 60_000.0
                        })
                        .clamp(0.0, MAX_FRESHNESS_MINUTES);
                    weight * (1.0 + composite) * (1.0 + idle_minutes * 0.1)
                })
                .collect();
            weighted_index(&mut state.rng, &weights).ok_or(Error::NoProxiesAvailable)?
        };

        let chosen = &candidates[idx];
        let arm = state.arms.entry(chosen.key()).or_insert_with(Arm::new);
        arm.last_used = Some(now);

        let decision = if explore { Decision::Explore } else { Decision::Exploit };
        state.stats.selections += 1;
        match decision {
            Decision::Explore => state.stats.explorations += 1,
            Decision::Exploit => state.stats.exploitations += 1,
        }
        trace!(proxy = %chosen.key(), ?decision, "adaptive selection");

        Ok((chosen.clone(), decision))
    }

    /// Decay idle weights, charging each elapsed hour exactly once
    fn apply_decay(&self, arms: &mut HashMap<String, Arm>, now: DateTime<Utc>) {
        for arm in arms.values_mut() {
            let Some(last_used) = arm.last_used else {
                continue;
            };
            if now - last_used <= ChronoDuration::hours(DECAY_AFTER_HOURS) {
                continue;
            }

            let since = arm.decayed_at.map_or(last_used, |d| d.max(last_used));
            let hours = (now - since).num_milliseconds() as f64 / 3_600_000.0;
            if hours <= 0.0 {
                continue;
            }

            arm.weight = (arm.weight * self.config.decay_factor.powf(hours))
                .clamp(self.config.min_weight, self.config.max_weight);
            arm.decayed_at = Some(now);
        }
    }

    fn learn(&self, proxy: &Proxy, success: bool) {
        let mut state = self.state.lock();
        let arm = state.arms.entry(proxy.key()).or_insert_with(Arm::new);
        let factor = if success {
            1.0 + self.config.learning_rate
        } else {
            1.0 - self.config.learning_rate
        };
        arm.weight = (arm.weight * factor).clamp(self.config.min_weight, self.config.max_weight);
        arm.push_outcome(success);
    }

    pub fn weight(&self, proxy: &Proxy) -> Option<f64> {
        self.state.lock().arms.get(&proxy.key()).map(|a| a.weight)
    }

    /// Success rate over the last few reported outcomes
    pub fn recent_success_rate(&self, proxy: &Proxy) -> Option<f64> {
        self.state
            .lock()
            .arms
            .get(&proxy.key())
            .and_then(Arm::recent_success_rate)
    }

    pub fn stats(&self) -> AdaptiveStats {
        self.state.lock().stats
    }
}

impl ProxySelector for AdaptiveSelector {
    fn select(&self, candidates: &[Proxy], ctx: &SelectionContext<'_>) -> Result<Proxy> {
        self.select_with_decision(candidates, ctx).map(|(proxy, _)| proxy)
    }

    fn record_success(&self, proxy: &Proxy, _ctx: &SelectionContext<'_>) {
        self.learn(proxy, true);
    }

    fn record_failure(&self, proxy: &Proxy, _ctx: &SelectionContext<'_>) {
        self.learn(proxy, false);
    }

    fn update_proxies(&self, proxies: &[Proxy]) {
        let keys: HashSet<String> = proxies.iter().map(Proxy::key).collect();
        self.state.lock().arms.retain(|key, _| keys.contains(key));
    }

    fn strategy_name(&self) -> &'static str {
        "adaptive"
    }
}
