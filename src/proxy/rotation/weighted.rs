//! Weighted random proxy selection strategy

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use super::{weighted_index, ProxySelector, SelectionContext};
use crate::error::{Error, Result};
use crate::models::Proxy;

/// Picks candidates with probability proportional to their weight
///
/// A candidate's weight is its explicit weight if one was set, otherwise its
/// composite score, otherwise the floor weight. When every weight is zero the
/// pick is uniform.
pub struct WeightedSelector {
    floor_weight: f64,
    weights: Mutex<HashMap<String, f64>>,
}

impl WeightedSelector {
    pub fn new(floor_weight: f64) -> Self {
        Self {
            floor_weight: floor_weight.max(0.0),
            weights: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_weights(floor_weight: f64, weights: impl IntoIterator<Item = (String, f64)>) -> Self {
        let selector = Self::new(floor_weight);
        selector.weights.lock().extend(weights);
        selector
    }

    pub fn set_weight(&self, proxy: &Proxy, weight: f64) {
        self.weights.lock().insert(proxy.key(), weight.max(0.0));
    }

    pub fn clear_weight(&self, proxy: &Proxy) {
        self.weights.lock().remove(&proxy.key());
    }
}

impl ProxySelector for WeightedSelector {
    fn select(&self, candidates: &[Proxy], ctx: &SelectionContext<'_>) -> Result<Proxy> {
        if candidates.is_empty() {
            return Err(Error::NoProxiesAvailable);
        }

        let weights: Vec<f64> = {
            let explicit = self.weights.lock();
            candidates
                .iter()
                .map(|p| {
                    explicit
                        .get(&p.key())
                        .copied()
                        .or_else(|| ctx.composite(p))
                        .unwrap_or(self.floor_weight)
                })
                .collect()
        };

        let idx = weighted_index(&mut rand::thread_rng(), &weights).ok_or(Error::NoProxiesAvailable)?;
        Ok(candidates[idx].clone())
    }

    // Scores are owned by the score board
    fn record_success(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn record_failure(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn update_proxies(&self, proxies: &[Proxy]) {
        let keys: HashSet<String> = proxies.iter().map(Proxy::key).collect();
        self.weights.lock().retain(|key, _| keys.contains(key));
    }

    fn strategy_name(&self) -> &'static str {
        "weighted"
    }
}
