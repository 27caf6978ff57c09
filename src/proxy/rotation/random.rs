//! Random proxy selection strategy

use rand::seq::SliceRandom;

use super::{ProxySelector, SelectionContext};
use crate::error::{Error, Result};
use crate::models::Proxy;

/// Selects a uniformly random candidate
#[derive(Default)]
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl ProxySelector for RandomSelector {
    fn select(&self, candidates: &[Proxy], _ctx: &SelectionContext<'_>) -> Result<Proxy> {
        let mut rng = rand::thread_rng();
        candidates
            .choose(&mut rng)
            .cloned()
            .ok_or(Error::NoProxiesAvailable)
    }

    fn record_success(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn record_failure(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn update_proxies(&self, _proxies: &[Proxy]) {}

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}
