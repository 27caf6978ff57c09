//! Round-robin proxy selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ProxySelector, SelectionContext};
use crate::error::{Error, Result};
use crate::models::Proxy;

/// Selects candidates in round-robin order
///
/// Uses an atomic cursor; the position wraps over whatever candidate list is
/// passed to `select`.
pub struct RoundRobinSelector {
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for RoundRobinSelector {
    fn select(&self, candidates: &[Proxy], _ctx: &SelectionContext<'_>) -> Result<Proxy> {
        if candidates.is_empty() {
            return Err(Error::NoProxiesAvailable);
        }

        let idx = self.index.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[idx].clone())
    }

    fn record_success(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn record_failure(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn update_proxies(&self, _proxies: &[Proxy]) {
        // Start over from the head of the new list
        self.index.store(0, Ordering::Relaxed);
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::test_support::create_test_proxy;

    #[test]
    fn test_round_robin_empty() {
        let selector = RoundRobinSelector::new();
        let result = selector.select(&[], &SelectionContext::new());
        assert!(matches!(result, Err(Error::NoProxiesAvailable)));
    }

    #[test]
    fn test_round_robin_order() {
        let selector = RoundRobinSelector::new();
        let proxies = vec![
            create_test_proxy(1, None),
            create_test_proxy(2, None),
            create_test_proxy(3, None),
        ];
        let ctx = SelectionContext::new();

        let picked: Vec<String> = (0..4)
            .map(|_| selector.select(&proxies, &ctx).unwrap().key())
            .collect();
        assert_eq!(
            picked,
            vec![
                proxies[0].key(),
                proxies[1].key(),
                proxies[2].key(),
                proxies[0].key()
            ]
        );
    }

    #[test]
    fn test_round_robin_update_resets_index() {
        let selector = RoundRobinSelector::new();
        let proxies = vec![create_test_proxy(1, None), create_test_proxy(2, None)];
        let ctx = SelectionContext::new();

        selector.select(&proxies, &ctx).unwrap();

        let replacement = vec![create_test_proxy(10, None), create_test_proxy(20, None)];
        selector.update_proxies(&replacement);

        assert_eq!(
            selector.select(&replacement, &ctx).unwrap().key(),
            replacement[0].key()
        );
    }
}
