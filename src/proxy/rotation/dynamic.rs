use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::{create_selector, DomainFingerprint, ProxySelector, RotationStrategy, SelectionContext};
use crate::config::RotationConfig;
use crate::error::Result;
use crate::models::Proxy;

/// A proxy selector that can swap the underlying strategy at runtime.
///
/// The latest working set is remembered so a newly installed strategy starts
/// from the same proxies. Learned state of the old strategy is discarded.
pub struct DynamicProxySelector {
    inner: RwLock<Arc<dyn ProxySelector>>,
    proxies: RwLock<Vec<Proxy>>,
}

impl DynamicProxySelector {
    pub fn new(initial: Arc<dyn ProxySelector>) -> Self {
        Self {
            inner: RwLock::new(initial),
            proxies: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(config: &RotationConfig) -> Self {
        Self::new(Arc::from(create_selector(config.strategy, config)))
    }

    pub fn set_strategy(&self, strategy: RotationStrategy, config: &RotationConfig) {
        self.install(Arc::from(create_selector(strategy, config)));
    }

    /// Install a caller-built selector
    pub fn install(&self, selector: Arc<dyn ProxySelector>) {
        // Carry over the latest proxy list to the new selector.
        let proxies = self.proxies.read().clone();
        selector.update_proxies(&proxies);

        let previous = self.inner.read().strategy_name();
        *self.inner.write() = selector;
        info!(
            from = previous,
            to = self.inner.read().strategy_name(),
            "rotation strategy changed"
        );
    }

    pub fn current(&self) -> Arc<dyn ProxySelector> {
        self.inner.read().clone()
    }
}

impl ProxySelector for DynamicProxySelector {
    fn select(&self, candidates: &[Proxy], ctx: &SelectionContext<'_>) -> Result<Proxy> {
        let selector = self.inner.read().clone();
        selector.select(candidates, ctx)
    }

    fn record_success(&self, proxy: &Proxy, ctx: &SelectionContext<'_>) {
        self.inner.read().record_success(proxy, ctx);
    }

    fn record_failure(&self, proxy: &Proxy, ctx: &SelectionContext<'_>) {
        self.inner.read().record_failure(proxy, ctx);
    }

    fn update_proxies(&self, proxies: &[Proxy]) {
        *self.proxies.write() = proxies.to_vec();
        let selector = self.inner.read().clone();
        selector.update_proxies(proxies);
    }

    fn strategy_name(&self) -> &'static str {
        self.inner.read().strategy_name()
    }

    fn apply_fingerprint(&self, domain: &str, fingerprint: &DomainFingerprint) -> bool {
        self.inner.read().apply_fingerprint(domain, fingerprint)
    }
}
