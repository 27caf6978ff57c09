//! Persistence collaborators for fetched and validated proxy lists

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Proxy;

/// Get/put storage for the two proxy lists the manager caches
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Last fetched list, empty when nothing fresh is cached
    async fn get_cached_proxies(&self) -> Result<Vec<Proxy>>;

    async fn cache_proxies(&self, proxies: &[Proxy]) -> Result<()>;

    /// Last validated list, empty when nothing fresh is cached
    async fn get_validated_proxies(&self) -> Result<Vec<Proxy>>;

    async fn cache_validated_proxies(&self, proxies: &[Proxy]) -> Result<()>;
}

/// A stored list with the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedList {
    pub cached_at: DateTime<Utc>,
    pub proxies: Vec<Proxy>,
}

impl CachedList {
    pub fn new(proxies: &[Proxy]) -> Self {
        Self {
            cached_at: Utc::now(),
            proxies: proxies.to_vec(),
        }
    }

    pub fn is_fresh(&self, max_age: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(max_age) = max_age else {
            return true;
        };
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => now - self.cached_at <= max_age,
            Err(_) => true,
        }
    }

    /// The proxies if still fresh, otherwise nothing
    pub fn fresh_proxies(&self, max_age: Option<Duration>) -> Vec<Proxy> {
        if self.is_fresh(max_age, Utc::now()) {
            self.proxies.clone()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;

    #[test]
    fn test_cached_list_freshness() {
        let mut list = CachedList::new(&[Proxy::new("10.0.0.1", 80, ProxyProtocol::Http)]);
        let now = Utc::now();

        assert!(list.is_fresh(None, now));
        assert!(list.is_fresh(Some(Duration::from_secs(60)), now));

        list.cached_at = now - chrono::Duration::minutes(5);
        assert!(!list.is_fresh(Some(Duration::from_secs(60)), now));
        assert!(list.fresh_proxies(Some(Duration::from_secs(60))).is_empty());
        assert_eq!(list.fresh_proxies(None).len(), 1);
    }
}
