use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CachedList, ProxyStore};
use crate::error::Result;
use crate::models::Proxy;

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    max_age: Option<Duration>,
    all: RwLock<Option<CachedList>>,
    validated: RwLock<Option<CachedList>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries older than `max_age` read back as empty
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            ..Self::default()
        }
    }

    fn read(slot: &RwLock<Option<CachedList>>, max_age: Option<Duration>) -> Vec<Proxy> {
        slot.read()
            .as_ref()
            .map(|list| list.fresh_proxies(max_age))
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn get_cached_proxies(&self) -> Result<Vec<Proxy>> {
        Ok(Self::read(&self.all, self.max_age))
    }

    async fn cache_proxies(&self, proxies: &[Proxy]) -> Result<()> {
        *self.all.write() = Some(CachedList::new(proxies));
        Ok(())
    }

    async fn get_validated_proxies(&self) -> Result<Vec<Proxy>> {
        Ok(Self::read(&self.validated, self.max_age))
    }

    async fn cache_validated_proxies(&self, proxies: &[Proxy]) -> Result<()> {
        *self.validated.write() = Some(CachedList::new(proxies));
        Ok(())
    }
}
