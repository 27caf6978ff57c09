use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{CachedList, ProxyStore};
use crate::error::Result;
use crate::models::Proxy;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    all: Option<CachedList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validated: Option<CachedList>,
}

/// Store backed by a single JSON document on disk
///
/// Writes go to a sibling temp file that is then renamed over the target.
pub struct JsonFileStore {
    path: PathBuf,
    max_age: Option<Duration>,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: None,
            lock: Mutex::new(()),
        }
    }

    /// Entries older than `max_age` read back as empty
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CacheDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(CacheDocument::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache file {} does not exist yet", self.path.display());
                Ok(CacheDocument::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, document: &CacheDocument) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read the document, treating a corrupt file as empty
    async fn load_lenient(&self) -> Result<CacheDocument> {
        match self.load().await {
            Ok(document) => Ok(document),
            Err(crate::error::Error::Json(e)) => {
                warn!("Ignoring unreadable cache file {}: {}", self.path.display(), e);
                Ok(CacheDocument::default())
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&self, apply: impl FnOnce(&mut CacheDocument)) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load_lenient().await?;
        apply(&mut document);
        self.save(&document).await
    }
}

#[async_trait]
impl ProxyStore for JsonFileStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn get_cached_proxies(&self) -> Result<Vec<Proxy>> {
        let _guard = self.lock.lock().await;
        let document = self.load_lenient().await?;
        Ok(document
            .all
            .map(|list| list.fresh_proxies(self.max_age))
            .unwrap_or_default())
    }

    #[instrument(skip(self, proxies), fields(count = proxies.len()))]
    async fn cache_proxies(&self, proxies: &[Proxy]) -> Result<()> {
        self.update(|document| document.all = Some(CachedList::new(proxies)))
            .await
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn get_validated_proxies(&self) -> Result<Vec<Proxy>> {
        let _guard = self.lock.lock().await;
        let document = self.load_lenient().await?;
        Ok(document
            .validated
            .map(|list| list.fresh_proxies(self.max_age))
            .unwrap_or_default())
    }

    #[instrument(skip(self, proxies), fields(count = proxies.len()))]
    async fn cache_validated_proxies(&self, proxies: &[Proxy]) -> Result<()> {
        self.update(|document| document.validated = Some(CachedList::new(proxies)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credentials, ProxyProtocol};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "proxy-pool-{}-{}-{}.json",
            name,
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let store = JsonFileStore::new(temp_path("missing"));
        assert!(store.get_cached_proxies().await.unwrap().is_empty());
        assert!(store.get_validated_proxies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_both_lists() {
        let path = temp_path("persist");
        let store = JsonFileStore::new(&path);
        let fetched = vec![
            Proxy::new("10.0.0.1", 80, ProxyProtocol::Http).with_country("US"),
            Proxy::new("10.0.0.2", 1080, ProxyProtocol::Socks5)
                .with_credentials(Credentials::new("u", "p")),
        ];

        store.cache_proxies(&fetched).await.unwrap();
        store.cache_validated_proxies(&fetched[1..]).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get_cached_proxies().await.unwrap(), fetched);
        assert_eq!(
            reopened.get_validated_proxies().await.unwrap(),
            fetched[1..].to_vec()
        );

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_stale_entries_read_empty() {
        let path = temp_path("stale");
        let store = JsonFileStore::new(&path).with_max_age(Duration::ZERO);
        store
            .cache_proxies(&[Proxy::new("10.0.0.1", 80, ProxyProtocol::Http)])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(store.get_cached_proxies().await.unwrap().is_empty());
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_empty() {
        let path = temp_path("corrupt");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = JsonFileStore::new(&path);
        assert!(store.get_cached_proxies().await.unwrap().is_empty());

        store
            .cache_validated_proxies(&[Proxy::new("10.0.0.1", 80, ProxyProtocol::Http)])
            .await
            .unwrap();
        assert_eq!(store.get_validated_proxies().await.unwrap().len(), 1);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
