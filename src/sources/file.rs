use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{parse_proxy_list, SourceFetcher};
use crate::error::{ErrorKind, ProxyError};
use crate::models::{Proxy, ProxyProtocol};
use crate::proxy::classifier::{ErrorClassifier, PatternClassifier};

/// Reads proxy lists from local files, given as a path or a `file://` URL
pub struct FileSourceFetcher {
    default_protocol: ProxyProtocol,
    classifier: Arc<dyn ErrorClassifier>,
}

impl FileSourceFetcher {
    pub fn new(default_protocol: ProxyProtocol) -> Self {
        Self {
            default_protocol,
            classifier: Arc::new(PatternClassifier::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn resolve(source: &str) -> Result<PathBuf, ProxyError> {
        if !source.contains("://") {
            return Ok(PathBuf::from(source));
        }
        let url = url::Url::parse(source).map_err(|e| {
            ProxyError::new(ErrorKind::ValidationFailed, format!("bad source {}: {}", source, e))
        })?;
        if url.scheme() != "file" {
            return Err(ProxyError::new(
                ErrorKind::ValidationFailed,
                format!("unsupported source scheme: {}", url.scheme()),
            ));
        }
        url.to_file_path().map_err(|_| {
            ProxyError::new(ErrorKind::ValidationFailed, format!("bad file url: {}", source))
        })
    }
}

impl Default for FileSourceFetcher {
    fn default() -> Self {
        Self::new(ProxyProtocol::Http)
    }
}

#[async_trait]
impl SourceFetcher for FileSourceFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, source: &str) -> Result<Vec<Proxy>, ProxyError> {
        let path = Self::resolve(source)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| self.classifier.classify_error(&e, None).with_source(e))?;

        let proxies = parse_proxy_list(&content, self.default_protocol);
        debug!("Read {} proxies from {}", proxies.len(), path.display());
        Ok(proxies)
    }
}
