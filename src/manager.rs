//! Pool façade: fetch, validate, cache, select and record outcomes

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::analytics::{AnalyticsSink, InMemoryAnalytics};
use crate::config::Config;
use crate::error::{Error, ProxyError, Result};
use crate::models::{AnalyticsSnapshot, Proxy, ProxyFilter, ProxyScore};
use crate::proxy::checker::{ProxyChecker, TunnelChecker};
use crate::proxy::classifier::{ErrorClassifier, PatternClassifier};
use crate::proxy::retry::RetryPolicy;
use crate::proxy::rotation::{
    normalize_domain, DomainFingerprint, DynamicProxySelector, ProxySelector, RotationStrategy,
    SelectionContext,
};
use crate::proxy::scoreboard::ScoreBoard;
use crate::proxy::validator::{ParallelValidator, ProgressFn, ValidationReport};
use crate::repository::{JsonFileStore, MemoryStore, ProxyStore};
use crate::services::{HealthMonitor, PoolView};
use crate::sources::{FileSourceFetcher, SourceFetcher};

const REQUEST_SOURCE: &str = "request";

/// Pool lists and scores shared with the health monitor
#[derive(Default)]
pub struct PoolState {
    all: ArcSwap<Vec<Proxy>>,
    validated: ArcSwap<Vec<Proxy>>,
    scores: ScoreBoard,
}

impl PoolState {
    pub fn all(&self) -> Arc<Vec<Proxy>> {
        self.all.load_full()
    }

    pub fn validated(&self) -> Arc<Vec<Proxy>> {
        self.validated.load_full()
    }

    pub fn scores(&self) -> &ScoreBoard {
        &self.scores
    }

    /// Every known proxy once, fetched list first
    pub fn known_proxies(&self) -> Vec<Proxy> {
        let all = self.all.load();
        let validated = self.validated.load();
        let mut seen = HashSet::new();
        all.iter()
            .chain(validated.iter())
            .filter(|p| seen.insert(p.key()))
            .cloned()
            .collect()
    }
}

impl PoolView for PoolState {
    fn entries(&self) -> Vec<(Proxy, Option<ProxyScore>)> {
        self.known_proxies()
            .into_iter()
            .map(|proxy| {
                let score = self.scores.get(&proxy.key());
                (proxy, score)
            })
            .collect()
    }
}

/// Builder for [`ProxyManager`]; unset collaborators get the stock ones
pub struct ProxyManagerBuilder {
    config: Config,
    checker: Option<Arc<dyn ProxyChecker>>,
    fetcher: Option<Arc<dyn SourceFetcher>>,
    store: Option<Arc<dyn ProxyStore>>,
    sink: Option<Arc<dyn AnalyticsSink>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
}

impl ProxyManagerBuilder {
    pub fn checker(mut self, checker: Arc<dyn ProxyChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn store(mut self, store: Arc<dyn ProxyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// External sink that receives every event alongside the built-in analytics
    pub fn analytics_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> Result<ProxyManager> {
        self.config.validate()?;
        let config = self.config;

        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(PatternClassifier::new()));
        let checker = self
            .checker
            .unwrap_or_else(|| Arc::new(TunnelChecker::with_classifier(classifier.clone())));
        let fetcher = self.fetcher.unwrap_or_else(|| {
            Arc::new(
                FileSourceFetcher::new(config.sources.default_protocol)
                    .with_classifier(classifier.clone()),
            )
        });
        let store: Arc<dyn ProxyStore> = match (self.store, &config.cache.path) {
            (Some(store), _) => store,
            (None, Some(path)) => {
                Arc::new(JsonFileStore::new(path).with_max_age(config.cache.max_age))
            }
            (None, None) => Arc::new(MemoryStore::with_max_age(config.cache.max_age)),
        };

        let pool = Arc::new(PoolState::default());
        let monitor = HealthMonitor::new(pool.clone(), config.health.clone());
        let selector = DynamicProxySelector::from_config(&config.rotation);
        info!("Using rotation strategy: {}", selector.strategy_name());

        Ok(ProxyManager {
            retry: config.retry.policy(),
            config,
            pool,
            selector,
            fingerprints: DashMap::new(),
            checker,
            fetcher,
            store,
            classifier,
            analytics: InMemoryAnalytics::new(),
            sink: self.sink,
            monitor,
        })
    }
}

/// Entry point for callers of the pool
///
/// Fetch failures fall back to the store, per-proxy validation failures are
/// absorbed into the report, and only pool-level conditions surface as errors.
pub struct ProxyManager {
    config: Config,
    retry: RetryPolicy,
    pool: Arc<PoolState>,
    selector: DynamicProxySelector,
    fingerprints: DashMap<String, DomainFingerprint>,
    checker: Arc<dyn ProxyChecker>,
    fetcher: Arc<dyn SourceFetcher>,
    store: Arc<dyn ProxyStore>,
    classifier: Arc<dyn ErrorClassifier>,
    analytics: InMemoryAnalytics,
    sink: Option<Arc<dyn AnalyticsSink>>,
    monitor: HealthMonitor,
}

impl ProxyManager {
    pub fn builder(config: Config) -> ProxyManagerBuilder {
        ProxyManagerBuilder {
            config,
            checker: None,
            fetcher: None,
            store: None,
            sink: None,
            classifier: None,
        }
    }

    /// Manager with the stock collaborators
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &PoolState {
        &self.pool
    }

    pub fn score(&self, proxy: &Proxy) -> Option<ProxyScore> {
        self.pool.scores.get(&proxy.key())
    }

    /// Fetch from every configured source, falling back to the store
    ///
    /// Returns the proxies matching `filter`, at most `filter.count` of them.
    #[instrument(skip(self, filter), fields(sources = self.config.sources.urls.len()))]
    pub async fn fetch_proxies(&self, filter: &ProxyFilter) -> Result<Vec<Proxy>> {
        let mut fetched = Vec::new();
        let mut seen = HashSet::new();

        for source in &self.config.sources.urls {
            let fetcher: &dyn SourceFetcher = self.fetcher.as_ref();
            let source: &str = source;
            match self.retry.execute(move |_| fetcher.fetch(source)).await {
                Ok(proxies) => {
                    debug!("Fetched {} proxies from {}", proxies.len(), source);
                    fetched.extend(proxies.into_iter().filter(|p| seen.insert(p.key())));
                }
                Err(e) => warn!("Source {} failed: {}", source, e),
            }
        }

        if fetched.is_empty() {
            match self.store.get_cached_proxies().await {
                Ok(cached) if !cached.is_empty() => {
                    info!("No proxies from sources, using {} cached", cached.len());
                    fetched = cached;
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to read proxy cache: {}", e),
            }
        } else {
            self.record(|sink| sink.record_fetch(&fetched));
            if let Err(e) = self.store.cache_proxies(&fetched).await {
                warn!("Failed to cache fetched proxies: {}", e);
            }
        }

        if !fetched.is_empty() {
            self.pool.all.store(Arc::new(fetched.clone()));
            self.reconcile();
        }

        let matching: Vec<Proxy> = fetched
            .into_iter()
            .filter(|p| p.matches(filter))
            .take(filter.count.unwrap_or(usize::MAX))
            .collect();

        if matching.is_empty() {
            return Err(Error::NoProxiesAvailable);
        }
        info!("{} proxies match the filter", matching.len());
        Ok(matching)
    }

    /// Validate matching proxies until `filter.count` pass or candidates run out
    #[instrument(skip(self, filter, on_progress), fields(count = ?filter.count))]
    pub async fn get_validated_proxies(
        &self,
        filter: &ProxyFilter,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<Proxy>> {
        let candidates = self.fetch_proxies(&filter.unlimited()).await?;

        let validator = self
            .validator(
                &self.config.validation.test_url,
                self.config.validation.timeout,
            )
            .with_stop_after(filter.count);
        let report = validator.validate(candidates, on_progress).await;
        self.apply_report(&report);

        let passed: Vec<Proxy> = report
            .passed()
            .map(|r| r.proxy.clone())
            .take(filter.count.unwrap_or(usize::MAX))
            .collect();

        if passed.is_empty() {
            return Err(Error::AllProxiesExhausted {
                attempts: report.results.len(),
            });
        }

        if let Err(e) = self.store.cache_validated_proxies(&passed).await {
            warn!("Failed to cache validated proxies: {}", e);
        }
        self.pool.validated.store(Arc::new(passed.clone()));
        self.reconcile();

        info!(
            "{} of {} checked proxies passed validation",
            passed.len(),
            report.results.len()
        );
        Ok(passed)
    }

    /// Next proxy from the active strategy
    ///
    /// With `use_scoring` off, strategies see no scores and fall back to
    /// their unscored behavior.
    pub async fn get_next_proxy(&self, validated: bool, use_scoring: bool) -> Result<Proxy> {
        self.next_proxy(validated, use_scoring, None).await
    }

    /// Next proxy for requests to `domain`
    pub async fn get_next_proxy_for(
        &self,
        domain: &str,
        validated: bool,
        use_scoring: bool,
    ) -> Result<Proxy> {
        self.next_proxy(validated, use_scoring, Some(domain)).await
    }

    async fn next_proxy(
        &self,
        validated: bool,
        use_scoring: bool,
        domain: Option<&str>,
    ) -> Result<Proxy> {
        let candidates = self.candidates(validated).await?;

        let mut ctx = SelectionContext::new();
        if use_scoring {
            ctx = ctx.with_scores(&self.pool.scores);
        }
        if let Some(domain) = domain {
            ctx = ctx.with_domain(domain);
        }

        let proxy = self.selector.select(&candidates, &ctx)?;
        debug!(proxy = %proxy.key(), strategy = self.selector.strategy_name(), "proxy selected");
        Ok(proxy)
    }

    async fn candidates(&self, validated: bool) -> Result<Arc<Vec<Proxy>>> {
        if validated {
            let current = self.pool.validated();
            if !current.is_empty() {
                return Ok(current);
            }
            let cached = match self.store.get_validated_proxies().await {
                Ok(cached) => cached,
                Err(e) => {
                    warn!("Failed to read validated cache: {}", e);
                    Vec::new()
                }
            };
            if cached.is_empty() {
                return Err(Error::NoProxiesAvailable);
            }
            debug!("Loaded {} validated proxies from cache", cached.len());
            self.pool.validated.store(Arc::new(cached));
            self.reconcile();
            return Ok(self.pool.validated());
        }

        let current = self.pool.all();
        if !current.is_empty() {
            return Ok(current);
        }
        self.fetch_proxies(&ProxyFilter::default()).await?;
        Ok(self.pool.all())
    }

    /// Check one proxy now; `test_url` defaults to the configured one
    #[instrument(skip(self, proxy), fields(proxy = %proxy.key()))]
    pub async fn validate_specific_proxy(
        &self,
        proxy: &Proxy,
        test_url: Option<&str>,
        timeout: Duration,
        update_score: bool,
    ) -> bool {
        let test_url = test_url.unwrap_or(&self.config.validation.test_url);
        let report = self
            .validator(test_url, timeout)
            .validate(vec![proxy.clone()], None)
            .await;

        if update_score {
            self.apply_report(&report);
        } else {
            let results: Vec<bool> = report.results.iter().map(|r| r.success).collect();
            self.record(|sink| sink.record_validation(std::slice::from_ref(proxy), &results));
        }
        report.passed_count() == 1
    }

    /// Record a successful request made through `proxy`
    pub fn report_success(&self, proxy: &Proxy, response_time: Duration, domain: Option<&str>) {
        let ms = response_time.as_secs_f64() * 1000.0;
        self.pool.scores.record_success(&proxy.key(), ms);
        self.selector
            .record_success(proxy, &self.outcome_context(domain));
        self.record(|sink| sink.record_request(proxy, true, Some(response_time), REQUEST_SOURCE));
    }

    /// Record a failed request made through `proxy` and classify the failure
    pub fn report_failure(&self, proxy: &Proxy, message: &str, domain: Option<&str>) -> ProxyError {
        let error = self.classifier.classify(message, Some(proxy));
        debug!(proxy = %proxy.key(), kind = %error.kind(), "request failed");

        self.pool.scores.record_failure(&proxy.key());
        self.selector
            .record_failure(proxy, &self.outcome_context(domain));
        self.record(|sink| sink.record_request(proxy, false, None, REQUEST_SOURCE));
        error
    }

    pub fn get_analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    pub fn reset_analytics(&self) {
        self.analytics.reset();
        info!("Analytics reset");
    }

    /// Swap the rotation strategy; learned state of the old one is dropped
    pub fn set_strategy(&self, strategy: RotationStrategy) {
        self.selector.set_strategy(strategy, &self.config.rotation);
        for entry in self.fingerprints.iter() {
            self.selector.apply_fingerprint(entry.key(), entry.value());
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.selector.strategy_name()
    }

    /// Register selection hints for a domain
    ///
    /// Kept across strategy swaps and applied whenever the active strategy
    /// understands fingerprints.
    pub fn set_fingerprint(&self, domain: &str, fingerprint: DomainFingerprint) {
        let domain = normalize_domain(domain);
        if !self.selector.apply_fingerprint(&domain, &fingerprint) {
            debug!(domain = %domain, "fingerprint stored, active strategy ignores it");
        }
        self.fingerprints.insert(domain, fingerprint);
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Start periodic health sampling; must run inside a tokio runtime
    pub fn start_health_monitor(&self) -> bool {
        self.monitor.start()
    }

    pub fn stop_health_monitor(&self) -> bool {
        self.monitor.stop()
    }

    /// Stop background work and wait for it to finish
    pub async fn dispose(&self) {
        self.monitor.stop_and_wait().await;
        info!("Proxy manager disposed");
    }

    fn validator(&self, test_url: &str, timeout: Duration) -> ParallelValidator {
        ParallelValidator::new(
            self.checker.clone(),
            self.config.validation.concurrency,
            timeout,
            test_url,
        )
    }

    fn apply_report(&self, report: &ValidationReport) {
        for result in &report.results {
            let key = result.proxy.key();
            match result.response_time {
                Some(rt) if result.success => {
                    self.pool
                        .scores
                        .record_success(&key, rt.as_secs_f64() * 1000.0);
                }
                _ => {
                    self.pool.scores.record_failure(&key);
                }
            }
        }

        let proxies: Vec<Proxy> = report.results.iter().map(|r| r.proxy.clone()).collect();
        let results: Vec<bool> = report.results.iter().map(|r| r.success).collect();
        self.record(|sink| sink.record_validation(&proxies, &results));
    }

    fn outcome_context<'a>(&'a self, domain: Option<&'a str>) -> SelectionContext<'a> {
        let ctx = SelectionContext::new().with_scores(&self.pool.scores);
        match domain {
            Some(domain) => ctx.with_domain(domain),
            None => ctx,
        }
    }

    /// Push the pool's working set to the strategy and prune evicted scores
    fn reconcile(&self) {
        let known = self.pool.known_proxies();
        let keys: HashSet<String> = known.iter().map(Proxy::key).collect();
        for key in &keys {
            self.pool.scores.ensure(key);
        }
        self.pool.scores.retain_keys(&keys);
        self.analytics.retain_proxies(&keys);
        self.selector.update_proxies(&known);
    }

    fn record(&self, event: impl Fn(&dyn AnalyticsSink)) {
        event(&self.analytics);
        if let Some(sink) = &self.sink {
            event(sink.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ErrorKind;
    use crate::models::{HealthStatus, ProxyProtocol};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Passes every proxy whose port is in `passing`
    struct PortChecker {
        passing: HashSet<u16>,
        calls: AtomicUsize,
    }

    impl PortChecker {
        fn new(passing: impl IntoIterator<Item = u16>) -> Arc<Self> {
            Arc::new(Self {
                passing: passing.into_iter().collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProxyChecker for PortChecker {
        async fn check(
            &self,
            proxy: &Proxy,
            _test_url: &str,
            _timeout: Duration,
        ) -> std::result::Result<Duration, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.passing.contains(&proxy.port) {
                Ok(Duration::from_millis(100))
            } else {
                Err(ProxyError::connection("connect ECONNREFUSED"))
            }
        }
    }

    /// Serves fixed lists per source; unknown sources fail
    struct MapFetcher {
        lists: HashMap<String, Vec<Proxy>>,
        calls: AtomicUsize,
    }

    impl MapFetcher {
        fn new(lists: &[(&str, Vec<Proxy>)]) -> Arc<Self> {
            Arc::new(Self {
                lists: lists
                    .iter()
                    .map(|(source, proxies)| (source.to_string(), proxies.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceFetcher for MapFetcher {
        async fn fetch(&self, source: &str) -> std::result::Result<Vec<Proxy>, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lists
                .get(source)
                .cloned()
                .ok_or_else(|| ProxyError::connection(format!("{} unreachable", source)))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        fetches: Mutex<usize>,
        requests: Mutex<Vec<(String, bool)>>,
    }

    impl AnalyticsSink for CountingSink {
        fn record_fetch(&self, _proxies: &[Proxy]) {
            *self.fetches.lock() += 1;
        }

        fn record_validation(&self, _proxies: &[Proxy], _results: &[bool]) {}

        fn record_request(
            &self,
            proxy: &Proxy,
            success: bool,
            _response_time: Option<Duration>,
            _source: &str,
        ) {
            self.requests.lock().push((proxy.key(), success));
        }
    }

    fn proxy(port: u16, country: &str) -> Proxy {
        Proxy::new("10.0.0.1", port, ProxyProtocol::Http).with_country(country)
    }

    fn test_config(sources: &[&str]) -> Config {
        let mut config = Config::default();
        config.sources.urls = sources.iter().map(|s| s.to_string()).collect();
        config.retry = RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        config.rotation.strategy = RotationStrategy::RoundRobin;
        config
    }

    fn manager(
        config: Config,
        fetcher: Arc<MapFetcher>,
        checker: Arc<PortChecker>,
    ) -> (ProxyManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = ProxyManager::builder(config)
            .fetcher(fetcher)
            .checker(checker)
            .store(store.clone())
            .build()
            .unwrap();
        (manager, store)
    }

    #[tokio::test]
    async fn test_fetch_merges_sources_and_applies_filter() {
        let fetcher = MapFetcher::new(&[
            ("a", vec![proxy(1, "US"), proxy(2, "DE")]),
            ("b", vec![proxy(2, "DE"), proxy(3, "US")]),
        ]);
        let (manager, store) = manager(test_config(&["a", "b"]), fetcher, PortChecker::new([]));

        let filter = ProxyFilter {
            countries: vec!["US".to_string()],
            ..Default::default()
        };
        let proxies = manager.fetch_proxies(&filter).await.unwrap();
        assert_eq!(proxies, vec![proxy(1, "US"), proxy(3, "US")]);

        let limited = manager.fetch_proxies(&filter.clone().with_count(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert_eq!(manager.pool().all().len(), 3);
        assert_eq!(store.get_cached_proxies().await.unwrap().len(), 3);
        assert_eq!(manager.get_analytics().fetch_operations, 2);
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_cache() {
        let fetcher = MapFetcher::new(&[]);
        let (manager, store) = manager(test_config(&["down"]), fetcher.clone(), PortChecker::new([]));
        store.cache_proxies(&[proxy(7, "FR")]).await.unwrap();

        let proxies = manager.fetch_proxies(&ProxyFilter::default()).await.unwrap();

        assert_eq!(proxies, vec![proxy(7, "FR")]);
        // One try plus one retry
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get_analytics().fetch_operations, 0);
    }

    #[tokio::test]
    async fn test_fetch_without_any_proxies_fails() {
        let (manager, _) = manager(test_config(&["down"]), MapFetcher::new(&[]), PortChecker::new([]));

        let err = manager
            .fetch_proxies(&ProxyFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoProxiesAvailable));
    }

    #[tokio::test]
    async fn test_get_validated_proxies_stops_at_count() {
        let fetcher = MapFetcher::new(&[(
            "a",
            (1..=6).map(|port| proxy(port, "US")).collect(),
        )]);
        let (manager, store) = manager(test_config(&["a"]), fetcher, PortChecker::new([2, 4, 6]));

        let progress = Mutex::new(Vec::new());
        let on_progress = |completed: usize, total: usize| progress.lock().push((completed, total));
        let validated = manager
            .get_validated_proxies(&ProxyFilter::default().with_count(2), Some(&on_progress))
            .await
            .unwrap();

        assert_eq!(validated.len(), 2);
        assert!(validated.iter().all(|p| p.port % 2 == 0));
        assert_eq!(store.get_validated_proxies().await.unwrap(), validated);

        let progress = progress.lock();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[1].0 == w[0].0 + 1));
        assert!(progress.iter().all(|&(_, total)| total == 6));

        let score = manager.score(&validated[0]).unwrap();
        assert_eq!(score.successful_requests, 1);
        let analytics = manager.get_analytics();
        assert_eq!(analytics.validations_passed, validated.len() as u64);
    }

    #[tokio::test]
    async fn test_get_validated_proxies_exhausted() {
        let fetcher = MapFetcher::new(&[("a", vec![proxy(1, "US"), proxy(2, "US")])]);
        let (manager, _) = manager(test_config(&["a"]), fetcher, PortChecker::new([]));

        let err = manager
            .get_validated_proxies(&ProxyFilter::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllProxiesExhausted { attempts: 2 }));
        assert_eq!(manager.score(&proxy(1, "US")).unwrap().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_get_next_proxy_rotates_validated() {
        let fetcher = MapFetcher::new(&[("a", (1..=4).map(|port| proxy(port, "US")).collect())]);
        let (manager, _) = manager(test_config(&["a"]), fetcher, PortChecker::new([1, 2, 3]));

        manager
            .get_validated_proxies(&ProxyFilter::default(), None)
            .await
            .unwrap();

        let mut ports = Vec::new();
        for _ in 0..4 {
            ports.push(manager.get_next_proxy(true, true).await.unwrap().port);
        }
        assert_eq!(ports, vec![1, 2, 3, 1]);
    }

    #[tokio::test]
    async fn test_get_next_proxy_without_validated_pool() {
        let (manager, _) = manager(test_config(&[]), MapFetcher::new(&[]), PortChecker::new([]));

        let err = manager.get_next_proxy(true, false).await.unwrap_err();
        assert!(matches!(err, Error::NoProxiesAvailable));
    }

    #[tokio::test]
    async fn test_get_next_proxy_loads_validated_cache() {
        let (manager, store) = manager(test_config(&[]), MapFetcher::new(&[]), PortChecker::new([]));
        store
            .cache_validated_proxies(&[proxy(9, "US")])
            .await
            .unwrap();

        let next = manager.get_next_proxy(true, true).await.unwrap();
        assert_eq!(next.port, 9);
    }

    #[tokio::test]
    async fn test_report_outcomes_update_scores_and_sink() {
        let fetcher = MapFetcher::new(&[("a", vec![proxy(1, "US")])]);
        let sink = Arc::new(CountingSink::default());
        let manager = ProxyManager::builder(test_config(&["a"]))
            .fetcher(fetcher)
            .checker(PortChecker::new([]))
            .store(Arc::new(MemoryStore::new()))
            .analytics_sink(sink.clone())
            .build()
            .unwrap();
        let target = proxy(1, "US");

        manager.report_success(&target, Duration::from_millis(250), Some("example.com"));
        let error = manager.report_failure(&target, "HTTP 429 Too Many Requests", None);

        assert_eq!(error.kind(), ErrorKind::RateLimited);
        assert_eq!(error.port(), Some(1));
        let score = manager.score(&target).unwrap();
        assert_eq!(score.successful_requests, 1);
        assert_eq!(score.failed_requests, 1);

        let analytics = manager.get_analytics();
        assert_eq!(analytics.total_requests, 2);
        assert_eq!(analytics.failed_requests, 1);
        assert_eq!(
            *sink.requests.lock(),
            vec![(target.key(), true), (target.key(), false)]
        );

        manager.reset_analytics();
        assert_eq!(manager.get_analytics().total_requests, 0);
    }

    #[tokio::test]
    async fn test_validate_specific_proxy() {
        let (manager, _) = manager(test_config(&[]), MapFetcher::new(&[]), PortChecker::new([5]));

        assert!(
            manager
                .validate_specific_proxy(&proxy(5, "US"), None, Duration::from_secs(1), true)
                .await
        );
        assert!(
            !manager
                .validate_specific_proxy(
                    &proxy(6, "US"),
                    Some("http://example.org"),
                    Duration::from_secs(1),
                    false,
                )
                .await
        );

        assert_eq!(manager.score(&proxy(5, "US")).unwrap().successful_requests, 1);
        assert!(manager.score(&proxy(6, "US")).is_none());
        assert_eq!(manager.get_analytics().validations, 2);
    }

    #[tokio::test]
    async fn test_fingerprint_survives_strategy_swap() {
        let fetcher = MapFetcher::new(&[("a", vec![proxy(1, "CN"), proxy(2, "US")])]);
        let (manager, _) = manager(test_config(&["a"]), fetcher, PortChecker::new([]));
        manager.fetch_proxies(&ProxyFilter::default()).await.unwrap();

        manager.set_fingerprint(
            "https://www.shop.example/cart",
            DomainFingerprint {
                blocked_countries: vec!["CN".to_string()],
                ..Default::default()
            },
        );
        manager.set_strategy(RotationStrategy::WebsiteSpecific);
        assert_eq!(manager.strategy_name(), "website_specific");

        for _ in 0..20 {
            let next = manager
                .get_next_proxy_for("shop.example", false, true)
                .await
                .unwrap();
            assert_eq!(next.port, 2);
        }
    }

    #[tokio::test]
    async fn test_refresh_drops_scores_of_evicted_proxies() {
        let fetcher = MapFetcher::new(&[("a", vec![proxy(1, "US")]), ("b", vec![proxy(2, "US")])]);
        let mut config = test_config(&["a"]);
        let (first, _) = manager(config.clone(), fetcher.clone(), PortChecker::new([]));
        first.fetch_proxies(&ProxyFilter::default()).await.unwrap();
        first.report_success(&proxy(1, "US"), Duration::from_millis(10), None);
        assert!(first.score(&proxy(1, "US")).is_some());

        config.sources.urls = vec!["b".to_string()];
        let (second, _) = manager(config, fetcher, PortChecker::new([]));
        second.report_success(&proxy(1, "US"), Duration::from_millis(10), None);
        second.fetch_proxies(&ProxyFilter::default()).await.unwrap();

        assert!(second.score(&proxy(1, "US")).is_none());
        assert_eq!(second.score(&proxy(2, "US")).unwrap().total_requests(), 0);
        assert!(!second
            .get_analytics()
            .proxies
            .contains_key(&proxy(1, "US").key()));
    }

    #[tokio::test]
    async fn test_health_monitor_sees_pool() {
        let fetcher = MapFetcher::new(&[("a", (1..=5).map(|port| proxy(port, "US")).collect())]);
        let (manager, _) = manager(test_config(&["a"]), fetcher, PortChecker::new([1, 2, 3, 4]));
        manager
            .get_validated_proxies(&ProxyFilter::default(), None)
            .await
            .unwrap();
        for port in 1..=4 {
            for _ in 0..5 {
                manager.report_success(&proxy(port, "US"), Duration::from_millis(100), None);
            }
        }

        let snapshot = manager.health_monitor().sample_now();
        assert_eq!(snapshot.total_proxies, 5);
        assert_eq!(snapshot.healthy_proxies, 4);
        assert_eq!(snapshot.health_status, HealthStatus::Excellent);

        assert!(manager.start_health_monitor());
        manager.dispose().await;
        assert!(!manager.health_monitor().is_running());
    }
}
