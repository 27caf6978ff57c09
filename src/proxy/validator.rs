//! Bounded-concurrency validation of candidate proxies

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::{ErrorKind, ProxyError};
use crate::models::Proxy;
use crate::proxy::checker::ProxyChecker;

/// Progress callback receiving `(completed, total)`
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Outcome of validating one proxy
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    /// Position of the proxy in the input list
    pub index: usize,
    pub proxy: Proxy,
    pub success: bool,
    pub response_time: Option<Duration>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl ValidationResult {
    fn from_outcome(index: usize, proxy: Proxy, outcome: Result<Duration, ProxyError>) -> Self {
        match outcome {
            Ok(elapsed) => Self {
                index,
                proxy,
                success: true,
                response_time: Some(elapsed),
                error_kind: None,
                error_message: None,
            },
            Err(e) => Self {
                index,
                proxy,
                success: false,
                response_time: None,
                error_kind: Some(e.kind()),
                error_message: Some(e.to_string()),
            },
        }
    }
}

/// Results of a validation batch, ordered by input position
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub results: Vec<ValidationResult>,
    /// Set when the batch stopped once enough proxies had passed
    pub terminated_early: bool,
    /// Set when the batch had to finish sequentially
    pub fell_back_to_sequential: bool,
}

impl ValidationReport {
    pub fn passed(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn passed_count(&self) -> usize {
        self.passed().count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }
}

/// Runs checks over many proxies with at most `concurrency` in flight
///
/// Each check is bounded by its own timeout and a timed-out check is a
/// failure. Individual failures are recorded in the report and never abort
/// the batch. Checks still running when the batch stops early are cancelled
/// before `validate` returns.
pub struct ParallelValidator {
    checker: Arc<dyn ProxyChecker>,
    concurrency: usize,
    check_timeout: Duration,
    test_url: String,
    stop_after: Option<usize>,
}

impl ParallelValidator {
    pub fn new(
        checker: Arc<dyn ProxyChecker>,
        concurrency: usize,
        check_timeout: Duration,
        test_url: impl Into<String>,
    ) -> Self {
        Self {
            checker,
            concurrency: concurrency.max(1),
            check_timeout,
            test_url: test_url.into(),
            stop_after: None,
        }
    }

    /// Stop starting new checks once this many proxies have passed
    pub fn with_stop_after(mut self, successes: Option<usize>) -> Self {
        self.stop_after = successes.filter(|n| *n > 0);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[instrument(skip_all, fields(total = proxies.len(), concurrency = self.concurrency))]
    pub async fn validate(
        &self,
        proxies: Vec<Proxy>,
        on_progress: Option<ProgressFn<'_>>,
    ) -> ValidationReport {
        let total = proxies.len();
        let mut slots: Vec<Option<ValidationResult>> = vec![None; total];
        let mut tracker = Progress {
            completed: 0,
            passed: 0,
            total,
            on_progress,
        };
        let mut report = ValidationReport::default();

        let mut queue = proxies.iter().cloned().enumerate();
        let mut in_flight = JoinSet::new();
        for (index, proxy) in queue.by_ref().take(self.concurrency) {
            self.spawn_check(&mut in_flight, index, proxy);
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(result) => {
                    tracker.record(&result);
                    let index = result.index;
                    slots[index] = Some(result);
                    if self.enough_passed(tracker.passed) {
                        report.terminated_early = tracker.completed < total;
                        break;
                    }
                    if let Some((index, proxy)) = queue.next() {
                        self.spawn_check(&mut in_flight, index, proxy);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "validation worker failed, finishing sequentially");
                    report.fell_back_to_sequential = true;
                    break;
                }
            }
        }

        if report.fell_back_to_sequential {
            // Checks already started run to completion and keep their results
            while let Some(joined) = in_flight.join_next().await {
                if let Ok(result) = joined {
                    tracker.record(&result);
                    let index = result.index;
                    slots[index] = Some(result);
                }
            }
        } else {
            in_flight.shutdown().await;
        }

        if report.fell_back_to_sequential {
            for (index, proxy) in proxies.into_iter().enumerate() {
                if slots[index].is_some() {
                    continue;
                }
                if self.enough_passed(tracker.passed) {
                    report.terminated_early = true;
                    break;
                }

                let outcome = AssertUnwindSafe(run_check(
                    self.checker.as_ref(),
                    &proxy,
                    &self.test_url,
                    self.check_timeout,
                ))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(ProxyError::new(ErrorKind::ValidationFailed, "check panicked")
                        .with_target(proxy.host.clone(), proxy.port)
                        .with_retryable(false))
                });

                let result = ValidationResult::from_outcome(index, proxy, outcome);
                tracker.record(&result);
                slots[index] = Some(result);
            }
        }

        report.results = slots.into_iter().flatten().collect();
        info!(
            checked = report.results.len(),
            passed = tracker.passed,
            terminated_early = report.terminated_early,
            "validation batch complete"
        );
        report
    }

    fn spawn_check(&self, set: &mut JoinSet<ValidationResult>, index: usize, proxy: Proxy) {
        let checker = self.checker.clone();
        let test_url = self.test_url.clone();
        let limit = self.check_timeout;
        set.spawn(async move {
            let outcome = run_check(checker.as_ref(), &proxy, &test_url, limit).await;
            ValidationResult::from_outcome(index, proxy, outcome)
        });
    }

    fn enough_passed(&self, passed: usize) -> bool {
        self.stop_after.is_some_and(|n| passed >= n)
    }
}

struct Progress<'a> {
    completed: usize,
    passed: usize,
    total: usize,
    on_progress: Option<ProgressFn<'a>>,
}

impl Progress<'_> {
    fn record(&mut self, result: &ValidationResult) {
        self.completed += 1;
        if result.success {
            self.passed += 1;
        } else {
            debug!(
                proxy = %result.proxy.key(),
                error = result.error_message.as_deref().unwrap_or_default(),
                "proxy failed validation"
            );
        }
        if let Some(callback) = self.on_progress {
            callback(self.completed, self.total);
        }
    }
}

async fn run_check(
    checker: &dyn ProxyChecker,
    proxy: &Proxy,
    test_url: &str,
    limit: Duration,
) -> Result<Duration, ProxyError> {
    match timeout(limit, checker.check(proxy, test_url, limit)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProxyError::timeout(format!(
            "validation timed out after {}ms",
            limit.as_millis()
        ))
        .with_target(proxy.host.clone(), proxy.port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct DelayChecker {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl DelayChecker {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProxyChecker for DelayChecker {
        async fn check(&self, proxy: &Proxy, _url: &str, _t: Duration) -> Result<Duration, ProxyError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if proxy.port % 2 == 0 {
                Ok(self.delay)
            } else {
                Err(ProxyError::connection("refused"))
            }
        }
    }

    struct PanicOnceChecker {
        panicked: AtomicBool,
    }

    #[async_trait]
    impl ProxyChecker for PanicOnceChecker {
        async fn check(&self, proxy: &Proxy, _url: &str, _t: Duration) -> Result<Duration, ProxyError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if proxy.port == 3 && !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("checker bug");
            }
            Ok(Duration::from_millis(5))
        }
    }

    /// Port `fast_port` answers after `fast`, every other port after `slow`
    struct ScriptedChecker {
        fast_port: u16,
        fast: Duration,
        slow: Duration,
        panic_port: Option<u16>,
        panicked: AtomicBool,
        calls: Mutex<Vec<u16>>,
        finished: AtomicUsize,
    }

    impl ScriptedChecker {
        fn new(fast: Duration, slow: Duration, panic_port: Option<u16>) -> Self {
            Self {
                fast_port: 0,
                fast,
                slow,
                panic_port,
                panicked: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
                finished: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProxyChecker for ScriptedChecker {
        async fn check(&self, proxy: &Proxy, _url: &str, _t: Duration) -> Result<Duration, ProxyError> {
            self.calls.lock().push(proxy.port);
            let delay = if proxy.port == self.fast_port {
                self.fast
            } else {
                self.slow
            };
            tokio::time::sleep(delay).await;
            if self.panic_port == Some(proxy.port) && !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("checker bug");
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(delay)
        }
    }

    fn proxies(n: u16) -> Vec<Proxy> {
        (0..n)
            .map(|port| Proxy::new("127.0.0.1", port, ProxyProtocol::Http))
            .collect()
    }

    #[tokio::test]
    async fn test_bounded_concurrency_and_progress() {
        let checker = Arc::new(DelayChecker::new(Duration::from_millis(20)));
        let validator =
            ParallelValidator::new(checker.clone(), 3, Duration::from_secs(5), "http://test");
        let seen = Mutex::new(Vec::new());
        let progress = |completed: usize, total: usize| {
            assert_eq!(total, 10);
            seen.lock().push(completed);
        };

        let report = validator.validate(proxies(10), Some(&progress)).await;

        assert!(checker.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(*seen.lock(), (1..=10).collect::<Vec<_>>());
        assert_eq!(report.results.len(), 10);
        assert!(report
            .results
            .iter()
            .enumerate()
            .all(|(i, r)| r.index == i && r.proxy.port == i as u16));
        assert_eq!(report.passed_count(), 5);
        assert_eq!(report.failed_count(), 5);
        assert!(!report.terminated_early);
    }

    #[tokio::test]
    async fn test_failures_are_captured() {
        let checker = Arc::new(DelayChecker::new(Duration::from_millis(1)));
        let validator = ParallelValidator::new(checker, 2, Duration::from_secs(5), "http://test");

        let report = validator.validate(proxies(4), None).await;

        let failed: Vec<_> = report.results.iter().filter(|r| !r.success).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed
            .iter()
            .all(|r| r.error_kind == Some(ErrorKind::Connection) && r.response_time.is_none()));
    }

    #[tokio::test]
    async fn test_timed_out_check_is_failure() {
        let checker = Arc::new(DelayChecker::new(Duration::from_secs(10)));
        let validator =
            ParallelValidator::new(checker, 4, Duration::from_millis(50), "http://test");

        let report = validator.validate(proxies(4), None).await;

        assert_eq!(report.results.len(), 4);
        assert!(report
            .results
            .iter()
            .all(|r| !r.success && r.error_kind == Some(ErrorKind::ConnectionTimeout)));
    }

    #[tokio::test]
    async fn test_stops_once_enough_passed() {
        let checker = Arc::new(DelayChecker::new(Duration::from_millis(1)));
        let validator = ParallelValidator::new(checker, 1, Duration::from_secs(5), "http://test")
            .with_stop_after(Some(2));

        let report = validator.validate(proxies(10), None).await;

        assert!(report.terminated_early);
        assert_eq!(report.passed_count(), 2);
        assert!(report.results.len() < 10);
    }

    #[tokio::test]
    async fn test_worker_panic_falls_back_to_sequential() {
        let checker = Arc::new(PanicOnceChecker {
            panicked: AtomicBool::new(false),
        });
        let validator = ParallelValidator::new(checker, 2, Duration::from_secs(5), "http://test");
        let calls = AtomicUsize::new(0);
        let progress = |_: usize, _: usize| {
            calls.fetch_add(1, Ordering::SeqCst);
        };

        let report = validator.validate(proxies(6), Some(&progress)).await;

        assert!(report.fell_back_to_sequential);
        assert_eq!(report.results.len(), 6);
        assert!(report.results.iter().all(|r| r.success));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_early_stop_cancels_in_flight_checks() {
        let checker = Arc::new(ScriptedChecker::new(
            Duration::from_millis(5),
            Duration::from_millis(200),
            None,
        ));
        let validator =
            ParallelValidator::new(checker.clone(), 3, Duration::from_secs(5), "http://test")
                .with_stop_after(Some(1));

        let report = validator.validate(proxies(6), None).await;

        assert!(report.terminated_early);
        assert_eq!(report.results.len(), 1);
        assert_eq!(checker.calls.lock().len(), 3);
        let finished = checker.finished.load(Ordering::SeqCst);
        assert_eq!(finished, 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(checker.finished.load(Ordering::SeqCst), finished);
    }

    #[tokio::test]
    async fn test_fallback_keeps_started_checks() {
        let checker = Arc::new(ScriptedChecker::new(
            Duration::from_millis(5),
            Duration::from_millis(50),
            Some(0),
        ));
        let validator =
            ParallelValidator::new(checker.clone(), 3, Duration::from_secs(5), "http://test");

        let report = validator.validate(proxies(3), None).await;

        assert!(report.fell_back_to_sequential);
        assert_eq!(report.results.len(), 3);
        assert!(report.results.iter().all(|r| r.success));

        let calls = checker.calls.lock().clone();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.last(), Some(&0));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let checker = Arc::new(DelayChecker::new(Duration::from_millis(1)));
        let validator = ParallelValidator::new(checker, 3, Duration::from_secs(1), "http://test");

        let report = validator.validate(Vec::new(), None).await;
        assert!(report.results.is_empty());
    }
}
