use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{HealthThresholds, ProxyProtocol};
use crate::proxy::retry::RetryPolicy;
use crate::proxy::rotation::RotationStrategy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sources: SourceConfig,
    pub validation: ValidationConfig,
    pub retry: RetryConfig,
    pub rotation: RotationConfig,
    pub health: HealthConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Source locations handed to the fetcher, in order
    pub urls: Vec<String>,
    /// Protocol assumed for list entries without a scheme
    pub default_protocol: ProxyProtocol,
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// URL every candidate is checked against
    pub test_url: String,
    /// Maximum checks in flight at once
    pub concurrency: usize,
    /// Per-check timeout
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub jitter: bool,
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub strategy: RotationStrategy,
    pub adaptive: AdaptiveConfig,
    /// Weight given to proxies that have no score yet
    pub floor_weight: f64,
    /// Per-domain success rate below which a proxy is skipped for that domain
    pub domain_success_threshold: f64,
    /// Sample by inverse latency inside a country group instead of cycling
    pub latency_weighted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    pub exploration_rate: f64,
    pub learning_rate: f64,
    pub decay_factor: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    pub thresholds: HealthThresholds,
    /// Size of the top and bottom rankings
    pub rank_size: usize,
    /// Number of snapshots kept in memory
    pub history_size: usize,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// JSON cache file; in-memory cache when unset
    pub path: Option<PathBuf>,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            default_protocol: ProxyProtocol::Http,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            test_url: "http://www.google.com".to_string(),
            concurrency: 5,
            timeout: Duration::from_millis(5000),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(5000),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential_backoff(
            self.max_retries,
            self.initial_backoff,
            self.backoff_multiplier,
            self.max_backoff,
        )
        .with_jitter(self.jitter)
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::Adaptive,
            adaptive: AdaptiveConfig::default(),
            floor_weight: 0.1,
            domain_success_threshold: 0.5,
            latency_weighted: false,
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            exploration_rate: 0.2,
            learning_rate: 0.1,
            decay_factor: 0.95,
            min_weight: 0.1,
            max_weight: 10.0,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            thresholds: HealthThresholds::default(),
            rank_size: 5,
            history_size: 100,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_age: Duration::from_secs(3600),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let default_protocol = get_env_or("PROXY_POOL_DEFAULT_PROTOCOL", "http");
        let strategy = get_env_or("PROXY_POOL_STRATEGY", "adaptive");

        let config = Config {
            sources: SourceConfig {
                urls: get_env_or("PROXY_POOL_SOURCES", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                default_protocol: ProxyProtocol::from_str(&default_protocol).ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "PROXY_POOL_DEFAULT_PROTOCOL has unsupported value: {}",
                        default_protocol
                    ))
                })?,
            },
            validation: ValidationConfig {
                test_url: get_env_or("PROXY_POOL_TEST_URL", "http://www.google.com"),
                concurrency: parse_env("PROXY_POOL_CONCURRENCY", 5)?,
                timeout: Duration::from_millis(parse_env("PROXY_POOL_CHECK_TIMEOUT_MS", 5000)?),
            },
            retry: RetryConfig {
                max_retries: parse_env("PROXY_POOL_MAX_RETRIES", 3)?,
                initial_backoff: Duration::from_millis(parse_env(
                    "PROXY_POOL_INITIAL_BACKOFF_MS",
                    500,
                )?),
                backoff_multiplier: parse_env("PROXY_POOL_BACKOFF_MULTIPLIER", 2.0)?,
                max_backoff: Duration::from_millis(parse_env("PROXY_POOL_MAX_BACKOFF_MS", 5000)?),
                jitter: parse_env("PROXY_POOL_RETRY_JITTER", true)?,
            },
            rotation: RotationConfig {
                strategy: RotationStrategy::parse(&strategy).ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "PROXY_POOL_STRATEGY has unsupported value: {}",
                        strategy
                    ))
                })?,
                adaptive: AdaptiveConfig {
                    exploration_rate: parse_env("PROXY_POOL_EXPLORATION_RATE", 0.2)?,
                    learning_rate: parse_env("PROXY_POOL_LEARNING_RATE", 0.1)?,
                    decay_factor: parse_env("PROXY_POOL_DECAY_FACTOR", 0.95)?,
                    min_weight: parse_env("PROXY_POOL_MIN_WEIGHT", 0.1)?,
                    max_weight: parse_env("PROXY_POOL_MAX_WEIGHT", 10.0)?,
                },
                floor_weight: parse_env("PROXY_POOL_FLOOR_WEIGHT", 0.1)?,
                domain_success_threshold: parse_env("PROXY_POOL_DOMAIN_SUCCESS_THRESHOLD", 0.5)?,
                latency_weighted: parse_env("PROXY_POOL_LATENCY_WEIGHTED", false)?,
            },
            health: HealthConfig {
                interval: Duration::from_secs(parse_env("PROXY_POOL_HEALTH_INTERVAL_SECS", 60)?),
                thresholds: HealthThresholds {
                    min_success_rate: parse_env("PROXY_POOL_HEALTHY_SUCCESS_RATE", 0.7)?,
                    max_response_time_ms: parse_env("PROXY_POOL_HEALTHY_RESPONSE_MS", 2000.0)?,
                    min_uptime: parse_env("PROXY_POOL_HEALTHY_UPTIME", 0.8)?,
                },
                rank_size: parse_env("PROXY_POOL_HEALTH_RANK_SIZE", 5)?,
                history_size: parse_env("PROXY_POOL_HEALTH_HISTORY", 100)?,
            },
            cache: CacheConfig {
                path: env::var("PROXY_POOL_CACHE_PATH")
                    .ok()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
                max_age: Duration::from_secs(parse_env("PROXY_POOL_CACHE_MAX_AGE_SECS", 3600)?),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that the types alone cannot express
    pub fn validate(&self) -> Result<()> {
        if self.validation.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_CONCURRENCY must be at least 1".into(),
            ));
        }
        if self.validation.timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_CHECK_TIMEOUT_MS must be positive".into(),
            ));
        }
        url::Url::parse(&self.validation.test_url).map_err(|e| {
            Error::InvalidConfig(format!("PROXY_POOL_TEST_URL must be a valid URL: {}", e))
        })?;

        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_BACKOFF_MULTIPLIER must be at least 1.0".into(),
            ));
        }

        let adaptive = &self.rotation.adaptive;
        if !(0.0..=1.0).contains(&adaptive.exploration_rate) {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_EXPLORATION_RATE must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&adaptive.learning_rate) {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_LEARNING_RATE must be within [0, 1]".into(),
            ));
        }
        if adaptive.decay_factor <= 0.0 || adaptive.decay_factor > 1.0 {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_DECAY_FACTOR must be within (0, 1]".into(),
            ));
        }
        if adaptive.min_weight <= 0.0 || adaptive.min_weight > adaptive.max_weight {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_MIN_WEIGHT must be positive and not exceed PROXY_POOL_MAX_WEIGHT"
                    .into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rotation.domain_success_threshold) {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_DOMAIN_SUCCESS_THRESHOLD must be within [0, 1]".into(),
            ));
        }
        if self.rotation.floor_weight < 0.0 {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_FLOOR_WEIGHT must not be negative".into(),
            ));
        }

        if self.health.interval.is_zero() {
            return Err(Error::InvalidConfig(
                "PROXY_POOL_HEALTH_INTERVAL_SECS must be positive".into(),
            ));
        }

        Ok(())
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "PROXY_POOL_SOURCES",
        "PROXY_POOL_DEFAULT_PROTOCOL",
        "PROXY_POOL_TEST_URL",
        "PROXY_POOL_CONCURRENCY",
        "PROXY_POOL_CHECK_TIMEOUT_MS",
        "PROXY_POOL_MAX_RETRIES",
        "PROXY_POOL_INITIAL_BACKOFF_MS",
        "PROXY_POOL_BACKOFF_MULTIPLIER",
        "PROXY_POOL_MAX_BACKOFF_MS",
        "PROXY_POOL_RETRY_JITTER",
        "PROXY_POOL_STRATEGY",
        "PROXY_POOL_EXPLORATION_RATE",
        "PROXY_POOL_LEARNING_RATE",
        "PROXY_POOL_DECAY_FACTOR",
        "PROXY_POOL_MIN_WEIGHT",
        "PROXY_POOL_MAX_WEIGHT",
        "PROXY_POOL_FLOOR_WEIGHT",
        "PROXY_POOL_DOMAIN_SUCCESS_THRESHOLD",
        "PROXY_POOL_LATENCY_WEIGHTED",
        "PROXY_POOL_HEALTH_INTERVAL_SECS",
        "PROXY_POOL_HEALTHY_SUCCESS_RATE",
        "PROXY_POOL_HEALTHY_RESPONSE_MS",
        "PROXY_POOL_HEALTHY_UPTIME",
        "PROXY_POOL_HEALTH_RANK_SIZE",
        "PROXY_POOL_HEALTH_HISTORY",
        "PROXY_POOL_CACHE_PATH",
        "PROXY_POOL_CACHE_MAX_AGE_SECS",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert!(config.sources.urls.is_empty());
        assert_eq!(config.sources.default_protocol, ProxyProtocol::Http);
        assert_eq!(config.validation.concurrency, 5);
        assert_eq!(config.validation.timeout, Duration::from_millis(5000));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(500));
        assert_eq!(config.rotation.strategy, RotationStrategy::Adaptive);
        assert_eq!(config.rotation.adaptive, AdaptiveConfig::default());
        assert_eq!(config.health.thresholds, HealthThresholds::default());
        assert_eq!(config.health.rank_size, 5);
        assert!(config.cache.path.is_none());
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PROXY_POOL_SOURCES", "lists/http.txt, file:///tmp/socks.txt");
        env::set_var("PROXY_POOL_DEFAULT_PROTOCOL", "socks5");
        env::set_var("PROXY_POOL_CONCURRENCY", "12");
        env::set_var("PROXY_POOL_STRATEGY", "round-robin");
        env::set_var("PROXY_POOL_EXPLORATION_RATE", "0.05");
        env::set_var("PROXY_POOL_RETRY_JITTER", "false");
        env::set_var("PROXY_POOL_CACHE_PATH", "/tmp/proxy-cache.json");

        let config = Config::from_env().unwrap();

        assert_eq!(
            config.sources.urls,
            vec![
                "lists/http.txt".to_string(),
                "file:///tmp/socks.txt".to_string()
            ]
        );
        assert_eq!(config.sources.default_protocol, ProxyProtocol::Socks5);
        assert_eq!(config.validation.concurrency, 12);
        assert_eq!(config.rotation.strategy, RotationStrategy::RoundRobin);
        assert!((config.rotation.adaptive.exploration_rate - 0.05).abs() < 1e-12);
        assert!(!config.retry.jitter);
        assert_eq!(
            config.cache.path,
            Some(PathBuf::from("/tmp/proxy-cache.json"))
        );
    }

    #[test]
    fn test_config_from_env_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PROXY_POOL_CONCURRENCY", "many");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_unknown_strategy() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PROXY_POOL_STRATEGY", "least_connections");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.validation.concurrency = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.rotation.adaptive.exploration_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rotation.adaptive.min_weight = 20.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.validation.test_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_config_policy() {
        let policy = RetryConfig {
            jitter: false,
            ..Default::default()
        }
        .policy();

        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
    }
}
