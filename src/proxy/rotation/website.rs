//! Per-domain proxy selection strategy

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{weighted_index, ProxySelector, SelectionContext};
use crate::error::{Error, Result};
use crate::models::Proxy;

/// Samples a (domain, proxy) pair needs before its own success rate counts
const MIN_DOMAIN_SAMPLES: u32 = 3;

type DirectLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Hints about how a target domain treats proxies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainFingerprint {
    /// Proxies located here are never used for the domain
    #[serde(default)]
    pub blocked_countries: Vec<String>,
    /// Proxies located here win whenever at least one is a candidate
    #[serde(default)]
    pub preferred_countries: Vec<String>,
    /// Per-proxy request budget for the domain
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
}

impl DomainFingerprint {
    fn country_in(list: &[String], proxy: &Proxy) -> bool {
        proxy
            .country
            .as_deref()
            .is_some_and(|c| list.iter().any(|l| l.eq_ignore_ascii_case(c)))
    }

    pub fn allows(&self, proxy: &Proxy) -> bool {
        !Self::country_in(&self.blocked_countries, proxy)
    }

    pub fn prefers(&self, proxy: &Proxy) -> bool {
        Self::country_in(&self.preferred_countries, proxy)
    }
}

/// Reduce a URL or host to the domain key used for per-domain state
///
/// Lowercases and strips scheme, port, path and a leading `www.`.
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();
    let host = if trimmed.contains("://") {
        url::Url::parse(trimmed)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| trimmed.to_string())
    } else {
        let authority = trimmed.split(['/', '?', '#']).next().unwrap_or(trimmed);
        authority
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| authority.to_string())
    };

    let host = host.to_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

#[derive(Debug, Default, Clone, Copy)]
struct DomainStats {
    successes: u32,
    failures: u32,
}

impl DomainStats {
    fn samples(&self) -> u32 {
        self.successes + self.failures
    }

    fn success_rate(&self) -> f64 {
        if self.samples() == 0 {
            0.0
        } else {
            self.successes as f64 / self.samples() as f64
        }
    }
}

#[derive(Default)]
struct WebsiteState {
    stats: HashMap<String, HashMap<String, DomainStats>>,
    fingerprints: HashMap<String, DomainFingerprint>,
    limiters: HashMap<(String, String), DirectLimiter>,
}

impl WebsiteState {
    fn stats_for(&self, domain: &str, proxy: &Proxy) -> Option<DomainStats> {
        self.stats
            .get(domain)
            .and_then(|per_proxy| per_proxy.get(&proxy.key()))
            .copied()
    }
}

/// Learns which proxies work for which target domain
///
/// Once a (domain, proxy) pair has enough samples, proxies under the success
/// threshold for that domain are skipped and the rest are weighted by their
/// domain success rate. Pairs without enough samples are weighted by overall
/// composite score.
pub struct WebsiteSelector {
    success_threshold: f64,
    floor_weight: f64,
    state: Mutex<WebsiteState>,
}

impl WebsiteSelector {
    pub fn new(success_threshold: f64, floor_weight: f64) -> Self {
        Self {
            success_threshold,
            floor_weight: floor_weight.max(0.0),
            state: Mutex::new(WebsiteState::default()),
        }
    }

    pub fn set_fingerprint(&self, domain: &str, fingerprint: DomainFingerprint) {
        let domain = normalize_domain(domain);
        let mut state = self.state.lock();
        // Budgets change with the fingerprint
        state.limiters.retain(|(d, _), _| *d != domain);
        state.fingerprints.insert(domain, fingerprint);
    }

    pub fn fingerprint(&self, domain: &str) -> Option<DomainFingerprint> {
        self.state.lock().fingerprints.get(&normalize_domain(domain)).cloned()
    }

    /// Success rate of `proxy` against `domain`, with its sample count
    pub fn domain_success_rate(&self, domain: &str, proxy: &Proxy) -> Option<(f64, u32)> {
        self.state
            .lock()
            .stats_for(&normalize_domain(domain), proxy)
            .map(|s| (s.success_rate(), s.samples()))
    }

    fn overall_weight(&self, proxy: &Proxy, ctx: &SelectionContext<'_>) -> f64 {
        ctx.composite(proxy).unwrap_or(self.floor_weight)
    }

    fn record(&self, proxy: &Proxy, ctx: &SelectionContext<'_>, success: bool) {
        let Some(domain) = ctx.domain.map(normalize_domain) else {
            return;
        };
        let mut state = self.state.lock();
        let stats = state
            .stats
            .entry(domain)
            .or_default()
            .entry(proxy.key())
            .or_default();
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
    }
}

impl ProxySelector for WebsiteSelector {
    fn select(&self, candidates: &[Proxy], ctx: &SelectionContext<'_>) -> Result<Proxy> {
        if candidates.is_empty() {
            return Err(Error::NoProxiesAvailable);
        }

        let Some(domain) = ctx.domain.map(normalize_domain) else {
            let weights: Vec<f64> = candidates.iter().map(|p| self.overall_weight(p, ctx)).collect();
            let idx = weighted_index(&mut rand::thread_rng(), &weights).ok_or(Error::NoProxiesAvailable)?;
            return Ok(candidates[idx].clone());
        };

        let mut state = self.state.lock();
        let fingerprint = state.fingerprints.get(&domain).cloned();

        let mut pool: Vec<&Proxy> = candidates
            .iter()
            .filter(|p| fingerprint.as_ref().map_or(true, |f| f.allows(p)))
            .collect();
        if pool.is_empty() {
            debug!(domain = %domain, "fingerprint filtered out every candidate");
            return Err(Error::NoProxiesAvailable);
        }

        if let Some(fp) = &fingerprint {
            let preferred: Vec<&Proxy> = pool.iter().copied().filter(|p| fp.prefers(p)).collect();
            if !preferred.is_empty() {
                pool = preferred;
            }
        }

        let qualified: Vec<&Proxy> = pool
            .iter()
            .copied()
            .filter(|p| {
                state.stats_for(&domain, p).map_or(true, |s| {
                    s.samples() < MIN_DOMAIN_SAMPLES || s.success_rate() >= self.success_threshold
                })
            })
            .collect();
        if qualified.is_empty() {
            debug!(domain = %domain, "no candidate meets the domain threshold, using unfiltered set");
        } else {
            pool = qualified;
        }

        let mut weights: Vec<f64> = pool
            .iter()
            .map(|p| match state.stats_for(&domain, p) {
                Some(s) if s.samples() >= MIN_DOMAIN_SAMPLES => s.success_rate(),
                _ => self.overall_weight(p, ctx),
            })
            .collect();

        let budget = fingerprint
            .as_ref()
            .and_then(|f| f.requests_per_minute)
            .and_then(NonZeroU32::new);

        let mut rng = rand::thread_rng();
        while let Some(idx) = weighted_index(&mut rng, &weights) {
            let chosen = pool[idx];
            let Some(per_minute) = budget else {
                return Ok(chosen.clone());
            };

            let limiter = state
                .limiters
                .entry((domain.clone(), chosen.key()))
                .or_insert_with(|| GovRateLimiter::direct(Quota::per_minute(per_minute)));
            if limiter.check().is_ok() {
                return Ok(chosen.clone());
            }

            debug!(domain = %domain, proxy = %chosen.key(), "domain request budget spent");
            pool.remove(idx);
            weights.remove(idx);
        }

        Err(Error::NoProxiesAvailable)
    }

    fn record_success(&self, proxy: &Proxy, ctx: &SelectionContext<'_>) {
        self.record(proxy, ctx, true);
    }

    fn record_failure(&self, proxy: &Proxy, ctx: &SelectionContext<'_>) {
        self.record(proxy, ctx, false);
    }

    fn update_proxies(&self, proxies: &[Proxy]) {
        let keys: HashSet<String> = proxies.iter().map(Proxy::key).collect();
        let mut state = self.state.lock();
        for per_proxy in state.stats.values_mut() {
            per_proxy.retain(|key, _| keys.contains(key));
        }
        state.stats.retain(|_, per_proxy| !per_proxy.is_empty());
        state.limiters.retain(|(_, key), _| keys.contains(key));
    }

    fn strategy_name(&self) -> &'static str {
        "website_specific"
    }

    fn apply_fingerprint(&self, domain: &str, fingerprint: &DomainFingerprint) -> bool {
        self.set_fingerprint(domain, fingerprint.clone());
        true
    }
}
