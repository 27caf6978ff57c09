//! Country-balanced proxy selection strategy

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{weighted_index, ProxySelector, SelectionContext};
use crate::error::{Error, Result};
use crate::models::Proxy;

const UNKNOWN_COUNTRY: &str = "??";

/// Spreads traffic evenly across countries
///
/// Candidates are grouped by country in order of first appearance. Each call
/// advances to the next country; inside a country the pick is round-robin or,
/// with latency weighting, proportional to inverse average response time.
pub struct GeographicSelector {
    latency_weighted: bool,
    state: Mutex<GeoState>,
}

#[derive(Default)]
struct GeoState {
    country_cursor: usize,
    member_cursors: HashMap<String, usize>,
}

fn country_of(proxy: &Proxy) -> String {
    proxy
        .country
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
}

impl GeographicSelector {
    pub fn new(latency_weighted: bool) -> Self {
        Self {
            latency_weighted,
            state: Mutex::new(GeoState::default()),
        }
    }

    fn pick_by_latency(members: &[&Proxy], ctx: &SelectionContext<'_>) -> usize {
        let inverse: Vec<Option<f64>> = members
            .iter()
            .map(|p| {
                ctx.observed_score(p)
                    .filter(|s| s.successful_requests > 0)
                    .map(|s| 1.0 / s.average_response_time.max(1.0))
            })
            .collect();

        let known: Vec<f64> = inverse.iter().flatten().copied().collect();
        // No latency data at all: uniform
        let fill = if known.is_empty() {
            1.0
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };
        let weights: Vec<f64> = inverse.into_iter().map(|w| w.unwrap_or(fill)).collect();

        weighted_index(&mut rand::thread_rng(), &weights).unwrap_or(0)
    }
}

impl ProxySelector for GeographicSelector {
    fn select(&self, candidates: &[Proxy], ctx: &SelectionContext<'_>) -> Result<Proxy> {
        if candidates.is_empty() {
            return Err(Error::NoProxiesAvailable);
        }

        let mut groups: Vec<(String, Vec<&Proxy>)> = Vec::new();
        for proxy in candidates {
            let country = country_of(proxy);
            match groups.iter_mut().find(|(c, _)| *c == country) {
                Some((_, members)) => members.push(proxy),
                None => groups.push((country, vec![proxy])),
            }
        }

        let mut state = self.state.lock();
        let (country, members) = &groups[state.country_cursor % groups.len()];
        state.country_cursor = state.country_cursor.wrapping_add(1);

        let idx = if self.latency_weighted {
            Self::pick_by_latency(members, ctx)
        } else {
            let cursor = state.member_cursors.entry(country.clone()).or_insert(0);
            let idx = *cursor % members.len();
            *cursor = cursor.wrapping_add(1);
            idx
        };

        Ok(members[idx].clone())
    }

    fn record_success(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn record_failure(&self, _proxy: &Proxy, _ctx: &SelectionContext<'_>) {}

    fn update_proxies(&self, _proxies: &[Proxy]) {
        let mut state = self.state.lock();
        state.country_cursor = 0;
        state.member_cursors.clear();
    }

    fn strategy_name(&self) -> &'static str {
        "geographic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::test_support::create_test_proxy;
    use crate::proxy::scoreboard::ScoreBoard;

    #[test]
    fn test_geographic_empty() {
        let selector = GeographicSelector::new(false);
        let result = selector.select(&[], &SelectionContext::new());
        assert!(matches!(result, Err(Error::NoProxiesAvailable)));
    }

    #[test]
    fn test_alternates_countries() {
        let us1 = create_test_proxy(1, Some("US"));
        let us2 = create_test_proxy(2, Some("us"));
        let de1 = create_test_proxy(3, Some("DE"));
        let proxies = vec![us1.clone(), us2.clone(), de1.clone()];
        let selector = GeographicSelector::new(false);
        let ctx = SelectionContext::new();

        let picked: Vec<String> = (0..5)
            .map(|_| selector.select(&proxies, &ctx).unwrap().key())
            .collect();
        assert_eq!(
            picked,
            vec![us1.key(), de1.key(), us2.key(), de1.key(), us1.key()]
        );
    }

    #[test]
    fn test_missing_country_forms_own_group() {
        let us = create_test_proxy(1, Some("US"));
        let unknown = create_test_proxy(2, None);
        let proxies = vec![us.clone(), unknown.clone()];
        let selector = GeographicSelector::new(false);
        let ctx = SelectionContext::new();

        assert_eq!(selector.select(&proxies, &ctx).unwrap().key(), us.key());
        assert_eq!(selector.select(&proxies, &ctx).unwrap().key(), unknown.key());
    }

    #[test]
    fn test_latency_weighting_prefers_fast_proxy() {
        let fast = create_test_proxy(1, Some("US"));
        let slow = create_test_proxy(2, Some("US"));
        let proxies = vec![fast.clone(), slow.clone()];
        let board = ScoreBoard::new();
        board.record_success(&fast.key(), 10.0);
        board.record_success(&slow.key(), 1000.0);

        let selector = GeographicSelector::new(true);
        let ctx = SelectionContext::new().with_scores(&board);

        let fast_picks = (0..1000)
            .filter(|_| selector.select(&proxies, &ctx).unwrap().key() == fast.key())
            .count();
        assert!(fast_picks > 900);
    }
}
