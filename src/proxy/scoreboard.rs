//! Concurrent score table keyed by proxy identity

use std::collections::HashSet;

use chrono::Utc;
use dashmap::DashMap;

use crate::models::ProxyScore;

/// Latest [`ProxyScore`] per `host:port`
///
/// Updates go through the map entry, so two outcomes reported for the same
/// proxy at the same time are both applied.
#[derive(Debug, Default)]
pub struct ScoreBoard {
    scores: DashMap<String, ProxyScore>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score for `key` with its age brought up to now
    pub fn get(&self, key: &str) -> Option<ProxyScore> {
        self.scores.get(key).map(|s| s.aged_at(Utc::now()))
    }

    /// Ensure a neutral score exists for `key`, starting its age clock
    pub fn ensure(&self, key: &str) {
        self.scores
            .entry(key.to_string())
            .or_insert_with(|| ProxyScore::first_seen_at(Utc::now()));
    }

    pub fn record_success(&self, key: &str, response_time_ms: f64) -> ProxyScore {
        let mut entry = self
            .scores
            .entry(key.to_string())
            .or_insert_with(|| ProxyScore::first_seen_at(Utc::now()));
        let next = entry.record_success(response_time_ms);
        *entry = next.clone();
        next
    }

    pub fn record_failure(&self, key: &str) -> ProxyScore {
        let mut entry = self
            .scores
            .entry(key.to_string())
            .or_insert_with(|| ProxyScore::first_seen_at(Utc::now()));
        let next = entry.record_failure();
        *entry = next.clone();
        next
    }

    /// Drop scores for proxies that left the pool
    pub fn retain_keys(&self, keys: &HashSet<String>) {
        self.scores.retain(|key, _| keys.contains(key));
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_get() {
        let board = ScoreBoard::new();
        assert!(board.get("a:1").is_none());

        board.record_success("a:1", 120.0);
        board.record_failure("a:1");

        let score = board.get("a:1").unwrap();
        assert_eq!(score.successful_requests, 1);
        assert_eq!(score.failed_requests, 1);
        assert!((score.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_retain_keys_drops_evicted() {
        let board = ScoreBoard::new();
        board.ensure("a:1");
        board.ensure("b:2");
        board.record_success("c:3", 10.0);

        let keep: HashSet<String> = ["a:1".to_string(), "c:3".to_string()].into();
        board.retain_keys(&keep);

        assert_eq!(board.len(), 2);
        assert!(board.get("b:2").is_none());
        assert_eq!(board.get("c:3").unwrap().successful_requests, 1);
    }

    #[test]
    fn test_ensure_starts_age_clock() {
        let board = ScoreBoard::new();
        board.ensure("a:1");
        let first_seen = board.get("a:1").unwrap().first_seen;
        assert!(first_seen.is_some());

        board.record_success("a:1", 20.0);
        let score = board.get("a:1").unwrap();
        assert_eq!(score.first_seen, first_seen);
        assert!(score.age_hours >= 0.0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let board = Arc::new(ScoreBoard::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let board = board.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        if i % 2 == 0 {
                            board.record_success("shared:1", 50.0);
                        } else {
                            board.record_failure("shared:1");
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let score = board.get("shared:1").unwrap();
        assert_eq!(score.successful_requests, 1000);
        assert_eq!(score.failed_requests, 1000);
    }
}
