//! Tier 3 response cache
//!
//! Keyed by SHA-256 of content, ruleset version, page type and industry.
//! Re-assessing identical input within the TTL reuses the joined Tier 3
//! outcome, so no new provider calls are made and the score is reproducible
//! despite LLM non-determinism. Only fully verified outcomes are stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::tiers::tier3::Tier3Outcome;
use tcv_common::hashing::sha256_parts;

pub fn cache_key(content: &str, ruleset_version: &str, page_type: &str, industry: &str) -> String {
    sha256_parts(&[content, ruleset_version, page_type, industry])
}

pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Arc<Tier3Outcome>)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh outcome for `key`; an expired entry is evicted on the way out
    pub async fn get(&self, key: &str) -> Option<Arc<Tier3Outcome>> {
        {
            let entries = self.entries.read().await;
            let (stored_at, outcome) = entries.get(key)?;
            if stored_at.elapsed() <= self.ttl {
                debug!(key, "Tier 3 cache hit");
                return Some(Arc::clone(outcome));
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|(stored_at, _)| stored_at.elapsed() > self.ttl)
        {
            entries.remove(key);
        }
        None
    }

    /// Store an outcome; partial outcomes are not cached
    ///
    /// Expired entries are swept under the same write lock.
    pub async fn put(&self, key: String, outcome: Arc<Tier3Outcome>) -> bool {
        if !outcome.fully_verified() || outcome.budget_exhausted {
            return false;
        }
        let ttl = self.ttl;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() <= ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Expired Tier 3 cache entries evicted");
        }
        entries.insert(key, (Instant::now(), outcome));
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::tier3::{ClaimFinding, Finding};

    fn outcome(verified: bool) -> Arc<Tier3Outcome> {
        let finding = if verified {
            Finding::Verified {
                verdict: crate::providers::ClaimVerdict {
                    index: 0,
                    supported: true,
                    confidence: 0.9,
                },
                audit_id: uuid::Uuid::new_v4(),
            }
        } else {
            Finding::Unverified {
                reason: "timeout".to_string(),
            }
        };
        Arc::new(Tier3Outcome {
            rules: Vec::new(),
            claims: vec![ClaimFinding {
                text: "Builds are 3x faster.".to_string(),
                outcome: finding,
            }],
            cost: 0.01,
            tokens: 100,
            latency_ms: 5,
            attempts: 1,
            budget_exhausted: false,
        })
    }

    #[test]
    fn test_key_depends_on_every_part() {
        let base = cache_key("text", "v1", "blog", "saas");
        assert_eq!(base, cache_key("text", "v1", "blog", "saas"));
        assert_ne!(base, cache_key("text", "v2", "blog", "saas"));
        assert_ne!(base, cache_key("text", "v1", "landing", "saas"));
        assert_ne!(base, cache_key("text", "v1", "blog", ""));
    }

    #[tokio::test]
    async fn test_only_verified_outcomes_cached() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        assert!(!cache.put("a".to_string(), outcome(false)).await);
        assert!(cache.get("a").await.is_none());

        assert!(cache.put("b".to_string(), outcome(true)).await);
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_evicted_on_read() {
        let cache = ResponseCache::new(Duration::from_millis(10));
        cache.put("k".to_string(), outcome(true)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_put_sweeps_expired_entries() {
        let cache = ResponseCache::new(Duration::from_millis(10));
        for i in 0..100 {
            cache.put(format!("old-{}", i), outcome(true)).await;
        }
        assert_eq!(cache.len().await, 100);
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache.put("fresh".to_string(), outcome(true)).await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("fresh").await.is_some());
    }
}
