//! Cache entries and eviction victim selection.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Rule used to pick an entry for removal when the cache is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed.
    #[default]
    Lru,
    /// Fewest hits, then least recently accessed.
    Lfu,
    /// Oldest insertion.
    Fifo,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Fifo => "fifo",
        })
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            other => Err(format!("unknown eviction policy '{other}' (expected lru, lfu or fifo)")),
        }
    }
}

/// A cached value plus its bookkeeping.
///
/// Access order uses a logical clock rather than wall time so that two
/// touches within the same instant still order deterministically.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub(crate) value: V,
    pub(crate) size_bytes: usize,
    pub(crate) expires_at: Instant,
    pub(crate) last_accessed: u64,
    pub(crate) inserted: u64,
    pub(crate) hit_count: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn touch(&mut self, tick: u64) {
        self.last_accessed = tick;
        self.hit_count += 1;
    }
}

/// Key of the entry `policy` would evict next.
pub(crate) fn select_victim<V>(
    entries: &HashMap<String, CacheEntry<V>>,
    policy: EvictionPolicy,
) -> Option<String> {
    let victim = match policy {
        EvictionPolicy::Lru => entries.iter().min_by_key(|(_, e)| e.last_accessed),
        EvictionPolicy::Lfu => entries
            .iter()
            .min_by_key(|(_, e)| (e.hit_count, e.last_accessed)),
        EvictionPolicy::Fifo => entries.iter().min_by_key(|(_, e)| e.inserted),
    };
    victim.map(|(key, _)| key.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn entry(last_accessed: u64, inserted: u64, hit_count: u64) -> CacheEntry<u32> {
        CacheEntry {
            value: 0,
            size_bytes: 1,
            expires_at: Instant::now() + Duration::from_secs(60),
            last_accessed,
            inserted,
            hit_count,
        }
    }

    fn sample() -> HashMap<String, CacheEntry<u32>> {
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), entry(5, 1, 3));
        entries.insert("b".to_string(), entry(2, 2, 0));
        entries.insert("c".to_string(), entry(9, 3, 0));
        entries
    }

    #[test]
    fn test_select_victim_lru() {
        assert_eq!(
            select_victim(&sample(), EvictionPolicy::Lru).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_select_victim_lfu_breaks_ties_by_recency() {
        assert_eq!(
            select_victim(&sample(), EvictionPolicy::Lfu).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_select_victim_fifo() {
        assert_eq!(
            select_victim(&sample(), EvictionPolicy::Fifo).as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_select_victim_empty() {
        let entries: HashMap<String, CacheEntry<u32>> = HashMap::new();
        assert!(select_victim(&entries, EvictionPolicy::Lru).is_none());
    }

    #[test]
    fn test_eviction_policy_parse_and_display() {
        assert_eq!("LFU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lfu);
        assert_eq!(EvictionPolicy::Fifo.to_string(), "fifo");
        assert!("random".parse::<EvictionPolicy>().is_err());
    }
}
