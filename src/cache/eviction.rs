// src/cache/eviction.rs
//
// Victim selection. Policies order entries so the front of the list is
// evicted first; `random` shuffles but keeps the newest insertion alive so a
// fresh entry is not evicted by the write that inserted it.

use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::error::MscError;

use super::entry::CacheEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    Fifo,
    Lru,
    Random,
    NoEviction,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = MscError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(EvictionPolicy::Fifo),
            "lru" => Ok(EvictionPolicy::Lru),
            "random" => Ok(EvictionPolicy::Random),
            "no_eviction" => Ok(EvictionPolicy::NoEviction),
            other => Err(MscError::invalid_argument(format!(
                "unsupported eviction policy \"{other}\": expected fifo, lru, random or no_eviction"
            ))),
        }
    }
}

impl EvictionPolicy {
    /// Order `entries` into eviction order, victims first.
    pub fn sort_victims(&self, entries: &mut Vec<CacheEntry>) {
        match self {
            EvictionPolicy::Fifo => entries.sort_by_key(|entry| entry.inserted_at),
            EvictionPolicy::Lru => entries.sort_by_key(|entry| entry.last_accessed),
            EvictionPolicy::Random => {
                entries.sort_by_key(|entry| entry.inserted_at);
                let len = entries.len();
                if len > 1 {
                    entries[..len - 1].shuffle(&mut rand::thread_rng());
                }
            }
            EvictionPolicy::NoEviction => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fingerprint: &str, inserted_at: u64, last_accessed: u64) -> CacheEntry {
        CacheEntry {
            fingerprint: fingerprint.to_string(),
            size: 1,
            inserted_at,
            last_accessed,
            etag: None,
        }
    }

    #[test]
    fn test_fifo_orders_by_insertion() {
        let mut entries = vec![entry("c", 3, 1), entry("a", 1, 9), entry("b", 2, 5)];
        EvictionPolicy::Fifo.sort_victims(&mut entries);
        let order: Vec<&str> = entries.iter().map(|e| e.fingerprint.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_lru_orders_by_access() {
        let mut entries = vec![entry("c", 3, 1), entry("a", 1, 9), entry("b", 2, 5)];
        EvictionPolicy::Lru.sort_victims(&mut entries);
        let order: Vec<&str> = entries.iter().map(|e| e.fingerprint.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_random_preserves_newest() {
        let mut entries = vec![entry("old1", 1, 1), entry("old2", 2, 2), entry("new", 9, 9)];
        EvictionPolicy::Random.sort_victims(&mut entries);
        assert_eq!(entries.last().unwrap().fingerprint, "new");
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("FIFO".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert_eq!("lru".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert!("mru".parse::<EvictionPolicy>().is_err());
    }
}
