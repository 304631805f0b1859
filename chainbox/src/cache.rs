//! Cache (spec §4.6): fingerprint→result with TTL and bounded size.

use crate::canonical::fingerprint;
use crate::config::CacheConfig;
use crate::types::CacheEntry;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct Cache {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    /// Insertion order, for oldest-first eviction.
    order: Mutex<Vec<String>>,
    cache_suffix: String,
    per_capability: HashMap<String, ()>,
    /// Capability name -> fingerprint keys currently cached under it, so
    /// prefix/pattern invalidation can evict just the matching names
    /// instead of the whole cache (spec §4.6).
    keys_by_name: DashMap<String, Vec<String>>,
    /// Reverse of `keys_by_name`, so eviction/invalidate-by-key can drop the
    /// stale entry from `keys_by_name` without a linear scan.
    name_by_key: DashMap<String, String>,
}

impl Cache {
    pub fn new(config: CacheConfig, cache_suffix: impl Into<String>) -> Self {
        Self::with_explicit_capabilities(config, cache_suffix, Vec::new())
    }

    /// `explicit_capabilities` names a capability as cacheable even without
    /// the configured suffix, mirroring an explicit per-capability
    /// configuration entry (spec §4.6).
    pub fn with_explicit_capabilities(
        config: CacheConfig,
        cache_suffix: impl Into<String>,
        explicit_capabilities: Vec<String>,
    ) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
            cache_suffix: cache_suffix.into(),
            per_capability: explicit_capabilities.into_iter().map(|n| (n, ())).collect(),
            keys_by_name: DashMap::new(),
            name_by_key: DashMap::new(),
        }
    }

    /// `true` when the name carries the configured suffix or an explicit
    /// per-capability configuration exists (spec §4.6).
    pub fn is_cacheable(&self, name: &str) -> bool {
        name.ends_with(self.cache_suffix.as_str()) || self.per_capability.contains_key(name)
    }

    pub fn get(&self, name: &str, input: &Json, now_ms: i64) -> Option<Json> {
        let key = fingerprint(name, input);
        let mut entry = self.entries.get_mut(&key)?;
        if entry.expires_at <= now_ms {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        entry.hits += 1;
        Some(entry.value.clone())
    }

    pub fn set(&self, name: &str, input: &Json, value: Json, now_ms: i64) {
        let key = fingerprint(name, input);
        let expires_at = now_ms + self.config.default_ttl_ms;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                expires_at,
                hits: 0,
            },
        );
        self.keys_by_name.entry(name.to_string()).or_default().push(key.clone());
        self.name_by_key.insert(key.clone(), name.to_string());

        let mut order = self.order.lock().unwrap();
        order.push(key);
        while order.len() > self.config.max_size {
            let oldest = order.remove(0);
            self.entries.remove(&oldest);
            self.forget_key(&oldest);
        }
    }

    pub fn invalidate_key(&self, name: &str, input: &Json) {
        let key = fingerprint(name, input);
        self.entries.remove(&key);
        self.order.lock().unwrap().retain(|k| k != &key);
        self.forget_key(&key);
    }

    /// Invalidate every cached entry for capabilities whose name starts
    /// with `prefix` (spec §4.6 "per-capability prefix"), leaving entries
    /// for unrelated capabilities untouched.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let names: Vec<String> = self
            .keys_by_name
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| n.starts_with(prefix))
            .collect();
        for name in names {
            self.invalidate_by_name(&name);
        }
    }

    /// Invalidate every cached entry for capabilities whose name matches
    /// `pattern` (spec §4.6 "regex pattern").
    pub fn invalidate_pattern(&self, pattern: &str) {
        let Ok(re) = Regex::new(pattern) else { return };
        let names: Vec<String> = self
            .keys_by_name
            .iter()
            .map(|e| e.key().clone())
            .filter(|n| re.is_match(n))
            .collect();
        for name in names {
            self.invalidate_by_name(&name);
        }
    }

    fn invalidate_by_name(&self, name: &str) {
        let Some((_, keys)) = self.keys_by_name.remove(name) else { return };
        let mut order = self.order.lock().unwrap();
        for key in keys {
            self.entries.remove(&key);
            self.name_by_key.remove(&key);
            order.retain(|k| k != &key);
        }
    }

    /// Drop `key`'s entry from `keys_by_name`/`name_by_key` without
    /// touching `entries`/`order`, which the caller has already updated.
    fn forget_key(&self, key: &str) {
        if let Some((_, name)) = self.name_by_key.remove(key) {
            if let Some(mut keys) = self.keys_by_name.get_mut(&name) {
                keys.retain(|k| k != key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> Cache {
        Cache::new(
            CacheConfig {
                default_ttl_ms: 1_000,
                max_size: 2,
            },
            ".Cached",
        )
    }

    #[test]
    fn is_cacheable_by_suffix() {
        let c = cache();
        assert!(c.is_cacheable("Price.Cached"));
        assert!(!c.is_cacheable("Price.Get"));
    }

    #[test]
    fn hit_returns_identical_value_and_increments_hits() {
        let c = cache();
        let input = json!({"a": 1});
        c.set("Price.Cached", &input, json!({"p": 42}), 0);
        let first = c.get("Price.Cached", &input, 10).unwrap();
        let second = c.get("Price.Cached", &input, 20).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn expired_entry_misses() {
        let c = cache();
        let input = json!({"a": 1});
        c.set("Price.Cached", &input, json!({"p": 1}), 0);
        assert!(c.get("Price.Cached", &input, 2_000).is_none());
    }

    fn roomy_cache() -> Cache {
        Cache::new(
            CacheConfig {
                default_ttl_ms: 1_000,
                max_size: 10,
            },
            ".Cached",
        )
    }

    #[test]
    fn invalidate_prefix_only_evicts_matching_names() {
        let c = roomy_cache();
        c.set("Price.Cached", &json!(1), json!("p1"), 0);
        c.set("Price.Get.Cached", &json!(1), json!("p2"), 0);
        c.set("Order.Cached", &json!(1), json!("o1"), 0);

        c.invalidate_prefix("Price.");

        assert!(c.get("Price.Cached", &json!(1), 1).is_none());
        assert!(c.get("Price.Get.Cached", &json!(1), 1).is_none());
        assert!(c.get("Order.Cached", &json!(1), 1).is_some());
    }

    #[test]
    fn invalidate_pattern_only_evicts_matching_names() {
        let c = roomy_cache();
        c.set("Price.Get.Cached", &json!(1), json!("p"), 0);
        c.set("Order.Get.Cached", &json!(1), json!("o"), 0);

        c.invalidate_pattern("^Price\\.");

        assert!(c.get("Price.Get.Cached", &json!(1), 1).is_none());
        assert!(c.get("Order.Get.Cached", &json!(1), 1).is_some());
    }

    #[test]
    fn evicts_oldest_when_over_bound() {
        let c = cache();
        c.set("A.Cached", &json!(1), json!("a"), 0);
        c.set("B.Cached", &json!(1), json!("b"), 1);
        c.set("C.Cached", &json!(1), json!("c"), 2);
        assert_eq!(c.len(), 2);
        assert!(c.get("A.Cached", &json!(1), 3).is_none());
        assert!(c.get("C.Cached", &json!(1), 3).is_some());
    }
}
