//! TenantManager (spec §4.5): per-tenant quotas, routing pool, and effective
//! limits.

use crate::config::TenantConfig;
use crate::error::{ChainboxError, ChainboxResult};
use crate::types::{Identity, RateBucket};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running success/failure totals for one tenant (spec §4.5 `recordCall`).
#[derive(Debug, Default)]
pub struct CallCounts {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl CallCounts {
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EffectiveLimits {
    pub max_calls_per_minute: u32,
    pub max_call_depth: u32,
    pub timeout_ms: u64,
    pub priority: i32,
}

impl Default for EffectiveLimits {
    fn default() -> Self {
        Self {
            max_calls_per_minute: 600,
            max_call_depth: 10,
            timeout_ms: 30_000,
            priority: 0,
        }
    }
}

pub struct TenantManager {
    configs: DashMap<String, TenantConfig>,
    windows: DashMap<String, RateBucket>,
    call_counts: DashMap<String, CallCounts>,
}

impl TenantManager {
    pub fn new(configs: Vec<TenantConfig>) -> Self {
        let map = DashMap::new();
        for config in configs {
            map.insert(config.tenant_id.clone(), config);
        }
        Self {
            configs: map,
            windows: DashMap::new(),
            call_counts: DashMap::new(),
        }
    }

    pub fn tenant_id(identity: Option<&Identity>) -> String {
        Identity::tenant_id(identity)
    }

    pub fn effective_limits(&self, tenant_id: &str) -> EffectiveLimits {
        match self.configs.get(tenant_id) {
            Some(cfg) => EffectiveLimits {
                max_calls_per_minute: cfg.max_calls_per_minute,
                max_call_depth: cfg.max_call_depth,
                timeout_ms: cfg.timeout_ms,
                priority: cfg.priority,
            },
            None => EffectiveLimits::default(),
        }
    }

    pub fn node_pool(&self, tenant_id: &str) -> Option<String> {
        self.configs.get(tenant_id).and_then(|c| c.node_pool.clone())
    }

    /// Raises `TENANT_QUOTA_EXCEEDED` when the per-minute window is
    /// exhausted (spec §4.5).
    pub fn enforce(&self, identity: Option<&Identity>, now_ms: i64) -> ChainboxResult<()> {
        let tenant_id = Self::tenant_id(identity);
        let limits = self.effective_limits(&tenant_id);
        let window_ms = 60_000i64;

        let mut bucket = self
            .windows
            .entry(tenant_id.clone())
            .or_insert(RateBucket {
                count: 0,
                window_start: now_ms,
            });
        if now_ms - bucket.window_start > window_ms {
            bucket.count = 0;
            bucket.window_start = now_ms;
        }
        if bucket.count >= limits.max_calls_per_minute {
            return Err(ChainboxError::TenantQuotaExceeded { tenant_id });
        }
        bucket.count += 1;
        Ok(())
    }

    /// Updates counters after completion (spec §4.5 `recordCall`). Sliding
    /// window accounting is already done in `enforce`; this tracks
    /// success/failure totals for observability.
    pub fn record_call(&self, identity: Option<&Identity>, success: bool) {
        let tenant_id = Self::tenant_id(identity);
        let counts = self.call_counts.entry(tenant_id).or_default();
        if success {
            counts.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counts.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Success/failure totals recorded for a tenant so far.
    pub fn call_counts(&self, tenant_id: &str) -> (u64, u64) {
        match self.call_counts.get(tenant_id) {
            Some(c) => (c.successes(), c.failures()),
            None => (0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_when_unconfigured() {
        let manager = TenantManager::new(vec![]);
        assert!(manager.enforce(None, 0).is_ok());
        assert_eq!(manager.effective_limits("default").max_call_depth, 10);
    }

    #[test]
    fn enforces_per_tenant_quota() {
        let manager = TenantManager::new(vec![TenantConfig {
            tenant_id: "default".to_string(),
            max_calls_per_minute: 2,
            max_call_depth: 10,
            timeout_ms: 30_000,
            node_pool: None,
            priority: 0,
        }]);
        assert!(manager.enforce(None, 0).is_ok());
        assert!(manager.enforce(None, 0).is_ok());
        assert!(manager.enforce(None, 0).is_err());
    }

    #[test]
    fn record_call_tracks_success_and_failure_totals() {
        let manager = TenantManager::new(vec![]);
        manager.record_call(None, true);
        manager.record_call(None, true);
        manager.record_call(None, false);
        assert_eq!(manager.call_counts("anonymous"), (2, 1));
        assert_eq!(manager.call_counts("default"), (0, 0));
    }

    #[test]
    fn node_pool_extracted() {
        let manager = TenantManager::new(vec![TenantConfig {
            tenant_id: "acme".to_string(),
            max_calls_per_minute: 100,
            max_call_depth: 10,
            timeout_ms: 30_000,
            node_pool: Some("acme-".to_string()),
            priority: 1,
        }]);
        assert_eq!(manager.node_pool("acme"), Some("acme-".to_string()));
    }
}
