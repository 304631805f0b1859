//! RateLimiter (spec §4.4): per-{identity, capability} sliding window. Only
//! the root call enforces; nested calls skip (enforced by the Executor,
//! which only calls `enforce` at depth 1).

use crate::config::{RateLimitConfig, RateRule};
use crate::error::{ChainboxError, ChainboxResult};
use crate::types::{Identity, RateBucket};
use dashmap::DashMap;

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, RateBucket>,
    default_rule: RateRule,
}

const FALLBACK_RULE: RateRule = RateRule {
    max_requests: 100,
    window_ms: 60_000,
};

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let default_rule = config.default_rule.unwrap_or(FALLBACK_RULE);
        Self {
            config,
            buckets: DashMap::new(),
            default_rule,
        }
    }

    fn rule_for(&self, fn_name: &str) -> RateRule {
        if let Some(rule) = self.config.overrides.get(fn_name) {
            return *rule;
        }
        // namespace wildcard `X.*` when no exact rule matches (spec §4.4)
        if let Some((namespace, _)) = fn_name.split_once('.') {
            let wildcard = format!("{namespace}.*");
            if let Some(rule) = self.config.overrides.get(&wildcard) {
                return *rule;
            }
        }
        self.default_rule
    }

    fn key(identity: Option<&Identity>, fn_name: &str) -> String {
        format!("{}:{}", Identity::rate_key(identity), fn_name)
    }

    /// `true` if the call is allowed and the bucket is incremented.
    pub fn is_allowed(&self, identity: Option<&Identity>, fn_name: &str, now_ms: i64) -> bool {
        let rule = self.rule_for(fn_name);
        let key = Self::key(identity, fn_name);
        let mut bucket = self.buckets.entry(key).or_insert(RateBucket {
            count: 0,
            window_start: now_ms,
        });

        if now_ms - bucket.window_start > rule.window_ms as i64 {
            bucket.count = 0;
            bucket.window_start = now_ms;
        }

        if bucket.count >= rule.max_requests {
            return false;
        }
        bucket.count += 1;
        true
    }

    /// Raises `RATE_LIMITED` with `resetMs` when the window is exhausted
    /// (spec §4.4 `enforce`).
    pub fn enforce(
        &self,
        identity: Option<&Identity>,
        fn_name: &str,
        now_ms: i64,
    ) -> ChainboxResult<()> {
        let rule = self.rule_for(fn_name);
        let key = Self::key(identity, fn_name);

        let mut bucket = self.buckets.entry(key).or_insert(RateBucket {
            count: 0,
            window_start: now_ms,
        });
        if now_ms - bucket.window_start > rule.window_ms as i64 {
            bucket.count = 0;
            bucket.window_start = now_ms;
        }
        if bucket.count >= rule.max_requests {
            let reset_ms = (rule.window_ms as i64 - (now_ms - bucket.window_start)).max(1) as u64;
            return Err(ChainboxError::RateLimited { reset_ms });
        }
        bucket.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(rule: RateRule) -> RateLimitConfig {
        RateLimitConfig {
            default_rule: Some(rule),
            overrides: HashMap::new(),
        }
    }

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(cfg(RateRule {
            max_requests: 2,
            window_ms: 1_000,
        }));
        assert!(limiter.enforce(None, "X.Y", 0).is_ok());
        assert!(limiter.enforce(None, "X.Y", 0).is_ok());
        let err = limiter.enforce(None, "X.Y", 0).unwrap_err();
        match err {
            ChainboxError::RateLimited { reset_ms } => assert!(reset_ms > 0),
            _ => panic!("expected RateLimited"),
        }
    }

    #[test]
    fn resets_after_window() {
        let limiter = RateLimiter::new(cfg(RateRule {
            max_requests: 1,
            window_ms: 1_000,
        }));
        assert!(limiter.enforce(None, "X.Y", 0).is_ok());
        assert!(limiter.enforce(None, "X.Y", 500).is_err());
        assert!(limiter.enforce(None, "X.Y", 1_500).is_ok());
    }

    #[test]
    fn namespace_wildcard_overrides_default() {
        let mut config = cfg(RateRule {
            max_requests: 1,
            window_ms: 1_000,
        });
        config.overrides.insert(
            "Heavy.*".to_string(),
            RateRule {
                max_requests: 5,
                window_ms: 1_000,
            },
        );
        let limiter = RateLimiter::new(config);
        for _ in 0..5 {
            assert!(limiter.enforce(None, "Heavy.Crunch", 0).is_ok());
        }
        assert!(limiter.enforce(None, "Heavy.Crunch", 0).is_err());
    }

    #[test]
    fn distinct_identities_have_distinct_buckets() {
        let limiter = RateLimiter::new(cfg(RateRule {
            max_requests: 1,
            window_ms: 1_000,
        }));
        let a = Identity {
            id: "a".into(),
            email: None,
            role: None,
            token: None,
            claims: HashMap::new(),
        };
        let b = Identity {
            id: "b".into(),
            email: None,
            role: None,
            token: None,
            claims: HashMap::new(),
        };
        assert!(limiter.enforce(Some(&a), "X.Y", 0).is_ok());
        assert!(limiter.enforce(Some(&b), "X.Y", 0).is_ok());
        assert!(limiter.enforce(Some(&a), "X.Y", 0).is_err());
    }
}
