//! Environment-driven configuration (spec §6 "Configuration surface").
//!
//! Mirrors the teacher's `config` module shape: a top-level `Config` with
//! typed sub-structs, loaded once via `Config::from_env()`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub secret: Option<String>,
    pub signature_ttl_ms: u64,
    pub nodes: HashMap<String, String>,
    pub routes: Vec<(String, Vec<String>)>,
    pub connections: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            secret: None,
            signature_ttl_ms: 60_000,
            nodes: HashMap::new(),
            routes: Vec::new(),
            connections: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub threshold: u32,
    pub timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_ms: 30_000,
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_rule: Option<RateRule>,
    pub overrides: HashMap<String, RateRule>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateRule {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateRule {
    /// Parse `"N/second|minute|hour"` per spec §4.4.
    pub fn parse(s: &str) -> Option<Self> {
        let (n, unit) = s.split_once('/')?;
        let max_requests: u32 = n.trim().parse().ok()?;
        let window_ms = match unit.trim() {
            "second" => 1_000,
            "minute" => 60_000,
            "hour" => 3_600_000,
            _ => return None,
        };
        Some(Self {
            max_requests,
            window_ms,
        })
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rule: None,
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub default_ttl_ms: i64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 60_000,
            max_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    #[serde(default = "default_tenant_calls_per_minute")]
    pub max_calls_per_minute: u32,
    #[serde(default = "default_tenant_depth")]
    pub max_call_depth: u32,
    #[serde(default = "default_tenant_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub node_pool: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

fn default_tenant_calls_per_minute() -> u32 {
    600
}
fn default_tenant_depth() -> u32 {
    10
}
fn default_tenant_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    All,
    Errors,
    None,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub level: AuditLevel,
    pub ring_capacity: usize,
    pub durable_path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: AuditLevel::All,
            ring_capacity: 10_000,
            durable_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "chainbox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub mesh: MeshConfig,
    pub circuit: CircuitConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub tenants: Vec<TenantConfig>,
    pub audit: AuditConfig,
    pub telemetry: TelemetryConfig,
    pub max_body_size: usize,
    pub cache_suffix: String,
    pub production: bool,
    pub default_max_depth: u32,
    pub default_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Config {
            max_body_size: env_usize("max_body_size", 10 * 1024 * 1024),
            cache_suffix: env::var("cache.suffix").unwrap_or_else(|_| ".Cached".to_string()),
            production: env::var("NODE_ENV")
                .map(|v| v == "production")
                .unwrap_or(false),
            default_max_depth: env_u32("MAX_CALL_DEPTH", 10),
            default_timeout_ms: env_u64("DEFAULT_TIMEOUT_MS", 30_000),
            ..Default::default()
        };

        cfg.mesh.secret = env::var("mesh.secret").ok().filter(|s| !s.is_empty());
        cfg.mesh.signature_ttl_ms = env_u64("mesh.signature_ttl_ms", 60_000);
        cfg.mesh.connections = env_usize("mesh.connections", 100);
        if let Ok(nodes) = env::var("mesh.nodes") {
            cfg.mesh.nodes = parse_node_list(&nodes);
        }
        if let Ok(routes) = env::var("mesh.routes") {
            cfg.mesh.routes = parse_routes(&routes);
        }

        cfg.circuit.threshold = env_u32("circuit.threshold", 5);
        cfg.circuit.timeout_ms = env_u64("circuit.timeout_ms", 30_000);
        cfg.circuit.success_threshold = env_u32("circuit.success_threshold", 2);

        cfg.rate_limit.default_rule =
            env::var("rate_limit.default").ok().and_then(|v| RateRule::parse(&v));
        for (key, value) in env::vars() {
            if let Some(cap) = key.strip_prefix("rate_limit.") {
                if cap == "default" {
                    continue;
                }
                if let Some(rule) = RateRule::parse(&value) {
                    cfg.rate_limit.overrides.insert(cap.to_string(), rule);
                }
            }
        }

        cfg.cache.default_ttl_ms = env_i64("cache.default_ttl_ms", 60_000);
        cfg.cache.max_size = env_usize("cache.max_size", 10_000);

        if let Ok(json) = env::var("tenant.configs") {
            if let Ok(parsed) = serde_json::from_str::<Vec<TenantConfig>>(&json) {
                cfg.tenants = parsed;
            }
        }

        cfg.audit.enabled = env::var("audit.enabled")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        cfg.audit.level = match env::var("audit.level").as_deref() {
            Ok("errors") => AuditLevel::Errors,
            Ok("none") => AuditLevel::None,
            _ => AuditLevel::All,
        };

        cfg.telemetry.enabled = env::var("telemetry.enabled")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        if let Ok(name) = env::var("telemetry.service_name") {
            cfg.telemetry.service_name = name;
        }

        cfg
    }
}

/// `id=url,id2=url2` → map.
fn parse_node_list(s: &str) -> HashMap<String, String> {
    s.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(id, url)| (id.trim().to_string(), url.trim().to_string()))
        .collect()
}

/// `glob:id|id2,glob2:id3` → ordered route list.
fn parse_routes(s: &str) -> Vec<(String, Vec<String>)> {
    s.split(',')
        .filter_map(|entry| entry.split_once(':'))
        .map(|(pattern, ids)| {
            let node_ids = ids.split('|').map(|s| s.trim().to_string()).collect();
            (pattern.trim().to_string(), node_ids)
        })
        .collect()
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_rule() {
        let rule = RateRule::parse("10/second").unwrap();
        assert_eq!(rule.max_requests, 10);
        assert_eq!(rule.window_ms, 1_000);
        assert!(RateRule::parse("garbage").is_none());
    }

    #[test]
    fn parses_node_list() {
        let nodes = parse_node_list("a=http://a:1,b=http://b:2");
        assert_eq!(nodes.get("a").unwrap(), "http://a:1");
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn parses_routes() {
        let routes = parse_routes("Heavy.*:compute|compute2,Light.*:light");
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].0, "Heavy.*");
        assert_eq!(routes[0].1, vec!["compute", "compute2"]);
    }
}
