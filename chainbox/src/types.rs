//! Core data model (spec §3): the records that flow through every
//! component on the critical path. Kept dependency-free from any one
//! component so `registry`, `executor`, `planner`, etc. can all share them.

use crate::error::Outcome;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;

/// Caller identity, produced by the Authenticator and propagated verbatim
/// across mesh hops (spec §3 Identity).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub claims: HashMap<String, Json>,
}

impl Identity {
    /// Key used by RateLimiter and TenantManager: `identity.id` or `anonymous`.
    pub fn rate_key(identity: Option<&Identity>) -> String {
        identity
            .map(|i| i.id.clone())
            .unwrap_or_else(|| "anonymous".to_string())
    }

    pub fn tenant_id(identity: Option<&Identity>) -> String {
        match identity {
            None => "anonymous".to_string(),
            Some(id) => id
                .claims
                .get("tenant_id")
                .or_else(|| id.claims.get("org_id"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "default".to_string()),
        }
    }
}

/// The per-invocation depth/timeout budget (spec §3 ExecutionFrame).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionFrame {
    pub depth: u32,
    pub max_depth: u32,
    pub start_time: i64,
    pub timeout_ms: u64,
}

impl ExecutionFrame {
    pub fn root(max_depth: u32, timeout_ms: u64, now_ms: i64) -> Self {
        Self {
            depth: 1,
            max_depth,
            start_time: now_ms,
            timeout_ms,
        }
    }

    /// Derive a child frame for a nested call. Inherits `start_time` unless
    /// the caller crosses a mesh hop, in which case pass `reset_start = true`
    /// (spec §3 invariant, §4.11 step 2).
    pub fn child(&self, now_ms: i64, reset_start: bool) -> Self {
        Self {
            depth: self.depth + 1,
            max_depth: self.max_depth,
            start_time: if reset_start { now_ms } else { self.start_time },
            timeout_ms: self.timeout_ms,
        }
    }

    /// Continue this frame across a mesh hop: `depth` and `max_depth`
    /// carry over unchanged (spec §3 invariant — depth only increases on a
    /// nested call, not on a transport hop), only `start_time` resets
    /// (spec §4.11 step 2, "except when crossing a mesh hop").
    pub fn continue_remote(&self, now_ms: i64) -> Self {
        Self {
            depth: self.depth,
            max_depth: self.max_depth,
            start_time: now_ms,
            timeout_ms: self.timeout_ms,
        }
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> u64 {
        (now_ms - self.start_time).max(0) as u64
    }

    pub fn remaining_ms(&self, now_ms: i64) -> u64 {
        self.timeout_ms.saturating_sub(self.elapsed_ms(now_ms))
    }

    pub fn exceeds_depth(&self) -> bool {
        self.depth > self.max_depth
    }
}

/// Target of a plan or completed call (spec §3 TraceFrame `target`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Success,
    Error,
}

/// One node in the invocation's trace tree (spec §3 TraceFrame).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFrame {
    #[serde(rename = "fn")]
    pub fn_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    pub target: Target,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FrameStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    pub children: Vec<TraceFrame>,
}

impl TraceFrame {
    pub fn new(fn_name: impl Into<String>, identity: Option<Identity>, target: Target) -> Self {
        Self {
            fn_name: fn_name.into(),
            identity,
            target,
            node_id: None,
            duration_ms: None,
            status: None,
            outcome: None,
            cached: None,
            children: Vec::new(),
        }
    }

    /// Asserts an outcome was set; coerces to `FAILURE` and returns `true`
    /// when the pipeline never observed one (spec §3 invariant, §9 "Outcome
    /// inference" — never silently tag a handler `SUCCESS`).
    pub fn finalize_outcome(&mut self) -> bool {
        if self.outcome.is_none() {
            self.outcome = Some(Outcome::Failure);
            self.status = Some(FrameStatus::Error);
            true
        } else {
            false
        }
    }
}

/// Resolved handler source (spec §3 CapabilitySource).
#[derive(Clone)]
pub enum CapabilitySource {
    Native {
        handler: crate::registry::NativeHandler,
        permissions: Permissions,
    },
    Bytecode {
        bytes: Vec<u8>,
        permissions: Permissions,
    },
}

impl std::fmt::Debug for CapabilitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilitySource::Native { permissions, .. } => f
                .debug_struct("Native")
                .field("handler", &"<native fn>")
                .field("permissions", permissions)
                .finish(),
            CapabilitySource::Bytecode { bytes, permissions } => f
                .debug_struct("Bytecode")
                .field("bytes", bytes)
                .field("permissions", permissions)
                .finish(),
        }
    }
}

impl CapabilitySource {
    pub fn permissions(&self) -> &Permissions {
        match self {
            CapabilitySource::Native { permissions, .. } => permissions,
            CapabilitySource::Bytecode { permissions, .. } => permissions,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub allow: Vec<String>,
}

/// A configured mesh peer (spec §3 MeshNode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshNode {
    pub id: String,
    pub url: String,
    pub healthy: bool,
    pub last_check: i64,
}

/// Per-node breaker state (spec §3 CircuitState, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitState {
    pub state: CircuitStateKind,
    pub failures: u32,
    pub successes: u32,
    pub last_state_change: i64,
}

/// A memoised result (spec §3 CacheEntry).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Json,
    pub expires_at: i64,
    pub hits: u64,
}

/// Sliding-window counter (spec §3 RateBucket).
#[derive(Debug, Clone, Copy)]
pub struct RateBucket {
    pub count: u32,
    pub window_start: i64,
}

/// One row of the audit log (spec §3 AuditEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: i64,
    #[serde(rename = "fn")]
    pub fn_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub status: FrameStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub outcome: Outcome,
    pub trace_id: String,
    pub trace: TraceFrame,
}

/// Where a plan decided to run a call (GLOSSARY "Plan").
#[derive(Debug, Clone)]
pub struct Plan {
    pub target: Target,
    pub node_url: Option<String>,
    pub node_id: Option<String>,
}

/// The capability wire payload for a single mesh call (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshPayload {
    #[serde(rename = "fn")]
    pub fn_name: String,
    pub input: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    pub frame: ExecutionFrame,
    pub trace: Vec<TraceFrame>,
    pub trace_id: String,
}

/// The capability wire payload for a mesh batch call (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshBatchPayload {
    pub calls: Vec<MeshCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    pub frame: ExecutionFrame,
    pub trace: Vec<TraceFrame>,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshCall {
    #[serde(rename = "fn")]
    pub fn_name: String,
    pub input: Json,
}

/// Outcome of one capability invocation, returned to callers (spec §6
/// "Result envelope"). `value` carries the handler's return data; `trace`
/// is attached only in development mode (spec §4.11 "Redaction").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub value: Json,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceFrame>,
}
