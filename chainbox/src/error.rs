//! The fabric's closed error enumeration.
//!
//! Every component returns `ChainboxResult<T>`. Gate errors (policy, depth,
//! rate, tenant, auth) are never retried; transport and handler errors are,
//! up to the caller's retry budget. See `Outcome` for the tag that survives
//! at the wire boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of outcome tags (spec §3 TraceFrame, §6 "Outcome tags").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    CircuitOpen,
    Forbidden,
    NotFound,
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainboxError {
    #[error("execution error in {fn_name}: {message}")]
    Execution {
        fn_name: String,
        message: String,
        meta: HashMap<String, String>,
    },

    #[error("execution of {fn_name} timed out after {elapsed_ms}ms")]
    ExecutionTimeout { fn_name: String, elapsed_ms: u64 },

    #[error("call depth {depth} exceeds max depth {max_depth} in {fn_name}")]
    MaxCallDepthExceeded {
        fn_name: String,
        depth: u32,
        max_depth: u32,
    },

    #[error("identity forbidden from calling {fn_name}")]
    Forbidden { fn_name: String },

    /// Reserved per spec §9 Design Notes: appears in the source's
    /// non-retryable list but is never emitted. Kept as an alias of
    /// `Forbidden` so callers matching on it still see the right outcome.
    #[error("access denied calling {fn_name}")]
    AccessDenied { fn_name: String },

    #[error("capability {0} not found")]
    FunctionNotFound(String),

    #[error("circuit open for node {node_id}")]
    CircuitOpen { node_id: String },

    #[error("mesh call to {node_url} failed: {message}")]
    MeshCallFailed { node_url: String, message: String },

    #[error("signature invalid: {0}")]
    InvalidSignature(String),

    #[error("adapter {0} not found")]
    AdapterNotFound(String),

    #[error("rate limited, retry in {reset_ms}ms")]
    RateLimited { reset_ms: u64 },

    #[error("tenant {tenant_id} quota exceeded")]
    TenantQuotaExceeded { tenant_id: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("payload too large: {size} bytes exceeds {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ChainboxResult<T> = Result<T, ChainboxError>;

impl ChainboxError {
    /// Wire-level error code, one of the closed enumeration in spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            ChainboxError::Execution { .. } => "EXECUTION_ERROR",
            ChainboxError::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
            ChainboxError::MaxCallDepthExceeded { .. } => "MAX_CALL_DEPTH_EXCEEDED",
            ChainboxError::Forbidden { .. } => "FORBIDDEN",
            ChainboxError::AccessDenied { .. } => "ACCESS_DENIED",
            ChainboxError::FunctionNotFound(_) => "FUNCTION_NOT_FOUND",
            ChainboxError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            ChainboxError::MeshCallFailed { .. } => "MESH_CALL_FAILED",
            ChainboxError::InvalidSignature(_) => "INVALID_SIGNATURE",
            ChainboxError::AdapterNotFound(_) => "ADAPTER_NOT_FOUND",
            ChainboxError::RateLimited { .. } => "RATE_LIMITED",
            ChainboxError::TenantQuotaExceeded { .. } => "TENANT_QUOTA_EXCEEDED",
            ChainboxError::Unauthorized(_) => "UNAUTHORIZED",
            ChainboxError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ChainboxError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Non-retryable codes per spec §4.11 "Retries" / §7 "Propagation".
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ChainboxError::Forbidden { .. }
                | ChainboxError::AccessDenied { .. }
                | ChainboxError::MaxCallDepthExceeded { .. }
                | ChainboxError::RateLimited { .. }
                | ChainboxError::TenantQuotaExceeded { .. }
                | ChainboxError::Unauthorized(_)
        )
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            ChainboxError::ExecutionTimeout { .. } => Outcome::Timeout,
            ChainboxError::CircuitOpen { .. } => Outcome::CircuitOpen,
            ChainboxError::Forbidden { .. } | ChainboxError::AccessDenied { .. } => {
                Outcome::Forbidden
            }
            ChainboxError::FunctionNotFound(_) => Outcome::NotFound,
            _ => Outcome::Failure,
        }
    }

    pub fn fn_name(&self) -> Option<&str> {
        match self {
            ChainboxError::Execution { fn_name, .. } => Some(fn_name),
            ChainboxError::ExecutionTimeout { fn_name, .. } => Some(fn_name),
            ChainboxError::MaxCallDepthExceeded { fn_name, .. } => Some(fn_name),
            ChainboxError::Forbidden { fn_name } => Some(fn_name),
            ChainboxError::AccessDenied { fn_name } => Some(fn_name),
            ChainboxError::FunctionNotFound(name) => Some(name),
            _ => None,
        }
    }

    /// Wire-level error envelope per spec §6 "Result envelope".
    pub fn to_envelope(&self, trace_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self.code().to_string(),
            message: self.to_string(),
            function: self.fn_name().map(|s| s.to_string()),
            trace_id: trace_id.to_string(),
            meta: match self {
                ChainboxError::Execution { meta, .. } => meta.clone(),
                _ => HashMap::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub function: Option<String>,
    pub trace_id: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}
