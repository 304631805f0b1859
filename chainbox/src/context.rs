//! Context (spec §4.12): the per-invocation capability surface handed to a
//! handler.

use crate::error::{ChainboxError, ChainboxResult};
use crate::executor::{CallOptions, Executor, ParallelOutcome};
use crate::storage::StorageAdapter;
use crate::trace::{LiveTraceFrame, TraceHandle};
use crate::types::{ExecutionFrame, Identity, TraceFrame};
use serde_json::Value as Json;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A scoped database handle carrying the caller's identity token, or an
/// explicit service principal, for row-level authorization in whatever
/// concrete store is wired in (spec §9 "Identity-aware database"; the
/// concrete client is out of scope per spec §1).
pub trait DbHandle: Send + Sync {
    fn identity_token(&self) -> Option<&str>;
}

pub struct ScopedDbHandle {
    token: Option<String>,
}

impl ScopedDbHandle {
    pub fn for_identity(identity: Option<&Identity>) -> Self {
        Self {
            token: identity.and_then(|i| i.token.clone()),
        }
    }

    pub fn service_principal(name: impl Into<String>) -> Self {
        Self {
            token: Some(format!("service:{}", name.into())),
        }
    }
}

impl DbHandle for ScopedDbHandle {
    fn identity_token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// One namespace of a `StorageAdapter` (spec §4.12 `kv`, `blob`).
#[derive(Clone)]
pub struct StorageNamespace {
    adapter: Arc<dyn StorageAdapter>,
    namespace: String,
}

impl StorageNamespace {
    pub fn new(adapter: Arc<dyn StorageAdapter>, namespace: impl Into<String>) -> Self {
        Self {
            adapter,
            namespace: namespace.into(),
        }
    }

    pub async fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        self.adapter.get(&self.namespace, key).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>) -> std::io::Result<()> {
        self.adapter.set(&self.namespace, key, value).await
    }

    pub async fn delete(&self, key: &str) -> std::io::Result<()> {
        self.adapter.delete(&self.namespace, key).await
    }

    pub async fn list(&self, prefix: &str) -> std::io::Result<Vec<String>> {
        self.adapter.list(&self.namespace, prefix).await
    }
}

pub type AdapterHandle = Arc<dyn Any + Send + Sync>;

pub struct Context {
    pub input: Json,
    pub identity: Option<Identity>,
    pub trace_id: String,
    pub db: Arc<dyn DbHandle>,
    pub kv: StorageNamespace,
    pub blob: StorageNamespace,
    pub env: HashMap<String, String>,

    pub(crate) frame: ExecutionFrame,
    pub(crate) trace_node: TraceHandle,
    pub(crate) executor: Arc<Executor>,
    pub(crate) adapters: Arc<dashmap::DashMap<String, AdapterHandle>>,
}

impl Context {
    /// Recursive execute with the current identity/frame as parent; pushes
    /// a child trace node (spec §4.12 `call`).
    pub async fn call(&self, fn_name: &str, input: Json, opts: CallOptions) -> ChainboxResult<Json> {
        self.executor
            .call_nested(
                fn_name,
                input,
                self.identity.clone(),
                self.frame,
                self.trace_node.clone(),
                self.trace_id.clone(),
                opts,
            )
            .await
    }

    /// As in spec §4.11 "Parallel execute": group by destination, preserve
    /// input indices.
    pub async fn parallel(&self, calls: Vec<(String, Json)>) -> Vec<ParallelOutcome> {
        self.executor
            .parallel_nested(
                calls,
                self.identity.clone(),
                self.frame,
                self.trace_node.clone(),
                self.trace_id.clone(),
            )
            .await
    }

    /// Retrieve a pre-registered external I/O client (spec §4.12
    /// `adapter`). Fails with `ADAPTER_NOT_FOUND` if not registered, or if
    /// registered under a different type.
    pub fn adapter<T: 'static + Send + Sync>(&self, name: &str) -> ChainboxResult<Arc<T>> {
        let handle = self
            .adapters
            .get(name)
            .ok_or_else(|| ChainboxError::AdapterNotFound(name.to_string()))?;
        handle
            .clone()
            .downcast::<T>()
            .map_err(|_| ChainboxError::AdapterNotFound(name.to_string()))
    }

    /// The current frame, for diagnostics (spec §4.12 `getTrace`).
    pub fn get_trace(&self) -> TraceFrame {
        LiveTraceFrame::snapshot(&self.trace_node).0
    }
}
