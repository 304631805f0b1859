//! Executor (spec §4.11): lifecycle orchestration, the hard part. Resolves
//! identity, starts telemetry, applies gate checks, consults the cache,
//! plans local vs remote, and assembles the trace tree — all behind a
//! single outcome tag.

use crate::auth::Authenticator;
use crate::context::{Context, DbHandle, ScopedDbHandle, StorageNamespace};
use crate::error::{ChainboxError, ChainboxResult, ErrorEnvelope, Outcome};
use crate::fabric::Fabric;
use crate::trace::{LiveTraceFrame, TraceHandle};
use crate::types::{
    ExecutionFrame, ExecutionResult, FrameStatus, Identity, MeshBatchPayload, MeshCall,
    MeshPayload, Target,
};
use chrono::Utc;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone, Default)]
pub struct CallOptions {
    pub retries: u32,
}

/// Top-level invocation options (spec §4.11 public operation signature).
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub retries: u32,
    pub bearer_token: Option<String>,
    pub trace_id: Option<String>,
    pub force_local: bool,
    /// Set by the mesh entry point: the frame the caller already built,
    /// continued rather than re-rooted (spec §3, §4.11 step 2). `None`
    /// means this is a genuine new root invocation.
    pub inbound_frame: Option<ExecutionFrame>,
}

#[derive(Debug, Clone)]
pub enum ParallelOutcome {
    Ok(Json),
    Err(ErrorEnvelope),
}

/// Internal, fully-resolved description of one attempt through the
/// pipeline. Root calls have `parent` = `None`.
struct Invocation {
    fn_name: String,
    input: Json,
    identity: Option<Identity>,
    frame: ExecutionFrame,
    trace_id: String,
    parent: Option<TraceHandle>,
    force_local: bool,
}

pub struct Executor {
    fabric: Arc<Fabric>,
}

impl Executor {
    pub fn new(fabric: Arc<Fabric>) -> Arc<Self> {
        Arc::new(Self { fabric })
    }

    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    /// Public root entry point (spec §4.11 `execute`).
    pub async fn execute(
        self: &Arc<Self>,
        fn_name: &str,
        input: Json,
        identity: Option<Identity>,
        options: ExecuteOptions,
    ) -> ChainboxResult<ExecutionResult> {
        let identity = self.authenticate_if_needed(identity, &options)?;
        let trace_id = options.trace_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = now_ms();

        let frame = match options.inbound_frame {
            Some(inbound) => inbound.continue_remote(now),
            None => {
                let max_depth = identity
                    .as_ref()
                    .map(|i| self.fabric.tenant_manager.effective_limits(&crate::tenant::TenantManager::tenant_id(Some(i))).max_call_depth)
                    .unwrap_or(self.fabric.config.default_max_depth);
                let timeout_ms = identity
                    .as_ref()
                    .map(|i| self.fabric.tenant_manager.effective_limits(&crate::tenant::TenantManager::tenant_id(Some(i))).timeout_ms)
                    .unwrap_or(self.fabric.config.default_timeout_ms);
                ExecutionFrame::root(max_depth, timeout_ms, now)
            }
        };

        let invocation = Invocation {
            fn_name: fn_name.to_string(),
            input,
            identity,
            frame,
            trace_id: trace_id.clone(),
            parent: None,
            force_local: options.force_local,
        };

        let (handle, result) = self.run_with_retries(invocation, options.retries).await;
        let (trace_frame, violated) = LiveTraceFrame::snapshot(&handle);
        if violated {
            self.fabric.telemetry.record_invariant_violation();
        }

        let outcome = trace_frame.outcome.unwrap_or(Outcome::Failure);
        match result {
            Ok(value) => Ok(self.finish_root(value, outcome, trace_frame)),
            Err(err) => {
                let envelope = err.to_envelope(&trace_id);
                Ok(self.finish_root(
                    serde_json::to_value(&envelope).unwrap_or(Json::Null),
                    outcome,
                    trace_frame,
                ))
            }
        }
    }

    /// Redaction (spec §4.11): strip the trace tree in production; attach
    /// it under a reserved field otherwise.
    fn finish_root(&self, value: Json, outcome: Outcome, trace_frame: crate::types::TraceFrame) -> ExecutionResult {
        ExecutionResult {
            value,
            outcome,
            trace: if self.fabric.config.production {
                None
            } else {
                Some(trace_frame)
            },
        }
    }

    fn authenticate_if_needed(
        &self,
        identity: Option<Identity>,
        options: &ExecuteOptions,
    ) -> ChainboxResult<Option<Identity>> {
        if identity.is_some() {
            return Ok(identity);
        }
        match (&self.fabric.authenticator, &options.bearer_token) {
            (Some(authenticator), Some(token)) => authenticator.authenticate(token).map(Some),
            _ => Ok(None),
        }
    }

    /// Nested call from a `Context` (spec §4.12 `call`).
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn call_nested(
        self: &Arc<Self>,
        fn_name: &str,
        input: Json,
        identity: Option<Identity>,
        parent_frame: ExecutionFrame,
        parent_trace: TraceHandle,
        trace_id: String,
        opts: CallOptions,
    ) -> ChainboxResult<Json> {
        let now = now_ms();
        let frame = parent_frame.child(now, false);
        let invocation = Invocation {
            fn_name: fn_name.to_string(),
            input,
            identity,
            frame,
            trace_id,
            parent: Some(parent_trace),
            force_local: false,
        };
        let (_, result) = self.run_with_retries(invocation, opts.retries).await;
        result
    }

    /// `parallel` (spec §4.11 "Parallel execute" / §4.12 `parallel`):
    /// Planner each, group by destination, dispatch local and each remote
    /// group concurrently, preserve input indices.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn parallel_nested(
        self: &Arc<Self>,
        calls: Vec<(String, Json)>,
        identity: Option<Identity>,
        parent_frame: ExecutionFrame,
        parent_trace: TraceHandle,
        trace_id: String,
    ) -> Vec<ParallelOutcome> {
        self.parallel_inner(calls, identity, parent_frame, Some(parent_trace), trace_id)
            .await
    }

    /// Root-level `parallel` (spec §4.11 "Parallel execute"): `frame` is
    /// either a fresh root (direct, non-mesh callers) or an inbound frame
    /// continued across a mesh hop (the batch endpoint), never rebuilt
    /// here, so a batch arriving over the mesh can't reset the caller's
    /// depth budget (spec §3 invariant).
    pub async fn parallel_root(
        self: &Arc<Self>,
        calls: Vec<(String, Json)>,
        identity: Option<Identity>,
        trace_id: String,
        frame: ExecutionFrame,
    ) -> Vec<ParallelOutcome> {
        self.parallel_inner(calls, identity, frame, None, trace_id).await
    }

    async fn parallel_inner(
        self: &Arc<Self>,
        calls: Vec<(String, Json)>,
        identity: Option<Identity>,
        parent_frame: ExecutionFrame,
        parent_trace: Option<TraceHandle>,
        trace_id: String,
    ) -> Vec<ParallelOutcome> {
        let tenant_id = crate::tenant::TenantManager::tenant_id(identity.as_ref());
        let node_pool = self.fabric.tenant_manager.node_pool(&tenant_id);

        // Plan every call up front so failures on one don't block siblings.
        let plans: Vec<_> = calls
            .iter()
            .map(|(fn_name, _)| self.fabric.planner.plan(fn_name, node_pool.as_deref()))
            .collect();

        let mut remote_groups: HashMap<String, Vec<usize>> = HashMap::new();
        let mut local_indices = Vec::new();
        for (i, plan) in plans.iter().enumerate() {
            match (&plan.node_id, &plan.node_url) {
                (Some(node_id), Some(_)) => remote_groups.entry(node_id.clone()).or_default().push(i),
                _ => local_indices.push(i),
            }
        }

        let mut results: Vec<Option<ParallelOutcome>> = (0..calls.len()).map(|_| None).collect();

        // Local subset, concurrently.
        let local_futures = local_indices.iter().map(|&i| {
            let (fn_name, input) = calls[i].clone();
            let identity = identity.clone();
            let trace_id = trace_id.clone();
            let envelope_trace_id = trace_id.clone();
            let parent_trace = parent_trace.clone();
            async move {
                let outcome = match &parent_trace {
                    Some(parent) => {
                        self.call_nested(&fn_name, input, identity, parent_frame, parent.clone(), trace_id, CallOptions::default())
                            .await
                    }
                    None => {
                        match self
                            .execute(&fn_name, input, identity, ExecuteOptions {
                                trace_id: Some(trace_id),
                                force_local: true,
                                inbound_frame: Some(parent_frame),
                                ..Default::default()
                            })
                            .await
                        {
                            Ok(result) => Ok(result.value),
                            Err(e) => Err(e),
                        }
                    }
                };
                (i, to_parallel_outcome(outcome, &envelope_trace_id))
            }
        });
        for (i, outcome) in futures::future::join_all(local_futures).await {
            results[i] = Some(outcome);
        }

        // One batch per remote group, concurrently with the local subset's
        // sibling groups (spec §4.11 "Parallel execute").
        let remote_futures = remote_groups.into_iter().map(|(node_id, indices)| {
            let node_url = self.fabric.planner.node_url(&node_id).unwrap_or_default();
            let mesh_calls: Vec<MeshCall> = indices
                .iter()
                .map(|&i| MeshCall {
                    fn_name: calls[i].0.clone(),
                    input: calls[i].1.clone(),
                })
                .collect();
            let payload = MeshBatchPayload {
                calls: mesh_calls,
                identity: identity.clone(),
                frame: parent_frame,
                trace: Vec::new(),
                trace_id: trace_id.clone(),
            };
            let indices = indices.clone();
            let trace_id = trace_id.clone();
            async move {
                let outcome = self
                    .fabric
                    .mesh
                    .batch_call(&node_id, &node_url, &payload, now_ms)
                    .await;
                match outcome {
                    Ok(batch_results) => indices
                        .into_iter()
                        .zip(batch_results)
                        .map(|(i, r)| (i, ParallelOutcome::Ok(r.value)))
                        .collect::<Vec<_>>(),
                    Err(e) => {
                        let envelope = e.to_envelope(&trace_id);
                        indices
                            .into_iter()
                            .map(|i| (i, ParallelOutcome::Err(envelope.clone())))
                            .collect::<Vec<_>>()
                    }
                }
            }
        });
        for group_results in futures::future::join_all(remote_futures).await {
            for (i, outcome) in group_results {
                results[i] = Some(outcome);
            }
        }

        results.into_iter().map(|r| r.expect("every index planned")).collect()
    }

    async fn run_with_retries(
        self: &Arc<Self>,
        invocation: Invocation,
        retries: u32,
    ) -> (TraceHandle, ChainboxResult<Json>) {
        let max_attempts = retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let handle = match &invocation.parent {
                Some(parent) => LiveTraceFrame::push_child(
                    parent,
                    invocation.fn_name.clone(),
                    invocation.identity.clone(),
                    Target::Local,
                ),
                None => LiveTraceFrame::new(invocation.fn_name.clone(), invocation.identity.clone(), Target::Local),
            };

            let result = self.execute_attempt(&handle, &invocation).await;

            let should_retry = match &result {
                Ok(_) => false,
                Err(e) => {
                    attempt < max_attempts
                        && e.is_retryable()
                        && !matches!(e, ChainboxError::CircuitOpen { .. })
                }
            };

            if !should_retry {
                return (handle, result);
            }
        }
    }

    /// One pass of the pipeline (spec §4.11 steps 2-11).
    async fn execute_attempt(self: &Arc<Self>, handle: &TraceHandle, inv: &Invocation) -> ChainboxResult<Json> {
        let is_root = inv.parent.is_none();
        let fabric = &self.fabric;
        let span = fabric.telemetry.start_span(
            &inv.fn_name,
            &inv.trace_id,
            inv.frame.depth,
            if inv.force_local || fabric.is_mesh_node() { "local" } else { "unknown" },
        );
        let _span_guard = span.enter();
        fabric.telemetry.record_execution_start();

        if is_root {
            fabric.rate_limiter.enforce(inv.identity.as_ref(), &inv.fn_name, now_ms())?;
            fabric.tenant_manager.enforce(inv.identity.as_ref(), now_ms())?;
        }

        let start = now_ms();
        let result = self.run_pipeline(handle, inv, start).await;

        let duration_ms = (now_ms() - start).max(0) as u64;
        {
            let mut node = handle.lock().unwrap();
            node.duration_ms = Some(duration_ms);
        }
        fabric.telemetry.record_duration(&inv.fn_name, duration_ms);

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => e.outcome(),
        };
        fabric.telemetry.record_outcome(outcome);
        {
            let mut node = handle.lock().unwrap();
            node.outcome = Some(outcome);
            node.status = Some(if result.is_ok() { FrameStatus::Success } else { FrameStatus::Error });
        }

        if is_root {
            let success = result.is_ok();
            fabric.tenant_manager.record_call(inv.identity.as_ref(), success);
            if fabric.config.audit.enabled {
                let (trace_frame, _) = LiveTraceFrame::snapshot(handle);
                fabric.audit.record(crate::types::AuditEntry {
                    timestamp: start,
                    fn_name: inv.fn_name.clone(),
                    identity: inv.identity.as_ref().map(|i| i.id.clone()),
                    tenant_id: Some(crate::tenant::TenantManager::tenant_id(inv.identity.as_ref())),
                    status: trace_frame.status.unwrap_or(FrameStatus::Error),
                    duration_ms,
                    error: result.as_ref().err().map(|e| e.to_string()),
                    outcome,
                    trace_id: inv.trace_id.clone(),
                    trace: trace_frame,
                });
            }
        }

        result
    }

    async fn run_pipeline(self: &Arc<Self>, handle: &TraceHandle, inv: &Invocation, now: i64) -> ChainboxResult<Json> {
        // depth gate
        if inv.frame.exceeds_depth() {
            return Err(ChainboxError::MaxCallDepthExceeded {
                fn_name: inv.fn_name.clone(),
                depth: inv.frame.depth,
                max_depth: inv.frame.max_depth,
            });
        }

        let fabric = &self.fabric;
        let (bare_name, cacheable_by_suffix) = fabric.registry.strip_cache_suffix(&inv.fn_name);
        let cacheable = cacheable_by_suffix || fabric.cache.is_cacheable(&inv.fn_name);

        // cache probe
        if cacheable {
            if let Some(value) = fabric.cache.get(&inv.fn_name, &inv.input, now) {
                let mut node = handle.lock().unwrap();
                node.cached = Some(true);
                node.outcome = Some(Outcome::Success);
                node.status = Some(FrameStatus::Success);
                return Ok(value);
            }
        }

        // budget gate
        let elapsed = inv.frame.elapsed_ms(now);
        if elapsed >= inv.frame.timeout_ms {
            return Err(ChainboxError::ExecutionTimeout {
                fn_name: inv.fn_name.clone(),
                elapsed_ms: elapsed,
            });
        }

        // plan
        let run_local = inv.force_local || fabric.is_mesh_node();
        if !run_local {
            let tenant_id = crate::tenant::TenantManager::tenant_id(inv.identity.as_ref());
            let node_pool = fabric.tenant_manager.node_pool(&tenant_id);
            let plan = fabric.planner.plan(&inv.fn_name, node_pool.as_deref());
            if plan.target == Target::Remote {
                let node_id = plan.node_id.clone().unwrap();
                let node_url = plan.node_url.clone().unwrap();
                {
                    let mut node = handle.lock().unwrap();
                    node.target = Target::Remote;
                    node.node_id = Some(node_id.clone());
                }
                return self.run_remote(handle, inv, &node_id, &node_url, bare_name.to_string()).await;
            }
        }

        self.run_local(handle, inv, bare_name.to_string(), cacheable, now).await
    }

    async fn run_remote(
        self: &Arc<Self>,
        handle: &TraceHandle,
        inv: &Invocation,
        node_id: &str,
        node_url: &str,
        fn_name: String,
    ) -> ChainboxResult<Json> {
        let payload = MeshPayload {
            fn_name,
            input: inv.input.clone(),
            identity: inv.identity.clone(),
            frame: inv.frame,
            trace: Vec::new(),
            trace_id: inv.trace_id.clone(),
        };
        let result = self.fabric.mesh.call(node_id, node_url, &payload, now_ms).await?;
        if let Some(remote_trace) = result.trace {
            let child = LiveTraceFrame::new(remote_trace.fn_name.clone(), remote_trace.identity.clone(), remote_trace.target);
            {
                let mut c = child.lock().unwrap();
                c.node_id = remote_trace.node_id.clone();
                c.duration_ms = remote_trace.duration_ms;
                c.status = remote_trace.status;
                c.outcome = remote_trace.outcome;
                c.cached = remote_trace.cached;
            }
            handle.lock().unwrap().children.push(child);
        }
        Ok(result.value)
    }

    async fn run_local(
        self: &Arc<Self>,
        handle: &TraceHandle,
        inv: &Invocation,
        fn_name: String,
        cacheable: bool,
        now: i64,
    ) -> ChainboxResult<Json> {
        let fabric = &self.fabric;
        let source = fabric.registry.resolve(&fn_name)?;
        crate::policy::Policy::enforce(&fn_name, &source, inv.identity.as_ref())?;

        let ctx = Context {
            input: inv.input.clone(),
            identity: inv.identity.clone(),
            trace_id: inv.trace_id.clone(),
            db: self.db_handle(inv.identity.as_ref()),
            kv: StorageNamespace::new(fabric.kv.clone(), "kv"),
            blob: StorageNamespace::new(fabric.blob.clone(), "blob"),
            env: std::env::vars().collect(),
            frame: inv.frame,
            trace_node: handle.clone(),
            executor: self.clone(),
            adapters: fabric.adapters.clone(),
        };

        let remaining = inv.frame.timeout_ms.saturating_sub(inv.frame.elapsed_ms(now));
        let handler_fn = match &source {
            crate::types::CapabilitySource::Native { handler, .. } => handler.clone(),
            crate::types::CapabilitySource::Bytecode { .. } => {
                return Err(ChainboxError::Internal(
                    "bytecode capability execution requires a host runtime, not wired in this build".to_string(),
                ));
            }
        };

        let outcome = crate::net::deny_network(tokio::time::timeout(
            Duration::from_millis(remaining.max(1)),
            handler_fn(inv.input.clone(), ctx),
        ))
        .await;

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ChainboxError::ExecutionTimeout {
                    fn_name: fn_name.clone(),
                    elapsed_ms: inv.frame.elapsed_ms(now_ms()),
                })
            }
        };

        if cacheable {
            fabric.cache.set(&inv.fn_name, &inv.input, value.clone(), now_ms());
        }

        Ok(value)
    }

    fn db_handle(&self, identity: Option<&Identity>) -> Arc<dyn DbHandle> {
        Arc::new(ScopedDbHandle::for_identity(identity))
    }
}

fn to_parallel_outcome(result: ChainboxResult<Json>, trace_id: &str) -> ParallelOutcome {
    match result {
        Ok(value) => ParallelOutcome::Ok(value),
        Err(e) => ParallelOutcome::Err(e.to_envelope(trace_id)),
    }
}
