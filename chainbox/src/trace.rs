//! The live, mutable trace tree the Executor builds during one invocation,
//! and its snapshot into the wire-serializable `TraceFrame` (spec §3
//! TraceFrame, §5 "Trace-tree children are appended in the order sub-calls
//! started, not the order they completed").
//!
//! `TraceFrame.children` is owned `Vec<TraceFrame>` for serialization; a
//! live invocation tree instead needs every node — root or nested — to be
//! addressable and mutable while its descendants are still running, so
//! `LiveTraceFrame` wraps each node in `Arc<Mutex<_>>` and a parent appends
//! a child handle the moment a nested call starts, before it's awaited.

use crate::error::Outcome;
use crate::types::{FrameStatus, Identity, Target, TraceFrame};
use std::sync::{Arc, Mutex};

pub struct LiveTraceFrame {
    pub fn_name: String,
    pub identity: Option<Identity>,
    pub target: Target,
    pub node_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub status: Option<FrameStatus>,
    pub outcome: Option<Outcome>,
    pub cached: Option<bool>,
    pub children: Vec<TraceHandle>,
}

pub type TraceHandle = Arc<Mutex<LiveTraceFrame>>;

impl LiveTraceFrame {
    pub fn new(fn_name: impl Into<String>, identity: Option<Identity>, target: Target) -> TraceHandle {
        Arc::new(Mutex::new(Self {
            fn_name: fn_name.into(),
            identity,
            target,
            node_id: None,
            duration_ms: None,
            status: None,
            outcome: None,
            cached: None,
            children: Vec::new(),
        }))
    }

    /// Appends a new child handle to `parent` and returns it, preserving
    /// start-order regardless of completion order.
    pub fn push_child(
        parent: &TraceHandle,
        fn_name: impl Into<String>,
        identity: Option<Identity>,
        target: Target,
    ) -> TraceHandle {
        let child = Self::new(fn_name, identity, target);
        parent.lock().unwrap().children.push(child.clone());
        child
    }

    /// Recursively snapshots a live handle into the serializable tree,
    /// coercing any frame that completed without an outcome to `FAILURE`
    /// (spec §3 invariant, §9 "Outcome inference"). Returns `true` if any
    /// frame in the subtree required coercion.
    pub fn snapshot(handle: &TraceHandle) -> (TraceFrame, bool) {
        let mut violated = false;
        let (fn_name, identity, target, node_id, duration_ms, mut status, mut outcome, cached, children) = {
            let node = handle.lock().unwrap();
            (
                node.fn_name.clone(),
                node.identity.clone(),
                node.target,
                node.node_id.clone(),
                node.duration_ms,
                node.status,
                node.outcome,
                node.cached,
                node.children.clone(),
            )
        };
        if outcome.is_none() {
            outcome = Some(Outcome::Failure);
            status = Some(FrameStatus::Error);
            violated = true;
        }
        let mut child_frames = Vec::with_capacity(children.len());
        for child in &children {
            let (frame, child_violated) = Self::snapshot(child);
            violated |= child_violated;
            child_frames.push(frame);
        }
        (
            TraceFrame {
                fn_name,
                identity,
                target,
                node_id,
                duration_ms,
                status,
                outcome,
                cached,
                children: child_frames,
            },
            violated,
        )
    }
}

pub fn depth_of(frame: &TraceFrame) -> u32 {
    1 + frame
        .children
        .iter()
        .map(depth_of)
        .max()
        .unwrap_or(0)
}
