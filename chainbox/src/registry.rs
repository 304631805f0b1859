//! Registry (spec §4.1): resolves dotted capability names to a
//! `CapabilitySource`, memoising the first successful resolution
//! process-wide (scoped here to one `Registry` instance per `Fabric`, per
//! Design Notes §9 "Global singletons").

use crate::error::{ChainboxError, ChainboxResult};
use crate::types::{CapabilitySource, Permissions};
use dashmap::DashMap;
use serde_json::Value as Json;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ChainboxResult<Json>> + Send>>;

/// A native, in-process capability handler. Takes the raw input and the
/// `Context` (boxed as `dyn std::any::Any` here would fight the type system;
/// instead `Context` is threaded through as a concrete type by `executor`,
/// which owns the handler-calling convention). The registry only needs to
/// know how to produce a future given input + a context handle.
pub type NativeHandler = Arc<dyn Fn(Json, crate::context::Context) -> HandlerFuture + Send + Sync>;

struct RegisteredCapability {
    source: CapabilitySource,
}

pub struct Registry {
    root: std::sync::RwLock<PathBuf>,
    cache_suffix: String,
    explicit: DashMap<String, RegisteredCapability>,
    resolved: DashMap<String, CapabilitySource>,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>, cache_suffix: impl Into<String>) -> Self {
        Self {
            root: std::sync::RwLock::new(root.into()),
            cache_suffix: cache_suffix.into(),
            explicit: DashMap::new(),
            resolved: DashMap::new(),
        }
    }

    /// A name ending in the configured `.Cached` suffix resolves as the bare
    /// name, with caching enabled for the call (spec §4.1).
    pub fn strip_cache_suffix<'a>(&self, name: &'a str) -> (&'a str, bool) {
        match name.strip_suffix(self.cache_suffix.as_str()) {
            Some(bare) => (bare, true),
            None => (name, false),
        }
    }

    /// Override filesystem lookup with an explicit handler (spec §4.1
    /// `register`).
    pub fn register(&self, name: impl Into<String>, handler: NativeHandler, permissions: Permissions) {
        let name = name.into();
        self.explicit.insert(
            name.clone(),
            RegisteredCapability {
                source: CapabilitySource::Native {
                    handler,
                    permissions,
                },
            },
        );
        self.resolved.remove(&name);
    }

    /// Clears the cache so subsequent lookups re-resolve under the new root
    /// (spec §4.1 `setRoot`).
    pub fn set_root(&self, dir: impl Into<PathBuf>) {
        *self.root.write().unwrap() = dir.into();
        self.resolved.clear();
    }

    pub fn resolve(&self, name: &str) -> ChainboxResult<CapabilitySource> {
        let (bare, _) = self.strip_cache_suffix(name);

        if let Some(cached) = self.resolved.get(bare) {
            return Ok(cached.clone());
        }

        // (1) explicit registrations
        if let Some(entry) = self.explicit.get(bare) {
            let source = entry.source.clone();
            self.resolved.insert(bare.to_string(), source.clone());
            return Ok(source);
        }

        // (2) native handler source in recognised code form, (3) bytecode module
        let root = self.root.read().unwrap().clone();
        if let Some(source) = self.resolve_from_filesystem(&root, bare)? {
            self.resolved.insert(bare.to_string(), source.clone());
            return Ok(source);
        }

        Err(ChainboxError::FunctionNotFound(name.to_string()))
    }

    /// Dots are path separators under the configured root (spec §4.1).
    fn resolve_from_filesystem(
        &self,
        root: &Path,
        name: &str,
    ) -> ChainboxResult<Option<CapabilitySource>> {
        let relative = name.replace('.', "/");
        let bytecode_path = root.join(format!("{relative}.wasm"));
        if bytecode_path.is_file() {
            let bytes = std::fs::read(&bytecode_path)
                .map_err(|e| ChainboxError::Internal(format!("reading {name}: {e}")))?;
            return Ok(Some(CapabilitySource::Bytecode {
                bytes,
                permissions: Permissions::default(),
            }));
        }
        Ok(None)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        let (bare, _) = self.strip_cache_suffix(name);
        self.explicit.contains_key(bare) || self.resolved.contains_key(bare)
    }
}
