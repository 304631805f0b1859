//! `Fabric`: the injected value that replaces the source's process-wide
//! singletons (spec §9 Design Notes "Global singletons"). Built once per
//! process (or once per test), so tests can construct fresh, isolated
//! instances instead of sharing global state.

use crate::audit::Audit;
use crate::auth::{Authenticator, AuthenticatorConfig};
use crate::cache::Cache;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::context::AdapterHandle;
use crate::mesh::transport::MeshTransport;
use crate::planner::Planner;
use crate::rate_limiter::RateLimiter;
use crate::registry::Registry;
use crate::signer::RequestSigner;
use crate::storage::{MemoryStorageAdapter, StorageAdapter};
use crate::telemetry::Telemetry;
use crate::tenant::TenantManager;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Fabric {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub authenticator: Option<Authenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub tenant_manager: Arc<TenantManager>,
    pub cache: Arc<Cache>,
    pub signer: Arc<RequestSigner>,
    pub planner: Arc<Planner>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub mesh: Arc<MeshTransport>,
    pub kv: Arc<dyn StorageAdapter>,
    pub blob: Arc<dyn StorageAdapter>,
    pub telemetry: Arc<Telemetry>,
    pub audit: Arc<Audit>,
    pub adapters: Arc<DashMap<String, AdapterHandle>>,
    /// Set on mesh node processes so nested Executor invocations treat
    /// `forceLocal` implicitly and do not re-plan (spec §4.13 "Safeguards").
    mesh_node: AtomicBool,
}

pub struct FabricBuilder {
    config: Config,
    registry_root: std::path::PathBuf,
    jwt_secret: Option<String>,
    kv: Option<Arc<dyn StorageAdapter>>,
    blob: Option<Arc<dyn StorageAdapter>>,
    now_ms: i64,
}

impl FabricBuilder {
    pub fn new(config: Config, now_ms: i64) -> Self {
        Self {
            config,
            registry_root: std::path::PathBuf::from("."),
            jwt_secret: None,
            kv: None,
            blob: None,
            now_ms,
        }
    }

    pub fn registry_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.registry_root = root.into();
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    pub fn kv(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.kv = Some(adapter);
        self
    }

    pub fn blob(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.blob = Some(adapter);
        self
    }

    pub fn build(self) -> Arc<Fabric> {
        let registry = Arc::new(Registry::new(self.registry_root, self.config.cache_suffix.clone()));
        let authenticator = self.jwt_secret.map(|secret| {
            Authenticator::new(AuthenticatorConfig {
                secret,
                ..Default::default()
            })
        });
        let rate_limiter = Arc::new(RateLimiter::new(self.config.rate_limit.clone()));
        let tenant_manager = Arc::new(TenantManager::new(self.config.tenants.clone()));
        let cache = Arc::new(Cache::new(self.config.cache, self.config.cache_suffix.clone()));
        let signer = Arc::new(RequestSigner::new(
            self.config.mesh.secret.clone(),
            self.config.mesh.signature_ttl_ms,
        ));
        let planner = Arc::new(Planner::new(
            self.config.mesh.nodes.clone(),
            self.config.mesh.routes.clone(),
            self.now_ms,
        ));
        let circuit_breaker = Arc::new(CircuitBreaker::new(self.config.circuit));
        let mesh = Arc::new(MeshTransport::new(
            self.config.mesh.connections,
            signer.clone(),
            circuit_breaker.clone(),
            planner.clone(),
        ));
        let telemetry = Arc::new(Telemetry::new(self.config.telemetry.clone()));
        let audit = Arc::new(Audit::new(self.config.audit.clone()));

        Arc::new(Fabric {
            config: self.config,
            registry,
            authenticator,
            rate_limiter,
            tenant_manager,
            cache,
            signer,
            planner,
            circuit_breaker,
            mesh,
            kv: self.kv.unwrap_or_else(|| Arc::new(MemoryStorageAdapter::default())),
            blob: self.blob.unwrap_or_else(|| Arc::new(MemoryStorageAdapter::default())),
            telemetry,
            audit,
            adapters: Arc::new(DashMap::new()),
            mesh_node: AtomicBool::new(false),
        })
    }
}

impl Fabric {
    pub fn register_adapter<T: 'static + Send + Sync>(&self, name: impl Into<String>, adapter: Arc<T>) {
        self.adapters.insert(name.into(), adapter as AdapterHandle);
    }

    pub fn is_mesh_node(&self) -> bool {
        self.mesh_node.load(Ordering::Relaxed)
    }

    /// Marks this process as a mesh node server (spec §4.13 "Safeguards").
    pub fn mark_as_mesh_node(&self) {
        self.mesh_node.store(true, Ordering::Relaxed);
    }
}
