use crate::backends::{AdapterCatalog, AdapterContext};
use crate::config::{SeamConfig, DEFAULT_ACQUIRE_LIMIT};
use crate::errors::SeamError;
use crate::logging::append_run_log;
use crate::patch::build_patch;
use crate::registry::SeamRegistry;
use crate::scope::{SessionResource, SessionScope};
use crate::session::Session;
use crate::substitute::SubstituteTypeCache;
use serde_json::json;
use std::sync::Arc;

pub struct PatchBuilder<'a> {
    registry: &'a Arc<SeamRegistry>,
    session: &'a Session,
    catalog: AdapterCatalog,
    acquire_limit: usize,
    cache: SubstituteTypeCache,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(registry: &'a Arc<SeamRegistry>, session: &'a Session) -> Self {
        Self {
            registry,
            session,
            catalog: AdapterCatalog::with_defaults(),
            acquire_limit: DEFAULT_ACQUIRE_LIMIT,
            cache: SubstituteTypeCache::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: AdapterCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_config(mut self, config: &SeamConfig) -> Self {
        self.catalog = self.catalog.without(&config.disabled_backends());
        self.acquire_limit = config.pool.acquire_limit;
        self
    }

    pub fn cache(&self) -> &SubstituteTypeCache {
        &self.cache
    }

    /// Every enabled adapter's handles in build order, each pool-aware
    /// adapter's guards right after its handles, then the session's custom
    /// patches. Seams the registry does not hold produce nothing.
    pub fn build(&self) -> Vec<SessionResource> {
        let session_id = self.session.id();
        let context = AdapterContext {
            registry: self.registry,
            session: self.session,
            cache: &self.cache,
            acquire_limit: self.acquire_limit,
        };
        let mut resources = Vec::new();
        for adapter in self.catalog.iter() {
            let backend = adapter.backend();
            if !self.registry.has_backend(backend) {
                append_run_log(
                    "debug",
                    "seam.builder.skip",
                    json!({ "backend": backend.as_str(), "session": session_id.as_str() }),
                );
                continue;
            }
            let output = adapter.build(&context);
            resources.extend(
                output
                    .specs
                    .iter()
                    .filter_map(|spec| build_patch(self.registry, spec, &self.cache, session_id))
                    .map(SessionResource::Patch),
            );
            resources.extend(output.guards.into_iter().map(SessionResource::PoolGuard));
        }
        resources.extend(
            self.session
                .custom_patches()
                .iter()
                .filter_map(|spec| build_patch(self.registry, spec, &self.cache, session_id))
                .map(SessionResource::Patch),
        );
        append_run_log(
            "info",
            "seam.builder.built",
            json!({
                "session": session_id.as_str(),
                "resources": resources.len(),
                "substitutes": self.cache.len(),
            }),
        );
        resources
    }

    /// Build and enter everything in one go.
    pub fn start(&self) -> Result<SessionScope, SeamError> {
        SessionScope::enter(self.session.id().clone(), self.build())
    }
}
