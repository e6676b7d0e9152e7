use crate::pool::ConnectionPoolGuard;
use crate::registry::SeamRegistry;
use crate::seam::{PatchSpec, SeamKey};
use crate::session::Session;
use crate::substitute::SubstituteTypeCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod direct;
pub mod handlers;
pub mod pooled;
pub mod reference;

/// Supported client stacks, declared in build order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    StdHttp,
    Sessions,
    Aws,
    Pooled,
    TimeoutHttp,
    CertHttp,
    AsyncFetch,
    ClientSession,
    DualClient,
}

impl BackendKind {
    pub const ALL: [BackendKind; 9] = [
        Self::StdHttp,
        Self::Sessions,
        Self::Aws,
        Self::Pooled,
        Self::TimeoutHttp,
        Self::CertHttp,
        Self::AsyncFetch,
        Self::ClientSession,
        Self::DualClient,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "std_http" => Some(Self::StdHttp),
            "sessions" => Some(Self::Sessions),
            "aws" => Some(Self::Aws),
            "pooled" => Some(Self::Pooled),
            "timeout_http" => Some(Self::TimeoutHttp),
            "cert_http" => Some(Self::CertHttp),
            "async_fetch" => Some(Self::AsyncFetch),
            "client_session" => Some(Self::ClientSession),
            "dual_client" => Some(Self::DualClient),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StdHttp => "std_http",
            Self::Sessions => "sessions",
            Self::Aws => "aws",
            Self::Pooled => "pooled",
            Self::TimeoutHttp => "timeout_http",
            Self::CertHttp => "cert_http",
            Self::AsyncFetch => "async_fetch",
            Self::ClientSession => "client_session",
            Self::DualClient => "dual_client",
        }
    }
}

pub struct AdapterContext<'a> {
    pub registry: &'a Arc<SeamRegistry>,
    pub session: &'a Session,
    pub cache: &'a SubstituteTypeCache,
    pub acquire_limit: usize,
}

#[derive(Debug, Default)]
pub struct AdapterOutput {
    pub specs: Vec<PatchSpec>,
    pub guards: Vec<ConnectionPoolGuard>,
}

impl AdapterOutput {
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty() && self.guards.is_empty()
    }
}

pub trait SeamAdapter: Send + Sync {
    fn backend(&self) -> BackendKind;
    /// Every seam this adapter may patch, in emission order.
    fn declared_seams(&self) -> Vec<SeamKey>;
    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput;
}

#[derive(Default)]
pub struct AdapterCatalog {
    adapters: BTreeMap<BackendKind, Arc<dyn SeamAdapter>>,
}

impl AdapterCatalog {
    pub fn with_defaults() -> Self {
        let mut this = Self::default();
        this.register(Arc::new(direct::StdHttpAdapter));
        this.register(Arc::new(pooled::PoolAwareAdapter::sessions()));
        this.register(Arc::new(direct::AwsAdapter));
        this.register(Arc::new(pooled::PoolAwareAdapter::pooled()));
        this.register(Arc::new(direct::TimeoutHttpAdapter));
        this.register(Arc::new(direct::CertHttpAdapter));
        this.register(Arc::new(handlers::AsyncFetchAdapter));
        this.register(Arc::new(handlers::ClientSessionAdapter));
        this.register(Arc::new(handlers::DualClientAdapter));
        this
    }

    pub fn register(&mut self, adapter: Arc<dyn SeamAdapter>) {
        self.adapters.insert(adapter.backend(), adapter);
    }

    pub fn get(&self, backend: BackendKind) -> Option<Arc<dyn SeamAdapter>> {
        self.adapters.get(&backend).cloned()
    }

    pub fn without(mut self, disabled: &[BackendKind]) -> Self {
        for backend in disabled {
            self.adapters.remove(backend);
        }
        self
    }

    /// Adapters in build order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SeamAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
