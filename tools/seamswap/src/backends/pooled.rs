//! Adapter for connection-pooling stacks.
//!
//! Swapping the connection type is not enough here: pools keep idle
//! connections around across sessions. The adapter therefore also wraps each
//! pool's create primitive (to track the session's connections), its acquire
//! primitive (to skip connections of another type) and the liveness probe, and
//! hands back one guard per pool class that scrubs the session's connections
//! on teardown.

use super::{AdapterContext, AdapterOutput, BackendKind, SeamAdapter};
use crate::pool::{
    acquire_wrapper, create_wrapper, never_dropped, ConnectionPoolGuard, PoolEntryTracker,
    CONNECTION_CLS, GET_CONN, IS_CONNECTION_DROPPED, NEW_CONN,
};
use crate::seam::{PatchSpec, SeamKey, SeamValue};
use std::sync::Arc;

/// Connection-type attribute and the stub swapped in for it. Every HTTPS
/// binding shares one stub so the pool's `ConnectionCls` and the module-level
/// types resolve to the same substitute.
const CONNECTION_TYPES: [(&str, &str); 3] = [
    ("VerifiedHttpsConnection", "HttpsConnection"),
    ("HttpConnection", "HttpConnection"),
    ("HttpsConnection", "HttpsConnection"),
];

/// Pool class suffix and the stub its `ConnectionCls` is swapped for.
const POOL_CLASSES: [(&str, &str); 2] = [
    ("HttpConnectionPool", "HttpConnection"),
    ("HttpsConnectionPool", "HttpsConnection"),
];

pub struct PoolAwareAdapter {
    backend: BackendKind,
    namespace: &'static str,
}

impl PoolAwareAdapter {
    pub fn pooled() -> Self {
        Self {
            backend: BackendKind::Pooled,
            namespace: "pooled",
        }
    }

    /// The copy of the pooling stack bundled inside the sessions client.
    pub fn sessions() -> Self {
        Self {
            backend: BackendKind::Sessions,
            namespace: "sessions",
        }
    }

    fn connection_target(&self) -> String {
        format!("{}.connection", self.namespace)
    }

    fn probe_target(&self) -> String {
        format!("{}.connectionpool", self.namespace)
    }

    fn pool_target(&self, class: &str) -> String {
        format!("{}.{class}", self.namespace)
    }
}

impl SeamAdapter for PoolAwareAdapter {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn declared_seams(&self) -> Vec<SeamKey> {
        let mut seams: Vec<SeamKey> = CONNECTION_TYPES
            .iter()
            .map(|(attribute, _)| SeamKey::new(self.connection_target(), *attribute))
            .collect();
        seams.push(SeamKey::new(self.probe_target(), IS_CONNECTION_DROPPED));
        for (class, _) in POOL_CLASSES {
            let target = self.pool_target(class);
            for attribute in [CONNECTION_CLS, NEW_CONN, GET_CONN] {
                seams.push(SeamKey::new(target.clone(), attribute));
            }
        }
        seams
    }

    fn build(&self, context: &AdapterContext<'_>) -> AdapterOutput {
        let stubs = context.session.stubs();
        let mut output = AdapterOutput::default();

        for (attribute, name) in CONNECTION_TYPES {
            if let Some(stub) = stubs.transport(self.backend, name) {
                output.specs.push(PatchSpec::new(
                    self.connection_target(),
                    attribute,
                    SeamValue::Transport(stub),
                ));
            }
        }
        output.specs.push(PatchSpec::new(
            self.probe_target(),
            IS_CONNECTION_DROPPED,
            SeamValue::Probe(never_dropped()),
        ));

        for (class, connection) in POOL_CLASSES {
            let Some(stub) = stubs.transport(self.backend, connection) else {
                continue;
            };
            let target = self.pool_target(class);
            let substitute = context.cache.get(&stub, context.session.id());
            output.specs.push(PatchSpec::new(
                target.clone(),
                CONNECTION_CLS,
                SeamValue::Transport(stub),
            ));

            // create before acquire: the acquire wrapper relies on new
            // connections already being of the substitute type
            if let Some(SeamValue::Create(create)) =
                context.registry.get(&SeamKey::new(target.clone(), NEW_CONN))
            {
                let tracker = Arc::new(PoolEntryTracker::new(substitute));
                output.specs.push(PatchSpec::new(
                    target.clone(),
                    NEW_CONN,
                    SeamValue::Create(create_wrapper(create, Arc::clone(&tracker))),
                ));
                output.guards.push(ConnectionPoolGuard::new(tracker));
            }
            if let Some(SeamValue::Acquire(acquire)) =
                context.registry.get(&SeamKey::new(target.clone(), GET_CONN))
            {
                let fallback = SeamKey::new(self.connection_target(), connection);
                output.specs.push(PatchSpec::new(
                    target,
                    GET_CONN,
                    SeamValue::Acquire(acquire_wrapper(acquire, fallback, context.acquire_limit)),
                ));
            }
        }
        output
    }
}
