use crate::backends::reference::{reference_pool, register_reference_backends};
use crate::backends::{AdapterCatalog, BackendKind};
use crate::builder::PatchBuilder;
use crate::config::SeamConfig;
use crate::errors::SeamError;
use crate::logging::append_run_log;
use crate::pool::{get_conn, new_conn, PoolRef};
use crate::registry::SeamRegistry;
use crate::seam::SeamValue;
use crate::session::{Session, SessionId};
use crate::stubs::StandardStubs;
use crate::transport::Request;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// One `backend<TAB>seam` line per declared seam of every enabled adapter.
pub fn list_seams(config: &SeamConfig) -> Vec<String> {
    let catalog = AdapterCatalog::with_defaults().without(&config.disabled_backends());
    catalog
        .iter()
        .flat_map(|adapter| {
            let backend = adapter.backend().as_str();
            adapter
                .declared_seams()
                .into_iter()
                .map(move |key| format!("{backend}\t{key}"))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelfCheckSummary {
    pub backends: usize,
    pub seams: usize,
    pub resources: usize,
    pub patched: usize,
    pub handler_calls: usize,
    pub pool_checkouts: usize,
}

impl SelfCheckSummary {
    pub fn render(&self) -> String {
        format!(
            "self-check ok: backends={} seams={} resources={} patched={} handler_calls={} pool_checkouts={}",
            self.backends,
            self.seams,
            self.resources,
            self.patched,
            self.handler_calls,
            self.pool_checkouts
        )
    }
}

/// Register every enabled reference backend in a private registry, run one
/// session over it, and check afterwards that every seam is pristine again and
/// no pool still holds one of the session's connections.
pub fn run_self_check(config: &SeamConfig) -> Result<SelfCheckSummary, SeamError> {
    let registry = Arc::new(SeamRegistry::new());
    let enabled = config.enabled_backends();
    register_reference_backends(&registry, &enabled)?;

    let mut pools: Vec<PoolRef> = Vec::new();
    for backend in [BackendKind::Sessions, BackendKind::Pooled] {
        if enabled.contains(&backend) {
            for class in ["HttpConnectionPool", "HttpsConnectionPool"] {
                let pool: PoolRef = reference_pool(backend, class, "self-check.invalid");
                let existing = new_conn(&registry, &pool)?;
                pool.put_idle(existing);
                pools.push(pool);
            }
        }
    }
    let session = Session::new(
        SessionId::new("seamswap-self-check"),
        Arc::new(StandardStubs::new()),
    );
    let scope = PatchBuilder::new(&registry, &session)
        .with_config(config)
        .start()?;

    let mut summary = SelfCheckSummary {
        backends: enabled.len(),
        seams: registry.keys().len(),
        resources: scope.len(),
        patched: registry.patched_keys().len(),
        ..SelfCheckSummary::default()
    };

    let exercised = exercise(&registry, &session, &pools, &mut summary);
    let report = scope.close();
    exercised?;

    if !report.is_clean() {
        return Err(SeamError::Teardown(report.failures.join("; ")));
    }
    let leftover = registry.patched_keys();
    if !leftover.is_empty() {
        let names: Vec<String> = leftover.iter().map(ToString::to_string).collect();
        return Err(SeamError::Teardown(format!(
            "seams not restored: {}",
            names.join(", ")
        )));
    }
    for pool in &pools {
        let owned = count_owned(pool, session.id());
        if owned > 0 {
            return Err(SeamError::Teardown(format!(
                "{} still holds {owned} connections of the finished session",
                pool.pool_class()
            )));
        }
    }

    append_run_log("info", "seam.self_check.completed", json!(summary));
    Ok(summary)
}

// Takes every idle connection and puts them back in their original order.
fn count_owned(pool: &PoolRef, session: &SessionId) -> usize {
    let mut idle = Vec::new();
    while let Some(connection) = pool.take_idle() {
        idle.push(connection);
    }
    let owned = idle
        .iter()
        .filter(|connection| connection.owner() == Some(session))
        .count();
    for connection in idle.into_iter().rev() {
        pool.put_idle(connection);
    }
    owned
}

fn exercise(
    registry: &SeamRegistry,
    session: &Session,
    pools: &[PoolRef],
    summary: &mut SelfCheckSummary,
) -> Result<(), SeamError> {
    for pool in pools {
        let connection = get_conn(registry, pool)?;
        if connection.owner() != Some(session.id()) {
            return Err(SeamError::Pool(format!(
                "{} handed out {} outside the session",
                pool.pool_class(),
                connection.transport().name()
            )));
        }
        pool.put_idle(connection);
        summary.pool_checkouts += 1;
    }
    for key in registry.keys() {
        if let Some(SeamValue::Handler(handler)) = registry.get(&key) {
            if handler.owner() != Some(session.id()) {
                return Err(SeamError::Transport(format!("{key} is not intercepted")));
            }
            handler.call(&Request::get("https://self-check.invalid/"))?;
            summary.handler_calls += 1;
        }
    }
    Ok(())
}
