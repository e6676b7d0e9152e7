use seamswap::backends::reference::{
    reference_manifest, reference_pool, register_reference_backends,
};
use seamswap::backends::{AdapterCatalog, BackendKind};
use seamswap::builder::PatchBuilder;
use seamswap::compat::BackendVersion;
use seamswap::errors::SeamError;
use seamswap::pool::{get_conn, new_conn, put_conn, PoolRef};
use seamswap::registry::{BackendManifest, SeamRegistry};
use seamswap::restore::force_restore;
use seamswap::scope::ScopedResource;
use seamswap::seam::{PatchSpec, SeamKey, SeamValue};
use seamswap::session::{Session, SessionId};
use seamswap::stubs::StandardStubs;
use seamswap::transport::{Request, TransportType};
use std::sync::Arc;

fn registry_with(kinds: &[BackendKind]) -> Arc<SeamRegistry> {
    let registry = Arc::new(SeamRegistry::new());
    register_reference_backends(&registry, kinds).expect("register");
    registry
}

fn session(id: &str) -> Session {
    Session::new(SessionId::new(id), Arc::new(StandardStubs::new()))
}

fn current_transport(registry: &SeamRegistry, key: &SeamKey) -> Arc<TransportType> {
    registry
        .get(key)
        .and_then(|value| value.as_transport().cloned())
        .expect("transport seam")
}

#[test]
fn nested_sessions_restore_outer_substitute_then_pristine() {
    let registry = registry_with(&[BackendKind::StdHttp]);
    let key = SeamKey::new("std_http", "HttpConnection");
    let pristine = current_transport(&registry, &key);

    let a = session("cassettes/a.yaml");
    let scope_a = PatchBuilder::new(&registry, &a).start().expect("enter a");
    let during_a = current_transport(&registry, &key);
    assert!(during_a.is_bound_to(a.id()));

    let b = session("cassettes/b.yaml");
    let scope_b = PatchBuilder::new(&registry, &b).start().expect("enter b");
    assert!(current_transport(&registry, &key).is_bound_to(b.id()));

    assert!(scope_b.close().is_clean());
    assert!(Arc::ptr_eq(&current_transport(&registry, &key), &during_a));
    assert_eq!(registry.owner(&key), Some(a.id().clone()));

    assert!(scope_a.close().is_clean());
    assert!(Arc::ptr_eq(&current_transport(&registry, &key), &pristine));
    assert!(registry.is_pristine(&key));
}

#[test]
fn many_lifo_sessions_restore_every_seam_exactly() {
    let registry = registry_with(&BackendKind::ALL);
    let snapshot: Vec<(SeamKey, SeamValue)> = registry
        .keys()
        .into_iter()
        .map(|key| {
            let value = registry.get(&key).expect("value");
            (key, value)
        })
        .collect();

    let sessions: Vec<Session> = (0..4).map(|i| session(&format!("session-{i}"))).collect();
    let mut scopes = Vec::new();
    for session in &sessions {
        scopes.push(PatchBuilder::new(&registry, session).start().expect("enter"));
        assert_eq!(registry.patched_keys().len(), snapshot.len());
    }
    while let Some(scope) = scopes.pop() {
        assert!(scope.close().is_clean());
    }

    for (key, value) in &snapshot {
        assert!(registry.get(key).expect("value").same_as(value), "{key} changed");
        assert!(registry.is_pristine(key), "{key} still owned");
    }
}

#[test]
fn pool_is_scrubbed_of_session_connections_only() {
    let registry = registry_with(&[BackendKind::Pooled]);
    let lifo = reference_pool(BackendKind::Pooled, "HttpConnectionPool", "example.com");
    let pool: PoolRef = lifo.clone();

    // checked out before the session starts, returned while it runs
    let older = new_conn(&registry, &pool).expect("older");
    let legacy = new_conn(&registry, &pool).expect("legacy");
    let (older_id, legacy_id) = (older.id(), legacy.id());

    let a = session("a");
    let scope = PatchBuilder::new(&registry, &a).start().expect("enter");
    let first = get_conn(&registry, &pool).expect("first");
    let second = get_conn(&registry, &pool).expect("second");
    assert_eq!(first.owner(), Some(a.id()));
    assert_eq!(second.owner(), Some(a.id()));

    put_conn(&pool, older);
    put_conn(&pool, first);
    put_conn(&pool, legacy);
    put_conn(&pool, second);
    assert_eq!(pool.idle_len(), 4);

    assert!(scope.close().is_clean());
    assert_eq!(lifo.idle_ids(), vec![legacy_id, older_id]);

    // after the session the pristine primitives hand the old connections out again
    let reused = get_conn(&registry, &pool).expect("reused");
    assert_eq!(reused.id(), legacy_id);
    assert!(reused.owner().is_none());
}

#[test]
fn stale_idle_connections_are_never_handed_to_a_session() {
    let registry = registry_with(&[BackendKind::Sessions]);
    let lifo = reference_pool(BackendKind::Sessions, "HttpsConnectionPool", "example.com");
    let pool: PoolRef = lifo.clone();
    for _ in 0..3 {
        let stale = new_conn(&registry, &pool).expect("stale");
        put_conn(&pool, stale);
    }

    let a = session("a");
    let scope = PatchBuilder::new(&registry, &a).start().expect("enter");
    let connection = get_conn(&registry, &pool).expect("acquire");
    assert_eq!(connection.owner(), Some(a.id()));
    assert_eq!(pool.idle_len(), 0);
    put_conn(&pool, connection);
    assert!(scope.close().is_clean());
    assert_eq!(pool.idle_len(), 0);
}

#[test]
fn inner_session_never_reuses_outer_session_connections() {
    let registry = registry_with(&[BackendKind::Pooled]);
    let pool: PoolRef = reference_pool(BackendKind::Pooled, "HttpConnectionPool", "example.com");

    let a = session("outer");
    let scope_a = PatchBuilder::new(&registry, &a).start().expect("enter a");
    let from_a = get_conn(&registry, &pool).expect("a");
    put_conn(&pool, from_a);

    let b = session("inner");
    let scope_b = PatchBuilder::new(&registry, &b).start().expect("enter b");
    let from_b = get_conn(&registry, &pool).expect("b");
    assert_eq!(from_b.owner(), Some(b.id()));
    put_conn(&pool, from_b);

    assert!(scope_b.close().is_clean());
    assert_eq!(pool.idle_len(), 0);
    assert!(scope_a.close().is_clean());
    assert!(registry.patched_keys().is_empty());
}

#[test]
fn custom_triples_build_one_handle_for_the_present_attribute() {
    let registry = registry_with(&[BackendKind::CertHttp]);
    let custom = session("custom")
        .with_custom_patch(PatchSpec::new(
            "cert_http",
            "CertValidatingHttpsConnection",
            SeamValue::Transport(TransportType::instrumented("CustomCert", None)),
        ))
        .with_custom_patch(PatchSpec::new(
            "cert_http",
            "MissingAttribute",
            SeamValue::Transport(TransportType::instrumented("Nowhere", None)),
        ));
    let resources = PatchBuilder::new(&registry, &custom)
        .with_catalog(AdapterCatalog::default())
        .build();
    assert_eq!(resources.len(), 1);
    assert_eq!(
        resources[0].as_patch().expect("patch").key(),
        &SeamKey::new("cert_http", "CertValidatingHttpsConnection")
    );
}

#[test]
fn absent_backends_are_skipped_silently() {
    let registry = Arc::new(SeamRegistry::new());
    let lonely = session("nothing-installed");
    let scope = PatchBuilder::new(&registry, &lonely).start().expect("enter");
    assert!(scope.is_empty());
    let report = scope.close();
    assert!(report.is_clean());
    assert_eq!(report.exited, 0);
}

#[test]
fn handler_seams_route_through_the_session_while_active() {
    let registry = registry_with(&[BackendKind::ClientSession]);
    let key = SeamKey::new("client_session.ClientSession", "request");
    let call = |registry: &SeamRegistry| {
        registry
            .get(&key)
            .and_then(|value| value.as_handler().cloned())
            .expect("handler")
            .call(&Request::get("https://example.com/"))
            .expect("response")
    };

    let replay = session("replay");
    let scope = PatchBuilder::new(&registry, &replay).start().expect("enter");
    assert_eq!(call(&registry).served_by, "client_session:replay <- network");
    assert!(scope.close().is_clean());
    assert_eq!(call(&registry).served_by, "network");
}

#[test]
fn force_restore_overrides_an_active_session_temporarily() {
    let registry = registry_with(&[BackendKind::StdHttp, BackendKind::TimeoutHttp]);
    let a = session("a");
    let scope = PatchBuilder::new(&registry, &a).start().expect("enter");
    let patched = registry.patched_keys();
    assert_eq!(patched.len(), 5);

    let mut restore = force_restore(&registry);
    restore.enter().expect("restore");
    assert!(registry.patched_keys().is_empty());
    restore.exit().expect("reinstate");
    assert_eq!(registry.patched_keys(), patched);

    assert!(scope.close().is_clean());
    assert!(registry.patched_keys().is_empty());
}

#[test]
fn permanent_reset_recovers_from_a_leaked_session() {
    let registry = registry_with(&[BackendKind::StdHttp]);
    let a = session("leaked");
    let scope = PatchBuilder::new(&registry, &a).start().expect("enter");
    std::mem::forget(scope);
    assert_eq!(registry.reset_to_pristine(), 2);
    assert!(registry.patched_keys().is_empty());
}

#[test]
fn incompatible_backends_fail_registration_and_contribute_nothing() {
    let registry = Arc::new(SeamRegistry::new());
    let mut old = reference_manifest(BackendKind::Sessions);
    old.version = BackendVersion::new(2, 16, 1);
    assert!(matches!(
        registry.register_backend(old),
        Err(SeamError::IncompatibleBackend(_))
    ));

    let mut legacy = BackendManifest::new(BackendKind::Aws, BackendVersion::new(1, 10, 0));
    legacy.legacy_layout = true;
    assert!(matches!(
        registry.register_backend(legacy),
        Err(SeamError::IncompatibleBackend(_))
    ));

    let s = session("s");
    assert!(PatchBuilder::new(&registry, &s).build().is_empty());
}

#[test]
fn substitutes_are_stable_within_a_session() {
    let registry = registry_with(&[BackendKind::TimeoutHttp]);
    let s = session("stable");
    let scope = PatchBuilder::new(&registry, &s).start().expect("enter");
    let direct = current_transport(
        &registry,
        &SeamKey::new("timeout_http", "HttpConnectionWithTimeout"),
    );
    let table = registry
        .get(&SeamKey::new("timeout_http", "SCHEME_TO_CONNECTION"))
        .expect("table");
    let via_table = table.as_table().expect("table")["http"]
        .as_transport()
        .cloned()
        .expect("transport");
    assert!(Arc::ptr_eq(&direct, &via_table));
    assert!(scope.close().is_clean());
}

#[test]
fn concurrent_checkouts_leave_no_session_connections_behind() {
    let registry = registry_with(&[BackendKind::Pooled]);
    let lifo = reference_pool(BackendKind::Pooled, "HttpsConnectionPool", "example.com");
    let pool: PoolRef = lifo.clone();
    let before = new_conn(&registry, &pool).expect("before");
    put_conn(&pool, before);

    let worker = session("threads");
    let scope = PatchBuilder::new(&registry, &worker).start().expect("enter");
    let owner = worker.id().clone();
    std::thread::scope(|threads| {
        for _ in 0..8 {
            threads.spawn(|| {
                for _ in 0..200 {
                    let connection = get_conn(&registry, &pool).expect("acquire");
                    assert_eq!(connection.owner(), Some(&owner));
                    put_conn(&pool, connection);
                }
            });
        }
    });
    assert!(pool.idle_len() > 0);

    assert!(scope.close().is_clean());
    let mut leftover = Vec::new();
    while let Some(connection) = pool.take_idle() {
        leftover.push(connection);
    }
    assert!(leftover
        .iter()
        .all(|connection| connection.owner() != Some(&owner)));
    assert!(registry.patched_keys().is_empty());
}
