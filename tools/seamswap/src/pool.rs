//! Connection pools, the pool primitives that pool-aware stacks expose as
//! seams, and the guard that scrubs session-owned connections out of pools
//! when a session ends.

use crate::errors::SeamError;
use crate::logging::append_run_log;
use crate::registry::SeamRegistry;
use crate::scope::ScopedResource;
use crate::seam::{AcquireFn, CreateFn, ProbeFn, SeamKey, SeamValue};
use crate::transport::{Connection, ConnectionId, TransportType};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub const CONNECTION_CLS: &str = "ConnectionCls";
pub const NEW_CONN: &str = "new_conn";
pub const GET_CONN: &str = "get_conn";
pub const IS_CONNECTION_DROPPED: &str = "is_connection_dropped";

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    pub fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The idle-connection queue of a pool.
///
/// `put_idle` must make the connection the next one `take_idle` returns
/// (stack discipline). Both operations are expected to be thread-safe.
pub trait ConnectionPool: Send + Sync {
    fn pool_id(&self) -> PoolId;
    /// Seam target holding this pool's `ConnectionCls`, `new_conn` and `get_conn`.
    fn pool_class(&self) -> &str;
    /// Seam target holding `is_connection_dropped`.
    fn probe_target(&self) -> &str;
    fn host(&self) -> &str;
    fn take_idle(&self) -> Option<Connection>;
    fn put_idle(&self, connection: Connection);
    fn idle_len(&self) -> usize;
}

pub type PoolRef = Arc<dyn ConnectionPool>;

/// In-memory LIFO pool.
pub struct LifoPool {
    id: PoolId,
    class: String,
    probe_target: String,
    host: String,
    idle: Mutex<Vec<Connection>>,
}

impl LifoPool {
    pub fn new(
        class: impl Into<String>,
        probe_target: impl Into<String>,
        host: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: PoolId::next(),
            class: class.into(),
            probe_target: probe_target.into(),
            host: host.into(),
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Idle connection ids, next-to-be-taken first.
    pub fn idle_ids(&self) -> Vec<ConnectionId> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .map(Connection::id)
            .collect()
    }
}

impl ConnectionPool for LifoPool {
    fn pool_id(&self) -> PoolId {
        self.id
    }

    fn pool_class(&self) -> &str {
        &self.class
    }

    fn probe_target(&self) -> &str {
        &self.probe_target
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn take_idle(&self) -> Option<Connection> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn put_idle(&self, connection: Connection) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection);
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Hand out a connection through the pool's `get_conn` seam.
pub fn get_conn(registry: &SeamRegistry, pool: &PoolRef) -> Result<Connection, SeamError> {
    let key = SeamKey::new(pool.pool_class(), GET_CONN);
    match registry.get(&key) {
        Some(SeamValue::Acquire(acquire)) => acquire(registry, pool),
        Some(other) => Err(seam_kind_error(&key, "acquire", &other)),
        None => Err(SeamError::UnknownSeam(key.to_string())),
    }
}

/// Open a fresh connection through the pool's `new_conn` seam.
pub fn new_conn(registry: &SeamRegistry, pool: &PoolRef) -> Result<Connection, SeamError> {
    let key = SeamKey::new(pool.pool_class(), NEW_CONN);
    match registry.get(&key) {
        Some(SeamValue::Create(create)) => create(registry, pool),
        Some(other) => Err(seam_kind_error(&key, "create", &other)),
        None => Err(SeamError::UnknownSeam(key.to_string())),
    }
}

pub fn put_conn(pool: &PoolRef, connection: Connection) {
    pool.put_idle(connection);
}

fn is_connection_dropped(registry: &SeamRegistry, pool: &PoolRef, connection: &Connection) -> bool {
    match registry.get(&SeamKey::new(pool.probe_target(), IS_CONNECTION_DROPPED)) {
        Some(SeamValue::Probe(probe)) => probe(connection),
        _ => connection.is_dropped(),
    }
}

fn seam_kind_error(key: &SeamKey, expected: &str, found: &SeamValue) -> SeamError {
    SeamError::Pool(format!(
        "seam {key} holds a {} value, expected {expected}",
        found.kind()
    ))
}

/// Stock acquire primitive: reuse the most recent idle connection that is
/// still alive, otherwise open a new one through the `new_conn` seam.
pub fn pristine_get_conn() -> AcquireFn {
    Arc::new(|registry: &SeamRegistry, pool: &PoolRef| {
        while let Some(connection) = pool.take_idle() {
            if is_connection_dropped(registry, pool, &connection) {
                continue;
            }
            return Ok(connection);
        }
        new_conn(registry, pool)
    })
}

/// Stock create primitive: open a connection of the pool's current `ConnectionCls`.
pub fn pristine_new_conn() -> CreateFn {
    Arc::new(|registry: &SeamRegistry, pool: &PoolRef| {
        let key = SeamKey::new(pool.pool_class(), CONNECTION_CLS);
        match registry.get(&key) {
            Some(SeamValue::Transport(ty)) => Ok(Connection::open(ty, pool.host())),
            Some(other) => Err(seam_kind_error(&key, "transport", &other)),
            None => Err(SeamError::UnknownSeam(key.to_string())),
        }
    })
}

pub fn pristine_is_connection_dropped() -> ProbeFn {
    Arc::new(|connection: &Connection| connection.is_dropped())
}

/// Liveness probe installed during a session: instrumented connections never
/// hold a socket, so they are never reported as dropped.
pub fn never_dropped() -> ProbeFn {
    Arc::new(|_: &Connection| false)
}

/// Wrap an acquire primitive so it only hands out instances of the pool's
/// current `ConnectionCls`, or of the type bound at `fallback` for pools that
/// have no `ConnectionCls` seam.
///
/// The expected type is read at call time, so wrappers stacked by nested
/// sessions all check against the innermost session's substitute. Idle
/// connections left over from before the session are discarded until the
/// pool runs dry; from then on `original` falls through to the (already
/// patched) create seam, so the loop ends after at most K+1 calls for K stale
/// connections. `limit` caps the number of stale connections skipped in one
/// call.
pub fn acquire_wrapper(original: AcquireFn, fallback: SeamKey, limit: usize) -> AcquireFn {
    Arc::new(move |registry: &SeamRegistry, pool: &PoolRef| {
        let expected = expected_connection_type(registry, pool, &fallback)?;
        let mut connection = original(registry, pool)?;
        let mut skipped = 0usize;
        while !connection.is_instance_of(&expected) {
            if skipped >= limit {
                return Err(SeamError::Pool(format!(
                    "{} kept returning connections other than {} after {skipped} attempts",
                    pool.pool_class(),
                    expected.name()
                )));
            }
            append_run_log(
                "debug",
                "seam.pool.stale_discarded",
                json!({
                    "pool": pool.pool_class(),
                    "connection": connection.id().to_string(),
                    "transport": connection.transport().name(),
                    "expected": expected.name(),
                }),
            );
            skipped += 1;
            connection = original(registry, pool)?;
        }
        Ok(connection)
    })
}

fn expected_connection_type(
    registry: &SeamRegistry,
    pool: &PoolRef,
    fallback: &SeamKey,
) -> Result<Arc<TransportType>, SeamError> {
    let key = SeamKey::new(pool.pool_class(), CONNECTION_CLS);
    let (key, value) = match registry.get(&key) {
        Some(value) => (key, value),
        None => match registry.get(fallback) {
            Some(value) => (fallback.clone(), value),
            None => return Err(SeamError::UnknownSeam(key.to_string())),
        },
    };
    match value {
        SeamValue::Transport(ty) => Ok(ty),
        other => Err(seam_kind_error(&key, "transport", &other)),
    }
}

/// Wrap a create primitive so every new connection is recorded in `tracker`.
pub fn create_wrapper(original: CreateFn, tracker: Arc<PoolEntryTracker>) -> CreateFn {
    Arc::new(move |registry: &SeamRegistry, pool: &PoolRef| {
        let connection = original(registry, pool)?;
        tracker.add_connection_to_pool_entry(pool, &connection);
        Ok(connection)
    })
}

struct TrackedPool {
    pool: PoolRef,
    connections: HashSet<ConnectionId>,
}

/// Per pool, the connections of one substitute type created during a session.
pub struct PoolEntryTracker {
    connection_type: Arc<TransportType>,
    pools: Mutex<BTreeMap<PoolId, TrackedPool>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub pools: usize,
    pub discarded: usize,
    pub preserved: usize,
}

impl PoolEntryTracker {
    pub fn new(connection_type: Arc<TransportType>) -> Self {
        Self {
            connection_type,
            pools: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn connection_type(&self) -> &Arc<TransportType> {
        &self.connection_type
    }

    pub fn add_connection_to_pool_entry(&self, pool: &PoolRef, connection: &Connection) {
        if !connection.is_instance_of(&self.connection_type) {
            return;
        }
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools
            .entry(pool.pool_id())
            .or_insert_with(|| TrackedPool {
                pool: Arc::clone(pool),
                connections: HashSet::new(),
            })
            .connections
            .insert(connection.id());
    }

    pub fn remove_connection_to_pool_entry(&self, pool: &PoolRef, connection: &Connection) {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tracked) = pools.get_mut(&pool.pool_id()) {
            tracked.connections.remove(&connection.id());
        }
    }

    pub fn tracked_count(&self, pool: PoolId) -> usize {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pool)
            .map_or(0, |tracked| tracked.connections.len())
    }

    /// Drain-and-sift every tracked pool: take idle connections while both
    /// the pool and the tracked set are non-empty, discard instances of the
    /// tracked type, and put everything else back in its original order.
    pub fn drain(&self) -> DrainReport {
        let tracked_pools = std::mem::take(
            &mut *self.pools.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut report = DrainReport::default();
        for (_, mut tracked) in tracked_pools {
            report.pools += 1;
            let mut set_aside = Vec::new();
            while !tracked.connections.is_empty() {
                let Some(connection) = tracked.pool.take_idle() else {
                    break;
                };
                if connection.is_instance_of(&self.connection_type) {
                    tracked.connections.remove(&connection.id());
                    report.discarded += 1;
                } else {
                    set_aside.push(connection);
                }
            }
            report.preserved += set_aside.len();
            // stack discipline: the first one taken goes back last
            for connection in set_aside.into_iter().rev() {
                tracked.pool.put_idle(connection);
            }
        }
        report
    }
}

/// Scoped handle over a [`PoolEntryTracker`]. Entering does nothing; exiting
/// drains every pool that received tracked connections.
pub struct ConnectionPoolGuard {
    tracker: Arc<PoolEntryTracker>,
}

impl ConnectionPoolGuard {
    pub fn new(tracker: Arc<PoolEntryTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<PoolEntryTracker> {
        &self.tracker
    }
}

impl ScopedResource for ConnectionPoolGuard {
    fn enter(&mut self) -> Result<(), SeamError> {
        Ok(())
    }

    fn exit(&mut self) -> Result<(), SeamError> {
        let report = self.tracker.drain();
        if report.pools > 0 {
            append_run_log(
                "debug",
                "seam.pool.drain",
                json!({
                    "connection_type": self.tracker.connection_type().name(),
                    "pools": report.pools,
                    "discarded": report.discarded,
                    "preserved": report.preserved,
                }),
            );
        }
        Ok(())
    }

    fn label(&self) -> String {
        format!("pool guard {}", self.tracker.connection_type().name())
    }
}

impl std::fmt::Debug for ConnectionPoolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolGuard")
            .field("connection_type", &self.tracker.connection_type().name())
            .finish()
    }
}
