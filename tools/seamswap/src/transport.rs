//! Transport types, connections and request handlers.
//!
//! A [`TransportType`] stands in for a client stack's connection class. The
//! session-binding slot is explicit: plain library types have no slot,
//! instrumented stub types have an unbound slot, and substitute types are
//! bound to exactly one session. Pool bookkeeping tests that marker instead
//! of relying on type identity alone.

use crate::errors::SeamError;
use crate::session::SessionId;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSlot {
    Unavailable,
    Unbound,
    Bound(SessionId),
}

#[derive(Debug)]
pub struct TransportType {
    id: TransportId,
    name: String,
    base: Option<Arc<TransportType>>,
    slot: SessionSlot,
}

impl TransportType {
    /// A client stack's own connection type. It cannot be bound to a session.
    pub fn plain(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_parts(name.into(), None, SessionSlot::Unavailable))
    }

    /// An instrumented stub type whose session slot is still empty.
    pub fn instrumented(name: impl Into<String>, base: Option<Arc<TransportType>>) -> Arc<Self> {
        Arc::new(Self::with_parts(name.into(), base, SessionSlot::Unbound))
    }

    pub(crate) fn bound_to(
        base: &Arc<TransportType>,
        session: &SessionId,
        name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self::with_parts(
            name.into(),
            Some(Arc::clone(base)),
            SessionSlot::Bound(session.clone()),
        ))
    }

    fn with_parts(name: String, base: Option<Arc<TransportType>>, slot: SessionSlot) -> Self {
        Self {
            id: TransportId(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            base,
            slot,
        }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&Arc<TransportType>> {
        self.base.as_ref()
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.slot
    }

    pub fn has_session_slot(&self) -> bool {
        self.slot != SessionSlot::Unavailable
    }

    pub fn owner(&self) -> Option<&SessionId> {
        match &self.slot {
            SessionSlot::Bound(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_bound_to(&self, session: &SessionId) -> bool {
        self.owner() == Some(session)
    }

    /// True when `self` is `other` or has `other` somewhere in its base chain.
    pub fn derives_from(&self, other: &TransportType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty.id == other.id {
                return true;
            }
            current = ty.base.as_deref();
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A pooled connection. Connections are moved in and out of pools, never cloned,
/// so their id is their identity.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    host: String,
    transport: Arc<TransportType>,
    dropped: AtomicBool,
}

impl Connection {
    pub fn open(transport: Arc<TransportType>, host: impl Into<String>) -> Self {
        Self {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            host: host.into(),
            transport,
            dropped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn transport(&self) -> &Arc<TransportType> {
        &self.transport
    }

    pub fn owner(&self) -> Option<&SessionId> {
        self.transport.owner()
    }

    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Relaxed);
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether this connection counts as an instance of `ty`: same lineage, and
    /// when `ty` is session-bound, the same owning session.
    pub fn is_instance_of(&self, ty: &TransportType) -> bool {
        if let Some(owner) = ty.owner() {
            if self.owner() != Some(owner) {
                return false;
            }
        }
        self.transport.derives_from(ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub served_by: String,
}

pub type HandlerFn = dyn Fn(&Request) -> Result<Response, SeamError> + Send + Sync;

/// A request-dispatch function installed at a handler seam.
#[derive(Clone)]
pub struct Handler {
    name: String,
    owner: Option<SessionId>,
    func: Arc<HandlerFn>,
}

impl Handler {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Request) -> Result<Response, SeamError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            owner: None,
            func: Arc::new(func),
        }
    }

    pub fn bound(
        name: impl Into<String>,
        session: &SessionId,
        func: impl Fn(&Request) -> Result<Response, SeamError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            owner: Some(session.clone()),
            func: Arc::new(func),
        }
    }

    pub fn call(&self, request: &Request) -> Result<Response, SeamError> {
        (self.func)(request)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<&SessionId> {
        self.owner.as_ref()
    }

    pub fn same_as(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
