use crate::errors::SeamError;
use crate::pool::PoolRef;
use crate::registry::SeamRegistry;
use crate::transport::{Connection, Handler, TransportType};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeamKey {
    pub target: String,
    pub attribute: String,
}

impl SeamKey {
    pub fn new(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for SeamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

pub type AcquireFn =
    Arc<dyn Fn(&SeamRegistry, &PoolRef) -> Result<Connection, SeamError> + Send + Sync>;
pub type CreateFn =
    Arc<dyn Fn(&SeamRegistry, &PoolRef) -> Result<Connection, SeamError> + Send + Sync>;
pub type ProbeFn = Arc<dyn Fn(&Connection) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum SeamValue {
    Transport(Arc<TransportType>),
    Table(BTreeMap<String, SeamValue>),
    Acquire(AcquireFn),
    Create(CreateFn),
    Probe(ProbeFn),
    Handler(Handler),
}

impl SeamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Table(_) => "table",
            Self::Acquire(_) => "acquire",
            Self::Create(_) => "create",
            Self::Probe(_) => "probe",
            Self::Handler(_) => "handler",
        }
    }

    /// Identity comparison: two values are the same when they share the
    /// underlying allocation (tables compare entry by entry).
    pub fn same_as(&self, other: &SeamValue) -> bool {
        match (self, other) {
            (Self::Transport(a), Self::Transport(b)) => Arc::ptr_eq(a, b),
            (Self::Table(a), Self::Table(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
            }
            (Self::Acquire(a), Self::Acquire(b)) => Arc::ptr_eq(a, b),
            (Self::Create(a), Self::Create(b)) => Arc::ptr_eq(a, b),
            (Self::Probe(a), Self::Probe(b)) => Arc::ptr_eq(a, b),
            (Self::Handler(a), Self::Handler(b)) => a.same_as(b),
            _ => false,
        }
    }

    pub fn as_transport(&self) -> Option<&Arc<TransportType>> {
        match self {
            Self::Transport(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&BTreeMap<String, SeamValue>> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_handler(&self) -> Option<&Handler> {
        match self {
            Self::Handler(handler) => Some(handler),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Transport(ty) => format!("transport:{}", ty.name()),
            Self::Table(table) => format!(
                "table:{{{}}}",
                table
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.describe()))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Self::Handler(handler) => format!("handler:{}", handler.name()),
            other => other.kind().to_string(),
        }
    }
}

impl fmt::Debug for SeamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// One interception point: install `replacement` at `key` for the length of a session.
#[derive(Debug, Clone)]
pub struct PatchSpec {
    pub key: SeamKey,
    pub replacement: SeamValue,
}

impl PatchSpec {
    pub fn new(
        target: impl Into<String>,
        attribute: impl Into<String>,
        replacement: SeamValue,
    ) -> Self {
        Self {
            key: SeamKey::new(target, attribute),
            replacement,
        }
    }
}
