use crate::backends::BackendKind;
use crate::session::SessionId;
use crate::transport::{Handler, Request, TransportType};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

pub trait StubCatalog: Send + Sync {
    /// Instrumented transport type for `name` on `backend`. The returned type
    /// must have an unbound session slot, and repeated calls must return the
    /// same type.
    fn transport(&self, backend: BackendKind, name: &str) -> Option<Arc<TransportType>>;

    /// Wrap `original` so requests go through the session's recorder.
    fn intercept(
        &self,
        backend: BackendKind,
        name: &str,
        session: &SessionId,
        original: Handler,
    ) -> Option<Handler>;
}

/// Catalog handing out `Recording*` stub types and pass-through interceptors
/// that stamp each response with the serving session.
#[derive(Default)]
pub struct StandardStubs {
    types: Mutex<BTreeMap<(BackendKind, String), Arc<TransportType>>>,
    bases: BTreeMap<(BackendKind, String), Arc<TransportType>>,
}

impl StandardStubs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the stub for `name` derive from `base`, so that connections it
    /// opens also count as instances of the library type.
    pub fn with_base(mut self, backend: BackendKind, name: &str, base: Arc<TransportType>) -> Self {
        self.bases.insert((backend, name.to_string()), base);
        self
    }
}

impl StubCatalog for StandardStubs {
    fn transport(&self, backend: BackendKind, name: &str) -> Option<Arc<TransportType>> {
        let key = (backend, name.to_string());
        let mut types = self.types.lock().unwrap_or_else(PoisonError::into_inner);
        let ty = types.entry(key.clone()).or_insert_with(|| {
            TransportType::instrumented(format!("Recording{name}"), self.bases.get(&key).cloned())
        });
        Some(Arc::clone(ty))
    }

    fn intercept(
        &self,
        backend: BackendKind,
        name: &str,
        session: &SessionId,
        original: Handler,
    ) -> Option<Handler> {
        let recorder = format!("{}:{}", backend.as_str(), session);
        Some(Handler::bound(
            format!("Recording{name}"),
            session,
            move |request: &Request| {
                let mut response = original.call(request)?;
                response.served_by = format!("{recorder} <- {}", response.served_by);
                Ok(response)
            },
        ))
    }
}
