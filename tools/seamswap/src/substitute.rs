use crate::session::SessionId;
use crate::transport::{TransportId, TransportType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Memoizes one session-bound substitute per (base type, session) pair.
///
/// Identity matters: pool guards and acquire wrappers compare connections
/// against the exact substitute handed out here, so a second request for the
/// same pair must return the same `Arc`.
#[derive(Default)]
pub struct SubstituteTypeCache {
    by_base: Mutex<HashMap<(TransportId, SessionId), Arc<TransportType>>>,
}

impl SubstituteTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, base: &Arc<TransportType>, session: &SessionId) -> Arc<TransportType> {
        if base.is_bound_to(session) {
            return Arc::clone(base);
        }
        let mut by_base = self.by_base.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = by_base
            .entry((base.id(), session.clone()))
            .or_insert_with(|| {
                let name = format!("{}_{}", base.name(), session.fingerprint());
                TransportType::bound_to(base, session, name)
            });
        Arc::clone(entry)
    }

    pub fn len(&self) -> usize {
        self.by_base
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
