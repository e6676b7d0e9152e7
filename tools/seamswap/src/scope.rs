//! Entering and leaving the resources of one session as a LIFO stack.

use crate::errors::SeamError;
use crate::logging::append_run_log;
use crate::patch::PatchHandle;
use crate::pool::ConnectionPoolGuard;
use crate::restore::ForceRestore;
use crate::session::SessionId;
use serde_json::json;

/// Something that is entered when a session starts and exited when it ends.
pub trait ScopedResource {
    fn enter(&mut self) -> Result<(), SeamError>;
    fn exit(&mut self) -> Result<(), SeamError>;
    fn label(&self) -> String;
}

#[derive(Debug)]
pub enum SessionResource {
    Patch(PatchHandle),
    PoolGuard(ConnectionPoolGuard),
    Restore(ForceRestore),
}

impl SessionResource {
    pub fn as_patch(&self) -> Option<&PatchHandle> {
        match self {
            Self::Patch(handle) => Some(handle),
            Self::PoolGuard(_) | Self::Restore(_) => None,
        }
    }

    pub fn is_pool_guard(&self) -> bool {
        matches!(self, Self::PoolGuard(_))
    }
}

impl ScopedResource for SessionResource {
    fn enter(&mut self) -> Result<(), SeamError> {
        match self {
            Self::Patch(handle) => handle.enter(),
            Self::PoolGuard(guard) => guard.enter(),
            Self::Restore(restore) => restore.enter(),
        }
    }

    fn exit(&mut self) -> Result<(), SeamError> {
        match self {
            Self::Patch(handle) => handle.exit(),
            Self::PoolGuard(guard) => guard.exit(),
            Self::Restore(restore) => restore.exit(),
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Patch(handle) => handle.label(),
            Self::PoolGuard(guard) => guard.label(),
            Self::Restore(restore) => restore.label(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub exited: usize,
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The entered resources of one session. Closing (or dropping) the scope exits
/// every resource exactly once, newest first, and keeps going past failures.
#[derive(Debug)]
pub struct SessionScope {
    session: SessionId,
    entered: Vec<SessionResource>,
    closed: bool,
}

impl SessionScope {
    /// Enter `resources` in order. If one fails to enter, the ones already
    /// entered are exited in reverse before the error is returned.
    pub fn enter(session: SessionId, resources: Vec<SessionResource>) -> Result<Self, SeamError> {
        let mut scope = Self {
            session,
            entered: Vec::with_capacity(resources.len()),
            closed: false,
        };
        for mut resource in resources {
            if let Err(error) = resource.enter() {
                append_run_log(
                    "error",
                    "seam.scope.enter_failed",
                    json!({
                        "session": scope.session.as_str(),
                        "resource": resource.label(),
                        "error": error.to_string(),
                    }),
                );
                let _ = scope.unwind();
                return Err(error);
            }
            scope.entered.push(resource);
        }
        Ok(scope)
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn len(&self) -> usize {
        self.entered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entered.is_empty()
    }

    pub fn close(mut self) -> TeardownReport {
        self.unwind()
    }

    fn unwind(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.closed {
            return report;
        }
        self.closed = true;
        while let Some(mut resource) = self.entered.pop() {
            match resource.exit() {
                Ok(()) => report.exited += 1,
                Err(error) => {
                    append_run_log(
                        "error",
                        "seam.scope.teardown_failed",
                        json!({
                            "session": self.session.as_str(),
                            "resource": resource.label(),
                            "error": error.to_string(),
                        }),
                    );
                    report.failures.push(format!("{}: {error}", resource.label()));
                }
            }
        }
        report
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        let _ = self.unwind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::reference::register_reference_backends;
    use crate::backends::BackendKind;
    use crate::registry::SeamRegistry;
    use crate::seam::{SeamKey, SeamValue};
    use crate::transport::TransportType;
    use std::sync::Arc;

    fn handle(registry: &Arc<SeamRegistry>, attribute: &str, name: &str) -> SessionResource {
        SessionResource::Patch(PatchHandle::detached(
            registry,
            SeamKey::new("std_http", attribute),
            SeamValue::Transport(TransportType::plain(name)),
            SessionId::new("s"),
        ))
    }

    fn registry() -> Arc<SeamRegistry> {
        let registry = Arc::new(SeamRegistry::new());
        register_reference_backends(&registry, &[BackendKind::StdHttp]).expect("register");
        registry
    }

    #[test]
    fn close_exits_newest_first() {
        let registry = registry();
        let scope = SessionScope::enter(
            SessionId::new("s"),
            vec![
                handle(&registry, "HttpConnection", "First"),
                handle(&registry, "HttpConnection", "Second"),
            ],
        )
        .expect("enter");
        let key = SeamKey::new("std_http", "HttpConnection");
        assert_eq!(
            registry.get(&key).expect("current").as_transport().expect("transport").name(),
            "Second"
        );
        assert_eq!(scope.len(), 2);

        let report = scope.close();
        assert!(report.is_clean());
        assert_eq!(report.exited, 2);
        assert!(registry.is_pristine(&key));
    }

    #[test]
    fn failed_enter_unwinds_what_was_entered() {
        let registry = registry();
        let err = SessionScope::enter(
            SessionId::new("s"),
            vec![
                handle(&registry, "HttpConnection", "Entered"),
                handle(&registry, "NoSuchConnection", "Missing"),
            ],
        )
        .expect_err("missing seam");
        assert!(matches!(err, SeamError::UnknownSeam(_)));
        assert!(registry.patched_keys().is_empty());
    }

    #[test]
    fn dropping_an_open_scope_releases_everything() {
        let registry = registry();
        {
            let _scope = SessionScope::enter(
                SessionId::new("s"),
                vec![
                    handle(&registry, "HttpConnection", "A"),
                    handle(&registry, "HttpsConnection", "B"),
                ],
            )
            .expect("enter");
            assert_eq!(registry.patched_keys().len(), 2);
        }
        assert!(registry.patched_keys().is_empty());
    }
}
