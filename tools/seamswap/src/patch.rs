use crate::errors::SeamError;
use crate::logging::append_run_log;
use crate::registry::{SeamBinding, SeamRegistry};
use crate::scope::ScopedResource;
use crate::seam::{PatchSpec, SeamKey, SeamValue};
use crate::session::SessionId;
use crate::substitute::SubstituteTypeCache;
use serde_json::json;
use std::sync::Arc;

/// Rewrite a replacement value for `session`: tables are rebuilt entry by
/// entry, transport types with a session slot become the session's
/// substitute, everything else is returned as is.
pub fn resolve(value: &SeamValue, cache: &SubstituteTypeCache, session: &SessionId) -> SeamValue {
    match value {
        SeamValue::Table(table) => SeamValue::Table(
            table
                .iter()
                .map(|(name, entry)| (name.clone(), resolve(entry, cache, session)))
                .collect(),
        ),
        SeamValue::Transport(ty) if ty.has_session_slot() => {
            SeamValue::Transport(cache.get(ty, session))
        }
        other => other.clone(),
    }
}

/// Turn a specification into a handle, or `None` when the registry has no such
/// seam (the backend is absent or too old to expose it).
pub fn build_patch(
    registry: &Arc<SeamRegistry>,
    spec: &PatchSpec,
    cache: &SubstituteTypeCache,
    session: &SessionId,
) -> Option<PatchHandle> {
    if !registry.contains(&spec.key) {
        append_run_log(
            "debug",
            "seam.builder.skip",
            json!({ "seam": spec.key.to_string(), "session": session.as_str() }),
        );
        return None;
    }
    Some(PatchHandle {
        registry: Arc::clone(registry),
        key: spec.key.clone(),
        replacement: resolve(&spec.replacement, cache, session),
        owner: session.clone(),
        saved: None,
    })
}

/// One applied specification. Entering captures the current binding and
/// installs the replacement; exiting puts the captured binding back.
pub struct PatchHandle {
    registry: Arc<SeamRegistry>,
    key: SeamKey,
    replacement: SeamValue,
    owner: SessionId,
    saved: Option<SeamBinding>,
}

impl PatchHandle {
    /// A handle that skips the registry lookup, for exercising failure paths.
    #[cfg(test)]
    pub(crate) fn detached(
        registry: &Arc<SeamRegistry>,
        key: SeamKey,
        replacement: SeamValue,
        owner: SessionId,
    ) -> Self {
        Self {
            registry: Arc::clone(registry),
            key,
            replacement,
            owner,
            saved: None,
        }
    }

    pub fn key(&self) -> &SeamKey {
        &self.key
    }

    pub fn replacement(&self) -> &SeamValue {
        &self.replacement
    }

    pub fn is_entered(&self) -> bool {
        self.saved.is_some()
    }
}

impl ScopedResource for PatchHandle {
    fn enter(&mut self) -> Result<(), SeamError> {
        if self.saved.is_some() {
            return Ok(());
        }
        let previous = self.registry.install(
            &self.key,
            SeamBinding {
                value: self.replacement.clone(),
                owner: Some(self.owner.clone()),
            },
        )?;
        append_run_log(
            "debug",
            "seam.patch.enter",
            json!({
                "seam": self.key.to_string(),
                "session": self.owner.as_str(),
                "replacement": self.replacement.describe(),
                "previous_owner": previous.owner.as_ref().map(|o| o.as_str().to_string()),
            }),
        );
        self.saved = Some(previous);
        Ok(())
    }

    fn exit(&mut self) -> Result<(), SeamError> {
        let Some(previous) = self.saved.take() else {
            return Ok(());
        };
        append_run_log(
            "debug",
            "seam.patch.exit",
            json!({
                "seam": self.key.to_string(),
                "session": self.owner.as_str(),
                "restored": previous.value.describe(),
            }),
        );
        self.registry.install(&self.key, previous).map(|_| ())
    }

    fn label(&self) -> String {
        format!("patch {}", self.key)
    }
}

impl std::fmt::Debug for PatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchHandle")
            .field("key", &self.key)
            .field("replacement", &self.replacement)
            .field("owner", &self.owner)
            .field("entered", &self.saved.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendKind;
    use crate::compat::BackendVersion;
    use crate::registry::BackendManifest;
    use crate::transport::TransportType;
    use std::collections::BTreeMap;

    fn registry_with_table() -> (Arc<SeamRegistry>, Arc<TransportType>) {
        let plain = TransportType::plain("HttpConnectionWithTimeout");
        let registry = Arc::new(SeamRegistry::new());
        registry
            .register_backend(
                BackendManifest::new(BackendKind::TimeoutHttp, BackendVersion::new(0, 22, 0))
                    .with_seam(
                        "timeout_http",
                        "HttpConnectionWithTimeout",
                        SeamValue::Transport(plain.clone()),
                    )
                    .with_seam(
                        "timeout_http",
                        "SCHEME_TO_CONNECTION",
                        SeamValue::Table(BTreeMap::from([(
                            "http".to_string(),
                            SeamValue::Transport(plain.clone()),
                        )])),
                    ),
            )
            .expect("register");
        (registry, plain)
    }

    #[test]
    fn resolve_rewrites_nested_tables_to_one_substitute() {
        let cache = SubstituteTypeCache::new();
        let session = SessionId::new("s");
        let stub = TransportType::instrumented("RecordingHttpConnection", None);
        let plain = TransportType::plain("Untouched");
        let value = SeamValue::Table(BTreeMap::from([
            ("http".to_string(), SeamValue::Transport(stub.clone())),
            (
                "nested".to_string(),
                SeamValue::Table(BTreeMap::from([(
                    "again".to_string(),
                    SeamValue::Transport(stub.clone()),
                )])),
            ),
            ("plain".to_string(), SeamValue::Transport(plain.clone())),
        ]));

        let resolved = resolve(&value, &cache, &session);
        let table = resolved.as_table().expect("table");
        let http = table["http"].as_transport().expect("transport");
        let nested = table["nested"].as_table().expect("nested")["again"]
            .as_transport()
            .expect("transport");
        assert!(Arc::ptr_eq(http, nested));
        assert!(http.is_bound_to(&session));
        assert!(Arc::ptr_eq(table["plain"].as_transport().expect("plain"), &plain));
        // the input specification is left untouched
        assert!(value.as_table().expect("table")["http"].same_as(&SeamValue::Transport(stub)));
    }

    #[test]
    fn absent_seam_builds_no_handle() {
        let (registry, _) = registry_with_table();
        let cache = SubstituteTypeCache::new();
        let spec = PatchSpec::new(
            "timeout_http",
            "NoSuchAttribute",
            SeamValue::Transport(TransportType::plain("X")),
        );
        assert!(build_patch(&registry, &spec, &cache, &SessionId::new("s")).is_none());
    }

    #[test]
    fn enter_and_exit_restore_previous_binding() {
        let (registry, plain) = registry_with_table();
        let cache = SubstituteTypeCache::new();
        let session = SessionId::new("s");
        let stub = TransportType::instrumented("RecordingHttpConnectionWithTimeout", None);
        let spec = PatchSpec::new(
            "timeout_http",
            "HttpConnectionWithTimeout",
            SeamValue::Transport(stub),
        );
        let mut handle = build_patch(&registry, &spec, &cache, &session).expect("handle");
        let key = handle.key().clone();

        handle.enter().expect("enter");
        let current = registry.get(&key).expect("current");
        assert!(current.as_transport().expect("transport").is_bound_to(&session));
        assert_eq!(registry.owner(&key), Some(session.clone()));

        handle.exit().expect("exit");
        assert!(registry.get(&key).expect("current").same_as(&SeamValue::Transport(plain)));
        assert!(registry.is_pristine(&key));

        // exiting twice is a no-op
        handle.exit().expect("second exit");
        assert!(registry.is_pristine(&key));
    }
}
