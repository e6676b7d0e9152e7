use crate::backends::BackendKind;
use crate::compat::{check_manifest, BackendVersion};
use crate::errors::SeamError;
use crate::logging::append_run_log;
use crate::seam::{SeamKey, SeamValue};
use crate::session::SessionId;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
pub struct BackendManifest {
    pub kind: BackendKind,
    pub version: BackendVersion,
    /// Set by stacks that still ship the vendored pool layout.
    pub legacy_layout: bool,
    pub seams: Vec<(SeamKey, SeamValue)>,
}

impl BackendManifest {
    pub fn new(kind: BackendKind, version: BackendVersion) -> Self {
        Self {
            kind,
            version,
            legacy_layout: false,
            seams: Vec::new(),
        }
    }

    pub fn with_seam(
        mut self,
        target: impl Into<String>,
        attribute: impl Into<String>,
        value: SeamValue,
    ) -> Self {
        self.seams.push((SeamKey::new(target, attribute), value));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRecord {
    pub kind: BackendKind,
    pub version: BackendVersion,
    pub seam_count: usize,
}

/// The value currently installed at a seam and the session that installed it.
#[derive(Debug, Clone)]
pub struct SeamBinding {
    pub value: SeamValue,
    pub owner: Option<SessionId>,
}

struct SeamSlot {
    backend: BackendKind,
    pristine: SeamValue,
    current: SeamBinding,
}

#[derive(Default)]
struct RegistryState {
    slots: BTreeMap<SeamKey, SeamSlot>,
    backends: BTreeMap<BackendKind, BackendRecord>,
}

/// Per seam: the pristine value captured at registration, the current value
/// and the session that installed it. Client code resolves its bindings
/// through [`SeamRegistry::get`] at call time.
#[derive(Default)]
pub struct SeamRegistry {
    state: RwLock<RegistryState>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<SeamRegistry>> = OnceLock::new();

impl SeamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry shared by every client stack.
    pub fn global() -> Arc<SeamRegistry> {
        Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(SeamRegistry::new())))
    }

    // Poisoning is recovered: teardown has to be able to restore seams even
    // after a panic on another thread.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a client stack as present and capture its pristine seam values.
    ///
    /// Re-registering a backend keeps the pristine values from the first
    /// registration and never disturbs values a live session has installed.
    pub fn register_backend(&self, manifest: BackendManifest) -> Result<(), SeamError> {
        check_manifest(&manifest)?;
        let kind = manifest.kind;
        let version = manifest.version;
        let mut state = self.write();
        for (key, _) in &manifest.seams {
            if let Some(slot) = state.slots.get(key) {
                if slot.backend != kind {
                    return Err(SeamError::InvalidConfig(format!(
                        "seam {key} is already owned by backend {}",
                        slot.backend.as_str()
                    )));
                }
            }
        }
        let mut added = 0usize;
        for (key, value) in manifest.seams {
            if state.slots.contains_key(&key) {
                continue;
            }
            state.slots.insert(
                key,
                SeamSlot {
                    backend: kind,
                    pristine: value.clone(),
                    current: SeamBinding { value, owner: None },
                },
            );
            added += 1;
        }
        let seam_count = state.slots.values().filter(|s| s.backend == kind).count();
        state.backends.insert(
            kind,
            BackendRecord {
                kind,
                version,
                seam_count,
            },
        );
        drop(state);
        append_run_log(
            "info",
            "seam.backend.registered",
            json!({
                "backend": kind.as_str(),
                "version": version.to_string(),
                "new_seams": added,
                "seam_count": seam_count,
            }),
        );
        Ok(())
    }

    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.read().backends.contains_key(&kind)
    }

    pub fn backends(&self) -> Vec<BackendRecord> {
        self.read().backends.values().cloned().collect()
    }

    pub fn contains(&self, key: &SeamKey) -> bool {
        self.read().slots.contains_key(key)
    }

    pub fn get(&self, key: &SeamKey) -> Option<SeamValue> {
        self.read().slots.get(key).map(|slot| slot.current.value.clone())
    }

    pub fn binding(&self, key: &SeamKey) -> Option<SeamBinding> {
        self.read().slots.get(key).map(|slot| slot.current.clone())
    }

    pub fn owner(&self, key: &SeamKey) -> Option<SessionId> {
        self.read()
            .slots
            .get(key)
            .and_then(|slot| slot.current.owner.clone())
    }

    pub fn pristine(&self, key: &SeamKey) -> Option<SeamValue> {
        self.read().slots.get(key).map(|slot| slot.pristine.clone())
    }

    pub fn keys(&self) -> Vec<SeamKey> {
        self.read().slots.keys().cloned().collect()
    }

    pub fn backend_keys(&self, kind: BackendKind) -> Vec<SeamKey> {
        self.read()
            .slots
            .iter()
            .filter(|(_, slot)| slot.backend == kind)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Install `binding` at `key` and return whatever was there before.
    /// Last writer wins; there is no check against an expected current value.
    pub fn install(&self, key: &SeamKey, binding: SeamBinding) -> Result<SeamBinding, SeamError> {
        let mut state = self.write();
        let slot = state
            .slots
            .get_mut(key)
            .ok_or_else(|| SeamError::UnknownSeam(key.to_string()))?;
        Ok(std::mem::replace(&mut slot.current, binding))
    }

    pub fn is_pristine(&self, key: &SeamKey) -> bool {
        self.read().slots.get(key).is_some_and(|slot| {
            slot.current.owner.is_none() && slot.current.value.same_as(&slot.pristine)
        })
    }

    /// Seams whose current value differs from the pristine one.
    pub fn patched_keys(&self) -> Vec<SeamKey> {
        self.read()
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.current.owner.is_some() || !slot.current.value.same_as(&slot.pristine)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Put every seam back to its pristine value, permanently. Returns how
    /// many seams were changed.
    pub fn reset_to_pristine(&self) -> usize {
        let mut state = self.write();
        let mut changed = Vec::new();
        for (key, slot) in state.slots.iter_mut() {
            if slot.current.owner.is_some() || !slot.current.value.same_as(&slot.pristine) {
                slot.current = SeamBinding {
                    value: slot.pristine.clone(),
                    owner: None,
                };
                changed.push(key.to_string());
            }
        }
        drop(state);
        if !changed.is_empty() {
            append_run_log(
                "warn",
                "seam.restore.forced",
                json!({ "mode": "permanent", "seams": changed }),
            );
        }
        changed.len()
    }
}
