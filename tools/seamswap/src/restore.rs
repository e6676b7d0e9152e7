use crate::errors::SeamError;
use crate::logging::append_run_log;
use crate::registry::{SeamBinding, SeamRegistry};
use crate::scope::ScopedResource;
use crate::seam::SeamKey;
use serde_json::json;
use std::sync::Arc;

/// Scoped global restore. While entered, every registered seam holds the
/// value captured when its backend registered, whatever sessions are active.
/// Exiting reinstates what was there before.
pub struct ForceRestore {
    registry: Arc<SeamRegistry>,
    saved: Option<Vec<(SeamKey, SeamBinding)>>,
}

pub fn force_restore(registry: &Arc<SeamRegistry>) -> ForceRestore {
    ForceRestore {
        registry: Arc::clone(registry),
        saved: None,
    }
}

impl ForceRestore {
    pub fn is_entered(&self) -> bool {
        self.saved.is_some()
    }
}

impl ScopedResource for ForceRestore {
    fn enter(&mut self) -> Result<(), SeamError> {
        if self.saved.is_some() {
            return Ok(());
        }
        let mut saved = Vec::new();
        for key in self.registry.keys() {
            let Some(pristine) = self.registry.pristine(&key) else {
                continue;
            };
            let previous = self.registry.install(
                &key,
                SeamBinding {
                    value: pristine,
                    owner: None,
                },
            )?;
            saved.push((key, previous));
        }
        append_run_log(
            "warn",
            "seam.restore.forced",
            json!({ "mode": "scoped", "seams": saved.len() }),
        );
        self.saved = Some(saved);
        Ok(())
    }

    fn exit(&mut self) -> Result<(), SeamError> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        let mut first_error = None;
        for (key, previous) in saved.into_iter().rev() {
            if let Err(error) = self.registry.install(&key, previous) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn label(&self) -> String {
        "force restore".to_string()
    }
}

impl std::fmt::Debug for ForceRestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForceRestore")
            .field("entered", &self.saved.is_some())
            .finish()
    }
}
