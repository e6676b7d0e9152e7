use crate::seam::PatchSpec;
use crate::stubs::StubCatalog;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Stable identity of a recording session, usually the cassette path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 bytes of the SHA-256 of the identity, hex encoded. Safe to embed
    /// in type names whatever characters the identity itself contains.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct Session {
    id: SessionId,
    custom_patches: Vec<PatchSpec>,
    stubs: Arc<dyn StubCatalog>,
}

impl Session {
    pub fn new(id: SessionId, stubs: Arc<dyn StubCatalog>) -> Self {
        Self {
            id,
            custom_patches: Vec::new(),
            stubs,
        }
    }

    pub fn with_custom_patch(mut self, spec: PatchSpec) -> Self {
        self.custom_patches.push(spec);
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn custom_patches(&self) -> &[PatchSpec] {
        &self.custom_patches
    }

    pub fn stubs(&self) -> &dyn StubCatalog {
        self.stubs.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("custom_patches", &self.custom_patches.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionId;

    #[test]
    fn fingerprint_is_deterministic_and_distinct() {
        let a = SessionId::new("fixtures/cassettes/a.yaml");
        let b = SessionId::new("fixtures/cassettes/b.yaml");
        assert_eq!(a.fingerprint(), SessionId::new("fixtures/cassettes/a.yaml").fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert!(a.fingerprint().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
