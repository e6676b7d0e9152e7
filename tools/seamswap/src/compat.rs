use crate::backends::BackendKind;
use crate::errors::SeamError;
use crate::registry::BackendManifest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackendVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BackendVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for BackendVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for BackendVersion {
    type Err = SeamError;

    /// Accepts `1`, `1.2` and `1.2.3`; a pre-release suffix after `-` or `+` is ignored.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let core = value
            .trim()
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(SeamError::InvalidConfig("empty version".to_string()));
        }
        let mut parts = [0u32; 3];
        for (idx, piece) in core.split('.').enumerate() {
            if idx >= parts.len() {
                return Err(SeamError::InvalidConfig(format!(
                    "version `{value}` has too many components"
                )));
            }
            parts[idx] = piece.parse().map_err(|_| {
                SeamError::InvalidConfig(format!("version `{value}` is not numeric"))
            })?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

// Oldest supported release per backend.
const MINIMUM_VERSIONS: &[(BackendKind, BackendVersion)] =
    &[(BackendKind::Sessions, BackendVersion::new(2, 16, 2))];

pub fn check_manifest(manifest: &BackendManifest) -> Result<(), SeamError> {
    for (kind, minimum) in MINIMUM_VERSIONS {
        if manifest.kind == *kind && manifest.version < *minimum {
            return Err(SeamError::IncompatibleBackend(format!(
                "{} {} is not supported; upgrade to {} or newer",
                kind.as_str(),
                manifest.version,
                minimum
            )));
        }
    }
    if manifest.kind == BackendKind::Aws && manifest.legacy_layout {
        return Err(SeamError::IncompatibleBackend(format!(
            "{} {} uses the vendored pool layout; upgrade to a release with its own request module",
            manifest.kind.as_str(),
            manifest.version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(kind: BackendKind, version: &str, legacy_layout: bool) -> BackendManifest {
        let mut manifest = BackendManifest::new(kind, version.parse().expect("version"));
        manifest.legacy_layout = legacy_layout;
        manifest
    }

    #[test]
    fn parses_partial_and_suffixed_versions() {
        assert_eq!(
            "2.16".parse::<BackendVersion>().expect("parse"),
            BackendVersion::new(2, 16, 0)
        );
        assert_eq!(
            "1.34.7-rc1".parse::<BackendVersion>().expect("parse"),
            BackendVersion::new(1, 34, 7)
        );
        assert!("a.b".parse::<BackendVersion>().is_err());
        assert!("1.2.3.4".parse::<BackendVersion>().is_err());
    }

    #[test]
    fn empty_versions_are_rejected_as_empty() {
        for value in ["", "  ", "-rc1"] {
            let err = value.parse::<BackendVersion>().expect_err("empty");
            assert_eq!(err, SeamError::InvalidConfig("empty version".to_string()));
        }
    }

    #[test]
    fn old_sessions_release_is_rejected() {
        let err = check_manifest(&manifest(BackendKind::Sessions, "2.16.1", false))
            .expect_err("too old");
        assert!(matches!(err, SeamError::IncompatibleBackend(_)));
        check_manifest(&manifest(BackendKind::Sessions, "2.16.2", false)).expect("supported");
    }

    #[test]
    fn legacy_aws_layout_is_rejected() {
        assert!(check_manifest(&manifest(BackendKind::Aws, "1.10.0", true)).is_err());
        check_manifest(&manifest(BackendKind::Aws, "1.34.0", false)).expect("supported");
    }
}
