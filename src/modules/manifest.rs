//! Per-unit dependency manifests.
//!
//! The packaging step writes `<name>.deps.json` next to each unit:
//!
//! ```json
//! {
//!   "requires": ["sqlite-core/3.45.0"],
//!   "provides": { "sqlite-core/3.45.0": "libsqlite_core.so" }
//! }
//! ```
//!
//! `requires` lists identities the unit needs before it can be opened, in
//! load order. `provides` maps identities to files shipped in the unit's
//! directory; relative paths are resolved against that directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{ModuleError, Result};

/// File extension of dependency manifests
pub const MANIFEST_EXTENSION: &str = "deps.json";

/// Marker in identities of resource bundles, which are never shipped as
/// separate files and are not worth resolving.
pub const RESOURCE_BUNDLE_MARKER: &str = ".resources";

/// Parsed manifest of one unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitManifest {
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub provides: BTreeMap<String, PathBuf>,
}

impl UnitManifest {
    /// Manifest path for the unit binary at `unit_path`.
    #[must_use]
    pub fn path_for(unit_path: &Path) -> PathBuf {
        let stem = unit_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        unit_path.with_file_name(format!("{stem}.{MANIFEST_EXTENSION}"))
    }

    /// Read the manifest beside `unit_path`. A missing manifest is an empty
    /// one: the unit has no private dependencies.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_for(unit_path: &Path) -> Result<Self> {
        let path = Self::path_for(unit_path);
        match fs::read_to_string(&path) {
            Ok(json) => Self::parse(&json).map_err(|source| ModuleError::Manifest { path, source }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No dependency manifest at {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ModuleError::io(path, e)),
        }
    }

    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// `provides` with every relative path anchored at `base_dir`.
    #[must_use]
    pub fn provided_paths(&self, base_dir: &Path) -> BTreeMap<String, PathBuf> {
        self.provides
            .iter()
            .map(|(identity, path)| {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                (identity.clone(), path)
            })
            .collect()
    }
}

/// A dependency identity string split into name and version.
///
/// The full string, version included, is what caches and manifests key on;
/// the name alone is what version collisions are detected by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyIdentity<'a> {
    pub name: &'a str,
    pub version: Option<&'a str>,
}

impl<'a> DependencyIdentity<'a> {
    /// Split `name/version`; anything without a `/` is an unversioned name.
    #[must_use]
    pub fn parse(identity: &'a str) -> Self {
        match identity.rsplit_once('/') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => Self {
                name,
                version: Some(version),
            },
            _ => Self {
                name: identity,
                version: None,
            },
        }
    }

    /// Resource bundles are never resolved. Only the name is checked.
    #[must_use]
    pub fn is_resource_bundle(&self) -> bool {
        self.name.contains(RESOURCE_BUNDLE_MARKER)
    }
}

impl fmt::Display for DependencyIdentity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{}/{}", self.name, version),
            None => f.write_str(self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_path_for_unit() {
        let path = UnitManifest::path_for(Path::new("/srv/modules/Alpha/Alpha.so"));
        assert_eq!(path, PathBuf::from("/srv/modules/Alpha/Alpha.deps.json"));
    }

    #[test]
    fn test_parse_and_anchor_paths() {
        let manifest = UnitManifest::parse(
            r#"{
                "requires": ["sqlite-core/3.45.0"],
                "provides": {
                    "sqlite-core/3.45.0": "libsqlite_core.so",
                    "zstd/1.5.5": "/usr/lib/libzstd.so"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.requires, vec!["sqlite-core/3.45.0"]);
        let paths = manifest.provided_paths(Path::new("/srv/modules/Alpha"));
        assert_eq!(
            paths["sqlite-core/3.45.0"],
            PathBuf::from("/srv/modules/Alpha/libsqlite_core.so")
        );
        assert_eq!(paths["zstd/1.5.5"], PathBuf::from("/usr/lib/libzstd.so"));
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = UnitManifest::load_for(&dir.path().join("Alpha.so")).unwrap();
        assert_eq!(manifest, UnitManifest::default());
    }

    #[test]
    fn test_malformed_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Alpha.deps.json"), "{ not json").unwrap();
        let err = UnitManifest::load_for(&dir.path().join("Alpha.so")).unwrap_err();
        assert!(matches!(err, ModuleError::Manifest { .. }));
    }

    #[test]
    fn test_identity_parsing() {
        let id = DependencyIdentity::parse("serde_json/1.0.108");
        assert_eq!(id.name, "serde_json");
        assert_eq!(id.version, Some("1.0.108"));
        assert_eq!(id.to_string(), "serde_json/1.0.108");

        let bare = DependencyIdentity::parse("libcrypto");
        assert_eq!(bare.version, None);

        assert!(DependencyIdentity::parse("ui.resources/1.0.0").is_resource_bundle());
        assert!(!id.is_resource_bundle());
    }
}
