//! Error types for module loading, resolution and lifecycle.

use std::path::PathBuf;
use thiserror::Error;

use crate::modules::lifecycle::Phase;

/// Result type alias for module host operations.
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors raised by the module host.
///
/// Everything at the load layer is fail-fast: the first error aborts the
/// current call and nothing partially loaded is exposed to the caller.
#[derive(Error, Debug)]
pub enum ModuleError {
    // Discovery
    #[error("module directory not found: no '{production}' next to {} and no '{development}' within {depth} parent levels", .start.display())]
    DirectoryNotFound {
        start: PathBuf,
        production: String,
        development: String,
        depth: usize,
    },

    // Loading
    #[error("module unit '{name}' not found at {}", .path.display())]
    UnitNotFound { name: String, path: PathBuf },

    #[error("dependency '{identity}' required by '{requested_by}' could not be resolved")]
    DependencyNotFound {
        identity: String,
        requested_by: String,
    },

    #[error("dependency '{requested}' conflicts with already loaded '{loaded}'")]
    VersionConflict { requested: String, loaded: String },

    #[error("failed to load module unit '{name}': {source}")]
    InvalidOperation {
        name: String,
        #[source]
        source: Box<ModuleError>,
    },

    #[error("no module units were loaded")]
    NothingLoaded,

    #[error("invalid dependency manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open image {}: {reason}", .path.display())]
    ImageLoad { path: PathBuf, reason: String },

    // Instantiation
    #[error("module unit '{unit}' exports {} module implementations ({}); exactly one is allowed", .types.len(), .types.join(", "))]
    MultipleImplementations { unit: String, types: Vec<String> },

    #[error("module unit '{unit}' cannot be used as a module: {reason}")]
    CastFailure { unit: String, reason: String },

    // Lifecycle
    #[error("module '{module}' failed during {phase}: {source:#}")]
    Hook {
        module: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
}

impl ModuleError {
    /// Whether this error (or the error it wraps) is a missing unit or
    /// dependency.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::UnitNotFound { .. } | Self::DependencyNotFound { .. } => true,
            Self::InvalidOperation { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The innermost error, looking through `InvalidOperation` wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &ModuleError {
        match self {
            Self::InvalidOperation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_through_wrapper() {
        let err = ModuleError::InvalidOperation {
            name: "Ghost".to_string(),
            source: Box::new(ModuleError::UnitNotFound {
                name: "Ghost".to_string(),
                path: PathBuf::from("/srv/modules/Ghost/Ghost.so"),
            }),
        };
        assert!(err.is_not_found());
        assert!(matches!(err.root_cause(), ModuleError::UnitNotFound { .. }));
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_multiple_implementations_message() {
        let err = ModuleError::MultipleImplementations {
            unit: "Alpha".to_string(),
            types: vec!["First".to_string(), "Second".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("exports 2 module implementations"));
        assert!(msg.contains("First, Second"));
        assert!(!err.is_not_found());
    }
}
