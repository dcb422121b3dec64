//! Finds the directory holding module units.
//!
//! Packaged installs keep units in a fixed directory beside the executable.
//! Development builds put them in a differently named directory somewhere
//! above the executable (e.g. `<repo>/module-build` while the binary sits in
//! `<repo>/target/debug`), found by a bounded upward search.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::LocatorConfig;
use crate::error::{ModuleError, Result};

/// Which layout the module root was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Production,
    Development,
}

#[derive(Debug, Clone)]
pub struct ModuleLocator {
    config: LocatorConfig,
}

impl ModuleLocator {
    #[must_use]
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Locate the module root relative to the running executable.
    ///
    /// # Errors
    /// [`ModuleError::DirectoryNotFound`] if neither layout exists, or an I/O
    /// error if the executable path cannot be determined.
    pub fn locate(&self) -> Result<PathBuf> {
        let exe = std::env::current_exe().map_err(|e| ModuleError::io("<current executable>", e))?;
        let start = exe.parent().unwrap_or_else(|| Path::new("."));
        self.locate_from(start).map(|(path, _)| path)
    }

    /// Locate the module root starting at `start` (the executable's
    /// directory).
    ///
    /// # Errors
    /// [`ModuleError::DirectoryNotFound`] if neither layout exists.
    pub fn locate_from(&self, start: &Path) -> Result<(PathBuf, Layout)> {
        let production = start.join(&self.config.production_dir);
        if production.is_dir() {
            info!("Using production module layout at {}", production.display());
            return Ok((production, Layout::Production));
        }

        // `start` itself plus up to `max_depth` parents
        for dir in start.ancestors().take(self.config.max_depth + 1) {
            let candidate = dir.join(&self.config.development_dir);
            if candidate.is_dir() {
                info!("Using development module layout at {}", candidate.display());
                return Ok((candidate, Layout::Development));
            }
        }

        Err(ModuleError::DirectoryNotFound {
            start: start.to_path_buf(),
            production: self.config.production_dir.clone(),
            development: self.config.development_dir.clone(),
            depth: self.config.max_depth,
        })
    }
}

impl Default for ModuleLocator {
    fn default() -> Self {
        Self::new(LocatorConfig::default())
    }
}
