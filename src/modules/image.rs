// Loaded binary images backing module units and their dependencies:
// - Native images opened with libloading into the host process
// - Static images compiled into the host and addressed by path
// - Nothing is ever unloaded; images live as long as the process
use dashmap::DashMap;
use libloading::Library;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ModuleError, Result};
use crate::modules::contract::{ModuleDeclaration, DECLARATION_SYMBOL};

/// What an image is being opened as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// A module unit named in configuration
    Unit,
    /// A library a unit depends on, shared with every other image
    Dependency,
}

/// A binary loaded into the shared context.
pub trait Image: Send + Sync + fmt::Debug {
    /// Path the image was opened from
    fn path(&self) -> &Path;

    /// The unit's exported declaration table, if it has one
    fn declaration(&self) -> Option<&ModuleDeclaration>;
}

/// Opens images. The shared context owns exactly one loader.
pub trait ImageLoader: Send + Sync {
    /// Open the binary at `path`.
    ///
    /// # Errors
    /// Returns [`ModuleError::ImageLoad`] if the platform loader rejects the file.
    fn open(&self, path: &Path, kind: ImageKind) -> Result<Arc<dyn Image>>;
}

/// A dynamic library opened with the platform loader.
///
/// The library handle is leaked when the image is opened: module instances,
/// services and type names created from it may outlive every owner of the
/// image, so the code must stay mapped until the process exits.
pub struct NativeImage {
    path: PathBuf,
    /// The exported declaration inside `library`
    declaration: Option<&'static ModuleDeclaration>,
    _library: &'static Library,
}

impl Image for NativeImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn declaration(&self) -> Option<&ModuleDeclaration> {
        self.declaration
    }
}

impl fmt::Debug for NativeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeImage")
            .field("path", &self.path)
            .field("has_declaration", &self.declaration.is_some())
            .finish()
    }
}

/// Loads images through the platform's dynamic loader
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeImageLoader;

impl NativeImageLoader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[cfg(unix)]
    unsafe fn open_library(path: &Path, kind: ImageKind) -> std::result::Result<Library, libloading::Error> {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_LOCAL, RTLD_NOW};

        // Dependencies go into the global namespace so every unit binds to
        // the same copy; units keep their own symbols local.
        let flags = match kind {
            ImageKind::Dependency => RTLD_NOW | RTLD_GLOBAL,
            ImageKind::Unit => RTLD_NOW | RTLD_LOCAL,
        };
        UnixLibrary::open(Some(path), flags).map(Library::from)
    }

    #[cfg(not(unix))]
    unsafe fn open_library(path: &Path, _kind: ImageKind) -> std::result::Result<Library, libloading::Error> {
        Library::new(path)
    }
}

impl ImageLoader for NativeImageLoader {
    fn open(&self, path: &Path, kind: ImageKind) -> Result<Arc<dyn Image>> {
        let image_error = |e: libloading::Error| ModuleError::ImageLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        // Never unloaded
        let library: &'static Library =
            Box::leak(Box::new(unsafe { Self::open_library(path, kind) }.map_err(image_error)?));

        let declaration = match kind {
            // Safety: the symbol is the declaration static itself, and the
            // library it lives in is never closed.
            ImageKind::Unit => unsafe { library.get::<*const ModuleDeclaration>(DECLARATION_SYMBOL) }
                .ok()
                .and_then(|symbol| unsafe { (*symbol).as_ref() }),
            ImageKind::Dependency => None,
        };

        debug!(
            "Opened {:?} image {} (declaration: {})",
            kind,
            path.display(),
            declaration.is_some()
        );

        Ok(Arc::new(NativeImage {
            path: path.to_path_buf(),
            declaration,
            _library: library,
        }))
    }
}

/// An image compiled into the host
#[derive(Debug, Clone)]
pub struct StaticImage {
    path: PathBuf,
    declaration: Option<&'static ModuleDeclaration>,
}

impl Image for StaticImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn declaration(&self) -> Option<&ModuleDeclaration> {
        self.declaration
    }
}

/// Serves images compiled into the host, keyed by the path they stand in
/// for. Lets a host ship built-in modules through the same layout,
/// resolution and lifecycle as native ones.
#[derive(Debug, Default)]
pub struct StaticImageLoader {
    images: DashMap<PathBuf, Option<&'static ModuleDeclaration>>,
}

impl StaticImageLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `declaration` for `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, declaration: &'static ModuleDeclaration) {
        self.images.insert(path.into(), Some(declaration));
    }

    /// Serve a plain library without a declaration for `path`.
    pub fn insert_library(&self, path: impl Into<PathBuf>) {
        self.images.insert(path.into(), None);
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.images.contains_key(path)
    }
}

impl ImageLoader for StaticImageLoader {
    fn open(&self, path: &Path, kind: ImageKind) -> Result<Arc<dyn Image>> {
        let declaration = self
            .images
            .get(path)
            .map(|entry| *entry.value())
            .ok_or_else(|| ModuleError::ImageLoad {
                path: path.to_path_buf(),
                reason: "no static image registered for this path".to_string(),
            })?;

        Ok(Arc::new(StaticImage {
            path: path.to_path_buf(),
            declaration: match kind {
                ImageKind::Unit => declaration,
                ImageKind::Dependency => None,
            },
        }))
    }
}
