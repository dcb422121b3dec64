//! The shared execution context every unit and dependency is loaded into.
//!
//! One context per host. It remembers every image it opened, by path and by
//! dependency identity, and never unloads anything. When a unit needs a
//! dependency the context has not seen, it raises a missing-dependency event
//! to the single subscribed [`MissingDependencyHook`].

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::VersionPolicy;
use crate::error::{ModuleError, Result};
use crate::modules::image::{Image, ImageKind, ImageLoader, NativeImageLoader};
use crate::modules::manifest::DependencyIdentity;

/// Name reported as the requester when the host itself asks for a dependency
pub const HOST_REQUESTER: &str = "<host>";

/// Receives missing-dependency events from a [`SharedContext`].
///
/// May be invoked from several threads at once.
pub trait MissingDependencyHook: Send + Sync {
    /// Find and load `identity`, or `None` if it cannot be resolved.
    /// `requesting` names the unit that needs it, when known.
    fn resolve(
        &self,
        context: &SharedContext,
        identity: &str,
        requesting: Option<&str>,
    ) -> Option<Arc<dyn Image>>;
}

pub struct SharedContext {
    loader: Box<dyn ImageLoader>,
    policy: VersionPolicy,
    by_path: DashMap<PathBuf, Arc<dyn Image>>,
    by_identity: DashMap<String, Arc<dyn Image>>,
    /// Dependency name -> identity of the first version loaded under it
    by_name: DashMap<String, String>,
    hook: OnceCell<Arc<dyn MissingDependencyHook>>,
}

impl SharedContext {
    pub fn new(loader: impl ImageLoader + 'static, policy: VersionPolicy) -> Self {
        Self {
            loader: Box::new(loader),
            policy,
            by_path: DashMap::new(),
            by_identity: DashMap::new(),
            by_name: DashMap::new(),
            hook: OnceCell::new(),
        }
    }

    /// Context backed by the platform's dynamic loader
    #[must_use]
    pub fn native(policy: VersionPolicy) -> Self {
        Self::new(NativeImageLoader::new(), policy)
    }

    /// Install the missing-dependency hook. Only the first call has any
    /// effect; returns whether this call installed it.
    pub fn subscribe(&self, hook: Arc<dyn MissingDependencyHook>) -> bool {
        let installed = self.hook.set(hook).is_ok();
        if installed {
            debug!("Missing-dependency hook subscribed");
        }
        installed
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.hook.get().is_some()
    }

    #[must_use]
    pub fn version_policy(&self) -> VersionPolicy {
        self.policy
    }

    /// Open `path`, reusing the image if it is already loaded.
    ///
    /// # Errors
    /// Propagates the image loader's error.
    pub fn open(&self, path: &Path, kind: ImageKind) -> Result<Arc<dyn Image>> {
        if let Some(image) = self.by_path.get(path) {
            return Ok(Arc::clone(image.value()));
        }

        let image = self.loader.open(path, kind)?;
        let image = self
            .by_path
            .entry(path.to_path_buf())
            .or_insert(image)
            .value()
            .clone();
        Ok(image)
    }

    /// Load a unit: satisfy every required identity, then open the unit
    /// binary itself.
    ///
    /// # Errors
    /// Fails with [`ModuleError::DependencyNotFound`] for the first required
    /// identity nothing can provide, or with the loader's error for the unit.
    pub fn load_unit(&self, name: &str, path: &Path, requires: &[String]) -> Result<Arc<dyn Image>> {
        for identity in requires {
            self.require(identity, Some(name))?;
        }

        let image = self.open(path, ImageKind::Unit)?;
        info!("Loaded unit {} from {}", name, path.display());
        Ok(image)
    }

    /// Make `identity` available, raising a missing-dependency event if the
    /// context cannot satisfy it by itself. Safe to call from any thread,
    /// also long after startup.
    ///
    /// # Errors
    /// [`ModuleError::DependencyNotFound`] if the hook cannot resolve it, or
    /// [`ModuleError::VersionConflict`] under [`VersionPolicy::Strict`].
    pub fn require(&self, identity: &str, requesting: Option<&str>) -> Result<Arc<dyn Image>> {
        if let Some(image) = self.find_loaded(identity)? {
            return Ok(image);
        }

        let resolved = self
            .hook
            .get()
            .and_then(|hook| hook.resolve(self, identity, requesting));

        match resolved {
            Some(image) => Ok(self.record(identity, image)),
            None => Err(ModuleError::DependencyNotFound {
                identity: identity.to_string(),
                requested_by: requesting.unwrap_or(HOST_REQUESTER).to_string(),
            }),
        }
    }

    /// Default search: the exact identity, then any loaded version of the
    /// same dependency name, subject to the version policy.
    fn find_loaded(&self, identity: &str) -> Result<Option<Arc<dyn Image>>> {
        if let Some(image) = self.by_identity.get(identity) {
            return Ok(Some(Arc::clone(image.value())));
        }

        let parsed = DependencyIdentity::parse(identity);
        let Some(loaded) = self.by_name.get(parsed.name).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        match self.policy {
            VersionPolicy::FirstLoadedWins => {
                warn!(
                    "Dependency {} requested but {} is already loaded; using the loaded version",
                    identity, loaded
                );
                Ok(self.by_identity.get(&loaded).map(|e| Arc::clone(e.value())))
            }
            VersionPolicy::Strict => Err(ModuleError::VersionConflict {
                requested: identity.to_string(),
                loaded,
            }),
        }
    }

    fn record(&self, identity: &str, image: Arc<dyn Image>) -> Arc<dyn Image> {
        let image = self
            .by_identity
            .entry(identity.to_string())
            .or_insert(image)
            .value()
            .clone();
        let name = DependencyIdentity::parse(identity).name.to_string();
        self.by_name.entry(name).or_insert_with(|| identity.to_string());
        image
    }

    /// Whether `identity` has been loaded under exactly that identity.
    #[must_use]
    pub fn is_loaded(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    /// Number of distinct images opened so far
    #[must_use]
    pub fn image_count(&self) -> usize {
        self.by_path.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::image::StaticImageLoader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves `<name>/<version>` to `/deps/<name>-<version>.so`
    struct FixedHook {
        calls: AtomicUsize,
    }

    impl MissingDependencyHook for FixedHook {
        fn resolve(
            &self,
            context: &SharedContext,
            identity: &str,
            _requesting: Option<&str>,
        ) -> Option<Arc<dyn Image>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = PathBuf::from(format!("/deps/{}.so", identity.replace('/', "-")));
            context.open(&path, ImageKind::Dependency).ok()
        }
    }

    fn context(policy: VersionPolicy) -> (SharedContext, Arc<FixedHook>) {
        let loader = StaticImageLoader::new();
        loader.insert_library("/deps/zstd-1.5.5.so");
        loader.insert_library("/deps/zstd-1.5.6.so");
        let context = SharedContext::new(loader, policy);
        let hook = Arc::new(FixedHook {
            calls: AtomicUsize::new(0),
        });
        assert!(context.subscribe(hook.clone()));
        (context, hook)
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let (context, hook) = context(VersionPolicy::FirstLoadedWins);
        assert!(!context.subscribe(hook));
        assert!(context.is_subscribed());
    }

    #[test]
    fn test_loaded_identity_skips_hook() {
        let (context, hook) = context(VersionPolicy::FirstLoadedWins);
        context.require("zstd/1.5.5", Some("Alpha")).unwrap();
        context.require("zstd/1.5.5", Some("Beta")).unwrap();
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert!(context.is_loaded("zstd/1.5.5"));
    }

    #[test]
    fn test_unresolvable_names_requester() {
        let (context, _) = context(VersionPolicy::FirstLoadedWins);
        let err = context.require("lz4/1.9.4", Some("Alpha")).unwrap_err();
        match err {
            ModuleError::DependencyNotFound {
                identity,
                requested_by,
            } => {
                assert_eq!(identity, "lz4/1.9.4");
                assert_eq!(requested_by, "Alpha");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_first_loaded_version_wins() {
        let (context, hook) = context(VersionPolicy::FirstLoadedWins);
        let first = context.require("zstd/1.5.5", None).unwrap();
        let second = context.require("zstd/1.5.6", None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strict_policy_rejects_version_skew() {
        let (context, _) = context(VersionPolicy::Strict);
        context.require("zstd/1.5.5", None).unwrap();
        let err = context.require("zstd/1.5.6", None).unwrap_err();
        assert!(matches!(err, ModuleError::VersionConflict { .. }));
    }
}
