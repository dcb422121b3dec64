// Module unit loader:
// - Units live at <root>/<name>/<name>.<dll extension>
// - Each unit gets a resolver from its manifest before it is opened
// - All units share one context; nothing is unloaded
// - A failing unit aborts the whole call and nothing from it is tracked
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ModuleError, Result};
use crate::modules::context::{MissingDependencyHook, SharedContext};
use crate::modules::image::Image;
use crate::modules::manifest::UnitManifest;
use crate::modules::resolver::{DependencyResolver, ManifestResolver, ResolverChain};

/// A unit loaded into the shared context
pub struct PluginUnit {
    pub name: String,
    pub path: PathBuf,
    pub image: Arc<dyn Image>,
    pub resolver: Arc<dyn DependencyResolver>,
    pub loaded_at: DateTime<Utc>,
}

impl fmt::Debug for PluginUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginUnit")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

/// Loads configured units and tracks every unit loaded successfully
pub struct ModuleLoader {
    context: Arc<SharedContext>,
    chain: Arc<ResolverChain>,
    units: RwLock<Vec<Arc<PluginUnit>>>,
}

impl ModuleLoader {
    /// Create a loader and subscribe `chain` to `context`'s
    /// missing-dependency events.
    pub fn new(context: Arc<SharedContext>, chain: Arc<ResolverChain>) -> Self {
        let loader = Self {
            context,
            chain,
            units: RwLock::new(Vec::new()),
        };
        loader.subscribe();
        loader
    }

    fn subscribe(&self) -> bool {
        let hook: Arc<dyn MissingDependencyHook> = self.chain.clone();
        self.context.subscribe(hook)
    }

    /// Path of unit `name` under `root`
    #[must_use]
    pub fn unit_path(root: &Path, name: &str) -> PathBuf {
        root.join(name)
            .join(format!("{name}.{}", std::env::consts::DLL_EXTENSION))
    }

    /// Load `names` in order from `root`. Returns the units loaded by this
    /// call. Names already loaded are skipped with a warning.
    ///
    /// # Errors
    /// [`ModuleError::NothingLoaded`] for an empty list; otherwise
    /// [`ModuleError::InvalidOperation`] wrapping the first unit's failure.
    /// Units loaded earlier in a failing call stay mapped but are not
    /// tracked.
    pub fn load_all<S: AsRef<str>>(&self, names: &[S], root: &Path) -> Result<Vec<Arc<PluginUnit>>> {
        if self.subscribe() {
            debug!("Subscribed resolver chain before loading");
        }

        if names.is_empty() {
            return Err(ModuleError::NothingLoaded);
        }

        info!("Loading {} module units from {}", names.len(), root.display());
        let mut staged: Vec<Arc<PluginUnit>> = Vec::with_capacity(names.len());

        for name in names {
            let name = name.as_ref();
            if self.contains(name) || staged.iter().any(|unit| unit.name == name) {
                warn!("Module unit {} requested more than once; keeping the first load", name);
                continue;
            }

            let unit = self.load_one(name, root).map_err(|source| {
                error!("Failed to load module unit {}: {}", name, source);
                ModuleError::InvalidOperation {
                    name: name.to_string(),
                    source: Box::new(source),
                }
            })?;
            staged.push(Arc::new(unit));
        }

        self.units.write().extend(staged.iter().cloned());
        info!("Loaded {} module units", staged.len());
        Ok(staged)
    }

    fn load_one(&self, name: &str, root: &Path) -> Result<PluginUnit> {
        let started = Instant::now();
        let path = Self::unit_path(root, name);
        debug!("Loading module unit {} from {}", name, path.display());

        if !path.is_file() {
            return Err(ModuleError::UnitNotFound {
                name: name.to_string(),
                path,
            });
        }

        let manifest = UnitManifest::load_for(&path)?;
        let mut resolver: Arc<dyn DependencyResolver> =
            Arc::new(ManifestResolver::new(name, &path, &manifest));
        if !self.chain.register(name, Arc::clone(&resolver)) {
            // Left behind by an earlier failed call
            resolver = self.chain.resolver_for(name).unwrap_or(resolver);
        }

        let image = self.context.load_unit(name, &path, &manifest.requires)?;
        debug!(
            "Module unit {} ready in {:?} ({} dependencies)",
            name,
            started.elapsed(),
            manifest.requires.len()
        );

        Ok(PluginUnit {
            name: name.to_string(),
            path,
            image,
            resolver,
            loaded_at: Utc::now(),
        })
    }

    /// Every tracked unit, in load order
    #[must_use]
    pub fn units(&self) -> Vec<Arc<PluginUnit>> {
        self.units.read().clone()
    }

    #[must_use]
    pub fn unit(&self, name: &str) -> Option<Arc<PluginUnit>> {
        self.units.read().iter().find(|unit| unit.name == name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.units.read().iter().any(|unit| unit.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SharedContext> {
        &self.context
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<ResolverChain> {
        &self.chain
    }
}
