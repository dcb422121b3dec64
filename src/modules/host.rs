//! The module host: one object owning everything modules are loaded into.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::modules::context::SharedContext;
use crate::modules::image::{Image, ImageLoader, NativeImageLoader};
use crate::modules::lifecycle::Lifecycle;
use crate::modules::loader::ModuleLoader;
use crate::modules::locator::ModuleLocator;
use crate::modules::registry::ModuleRegistry;
use crate::modules::resolver::ResolverChain;
use crate::modules::services::{ServiceCollection, ServiceProvider};

/// Owns the shared context, resolver chain, loader and module registry.
///
/// Built once at startup and kept alive for the life of the process:
/// dependencies may still be resolved lazily long after [`ModuleHost::boot`].
pub struct ModuleHost {
    // Module instances go before the images that hold their code
    registry: ModuleRegistry,
    loader: ModuleLoader,
    chain: Arc<ResolverChain>,
    context: Arc<SharedContext>,
    locator: ModuleLocator,
    lifecycle: Lifecycle,
}

impl ModuleHost {
    /// Host that opens units with the platform's dynamic loader
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_image_loader(config, NativeImageLoader::new())
    }

    /// Host backed by a custom image loader
    pub fn with_image_loader(config: &Config, images: impl ImageLoader + 'static) -> Self {
        let context = Arc::new(SharedContext::new(images, config.resolution.version_policy));
        let chain = Arc::new(ResolverChain::new());
        let loader = ModuleLoader::new(Arc::clone(&context), Arc::clone(&chain));

        Self {
            registry: ModuleRegistry::new(),
            loader,
            chain,
            context,
            locator: ModuleLocator::new(config.locator.clone()),
            lifecycle: Lifecycle::new(),
        }
    }

    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// The configured module root, or the located one
    ///
    /// # Errors
    /// [`crate::ModuleError::DirectoryNotFound`] if no root is configured and
    /// none can be found.
    pub fn module_root(&self, config: &Config) -> Result<PathBuf> {
        match &config.module_root {
            Some(root) => Ok(root.clone()),
            None => self.locator.locate(),
        }
    }

    /// Load and instantiate the configured modules. Returns how many modules
    /// were added to the registry.
    ///
    /// # Errors
    /// Any loader or registry failure; the registry is left unchanged.
    pub fn load(&mut self, config: &Config) -> Result<usize> {
        let root = self.module_root(config)?;
        let units = self.loader.load_all(&config.modules, &root)?;
        self.registry.instantiate_all(&units)
    }

    /// Run the two-phase lifecycle over every registered module.
    ///
    /// # Errors
    /// [`crate::ModuleError::Hook`] for the first failing module hook.
    pub fn start(&mut self, services: ServiceCollection, config: &Config) -> Result<ServiceProvider> {
        self.lifecycle.run(&mut self.registry, services, config)
    }

    /// [`ModuleHost::load`] followed by [`ModuleHost::start`]
    ///
    /// # Errors
    /// The first failure of either step.
    pub fn boot(&mut self, config: &Config, services: ServiceCollection) -> Result<ServiceProvider> {
        let added = self.load(config)?;
        info!("Booting {} modules", added);
        self.start(services, config)
    }

    /// Resolve a dependency on behalf of the host itself.
    ///
    /// # Errors
    /// See [`SharedContext::require`].
    pub fn require(&self, identity: &str) -> Result<Arc<dyn Image>> {
        self.context.require(identity, None)
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<ResolverChain> {
        &self.chain
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SharedContext> {
        &self.context
    }

    #[must_use]
    pub fn locator(&self) -> &ModuleLocator {
        &self.locator
    }
}
