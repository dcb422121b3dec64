// Module system:
// - Units are dynamic libraries loaded into one shared context
// - Dependencies resolve locality first, then through every other unit
// - Each unit contributes exactly one module
// - Modules register services, then initialize once everything is registered
pub mod context;
pub mod contract;
pub mod host;
pub mod image;
pub mod lifecycle;
pub mod loader;
pub mod locator;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod services;

pub use context::{MissingDependencyHook, SharedContext};
pub use contract::{
    Module, ModuleCreate, ModuleDeclaration, ModuleEntry, ABI_VERSION, CORE_VERSION,
    DECLARATION_SYMBOL, MODULE_CONTRACT,
};
pub use host::ModuleHost;
pub use image::{Image, ImageKind, ImageLoader, NativeImageLoader, StaticImageLoader};
pub use lifecycle::{Lifecycle, Phase};
pub use loader::{ModuleLoader, PluginUnit};
pub use locator::{Layout, ModuleLocator};
pub use manifest::{DependencyIdentity, UnitManifest};
pub use registry::{ModuleInstance, ModuleRegistry};
pub use resolver::{DependencyResolver, ManifestResolver, Resolution, ResolutionStats, ResolverChain};
pub use services::{ServiceCollection, ServiceProvider};
