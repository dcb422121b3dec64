//! Two-phase module lifecycle.
//!
//! Every module registers its services first; only then is the service
//! provider built and every module initialized. A module may therefore use
//! services registered by any other module during initialization.

use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ModuleError, Result};
use crate::modules::registry::ModuleRegistry;
use crate::modules::services::{ServiceCollection, ServiceProvider};

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Register,
    Initialize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register => f.write_str("register"),
            Self::Initialize => f.write_str("initialize"),
        }
    }
}

/// Called with the phase and unit name right before each hook runs
pub type PhaseObserver = Box<dyn Fn(Phase, &str) + Send + Sync>;

/// Drives the register and initialize phases across a registry
#[derive(Default)]
pub struct Lifecycle {
    observer: Option<PhaseObserver>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl Fn(Phase, &str) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Run both phases: register everything, build the provider, initialize
    /// everything.
    ///
    /// # Errors
    /// [`ModuleError::Hook`] for the first hook that fails; later modules
    /// are not run.
    pub fn run(
        &self,
        registry: &mut ModuleRegistry,
        mut services: ServiceCollection,
        config: &Config,
    ) -> Result<ServiceProvider> {
        let started = Instant::now();
        self.register_all(registry, &mut services, config)?;

        let provider = services.build();
        self.initialize_all(registry, &provider, config)?;

        info!(
            "Started {} modules with {} services in {:?}",
            registry.len(),
            provider.len(),
            started.elapsed()
        );
        Ok(provider)
    }

    /// Phase 1: call `register_services` on every module in registry order.
    ///
    /// # Errors
    /// [`ModuleError::Hook`] for the first failing module.
    pub fn register_all(
        &self,
        registry: &mut ModuleRegistry,
        services: &mut ServiceCollection,
        config: &Config,
    ) -> Result<()> {
        for instance in registry.iter_mut() {
            self.notify(Phase::Register, instance.unit());
            let unit = instance.unit().to_string();
            instance
                .module_mut()
                .register_services(services, config)
                .map_err(|source| hook_error(unit.clone(), Phase::Register, source))?;
            debug!("Module {} registered services", unit);
        }
        Ok(())
    }

    /// Phase 2: call `initialize_services` on every module in registry order.
    /// Only call once [`Lifecycle::register_all`] has completed.
    ///
    /// # Errors
    /// [`ModuleError::Hook`] for the first failing module.
    pub fn initialize_all(
        &self,
        registry: &mut ModuleRegistry,
        provider: &ServiceProvider,
        config: &Config,
    ) -> Result<()> {
        for instance in registry.iter_mut() {
            self.notify(Phase::Initialize, instance.unit());
            let unit = instance.unit().to_string();
            instance
                .module_mut()
                .initialize_services(provider, config)
                .map_err(|source| hook_error(unit.clone(), Phase::Initialize, source))?;
            debug!("Module {} initialized", unit);
        }
        Ok(())
    }

    fn notify(&self, phase: Phase, unit: &str) {
        if let Some(observer) = &self.observer {
            observer(phase, unit);
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

fn hook_error(module: String, phase: Phase, source: anyhow::Error) -> ModuleError {
    tracing::error!("Module {} failed during {}: {:#}", module, phase, source);
    ModuleError::Hook {
        module,
        phase,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::contract::{Module, ModuleDeclaration, ModuleEntry, ABI_VERSION, CORE_VERSION};
    use crate::modules::image::{ImageKind, ImageLoader, StaticImageLoader};
    use crate::modules::loader::PluginUnit;
    use crate::modules::manifest::UnitManifest;
    use crate::modules::resolver::ManifestResolver;
    use anyhow::bail;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    #[derive(Default)]
    struct Recording;

    impl Module for Recording {
        fn register_services<'a>(
            &mut self,
            services: &'a mut ServiceCollection,
            _config: &Config,
        ) -> anyhow::Result<&'a mut ServiceCollection> {
            let mut events = EVENTS.lock().unwrap();
            let n = events.iter().filter(|e| e.starts_with("register")).count();
            events.push(format!("register#{n}"));
            Ok(services)
        }

        fn initialize_services<'a>(
            &mut self,
            services: &'a ServiceProvider,
            _config: &Config,
        ) -> anyhow::Result<&'a ServiceProvider> {
            EVENTS.lock().unwrap().push("initialize".to_string());
            Ok(services)
        }
    }

    #[derive(Default)]
    struct FailsToRegister;

    impl Module for FailsToRegister {
        fn register_services<'a>(
            &mut self,
            _services: &'a mut ServiceCollection,
            _config: &Config,
        ) -> anyhow::Result<&'a mut ServiceCollection> {
            bail!("connection string missing")
        }

        fn initialize_services<'a>(
            &mut self,
            services: &'a ServiceProvider,
            _config: &Config,
        ) -> anyhow::Result<&'a ServiceProvider> {
            Ok(services)
        }
    }

    static RECORDING: ModuleDeclaration = ModuleDeclaration {
        abi_version: ABI_VERSION,
        core_version: CORE_VERSION,
        entries: &[ModuleEntry::of::<Recording>("Recording")],
    };

    static FAILING: ModuleDeclaration = ModuleDeclaration {
        abi_version: ABI_VERSION,
        core_version: CORE_VERSION,
        entries: &[ModuleEntry::of::<FailsToRegister>("FailsToRegister")],
    };

    fn registry(units: &[(&str, &'static ModuleDeclaration)]) -> ModuleRegistry {
        let images = StaticImageLoader::new();
        let units: Vec<_> = units
            .iter()
            .map(|(name, declaration)| {
                let path = PathBuf::from(format!("/srv/modules/{name}/{name}.so"));
                images.insert(path.clone(), *declaration);
                Arc::new(PluginUnit {
                    name: (*name).to_string(),
                    image: images.open(&path, ImageKind::Unit).unwrap(),
                    resolver: Arc::new(ManifestResolver::new(*name, &path, &UnitManifest::default())),
                    path,
                    loaded_at: chrono::Utc::now(),
                })
            })
            .collect();

        let mut registry = ModuleRegistry::new();
        registry.instantiate_all(&units).unwrap();
        registry
    }

    #[test]
    fn test_every_register_precedes_every_initialize() {
        let mut registry = registry(&[
            ("Alpha", &RECORDING),
            ("Beta", &RECORDING),
            ("Gamma", &RECORDING),
        ]);

        Lifecycle::new()
            .run(&mut registry, ServiceCollection::new(), &Config::default())
            .unwrap();

        let events = EVENTS.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "register#0",
                "register#1",
                "register#2",
                "initialize",
                "initialize",
                "initialize"
            ]
        );
    }

    #[test]
    fn test_hook_failure_aborts_with_module_name() {
        let mut registry = registry(&[("Broken", &FAILING)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&seen);
        let lifecycle = Lifecycle::new().with_observer(move |phase, unit| {
            observed.lock().unwrap().push((phase, unit.to_string()));
        });

        let err = lifecycle
            .run(&mut registry, ServiceCollection::new(), &Config::default())
            .unwrap_err();

        match err {
            ModuleError::Hook { module, phase, .. } => {
                assert_eq!(module, "Broken");
                assert_eq!(phase, Phase::Register);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Initialization never started
        assert_eq!(*seen.lock().unwrap(), vec![(Phase::Register, "Broken".to_string())]);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Register.to_string(), "register");
        assert_eq!(Phase::Initialize.to_string(), "initialize");
    }
}
