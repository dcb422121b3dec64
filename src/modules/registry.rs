//! Module instances, one per unit that declares exactly one implementation.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ModuleError, Result};
use crate::modules::contract::{Module, ModuleEntry};
use crate::modules::image::Image;
use crate::modules::loader::PluginUnit;

/// A constructed module and the image its code lives in
pub struct ModuleInstance {
    // Dropped before `_image`
    module: Box<dyn Module>,
    unit: String,
    type_name: &'static str,
    _image: Arc<dyn Image>,
}

impl ModuleInstance {
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn module(&self) -> &dyn Module {
        self.module.as_ref()
    }

    pub fn module_mut(&mut self) -> &mut dyn Module {
        self.module.as_mut()
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("unit", &self.unit)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Instantiated modules in load order
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    instances: Vec<ModuleInstance>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the module of every unit not yet instantiated. Units
    /// without a module are skipped with a warning. Returns how many
    /// modules were added.
    ///
    /// Nothing is added unless every unit succeeds.
    ///
    /// # Errors
    /// [`ModuleError::MultipleImplementations`] if a unit declares more than
    /// one module, [`ModuleError::CastFailure`] if its declaration was built
    /// for a different host.
    pub fn instantiate_all(&mut self, units: &[Arc<PluginUnit>]) -> Result<usize> {
        let mut staged = Vec::new();

        for unit in units {
            if self.contains(&unit.name) || staged.iter().any(|i: &ModuleInstance| i.unit == unit.name) {
                debug!("Module unit {} already instantiated", unit.name);
                continue;
            }
            if let Some(instance) = Self::instantiate(unit)? {
                staged.push(instance);
            }
        }

        let added = staged.len();
        self.instances.extend(staged);
        info!("Instantiated {} modules ({} total)", added, self.instances.len());
        Ok(added)
    }

    fn instantiate(unit: &PluginUnit) -> Result<Option<ModuleInstance>> {
        let Some(declaration) = unit.image.declaration() else {
            warn!("Module unit {} exports no module declaration; skipping", unit.name);
            return Ok(None);
        };

        if let Some(reason) = declaration.incompatibility() {
            return Err(ModuleError::CastFailure {
                unit: unit.name.clone(),
                reason,
            });
        }

        let entries: Vec<&ModuleEntry> = declaration.contract_entries().collect();
        match entries.as_slice() {
            [] => {
                warn!("Module unit {} declares no module implementation; skipping", unit.name);
                Ok(None)
            }
            [entry] => {
                let module = (entry.create)();
                debug!("Instantiated {} from module unit {}", entry.type_name, unit.name);
                Ok(Some(ModuleInstance {
                    module,
                    unit: unit.name.clone(),
                    type_name: entry.type_name,
                    _image: Arc::clone(&unit.image),
                }))
            }
            many => Err(ModuleError::MultipleImplementations {
                unit: unit.name.clone(),
                types: many.iter().map(|entry| entry.type_name.to_string()).collect(),
            }),
        }
    }

    #[must_use]
    pub fn get(&self, unit: &str) -> Option<&ModuleInstance> {
        self.instances.iter().find(|instance| instance.unit == unit)
    }

    pub fn get_mut(&mut self, unit: &str) -> Option<&mut ModuleInstance> {
        self.instances.iter_mut().find(|instance| instance.unit == unit)
    }

    #[must_use]
    pub fn contains(&self, unit: &str) -> bool {
        self.get(unit).is_some()
    }

    /// Unit names in load order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.instances.iter().map(ModuleInstance::unit).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleInstance> {
        self.instances.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ModuleInstance> {
        self.instances.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
