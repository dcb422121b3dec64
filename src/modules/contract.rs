//! Module contract shared by the host and every module unit.
//!
//! A unit exports one `PLUGWIRE_MODULE_DECLARATION` static listing the
//! types it offers. The host reads that table through the dynamic loader's
//! symbol lookup instead of scanning types, so "exactly one implementation
//! per unit" is a plain count over the table.
//!
//! Units and host must be built with the same compiler and the same
//! `plugwire` version: the table carries trait objects across the boundary.

use anyhow::Result;

use crate::config::Config;
use crate::modules::services::{ServiceCollection, ServiceProvider};

/// Symbol every module unit exports
pub const DECLARATION_SYMBOL: &[u8] = b"PLUGWIRE_MODULE_DECLARATION\0";

/// Layout version of [`ModuleDeclaration`]
pub const ABI_VERSION: u32 = 1;

/// Crate version the declaration was compiled against
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity of the [`Module`] contract. Entries declaring any other
/// contract are ignored by the registry.
pub const MODULE_CONTRACT: &str = "plugwire::Module@1";

/// The contract every module unit implements exactly once.
///
/// Both hooks return the surface they were given so implementations can
/// chain registrations.
pub trait Module: Send + Sync {
    /// Register this module's services. Runs for every module before any
    /// module is initialized; later registrations of a type replace earlier
    /// ones.
    fn register_services<'a>(
        &mut self,
        services: &'a mut ServiceCollection,
        config: &Config,
    ) -> Result<&'a mut ServiceCollection>;

    /// Initialize with every module's services available.
    fn initialize_services<'a>(
        &mut self,
        services: &'a ServiceProvider,
        config: &Config,
    ) -> Result<&'a ServiceProvider>;
}

/// Function signature for a module constructor
pub type ModuleCreate = fn() -> Box<dyn Module>;

/// One exported type in a unit's declaration table.
#[derive(Debug, Clone, Copy)]
pub struct ModuleEntry {
    pub type_name: &'static str,
    pub contract: &'static str,
    pub create: ModuleCreate,
}

impl ModuleEntry {
    /// Entry for a default-constructible module type.
    #[must_use]
    pub const fn of<T: Module + Default + 'static>(type_name: &'static str) -> Self {
        Self {
            type_name,
            contract: MODULE_CONTRACT,
            create: construct::<T>,
        }
    }

    /// Whether this entry implements the host's module contract.
    #[must_use]
    pub fn implements_contract(&self) -> bool {
        self.contract == MODULE_CONTRACT
    }
}

fn construct<T: Module + Default + 'static>() -> Box<dyn Module> {
    Box::new(T::default())
}

/// Table a unit exports under [`DECLARATION_SYMBOL`].
#[derive(Debug)]
pub struct ModuleDeclaration {
    pub abi_version: u32,
    pub core_version: &'static str,
    pub entries: &'static [ModuleEntry],
}

impl ModuleDeclaration {
    /// Entries implementing [`MODULE_CONTRACT`].
    pub fn contract_entries(&self) -> impl Iterator<Item = &ModuleEntry> {
        self.entries.iter().filter(|entry| entry.implements_contract())
    }

    /// Reason this declaration cannot be used by this host, if any.
    #[must_use]
    pub fn incompatibility(&self) -> Option<String> {
        if self.abi_version != ABI_VERSION {
            return Some(format!(
                "declaration ABI v{} does not match host ABI v{}",
                self.abi_version, ABI_VERSION
            ));
        }
        if self.core_version != CORE_VERSION {
            return Some(format!(
                "built against plugwire {} but host runs {}",
                self.core_version, CORE_VERSION
            ));
        }
        None
    }
}

/// Export the declaration table for a module unit.
///
/// ```ignore
/// #[derive(Default)]
/// pub struct SqliteModule;
///
/// impl plugwire::Module for SqliteModule { /* ... */ }
///
/// plugwire::export_modules!(SqliteModule);
/// ```
///
/// Listing more than one type is accepted here but rejected when the host
/// instantiates the unit.
#[macro_export]
macro_rules! export_modules {
    ($($ty:ty),* $(,)?) => {
        #[no_mangle]
        pub static PLUGWIRE_MODULE_DECLARATION: $crate::modules::ModuleDeclaration =
            $crate::modules::ModuleDeclaration {
                abi_version: $crate::modules::ABI_VERSION,
                core_version: $crate::modules::CORE_VERSION,
                entries: &[$($crate::modules::ModuleEntry::of::<$ty>(stringify!($ty))),*],
            };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Noop;

    impl Module for Noop {
        fn register_services<'a>(
            &mut self,
            services: &'a mut ServiceCollection,
            _config: &Config,
        ) -> Result<&'a mut ServiceCollection> {
            Ok(services)
        }

        fn initialize_services<'a>(
            &mut self,
            services: &'a ServiceProvider,
            _config: &Config,
        ) -> Result<&'a ServiceProvider> {
            Ok(services)
        }
    }

    const FOREIGN: ModuleEntry = ModuleEntry {
        type_name: "Exporter",
        contract: "other::Capability@1",
        create: construct::<Noop>,
    };

    static DECLARATION: ModuleDeclaration = ModuleDeclaration {
        abi_version: ABI_VERSION,
        core_version: CORE_VERSION,
        entries: &[ModuleEntry::of::<Noop>("Noop"), FOREIGN],
    };

    #[test]
    fn test_contract_entries_filter_foreign_contracts() {
        let names: Vec<_> = DECLARATION
            .contract_entries()
            .map(|entry| entry.type_name)
            .collect();
        assert_eq!(names, vec!["Noop"]);
        assert!(DECLARATION.incompatibility().is_none());
    }

    #[test]
    fn test_incompatible_abi() {
        let declaration = ModuleDeclaration {
            abi_version: ABI_VERSION + 1,
            core_version: CORE_VERSION,
            entries: &[],
        };
        assert!(declaration.incompatibility().unwrap().contains("ABI"));
    }

    #[test]
    fn test_entry_constructs_module() {
        let entry = ModuleEntry::of::<Noop>("Noop");
        let mut module = (entry.create)();
        let mut services = ServiceCollection::new();
        assert!(module
            .register_services(&mut services, &Config::default())
            .is_ok());
    }
}
