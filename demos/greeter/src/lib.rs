//! Example module unit. Build with `cargo build --release` and copy
//! `libgreeter.so` to `<module root>/greeter/greeter.so`.

use anyhow::Result;
use plugwire::{Config, Module, ServiceCollection, ServiceProvider};
use serde::Deserialize;
use tracing::info;

/// Service other modules can look up
pub struct Greeter {
    pub salutation: String,
}

impl Greeter {
    pub fn greet(&self, name: &str) -> String {
        format!("{}, {name}!", self.salutation)
    }
}

#[derive(Deserialize)]
struct GreeterSettings {
    salutation: String,
}

#[derive(Default)]
pub struct GreeterModule;

impl Module for GreeterModule {
    fn register_services<'a>(
        &mut self,
        services: &'a mut ServiceCollection,
        config: &Config,
    ) -> Result<&'a mut ServiceCollection> {
        let salutation = config
            .section::<GreeterSettings>("greeter")?
            .map_or_else(|| "Hello".to_string(), |s| s.salutation);
        Ok(services.add_singleton(Greeter { salutation }))
    }

    fn initialize_services<'a>(
        &mut self,
        services: &'a ServiceProvider,
        _config: &Config,
    ) -> Result<&'a ServiceProvider> {
        let greeter = services.require::<Greeter>()?;
        info!("{}", greeter.greet("plugwire"));
        Ok(services)
    }
}

plugwire::export_modules!(GreeterModule);
