//! Plugwire - a runtime module host
//!
//! Loads independently built module units into one process, resolves the
//! libraries they depend on, and runs every module through a two-phase
//! register/initialize lifecycle.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and environment overrides
//! - [`error`]: The [`ModuleError`] type shared by every operation
//! - [`modules`]: Locator, loader, resolver chain, registry and lifecycle
//!
//! Module units depend on this crate and export their module with
//! [`export_modules!`].

pub mod config;
pub mod error;
pub mod modules;

pub use config::Config;
pub use error::{ModuleError, Result};
pub use modules::{Module, ModuleHost, ServiceCollection, ServiceProvider};
