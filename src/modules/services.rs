//! Service registration and lookup surfaces handed to module hooks.
//!
//! Intentionally small: singletons and transient factories keyed by type.
//! A later registration of the same type replaces the earlier one.

use anyhow::{anyhow, Result};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type Shared = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceProvider) -> Result<Shared> + Send + Sync>;

#[derive(Clone)]
enum Binding {
    Singleton(Shared),
    Transient(Factory),
}

#[derive(Clone)]
struct Registration {
    type_name: &'static str,
    binding: Binding,
}

/// Mutable surface for the register phase
#[derive(Default)]
pub struct ServiceCollection {
    registrations: HashMap<TypeId, Registration>,
}

impl ServiceCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single shared instance of `T`.
    pub fn add_singleton<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.insert::<T>(Binding::Singleton(Arc::new(value)))
    }

    /// Register a factory producing a fresh `T` on every lookup.
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |provider| {
            let value: Shared = Arc::new(factory(provider)?);
            Ok(value)
        });
        self.insert::<T>(Binding::Transient(factory))
    }

    fn insert<T: Any>(&mut self, binding: Binding) -> &mut Self {
        let registration = Registration {
            type_name: type_name::<T>(),
            binding,
        };
        if self
            .registrations
            .insert(TypeId::of::<T>(), registration)
            .is_some()
        {
            debug!("Service {} re-registered, replacing earlier binding", type_name::<T>());
        }
        self
    }

    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Freeze the registrations into a lookup surface.
    #[must_use]
    pub fn build(&self) -> ServiceProvider {
        ServiceProvider {
            registrations: Arc::new(self.registrations.clone()),
        }
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.registrations.values().map(|r| r.type_name).collect();
        names.sort_unstable();
        f.debug_struct("ServiceCollection")
            .field("services", &names)
            .finish()
    }
}

/// Read-only surface for the initialize phase. Cheap to clone.
#[derive(Clone)]
pub struct ServiceProvider {
    registrations: Arc<HashMap<TypeId, Registration>>,
}

impl ServiceProvider {
    /// Look up `T`; `None` if it was never registered or its factory failed.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.require::<T>().ok()
    }

    /// Look up `T`, failing with a message naming the type.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let registration = self
            .registrations
            .get(&TypeId::of::<T>())
            .ok_or_else(|| anyhow!("Service {} is not registered", type_name::<T>()))?;

        let shared = match &registration.binding {
            Binding::Singleton(value) => Arc::clone(value),
            Binding::Transient(factory) => factory(self)?,
        };

        shared
            .downcast::<T>()
            .map_err(|_| anyhow!("Service {} has an unexpected type", type_name::<T>()))
    }

    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.registrations.values().map(|r| r.type_name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.service_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct ConnectionString(String);

    #[test]
    fn test_singleton_lookup() {
        let mut services = ServiceCollection::new();
        services.add_singleton(ConnectionString("sqlite::memory:".into()));
        let provider = services.build();

        let first = provider.require::<ConnectionString>().unwrap();
        let second = provider.get::<ConnectionString>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.0, "sqlite::memory:");
    }

    #[test]
    fn test_last_registration_wins() {
        let mut services = ServiceCollection::new();
        services
            .add_singleton(ConnectionString("first".into()))
            .add_singleton(ConnectionString("second".into()));
        assert_eq!(services.len(), 1);

        let provider = services.build();
        assert_eq!(provider.require::<ConnectionString>().unwrap().0, "second");
    }

    #[test]
    fn test_transient_sees_other_services() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);

        let mut services = ServiceCollection::new();
        services.add_singleton(ConnectionString("pg://db".into()));
        services.add_transient(move |provider| {
            counter.fetch_add(1, Ordering::SeqCst);
            let conn = provider.require::<ConnectionString>()?;
            Ok(format!("pool({})", conn.0))
        });
        let provider = services.build();

        assert_eq!(provider.require::<String>().unwrap().as_str(), "pool(pg://db)");
        provider.require::<String>().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_service_names_type() {
        let provider = ServiceCollection::new().build();
        let err = provider.require::<ConnectionString>().unwrap_err();
        assert!(err.to_string().contains("ConnectionString"));
        assert!(provider.get::<ConnectionString>().is_none());
    }
}
