//! Dependency resolution for module units.
//!
//! Each loaded unit contributes a [`DependencyResolver`] built from its
//! manifest. The [`ResolverChain`] answers missing-dependency events from the
//! shared context in this order:
//!
//! 1. resource bundle identities are refused outright, uncached
//! 2. the resolution cache, keyed by the exact identity string
//! 3. the requesting unit's own resolver (dependencies usually ship with
//!    the unit that needs them)
//! 4. every registered resolver in registration order, first hit wins
//!
//! The outcome of steps 3-4, found or not, is cached under the identity and
//! never replaced.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::modules::context::{MissingDependencyHook, SharedContext};
use crate::modules::image::{Image, ImageKind};
use crate::modules::manifest::{DependencyIdentity, UnitManifest};

/// Maps dependency identities to files for one unit. Immutable once built.
pub trait DependencyResolver: Send + Sync + fmt::Debug {
    fn resolve_path(&self, identity: &str) -> Option<PathBuf>;
}

/// Resolver backed by a unit's `provides` table
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    unit: String,
    paths: HashMap<String, PathBuf>,
}

impl ManifestResolver {
    /// Build the resolver for the unit binary at `unit_path`; relative
    /// manifest paths are anchored at the unit's directory.
    #[must_use]
    pub fn new(unit: impl Into<String>, unit_path: &Path, manifest: &UnitManifest) -> Self {
        let base_dir = unit_path.parent().unwrap_or_else(|| Path::new("."));
        Self {
            unit: unit.into(),
            paths: manifest.provided_paths(base_dir).into_iter().collect(),
        }
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl DependencyResolver for ManifestResolver {
    fn resolve_path(&self, identity: &str) -> Option<PathBuf> {
        self.paths.get(identity).cloned()
    }
}

/// Cached outcome of resolving one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    NotFound,
}

impl Resolution {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Found(path) => Some(path),
            Self::NotFound => None,
        }
    }
}

/// Identity -> resolution, first answer wins
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: DashMap<String, Resolution>,
}

impl ResolutionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<Resolution> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Store `resolution` unless `identity` already has an answer; returns
    /// the answer that is now authoritative.
    pub fn insert(&self, identity: &str, resolution: Resolution) -> Resolution {
        self.entries
            .entry(identity.to_string())
            .or_insert(resolution)
            .value()
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Snapshot of how resolutions were answered
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionStats {
    pub skipped: u64,
    pub cache_hits: u64,
    pub locality_hits: u64,
    pub fallback_hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    skipped: AtomicU64,
    cache_hits: AtomicU64,
    locality_hits: AtomicU64,
    fallback_hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-unit and global resolvers plus the resolution cache.
///
/// Safe for concurrent resolution and registration.
#[derive(Debug, Default)]
pub struct ResolverChain {
    /// Every registered resolver, in registration order. Append only.
    resolvers: RwLock<Vec<(String, Arc<dyn DependencyResolver>)>>,
    by_unit: DashMap<String, Arc<dyn DependencyResolver>>,
    cache: ResolutionCache,
    counters: Counters,
}

impl ResolverChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resolver` as `unit`'s own resolver and append it to the
    /// global fallback list. A unit keeps the first resolver registered for
    /// it; later registrations are ignored. Returns whether this call
    /// registered it.
    pub fn register(&self, unit: &str, resolver: Arc<dyn DependencyResolver>) -> bool {
        match self.by_unit.entry(unit.to_string()) {
            Entry::Occupied(_) => {
                debug!("Dependency resolver for {} already registered", unit);
                false
            }
            Entry::Vacant(slot) => {
                // Append while the unit's slot is held so the list never
                // sees the same unit twice
                self.resolvers.write().push((unit.to_string(), Arc::clone(&resolver)));
                slot.insert(resolver);
                debug!("Registered dependency resolver for {}", unit);
                true
            }
        }
    }

    #[must_use]
    pub fn resolver_for(&self, unit: &str) -> Option<Arc<dyn DependencyResolver>> {
        self.by_unit.get(unit).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn resolver_count(&self) -> usize {
        self.resolvers.read().len()
    }

    #[must_use]
    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    #[must_use]
    pub fn stats(&self) -> ResolutionStats {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ResolutionStats {
            skipped: read(&self.counters.skipped),
            cache_hits: read(&self.counters.cache_hits),
            locality_hits: read(&self.counters.locality_hits),
            fallback_hits: read(&self.counters.fallback_hits),
            misses: read(&self.counters.misses),
        }
    }

    /// Map `identity` to a file without loading it.
    pub fn resolve_path(&self, identity: &str, requesting: Option<&str>) -> Option<PathBuf> {
        if DependencyIdentity::parse(identity).is_resource_bundle() {
            Counters::bump(&self.counters.skipped);
            return None;
        }

        let started = Instant::now();

        if let Some(cached) = self.cache.get(identity) {
            Counters::bump(&self.counters.cache_hits);
            debug!("Resolved {} from cache ({:?}) in {:?}", identity, cached, started.elapsed());
            return cached.path().map(Path::to_path_buf);
        }

        let local = requesting.and_then(|unit| {
            self.resolver_for(unit)
                .and_then(|resolver| resolver.resolve_path(identity))
        });

        let resolution = if let Some(path) = local {
            Counters::bump(&self.counters.locality_hits);
            debug!(
                "Resolved {} locally for {} to {} in {:?}",
                identity,
                requesting.unwrap_or_default(),
                path.display(),
                started.elapsed()
            );
            Resolution::Found(path)
        } else if let Some((owner, path)) = self.scan(identity, requesting) {
            Counters::bump(&self.counters.fallback_hits);
            debug!(
                "Resolved {} via {} to {} in {:?}",
                identity,
                owner,
                path.display(),
                started.elapsed()
            );
            Resolution::Found(path)
        } else {
            Counters::bump(&self.counters.misses);
            debug!("Could not resolve {} ({:?})", identity, started.elapsed());
            Resolution::NotFound
        };

        self.cache
            .insert(identity, resolution)
            .path()
            .map(Path::to_path_buf)
    }

    /// Global fallback over every resolver except the requester's own,
    /// which has already been asked.
    fn scan(&self, identity: &str, requesting: Option<&str>) -> Option<(String, PathBuf)> {
        let resolvers = self.resolvers.read();
        resolvers
            .iter()
            .filter(|(unit, _)| Some(unit.as_str()) != requesting)
            .find_map(|(unit, resolver)| {
                resolver
                    .resolve_path(identity)
                    .map(|path| (unit.clone(), path))
            })
    }
}

impl MissingDependencyHook for ResolverChain {
    fn resolve(
        &self,
        context: &SharedContext,
        identity: &str,
        requesting: Option<&str>,
    ) -> Option<Arc<dyn Image>> {
        let path = self.resolve_path(identity, requesting)?;
        safe_load(context, &path, identity)
    }
}

/// Open a resolved dependency, turning any failure into "not found" for
/// this call. Not retried.
fn safe_load(context: &SharedContext, path: &Path, identity: &str) -> Option<Arc<dyn Image>> {
    match context.open(path, ImageKind::Dependency) {
        Ok(image) => Some(image),
        Err(e) => {
            warn!("Failed to load {} from {}: {}", identity, path.display(), e);
            None
        }
    }
}
