//! The process-wide extension domain.
//!
//! A domain owns the `point → loader` map, the `class → singleton` map
//! shared by wrapper composition, the manifest catalog, and the class
//! resolution strategy. Most programs use the global domain through
//! [`crate::loader`]; tests build isolated domains with
//! [`ExtensionDomain::builder`].
//!
//! Both maps are monotonic with first-writer-wins insertion: concurrent
//! creators race, the loser discards its half-built value, and nothing is
//! ever evicted. [`ExtensionDomain::reset`] exists for tests only.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use crate::class::{Constructed, ExtensionClass};
use crate::classpath::{self, ClassHandle, ClassResolver, ResolverChain};
use crate::config;
use crate::error::{ExtensionError, Result};
use crate::factory;
use crate::loader::{ErasedLoader, ExtensionLoader};
use crate::manifest::{ManifestCatalog, INTERNAL_DIRECTORY};
use crate::point::ExtensionPoint;

struct LoaderSlot {
    any: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedLoader>,
}

/// Registry of loaders and shared singletons.
pub struct ExtensionDomain {
    self_ref: Weak<ExtensionDomain>,
    loaders: RwLock<HashMap<&'static str, LoaderSlot>>,
    singletons: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
    catalog: ManifestCatalog,
    resolver: ResolverChain,
}

impl ExtensionDomain {
    /// A domain with no manifest roots beyond the embedded framework
    /// manifests.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Configure a domain.
    pub fn builder() -> DomainBuilder {
        DomainBuilder::new()
    }

    /// The global domain used by [`crate::loader`]. Its manifest roots
    /// include the directories named by `SPINDLE_MANIFEST_PATH`.
    pub fn global() -> &'static Arc<ExtensionDomain> {
        static GLOBAL: OnceLock<Arc<ExtensionDomain>> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let mut builder = ExtensionDomain::builder();
            for root in config::env_vars::manifest_roots() {
                builder = builder.manifest_root(root);
            }
            builder.build()
        })
    }

    /// A strong reference to this domain, for components that need to keep
    /// one past the current borrow.
    fn shared(&self) -> Result<Arc<ExtensionDomain>> {
        self.self_ref
            .upgrade()
            .ok_or_else(|| ExtensionError::InvalidPoint {
                point: String::new(),
                reason: "extension domain dropped".to_string(),
            })
    }

    /// The loader for point `P`, created on first use.
    pub fn loader<P: ExtensionPoint>(&self) -> Result<Arc<ExtensionLoader<P>>> {
        let mismatch = || ExtensionError::InvalidPoint {
            point: P::NAME.to_string(),
            reason: "another extension point already uses this name".to_string(),
        };

        if let Some(slot) = self.loaders.read().unwrap().get(P::NAME) {
            return slot
                .any
                .clone()
                .downcast::<ExtensionLoader<P>>()
                .map_err(|_| mismatch());
        }

        classpath::register_point::<P>();
        let loader = Arc::new(ExtensionLoader::<P>::new(&self.shared()?)?);

        let mut loaders = self.loaders.write().unwrap();
        let slot = loaders.entry(P::NAME).or_insert_with(|| LoaderSlot {
            any: loader.clone(),
            erased: loader,
        });
        slot.any
            .clone()
            .downcast::<ExtensionLoader<P>>()
            .map_err(|_| mismatch())
    }

    /// Append a manifest root directory. Only points whose classes have not
    /// been loaded yet will see it.
    pub fn add_manifest_root(&self, root: impl Into<PathBuf>) {
        self.catalog.add_root(root);
    }

    /// Register an in-memory manifest, as if found under `directory`.
    pub fn add_embedded_manifest(
        &self,
        directory: impl Into<String>,
        point: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.catalog.add_embedded(directory, point, content);
    }

    /// Drop every loader and singleton. Teardown hook for tests; production
    /// code never calls this.
    pub fn reset(&self) {
        self.loaders.write().unwrap().clear();
        self.singletons.lock().unwrap().clear();
        tracing::debug!("extension domain reset");
    }

    pub(crate) fn catalog(&self) -> &ManifestCatalog {
        &self.catalog
    }

    pub(crate) fn resolve_class(&self, fqn: &str) -> Option<ClassHandle> {
        self.resolver.resolve(fqn)
    }

    /// The loader for a point known only by name, created on demand when
    /// the point was ever registered.
    pub(crate) fn erased_loader(&self, point: &str) -> Option<Arc<dyn ErasedLoader>> {
        if let Some(slot) = self.loaders.read().unwrap().get(point) {
            return Some(slot.erased.clone());
        }
        let this = self.shared().ok()?;
        match classpath::materialize_point(&this, point)? {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!("failed to build a loader for {}: {}", point, e);
                return None;
            }
        }
        self.loaders
            .read()
            .unwrap()
            .get(point)
            .map(|slot| slot.erased.clone())
    }

    /// The shared innermost instance for a class, built at most once per
    /// domain.
    pub(crate) fn singleton<P: ExtensionPoint>(
        &self,
        class: &Arc<ExtensionClass<P>>,
    ) -> Result<Arc<Constructed<P>>> {
        let existing = self.singletons.lock().unwrap().get(class.fqn()).cloned();
        if let Some(shared) = existing {
            return shared.downcast::<Constructed<P>>().map_err(|_| {
                singleton_clash::<P>(class.fqn())
            });
        }

        // Construct outside the lock; the insertion below decides the
        // winner and losers discard their copy.
        let built: Arc<dyn Any + Send + Sync> = Arc::new(class.construct(&self.shared()?)?);
        let mut singletons = self.singletons.lock().unwrap();
        let shared = singletons
            .entry(class.fqn())
            .or_insert_with(|| built)
            .clone();
        shared
            .downcast::<Constructed<P>>()
            .map_err(|_| singleton_clash::<P>(class.fqn()))
    }
}

fn singleton_clash<P: ExtensionPoint>(fqn: &str) -> ExtensionError {
    ExtensionError::Instantiation {
        point: P::NAME.to_string(),
        name: fqn.to_string(),
        reason: "singleton registered for a different extension point".to_string(),
    }
}

/// Builder for [`ExtensionDomain`].
pub struct DomainBuilder {
    roots: Vec<PathBuf>,
    resolver: Option<Arc<dyn ClassResolver>>,
    embedded: Vec<(String, String, String)>,
}

impl DomainBuilder {
    fn new() -> Self {
        Self {
            roots: Vec::new(),
            resolver: None,
            embedded: Vec::new(),
        }
    }

    /// Add a manifest root directory.
    pub fn manifest_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Use an explicit class resolver ahead of the ambient and built-in
    /// class paths.
    pub fn class_resolver(mut self, resolver: Arc<dyn ClassResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register an in-memory manifest under one of the search directories.
    pub fn embedded_manifest(
        mut self,
        directory: impl Into<String>,
        point: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.embedded
            .push((directory.into(), point.into(), content.into()));
        self
    }

    /// Build the domain. The framework's own manifests are always present.
    pub fn build(self) -> Arc<ExtensionDomain> {
        let catalog = ManifestCatalog::new();
        catalog.add_embedded(
            INTERNAL_DIRECTORY,
            crate::factory::ExtensionFactoryPoint::NAME,
            factory::BUILTIN_MANIFEST,
        );
        for (directory, point, content) in self.embedded {
            catalog.add_embedded(directory, point, content);
        }
        for root in self.roots {
            catalog.add_root(root);
        }
        let resolver = ResolverChain::new(self.resolver);
        Arc::new_cyclic(|self_ref| ExtensionDomain {
            self_ref: self_ref.clone(),
            loaders: RwLock::new(HashMap::new()),
            singletons: Mutex::new(HashMap::new()),
            catalog,
            resolver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{ExtensionFactory, ExtensionFactoryPoint};

    #[test]
    fn test_loader_identity_per_domain() {
        let domain = ExtensionDomain::new();
        let first = domain.loader::<ExtensionFactoryPoint>().unwrap();
        let second = domain.loader::<ExtensionFactoryPoint>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_factory_point_has_builtin_extensions() {
        let domain = ExtensionDomain::new();
        let loader = domain.loader::<ExtensionFactoryPoint>().unwrap();
        let names = loader.supported_names().unwrap();
        assert!(names.contains("spi"));

        let adaptive = loader.adaptive().unwrap();
        // The adaptive factory aggregates the spi factory; asking it for an
        // unknown point yields nothing instead of failing.
        assert!(adaptive
            .extension_for(&domain, "spindle.domain.NoSuchPoint", "anything")
            .is_none());
    }

    #[test]
    fn test_reset_clears_loaders() {
        let domain = ExtensionDomain::new();
        let first = domain.loader::<ExtensionFactoryPoint>().unwrap();
        domain.reset();
        let second = domain.loader::<ExtensionFactoryPoint>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_loader_creation_yields_one_loader() {
        let domain = ExtensionDomain::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let domain = domain.clone();
            handles.push(std::thread::spawn(move || {
                domain.loader::<ExtensionFactoryPoint>().unwrap()
            }));
        }
        let loaders: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for loader in &loaders[1..] {
            assert!(Arc::ptr_eq(&loaders[0], loader));
        }
    }
}
