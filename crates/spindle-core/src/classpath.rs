//! Class resolution.
//!
//! A [`ClassPath`] maps fully-qualified class names to installed
//! [`ExtensionClass`] descriptors. Resolution follows a fixed strategy
//! order: an explicit caller-provided resolver, then the ambient
//! process-wide class path, then the built-in class path owned by this
//! crate.
//!
//! Installing a typed descriptor also registers its extension point in a
//! process-wide point registry, so that components holding only a point
//! *name* (the injection factory, most notably) can still materialize the
//! matching typed loader on demand.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::class::ExtensionClass;
use crate::domain::ExtensionDomain;
use crate::error::Result;
use crate::point::ExtensionPoint;

/// A resolved, type-erased class descriptor.
#[derive(Clone)]
pub struct ClassHandle {
    /// Fully-qualified class name.
    pub fqn: &'static str,
    /// Fully-qualified name of the point the class implements.
    pub point: &'static str,
    class: Arc<dyn Any + Send + Sync>,
}

impl ClassHandle {
    /// Recover the typed descriptor; `None` when the handle belongs to a
    /// different extension point.
    pub fn downcast<P: ExtensionPoint>(&self) -> Option<Arc<ExtensionClass<P>>> {
        self.class.clone().downcast::<ExtensionClass<P>>().ok()
    }
}

impl std::fmt::Debug for ClassHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassHandle")
            .field("fqn", &self.fqn)
            .field("point", &self.point)
            .finish()
    }
}

/// A class-loading strategy: resolves a class name to a handle.
pub trait ClassResolver: Send + Sync {
    /// Resolve a fully-qualified class name.
    fn resolve(&self, fqn: &str) -> Option<ClassHandle>;
}

/// A mutable set of installed class descriptors.
pub struct ClassPath {
    classes: RwLock<HashMap<&'static str, ClassHandle>>,
}

impl ClassPath {
    /// Create an empty class path.
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
        }
    }

    /// The ambient process-wide class path.
    pub fn global() -> &'static ClassPath {
        static GLOBAL: OnceLock<ClassPath> = OnceLock::new();
        GLOBAL.get_or_init(ClassPath::new)
    }

    /// Install a descriptor under its class name. The first installation of
    /// a name wins; later ones are ignored.
    pub fn install<P: ExtensionPoint>(&self, class: ExtensionClass<P>) {
        register_point::<P>();
        let fqn = class.fqn();
        let handle = ClassHandle {
            fqn,
            point: P::NAME,
            class: Arc::new(class),
        };
        let mut classes = self.classes.write().unwrap();
        if classes.contains_key(fqn) {
            tracing::debug!("class {} already installed, keeping the first", fqn);
            return;
        }
        classes.insert(fqn, handle);
    }

    /// Number of installed classes.
    pub fn len(&self) -> usize {
        self.classes.read().unwrap().len()
    }

    /// Whether the class path is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClassPath {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassResolver for ClassPath {
    fn resolve(&self, fqn: &str) -> Option<ClassHandle> {
        self.classes.read().unwrap().get(fqn).cloned()
    }
}

/// The fixed resolution strategy order.
pub(crate) struct ResolverChain {
    explicit: Option<Arc<dyn ClassResolver>>,
}

impl ResolverChain {
    pub(crate) fn new(explicit: Option<Arc<dyn ClassResolver>>) -> Self {
        Self { explicit }
    }

    /// Explicit resolver first, then the ambient class path, then the
    /// built-in one.
    pub(crate) fn resolve(&self, fqn: &str) -> Option<ClassHandle> {
        if let Some(explicit) = &self.explicit {
            if let Some(handle) = explicit.resolve(fqn) {
                return Some(handle);
            }
        }
        if let Some(handle) = ClassPath::global().resolve(fqn) {
            return Some(handle);
        }
        crate::factory::builtin_class_path().resolve(fqn)
    }
}

type EnsureLoader = fn(&Arc<ExtensionDomain>) -> Result<()>;

fn ensure_loader<P: ExtensionPoint>(domain: &Arc<ExtensionDomain>) -> Result<()> {
    domain.loader::<P>().map(|_| ())
}

fn points() -> &'static RwLock<HashMap<&'static str, EnsureLoader>> {
    static POINTS: OnceLock<RwLock<HashMap<&'static str, EnsureLoader>>> = OnceLock::new();
    POINTS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Remember how to materialize a typed loader for `P` from its name alone.
pub(crate) fn register_point<P: ExtensionPoint>() {
    points()
        .write()
        .unwrap()
        .entry(P::NAME)
        .or_insert(ensure_loader::<P>);
}

/// Create the loader for a point known only by name, if the point was ever
/// registered.
pub(crate) fn materialize_point(domain: &Arc<ExtensionDomain>, point: &str) -> Option<Result<()>> {
    let ensure = points().read().unwrap().get(point).copied();
    ensure.map(|f| f(domain))
}
