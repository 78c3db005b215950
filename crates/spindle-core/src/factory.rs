//! The extension factory point.
//!
//! Injection values come from an [`ExtensionFactory`], itself an extension
//! point: the loader for any other point eagerly resolves the factory
//! point's adaptive instance and consults it for every setter. The factory
//! point's own loader skips injection and leaves its factory slot empty,
//! breaking the cycle.
//!
//! Two implementations ship built in, declared by an embedded
//! `internal-dubbo` manifest so user manifests can add more:
//!
//! - `spi` — [`SpiExtensionFactory`], which supplies the adaptive instance
//!   of the requested point;
//! - the class-level adaptive [`AdaptiveExtensionFactory`], which delegates
//!   to every discovered factory in name order, first hit wins.

use std::sync::{Arc, OnceLock};

use crate::class::{Constructed, ErasedInstance, ExtensionClass};
use crate::classpath::ClassPath;
use crate::domain::ExtensionDomain;
use crate::error::Result;
use crate::point::{ExtensionPoint, Instance};

/// Supplies injection values by `(target point, property name)`.
///
/// Returning `None` means this factory has nothing for the request; the
/// setter is skipped.
pub trait ExtensionFactory: Send + Sync {
    /// Produce a value for the property, or `None`.
    fn extension_for(
        &self,
        domain: &Arc<ExtensionDomain>,
        point: &str,
        property: &str,
    ) -> Option<ErasedInstance>;
}

/// The extension point for [`ExtensionFactory`].
pub struct ExtensionFactoryPoint;

impl ExtensionPoint for ExtensionFactoryPoint {
    type Contract = dyn ExtensionFactory;
    const NAME: &'static str = "spindle.ExtensionFactory";
}

/// Factory backed by the extension loader itself: supplies the adaptive
/// instance of the requested point.
pub struct SpiExtensionFactory;

impl ExtensionFactory for SpiExtensionFactory {
    fn extension_for(
        &self,
        domain: &Arc<ExtensionDomain>,
        point: &str,
        property: &str,
    ) -> Option<ErasedInstance> {
        let loader = domain.erased_loader(point)?;
        match loader.adaptive_erased() {
            Ok(instance) => Some(instance),
            Err(e) => {
                tracing::warn!(
                    "no adaptive instance of {} to inject into property {}: {}",
                    point,
                    property,
                    e
                );
                None
            }
        }
    }
}

/// The class-level adaptive factory: consults every discovered factory in
/// name order and returns the first value produced.
pub struct AdaptiveExtensionFactory {
    factories: Vec<Instance<ExtensionFactoryPoint>>,
}

impl AdaptiveExtensionFactory {
    fn assemble(domain: &Arc<ExtensionDomain>) -> Result<Self> {
        let loader = domain.loader::<ExtensionFactoryPoint>()?;
        let mut factories = Vec::new();
        for name in loader.supported_names()? {
            factories.push(loader.get(&name)?);
        }
        Ok(Self { factories })
    }
}

impl ExtensionFactory for AdaptiveExtensionFactory {
    fn extension_for(
        &self,
        domain: &Arc<ExtensionDomain>,
        point: &str,
        property: &str,
    ) -> Option<ErasedInstance> {
        self.factories
            .iter()
            .find_map(|factory| factory.extension_for(domain, point, property))
    }
}

pub(crate) const ADAPTIVE_FACTORY_CLASS: &str = "spindle.factory.AdaptiveExtensionFactory";
pub(crate) const SPI_FACTORY_CLASS: &str = "spindle.factory.SpiExtensionFactory";

/// Manifest shipped with the framework, registered as an embedded
/// `internal-dubbo` resource in every domain.
pub(crate) const BUILTIN_MANIFEST: &str = "\
adaptive=spindle.factory.AdaptiveExtensionFactory
spi=spindle.factory.SpiExtensionFactory
";

/// The class path owned by this crate; last resort of the resolver chain.
pub(crate) fn builtin_class_path() -> &'static ClassPath {
    static BUILTIN: OnceLock<ClassPath> = OnceLock::new();
    BUILTIN.get_or_init(|| {
        let path = ClassPath::new();
        path.install(ExtensionClass::<ExtensionFactoryPoint>::adaptive(
            ADAPTIVE_FACTORY_CLASS,
            |domain| {
                let factory = AdaptiveExtensionFactory::assemble(domain)?;
                let instance: Instance<ExtensionFactoryPoint> = Arc::new(factory);
                Ok(Constructed::bare(instance))
            },
        ));
        path.install(ExtensionClass::<ExtensionFactoryPoint>::plain(
            SPI_FACTORY_CLASS,
            |_| {
                let instance: Instance<ExtensionFactoryPoint> = Arc::new(SpiExtensionFactory);
                Ok(Constructed::bare(instance))
            },
        ));
        path
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::ClassResolver;

    #[test]
    fn test_builtin_class_path_holds_both_factories() {
        let path = builtin_class_path();
        let adaptive = path.resolve(ADAPTIVE_FACTORY_CLASS).unwrap();
        assert_eq!(adaptive.point, ExtensionFactoryPoint::NAME);
        let class = adaptive.downcast::<ExtensionFactoryPoint>().unwrap();
        assert!(class.is_adaptive());

        let spi = path.resolve(SPI_FACTORY_CLASS).unwrap();
        let class = spi.downcast::<ExtensionFactoryPoint>().unwrap();
        assert!(!class.is_adaptive());
        assert!(!class.is_wrapper());
    }

    #[test]
    fn test_builtin_manifest_names_builtin_classes() {
        assert!(BUILTIN_MANIFEST.contains(ADAPTIVE_FACTORY_CLASS));
        assert!(BUILTIN_MANIFEST.contains(SPI_FACTORY_CLASS));
    }
}
