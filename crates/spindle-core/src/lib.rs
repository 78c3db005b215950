//! spindle: a service-provider-interface extension loader.
//!
//! A capability (an "extension point") is an object-safe trait whose named
//! implementations are declared by plain-text manifests. The loader
//! discovers them, instantiates one singleton per name on demand, wires
//! dependencies between extensions through setter hooks, stacks wrapper
//! decorators around instances, selects auto-activated batches from
//! url-carried configuration, and synthesizes adaptive dispatchers that
//! pick an implementation per call.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   ExtensionDomain                     │
//! │   point → loader  ·  class → singleton  ·  manifests  │
//! └──────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                 ExtensionLoader<P>                    │
//! │  class table ──▶ create ──▶ inject ──▶ wrap           │
//! │  adaptive slot · activation selector · name holders   │
//! └──────────────────────────────────────────────────────┘
//!        ▲                   ▲                   ▲
//!   manifests           class path        ExtensionFactory
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use spindle_core::{loader, ExtensionPoint};
//!
//! let greeters = loader::<GreeterPoint>()?;
//! let default = greeters.default_instance()?;
//! let french = greeters.get("fr")?;
//! let adaptive = greeters.adaptive()?;
//! ```

pub mod activate;
pub mod adaptive;
pub mod class;
pub mod classpath;
pub mod config;
pub mod domain;
pub mod error;
pub mod factory;
pub mod loader;
pub mod manifest;
pub mod point;
pub mod url;

pub use adaptive::{AdaptiveBinding, AdaptiveMethod, AdaptiveProfile, UrlSource};
pub use class::{ActivateMeta, BoundSetter, Constructed, ErasedInstance, ExtensionClass};
pub use classpath::{ClassHandle, ClassPath, ClassResolver};
pub use domain::{DomainBuilder, ExtensionDomain};
pub use error::{ExtensionError, Result};
pub use factory::{ExtensionFactory, ExtensionFactoryPoint, SpiExtensionFactory};
pub use loader::{ExtensionLoader, LoadedExtension};
pub use manifest::{ManifestCatalog, INTERNAL_DIRECTORY, SERVICES_DIRECTORY, USER_DIRECTORY};
pub use point::{ExtensionPoint, Instance};
pub use url::{Invocation, Url};

use std::sync::Arc;

/// The loader for point `P` in the global domain.
pub fn loader<P: ExtensionPoint>() -> Result<Arc<ExtensionLoader<P>>> {
    ExtensionDomain::global().loader::<P>()
}
