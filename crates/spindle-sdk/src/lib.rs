//! Authorship kit for spindle extensions.
//!
//! `spindle-core` works with raw [`ExtensionClass`](spindle_core::ExtensionClass)
//! descriptors built from closures. This crate layers typed builders on
//! top, so an extension author writes:
//!
//! ```rust,ignore
//! use spindle_sdk::prelude::*;
//!
//! struct EnglishGreeter;
//! impl Greeter for EnglishGreeter { /* ... */ }
//! extension_instance!(EnglishGreeter: GreeterPoint);
//!
//! let class = PlainClass::new("demo.EnglishGreeter", || EnglishGreeter)
//!     .activate(ActivateMeta::new().with_group(["provider"]))
//!     .into_class();
//! ClassPath::global().install(class);
//! ```

mod class;

pub use class::{IntoInstance, PlainClass, WrapperClass};

#[doc(hidden)]
pub use spindle_core as __core;

/// Everything an extension author usually needs.
pub mod prelude {
    pub use crate::{extension_instance, IntoInstance, PlainClass, WrapperClass};
    pub use spindle_core::{
        loader, ActivateMeta, AdaptiveBinding, AdaptiveMethod, AdaptiveProfile, ClassPath,
        ExtensionDomain, ExtensionError, ExtensionPoint, Instance, Invocation, Url, UrlSource,
    };
}

/// Implement [`IntoInstance`] for a concrete extension type.
///
/// The unsized coercion from `Arc<Concrete>` to the capability trait
/// object has to happen where the concrete type is known; this macro
/// writes that one-liner.
#[macro_export]
macro_rules! extension_instance {
    ($ty:ty: $point:ty) => {
        impl $crate::IntoInstance<$point> for $ty {
            fn into_instance(
                self: ::std::sync::Arc<Self>,
            ) -> $crate::__core::Instance<$point> {
                self
            }
        }
    };
}
