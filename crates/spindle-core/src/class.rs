//! Extension class descriptors.
//!
//! There is no runtime reflection to lean on, so every extension
//! implementation registers a small descriptor alongside its class name: a
//! constructor (or wrapper constructor) closure, the injection hooks bound
//! to each constructed instance, an adaptive marker, and optional
//! auto-activation metadata. The descriptor plays the role the class object
//! plays on reflective platforms.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

use crate::domain::ExtensionDomain;
use crate::error::{ExtensionError, Result};
use crate::point::{ExtensionPoint, Instance};

/// A value crossing the injection boundary: a `Box<dyn Any>` holding the
/// `Instance` of some extension point.
pub type ErasedInstance = Box<dyn Any + Send + Sync>;

/// Auto-activation metadata, the counterpart of the `Activate` marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateMeta {
    /// Groups this extension activates in; empty matches any group.
    #[serde(default)]
    pub group: Vec<String>,
    /// Url parameter keys that must be present (non-empty) to activate;
    /// empty means always active.
    #[serde(default)]
    pub value: Vec<String>,
    /// Extensions this one must precede.
    #[serde(default)]
    pub before: Vec<String>,
    /// Extensions this one must follow.
    #[serde(default)]
    pub after: Vec<String>,
    /// Numeric ordering among unconstrained peers.
    #[serde(default)]
    pub order: i32,
}

impl ActivateMeta {
    /// Create empty metadata (always active, any group).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add activation groups.
    pub fn with_group<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group.extend(group.into_iter().map(Into::into));
        self
    }

    /// Add url parameter keys that gate activation.
    pub fn with_value<I, S>(mut self, value: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value.extend(value.into_iter().map(Into::into));
        self
    }

    /// Name extensions this one must precede.
    pub fn with_before<I, S>(mut self, before: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before.extend(before.into_iter().map(Into::into));
        self
    }

    /// Name extensions this one must follow.
    pub fn with_after<I, S>(mut self, after: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(after.into_iter().map(Into::into));
        self
    }

    /// Set the numeric order.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// One injection hook bound to a constructed instance.
///
/// The loader asks the extension factory for a value of
/// `(target point, property)` and, when one is produced, feeds it through
/// `apply`. Failures are logged and never abort creation.
pub struct BoundSetter {
    /// Derived property name, e.g. `object_factory` for `set_object_factory`.
    pub property: &'static str,
    /// Fully-qualified name of the extension point the parameter belongs to.
    pub target: &'static str,
    /// Counterpart of the `DisableInject` marker.
    pub disable_inject: bool,
    /// Feeds the produced value into the instance.
    pub apply: Box<dyn Fn(ErasedInstance) -> Result<()> + Send + Sync>,
}

impl std::fmt::Debug for BoundSetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSetter")
            .field("property", &self.property)
            .field("target", &self.target)
            .field("disable_inject", &self.disable_inject)
            .finish()
    }
}

/// A constructed instance together with its bound injection hooks.
pub struct Constructed<P: ExtensionPoint> {
    /// The shared instance.
    pub instance: Instance<P>,
    /// Injection hooks bound to this instance.
    pub setters: Vec<BoundSetter>,
}

impl<P: ExtensionPoint> Constructed<P> {
    /// Instance with injection hooks.
    pub fn new(instance: Instance<P>, setters: Vec<BoundSetter>) -> Self {
        Self { instance, setters }
    }

    /// Instance without injection hooks.
    pub fn bare(instance: Instance<P>) -> Self {
        Self {
            instance,
            setters: Vec::new(),
        }
    }
}

type ConstructFn<P> =
    Box<dyn Fn(&Arc<ExtensionDomain>) -> Result<Constructed<P>> + Send + Sync>;
type WrapFn<P> =
    Box<dyn Fn(&Arc<ExtensionDomain>, Instance<P>) -> Result<Constructed<P>> + Send + Sync>;

enum ClassKind<P: ExtensionPoint> {
    Plain { construct: ConstructFn<P> },
    Wrapper { wrap: WrapFn<P> },
}

/// Descriptor for one extension class of point `P`.
pub struct ExtensionClass<P: ExtensionPoint> {
    fqn: &'static str,
    kind: ClassKind<P>,
    adaptive: bool,
    activate: Option<ActivateMeta>,
}

impl<P: ExtensionPoint> ExtensionClass<P> {
    /// A plain named class with a zero-argument constructor.
    pub fn plain(
        fqn: &'static str,
        construct: impl Fn(&Arc<ExtensionDomain>) -> Result<Constructed<P>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fqn,
            kind: ClassKind::Plain {
                construct: Box::new(construct),
            },
            adaptive: false,
            activate: None,
        }
    }

    /// A wrapper class: its constructor takes the instance it decorates.
    pub fn wrapper(
        fqn: &'static str,
        wrap: impl Fn(&Arc<ExtensionDomain>, Instance<P>) -> Result<Constructed<P>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            fqn,
            kind: ClassKind::Wrapper {
                wrap: Box::new(wrap),
            },
            adaptive: false,
            activate: None,
        }
    }

    /// A hand-written class-level adaptive implementation.
    pub fn adaptive(
        fqn: &'static str,
        construct: impl Fn(&Arc<ExtensionDomain>) -> Result<Constructed<P>> + Send + Sync + 'static,
    ) -> Self {
        let mut class = Self::plain(fqn, construct);
        class.adaptive = true;
        class
    }

    /// Attach auto-activation metadata.
    pub fn with_activate(mut self, activate: ActivateMeta) -> Self {
        self.activate = Some(activate);
        self
    }

    /// Fully-qualified class name.
    pub fn fqn(&self) -> &'static str {
        self.fqn
    }

    /// Whether this class carries the class-level adaptive marker.
    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Whether this class is a wrapper.
    pub fn is_wrapper(&self) -> bool {
        matches!(self.kind, ClassKind::Wrapper { .. })
    }

    /// Auto-activation metadata, when present.
    pub fn activate_meta(&self) -> Option<&ActivateMeta> {
        self.activate.as_ref()
    }

    /// Run the zero-argument constructor.
    pub(crate) fn construct(&self, domain: &Arc<ExtensionDomain>) -> Result<Constructed<P>> {
        match &self.kind {
            ClassKind::Plain { construct } => construct(domain),
            ClassKind::Wrapper { .. } => Err(ExtensionError::Instantiation {
                point: P::NAME.to_string(),
                name: self.fqn.to_string(),
                reason: "wrapper class has no zero-argument constructor".to_string(),
            }),
        }
    }

    /// Run the wrapper constructor around `inner`.
    pub(crate) fn wrap(
        &self,
        domain: &Arc<ExtensionDomain>,
        inner: Instance<P>,
    ) -> Result<Constructed<P>> {
        match &self.kind {
            ClassKind::Wrapper { wrap } => wrap(domain, inner),
            ClassKind::Plain { .. } => Err(ExtensionError::Instantiation {
                point: P::NAME.to_string(),
                name: self.fqn.to_string(),
                reason: "class is not a wrapper".to_string(),
            }),
        }
    }
}

impl<P: ExtensionPoint> std::fmt::Debug for ExtensionClass<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionClass")
            .field("fqn", &self.fqn)
            .field("wrapper", &self.is_wrapper())
            .field("adaptive", &self.adaptive)
            .field("activate", &self.activate)
            .finish()
    }
}
