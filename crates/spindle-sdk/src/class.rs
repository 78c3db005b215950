//! Typed extension class builders.
//!
//! The builders bind a concrete extension type to the descriptor closures
//! `spindle-core` consumes: a constructor, setter hooks for injection, the
//! adaptive marker and activation metadata. Setter hooks mirror upstream
//! setter methods: each names a property, targets an extension point, and
//! may be excluded from injection.

use std::sync::Arc;

use spindle_core::class::{ActivateMeta, BoundSetter, Constructed, ErasedInstance, ExtensionClass};
use spindle_core::domain::ExtensionDomain;
use spindle_core::error::{ExtensionError, Result};
use spindle_core::point::{ExtensionPoint, Instance};

/// Coerce a shared concrete extension into its capability trait object.
///
/// Implemented per concrete type, usually through the
/// [`extension_instance!`](crate::extension_instance) macro.
pub trait IntoInstance<P: ExtensionPoint>: Send + Sync + Sized + 'static {
    /// The coercion, written where the concrete type is known.
    fn into_instance(self: Arc<Self>) -> Instance<P>;
}

struct SetterDef<C> {
    property: &'static str,
    target: &'static str,
    disabled: bool,
    bind: Arc<dyn Fn(Arc<C>) -> BoundSetter + Send + Sync>,
}

fn bind_setter<X, C>(
    property: &'static str,
    assign: impl Fn(&C, Instance<X>) + Send + Sync + 'static,
) -> Arc<dyn Fn(Arc<C>) -> BoundSetter + Send + Sync>
where
    X: ExtensionPoint,
    C: Send + Sync + 'static,
{
    let assign = Arc::new(assign);
    Arc::new(move |instance: Arc<C>| {
        let assign = assign.clone();
        BoundSetter {
            property,
            target: X::NAME,
            disable_inject: false,
            apply: Box::new(move |erased: ErasedInstance| {
                match erased.downcast::<Instance<X>>() {
                    Ok(value) => {
                        assign(&instance, *value);
                        Ok(())
                    }
                    Err(_) => Err(ExtensionError::Injection {
                        property: property.to_string(),
                        reason: format!("value is not an instance of {}", X::NAME),
                    }),
                }
            }),
        }
    })
}

fn bind_all<C>(defs: &[SetterDef<C>], instance: &Arc<C>) -> Vec<BoundSetter> {
    defs.iter()
        .map(|def| {
            let mut setter = (def.bind)(instance.clone());
            setter.disable_inject = def.disabled;
            setter
        })
        .collect()
}

/// Builder for a plain named class (zero-argument constructor), optionally
/// adaptive at class level or auto-activated.
pub struct PlainClass<P: ExtensionPoint, C: IntoInstance<P>> {
    fqn: &'static str,
    ctor: Arc<dyn Fn() -> C + Send + Sync>,
    setters: Vec<SetterDef<C>>,
    activate: Option<ActivateMeta>,
    adaptive: bool,
    _point: std::marker::PhantomData<P>,
}

impl<P: ExtensionPoint, C: IntoInstance<P>> PlainClass<P, C> {
    /// A class named `fqn` constructed by `ctor`.
    pub fn new(fqn: &'static str, ctor: impl Fn() -> C + Send + Sync + 'static) -> Self {
        Self {
            fqn,
            ctor: Arc::new(ctor),
            setters: Vec::new(),
            activate: None,
            adaptive: false,
            _point: std::marker::PhantomData,
        }
    }

    /// Declare a setter: the loader fills `property` from the extension
    /// factory with a value of point `X`.
    pub fn setter<X: ExtensionPoint>(
        mut self,
        property: &'static str,
        assign: impl Fn(&C, Instance<X>) + Send + Sync + 'static,
    ) -> Self {
        self.setters.push(SetterDef {
            property,
            target: X::NAME,
            disabled: false,
            bind: bind_setter::<X, C>(property, assign),
        });
        self
    }

    /// Exclude a declared setter from injection.
    pub fn disable_inject(mut self, property: &'static str) -> Self {
        for setter in &mut self.setters {
            if setter.property == property {
                setter.disabled = true;
            }
        }
        self
    }

    /// Attach activation metadata.
    pub fn activate(mut self, meta: ActivateMeta) -> Self {
        self.activate = Some(meta);
        self
    }

    /// Mark the class as the hand-written class-level adaptive.
    pub fn adaptive_marker(mut self) -> Self {
        self.adaptive = true;
        self
    }

    /// Finish the descriptor.
    pub fn into_class(self) -> ExtensionClass<P> {
        let PlainClass {
            fqn,
            ctor,
            setters,
            activate,
            adaptive,
            _point,
        } = self;
        let setters = Arc::new(setters);
        let construct = move |_: &Arc<ExtensionDomain>| -> Result<Constructed<P>> {
            let instance = Arc::new(ctor());
            let bound = bind_all(&setters, &instance);
            Ok(Constructed::new(instance.into_instance(), bound))
        };
        let mut class = if adaptive {
            ExtensionClass::adaptive(fqn, construct)
        } else {
            ExtensionClass::plain(fqn, construct)
        };
        if let Some(meta) = activate {
            class = class.with_activate(meta);
        }
        class
    }
}

impl<P: ExtensionPoint, C: IntoInstance<P>> From<PlainClass<P, C>> for ExtensionClass<P> {
    fn from(builder: PlainClass<P, C>) -> Self {
        builder.into_class()
    }
}

/// Builder for a wrapper class: its constructor takes the instance it
/// decorates, and the composed wrapper participates in injection like any
/// other extension.
pub struct WrapperClass<P: ExtensionPoint, C: IntoInstance<P>> {
    fqn: &'static str,
    ctor: Arc<dyn Fn(Instance<P>) -> C + Send + Sync>,
    setters: Vec<SetterDef<C>>,
}

impl<P: ExtensionPoint, C: IntoInstance<P>> WrapperClass<P, C> {
    /// A wrapper named `fqn` constructed around the inner instance.
    pub fn new(
        fqn: &'static str,
        ctor: impl Fn(Instance<P>) -> C + Send + Sync + 'static,
    ) -> Self {
        Self {
            fqn,
            ctor: Arc::new(ctor),
            setters: Vec::new(),
        }
    }

    /// Declare a setter on the wrapper.
    pub fn setter<X: ExtensionPoint>(
        mut self,
        property: &'static str,
        assign: impl Fn(&C, Instance<X>) + Send + Sync + 'static,
    ) -> Self {
        self.setters.push(SetterDef {
            property,
            target: X::NAME,
            disabled: false,
            bind: bind_setter::<X, C>(property, assign),
        });
        self
    }

    /// Exclude a declared setter from injection.
    pub fn disable_inject(mut self, property: &'static str) -> Self {
        for setter in &mut self.setters {
            if setter.property == property {
                setter.disabled = true;
            }
        }
        self
    }

    /// Finish the descriptor.
    pub fn into_class(self) -> ExtensionClass<P> {
        let WrapperClass { fqn, ctor, setters } = self;
        let setters = Arc::new(setters);
        let wrap = move |_: &Arc<ExtensionDomain>, inner: Instance<P>| -> Result<Constructed<P>> {
            let instance = Arc::new(ctor(inner));
            let bound = bind_all(&setters, &instance);
            Ok(Constructed::new(instance.into_instance(), bound))
        };
        ExtensionClass::wrapper(fqn, wrap)
    }
}

impl<P: ExtensionPoint, C: IntoInstance<P>> From<WrapperClass<P, C>> for ExtensionClass<P> {
    fn from(builder: WrapperClass<P, C>) -> Self {
        builder.into_class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn count(&self) -> usize;
    }

    struct CounterPoint;
    impl ExtensionPoint for CounterPoint {
        type Contract = dyn Counter;
        const NAME: &'static str = "spindle.sdk.Counter";
    }

    struct Once(AtomicUsize);
    impl Counter for Once {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }
    crate::extension_instance!(Once: CounterPoint);

    struct Doubling(Instance<CounterPoint>);
    impl Counter for Doubling {
        fn count(&self) -> usize {
            self.0.count() * 2
        }
    }
    crate::extension_instance!(Doubling: CounterPoint);

    #[test]
    fn test_plain_class_constructs() {
        let class = PlainClass::new("spindle.sdk.Once", || Once(AtomicUsize::new(1))).into_class();
        assert!(!class.is_wrapper());
        assert!(!class.is_adaptive());
        assert_eq!(class.fqn(), "spindle.sdk.Once");
    }

    #[test]
    fn test_adaptive_marker_and_activate() {
        let class = PlainClass::new("spindle.sdk.Marked", || Once(AtomicUsize::new(0)))
            .activate(ActivateMeta::new().with_order(3))
            .adaptive_marker()
            .into_class();
        assert!(class.is_adaptive());
        // The classifier never reads activation metadata off adaptive
        // classes, but the descriptor keeps what it was given.
        assert_eq!(class.activate_meta().map(|m| m.order), Some(3));
    }

    #[test]
    fn test_wrapper_class_is_wrapper() {
        let class =
            WrapperClass::new("spindle.sdk.Doubling", Doubling).into_class();
        assert!(class.is_wrapper());
    }
}
