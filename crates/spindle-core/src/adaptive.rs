//! Adaptive dispatch synthesis.
//!
//! An adaptive instance implements the capability but defers the choice of
//! concrete extension to call time: each adaptive method reads an extension
//! name out of the url it was handed and forwards to `loader.get(name)`.
//!
//! A hand-written class-level adaptive implementation, when discovered in a
//! manifest, short-circuits all of this. Otherwise the loader synthesizes
//! one from the point's [`AdaptiveProfile`]: dispatch metadata for each
//! adaptive method plus a dispatcher constructor generated alongside the
//! capability. The synthesizer validates the profile, computes the
//! per-method key schedule, and binds it to the loader; the resulting plan
//! is logged at debug level.
//!
//! Name resolution per method: the declared keys are tried left to right,
//! each falling back to the next, with the point's SPI default innermost.
//! The key `"protocol"` reads `url.protocol()` instead of the parameter
//! map, and methods handling an [`Invocation`](crate::url::Invocation)
//! resolve keys through `url.method_parameter` with the invocation's method
//! name.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crate::config;
use crate::domain::ExtensionDomain;
use crate::error::{ExtensionError, Result};
use crate::point::{simple_name, ExtensionPoint, Instance};
use crate::url::{Invocation, Url};

/// Where an adaptive method finds its url argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlSource {
    /// The method has no url argument; synthesis fails.
    Missing,
    /// A direct parameter of url type, by position.
    Parameter(usize),
    /// A zero-argument getter on one of the parameters.
    Getter {
        /// Position of the parameter exposing the getter.
        parameter: usize,
        /// Getter method name.
        getter: &'static str,
    },
}

/// Dispatch metadata for one adaptive method.
#[derive(Debug, Clone)]
pub struct AdaptiveMethod {
    name: &'static str,
    keys: Vec<&'static str>,
    url: UrlSource,
    has_invocation: bool,
}

impl AdaptiveMethod {
    /// Describe the adaptive method `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            keys: Vec::new(),
            url: UrlSource::Missing,
            has_invocation: false,
        }
    }

    /// Append a lookup key. Keys are tried in declaration order.
    pub fn key(mut self, key: &'static str) -> Self {
        self.keys.push(key);
        self
    }

    /// The url is a direct parameter at `index`.
    pub fn url_parameter(mut self, index: usize) -> Self {
        self.url = UrlSource::Parameter(index);
        self
    }

    /// The url is reached through a getter on the parameter at `index`.
    pub fn url_getter(mut self, index: usize, getter: &'static str) -> Self {
        self.url = UrlSource::Getter {
            parameter: index,
            getter,
        };
        self
    }

    /// The method handles an invocation; keys resolve per target method.
    pub fn with_invocation(mut self) -> Self {
        self.has_invocation = true;
        self
    }
}

/// Dispatch metadata for a whole point, plus the dispatcher constructor.
pub struct AdaptiveProfile<P: ExtensionPoint> {
    methods: Vec<AdaptiveMethod>,
    synthesize: fn(AdaptiveBinding<P>) -> Instance<P>,
}

impl<P: ExtensionPoint> AdaptiveProfile<P> {
    /// A profile built around the dispatcher constructor.
    pub fn new(synthesize: fn(AdaptiveBinding<P>) -> Instance<P>) -> Self {
        Self {
            methods: Vec::new(),
            synthesize,
        }
    }

    /// Add one adaptive method.
    pub fn with_method(mut self, method: AdaptiveMethod) -> Self {
        self.methods.push(method);
        self
    }
}

/// The key schedule an adaptive method dispatches on.
#[derive(Debug, Clone)]
struct MethodPlan {
    keys: Vec<String>,
    has_invocation: bool,
}

/// The call-time state of a synthesized dispatcher: resolves extension
/// names from urls and fetches the selected extension.
pub struct AdaptiveBinding<P: ExtensionPoint> {
    domain: Weak<ExtensionDomain>,
    default_name: Option<String>,
    plans: HashMap<&'static str, MethodPlan>,
    _point: PhantomData<fn() -> P>,
}

impl<P: ExtensionPoint> AdaptiveBinding<P> {
    /// Resolve the extension selected by `url` for `method` and fetch it.
    pub fn extension(
        &self,
        method: &str,
        url: &Url,
        invocation: Option<&dyn Invocation>,
    ) -> Result<Instance<P>> {
        let name = self.extension_name(method, url, invocation)?;
        let domain = self.domain.upgrade().ok_or_else(|| {
            ExtensionError::InvalidPoint {
                point: P::NAME.to_string(),
                reason: "extension domain dropped".to_string(),
            }
        })?;
        domain.loader::<P>()?.get(&name)
    }

    /// Resolve the extension name for `method` from `url` without fetching.
    pub fn extension_name(
        &self,
        method: &str,
        url: &Url,
        invocation: Option<&dyn Invocation>,
    ) -> Result<String> {
        let plan = self
            .plans
            .get(method)
            .ok_or_else(|| self.unsupported(method))?;

        let mut resolved = self.default_name.clone();
        for key in plan.keys.iter().rev() {
            let found = if key == config::keys::PROTOCOL {
                url.protocol().map(str::to_string)
            } else if plan.has_invocation {
                match invocation {
                    Some(invocation) => url
                        .method_parameter(invocation.method_name(), key)
                        .map(str::to_string),
                    None => url.parameter(key).map(str::to_string),
                }
            } else {
                url.parameter(key).map(str::to_string)
            };
            resolved = found.filter(|value| !value.is_empty()).or(resolved);
        }

        resolved
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ExtensionError::NameUnresolved {
                point: P::NAME.to_string(),
                method: method.to_string(),
                url: url.to_string(),
                keys: self
                    .plans
                    .get(method)
                    .map(|p| p.keys.clone())
                    .unwrap_or_default(),
            })
    }

    /// The error a dispatcher raises from a method body that carries no
    /// adaptive marker.
    pub fn unsupported(&self, method: &str) -> ExtensionError {
        ExtensionError::NotAdaptive {
            point: P::NAME.to_string(),
            method: method.to_string(),
        }
    }

    /// The error a dispatcher raises when its url argument is absent.
    pub fn missing_url(&self, method: &str) -> ExtensionError {
        ExtensionError::MissingUrl {
            point: P::NAME.to_string(),
            method: method.to_string(),
        }
    }
}

/// Derive the lookup key used when an adaptive method declares none:
/// uppercase boundaries of the capability's simple name become dots,
/// `LoadBalance` → `load.balance`.
pub(crate) fn derived_key(point_simple_name: &str) -> String {
    let mut key = String::with_capacity(point_simple_name.len() + 4);
    for c in point_simple_name.chars() {
        if c.is_uppercase() {
            if !key.is_empty() {
                key.push('.');
            }
            key.extend(c.to_lowercase());
        } else {
            key.push(c);
        }
    }
    key
}

/// Synthesize the adaptive instance for `P` from its profile.
pub(crate) fn synthesize<P: ExtensionPoint>(
    domain: &Arc<ExtensionDomain>,
    default_name: Option<String>,
) -> Result<Instance<P>> {
    let profile = P::adaptive_profile().ok_or_else(|| ExtensionError::AdaptiveSynthesis {
        point: P::NAME.to_string(),
        reason: "no adaptive method on the extension point".to_string(),
    })?;
    if profile.methods.is_empty() {
        return Err(ExtensionError::AdaptiveSynthesis {
            point: P::NAME.to_string(),
            reason: "no adaptive method on the extension point".to_string(),
        });
    }

    let mut plans = HashMap::new();
    for method in &profile.methods {
        if method.url == UrlSource::Missing {
            return Err(ExtensionError::AdaptiveSynthesis {
                point: P::NAME.to_string(),
                reason: format!(
                    "no url parameter or url attribute in parameters of method {}",
                    method.name
                ),
            });
        }
        let keys = if method.keys.is_empty() {
            vec![derived_key(simple_name(P::NAME))]
        } else {
            method.keys.iter().map(|k| k.to_string()).collect()
        };
        tracing::debug!(
            "adaptive plan for {}::{}: keys {:?}, url {:?}, default {:?}",
            P::NAME,
            method.name,
            keys,
            method.url,
            default_name
        );
        plans.insert(
            method.name,
            MethodPlan {
                keys,
                has_invocation: method.has_invocation,
            },
        );
    }

    let binding = AdaptiveBinding {
        domain: Arc::downgrade(domain),
        default_name,
        plans,
        _point: PhantomData,
    };
    Ok((profile.synthesize)(binding))
}
