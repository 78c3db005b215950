//! Extension point markers.
//!
//! A capability is an object-safe trait; its extension point is a zero-sized
//! marker type implementing [`ExtensionPoint`], which carries everything the
//! loader needs to know about the capability: the contract (trait object)
//! type, the fully-qualified point name used to locate manifests, and the
//! SPI default-extension declaration.

use std::sync::Arc;

use crate::adaptive::AdaptiveProfile;
use crate::config;
use crate::error::{ExtensionError, Result};

/// Marker describing one extension point.
///
/// ```ignore
/// pub trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// pub struct GreeterPoint;
///
/// impl ExtensionPoint for GreeterPoint {
///     type Contract = dyn Greeter;
///     const NAME: &'static str = "demo.Greeter";
///     const DEFAULT: &'static str = "en";
/// }
/// ```
pub trait ExtensionPoint: 'static {
    /// The capability trait object extensions implement.
    type Contract: ?Sized + Send + Sync + 'static;

    /// Fully-qualified point name. Manifest resources are looked up under
    /// this name in each search directory.
    const NAME: &'static str;

    /// Raw SPI default-extension declaration. Empty means no default; more
    /// than one comma-separated token is rejected at loader construction.
    const DEFAULT: &'static str = "";

    /// Dispatch metadata for synthesized adaptive instances. Points without
    /// adaptive methods return `None` and rely on a class-level adaptive
    /// implementation, if any.
    fn adaptive_profile() -> Option<AdaptiveProfile<Self>>
    where
        Self: Sized,
    {
        None
    }
}

/// A shared extension instance.
pub type Instance<P> = Arc<<P as ExtensionPoint>::Contract>;

/// Last dot-separated segment of a fully-qualified name.
pub(crate) fn simple_name(fqn: &str) -> &str {
    fqn.rsplit('.').next().unwrap_or(fqn)
}

/// Validate the static point declaration before building its loader.
pub(crate) fn validate_point<P: ExtensionPoint>() -> Result<()> {
    if P::NAME.trim().is_empty() {
        return Err(ExtensionError::InvalidPoint {
            point: P::NAME.to_string(),
            reason: "extension point name is empty".to_string(),
        });
    }
    let tokens: Vec<&str> = P::DEFAULT
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() > 1 {
        return Err(ExtensionError::InvalidPoint {
            point: P::NAME.to_string(),
            reason: format!("more than one default extension name: {tokens:?}"),
        });
    }
    Ok(())
}

/// The declared default extension name, if a usable one exists.
pub(crate) fn declared_default<P: ExtensionPoint>() -> Option<String> {
    let token = P::DEFAULT.trim();
    if token.is_empty() || token == config::keys::TRUE {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoName;
    impl ExtensionPoint for NoName {
        type Contract = dyn Send + Sync;
        const NAME: &'static str = " ";
    }

    struct TwoDefaults;
    impl ExtensionPoint for TwoDefaults {
        type Contract = dyn Send + Sync;
        const NAME: &'static str = "test.TwoDefaults";
        const DEFAULT: &'static str = "a, b";
    }

    struct WellFormed;
    impl ExtensionPoint for WellFormed {
        type Contract = dyn Send + Sync;
        const NAME: &'static str = "test.WellFormed";
        const DEFAULT: &'static str = "a";
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("com.example.Transporter"), "Transporter");
        assert_eq!(simple_name("Transporter"), "Transporter");
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        assert!(matches!(
            validate_point::<NoName>(),
            Err(ExtensionError::InvalidPoint { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_multiple_defaults() {
        assert!(matches!(
            validate_point::<TwoDefaults>(),
            Err(ExtensionError::InvalidPoint { .. })
        ));
    }

    #[test]
    fn test_declared_default() {
        assert!(validate_point::<WellFormed>().is_ok());
        assert_eq!(declared_default::<WellFormed>(), Some("a".to_string()));
    }
}
