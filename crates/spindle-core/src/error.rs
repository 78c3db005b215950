//! Error types for the extension loader.

use std::sync::Arc;

/// Errors raised by loader operations.
///
/// Everything except [`ExtensionError::Injection`] is terminal for the
/// operation that produced it. Injection failures are logged by the loader
/// and never abort extension creation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtensionError {
    /// The extension point itself is unusable (empty name, more than one
    /// default extension name, loader type clash).
    #[error("invalid extension point {point}: {reason}")]
    InvalidPoint { point: String, reason: String },

    /// A manifest resource could not be used.
    #[error("manifest {origin} for {point}: {reason}")]
    Manifest {
        point: String,
        origin: String,
        reason: String,
    },

    /// Two manifest entries bind the same name to different classes.
    #[error("duplicate extension name {name} for {point}: {existing} and {class}")]
    DuplicateName {
        point: String,
        name: String,
        existing: String,
        class: String,
    },

    /// A class named by a manifest could not be resolved, or does not
    /// implement the extension point.
    #[error("extension class {class} for {point}: {reason}")]
    ClassLoad {
        point: String,
        class: String,
        reason: String,
    },

    /// `get` was asked for a name no manifest declares. Carries the
    /// remembered load error for that name when one exists.
    #[error("no extension named {name} for {point}")]
    Unknown {
        point: String,
        name: String,
        #[source]
        cause: Option<Arc<ExtensionError>>,
    },

    /// `get` was called with an empty name.
    #[error("extension name must not be empty")]
    InvalidName,

    /// `get("true")` was called on a point without an SPI default.
    #[error("no default extension configured for {point}")]
    NoDefault { point: String },

    /// Two classes both carry the class-level adaptive marker.
    #[error("more than one adaptive class for {point}: {first} and {second}")]
    DuplicateAdaptive {
        point: String,
        first: String,
        second: String,
    },

    /// An extension constructor or wrapper constructor failed.
    #[error("failed to instantiate extension {name} for {point}: {reason}")]
    Instantiation {
        point: String,
        name: String,
        reason: String,
    },

    /// A setter hook rejected the injected value. Logged, never surfaced.
    #[error("failed to inject property {property}: {reason}")]
    Injection { property: String, reason: String },

    /// Adaptive dispatch could not be synthesized for the point.
    #[error("adaptive synthesis for {point} failed: {reason}")]
    AdaptiveSynthesis { point: String, reason: String },

    /// The adaptive slot is poisoned; replays the first failure.
    #[error("adaptive instance for {point} unavailable: {source}")]
    Adaptive {
        point: String,
        #[source]
        source: Arc<ExtensionError>,
    },

    /// A generated dispatcher method without the adaptive marker was called.
    #[error("method {method} of {point} is not adaptive")]
    NotAdaptive { point: String, method: String },

    /// An adaptive method was invoked without a usable url argument.
    #[error("adaptive method {method} of {point} requires a url argument")]
    MissingUrl { point: String, method: String },

    /// No extension name could be resolved from the url with the method's
    /// key schedule.
    #[error("cannot resolve extension name for {point}::{method} from url ({url}) using keys {keys:?}")]
    NameUnresolved {
        point: String,
        method: String,
        url: String,
        keys: Vec<String>,
    },

    /// A url string could not be parsed.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ExtensionError>;
