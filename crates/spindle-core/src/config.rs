//! Shared constants and environment helpers.
//!
//! This module collects the well-known keys and environment variables used
//! across the loader, so they are defined in exactly one place.

/// Well-known name tokens understood by the loader.
pub mod keys {
    /// Sentinel accepted by `get` that resolves to the default extension.
    pub const TRUE: &str = "true";

    /// Marker in an activation value list that splices in the auto-activated
    /// batch at its position.
    pub const DEFAULT: &str = "default";

    /// Prefix marking an activation value as an exclusion.
    pub const REMOVE_PREFIX: char = '-';

    /// Adaptive lookup key resolved against the url protocol instead of the
    /// parameter map.
    pub const PROTOCOL: &str = "protocol";
}

/// Environment variables consulted by the global extension domain.
pub mod env_vars {
    use std::path::PathBuf;

    /// Colon-separated list of extra manifest root directories.
    pub const MANIFEST_PATH: &str = "SPINDLE_MANIFEST_PATH";

    /// Parse [`MANIFEST_PATH`] into a list of directories, or an empty list
    /// when unset.
    pub fn manifest_roots() -> Vec<PathBuf> {
        std::env::var(MANIFEST_PATH)
            .map(|raw| {
                raw.split(':')
                    .filter(|part| !part.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}
