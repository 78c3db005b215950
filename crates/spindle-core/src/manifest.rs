//! Manifest discovery and parsing.
//!
//! Extensions are declared by plain-text manifests named after the
//! fully-qualified extension point, searched in three directories in fixed
//! precedence: `internal-dubbo/` (framework manifests), `dubbo/` (user
//! overrides) and `services/` (platform SPI compatibility). For each
//! directory kind, embedded manifests registered by the framework come
//! first, then the configured root directories in configuration order.
//!
//! Manifest grammar, one entry per line:
//!
//! ```text
//! # comment
//! name=fully.qualified.ClassName
//! alias1,alias2=fully.qualified.ClassName
//! fully.qualified.ClassName          # name derived from the class name
//! ```

use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::ExtensionError;

/// Framework-provided manifests, highest trust.
pub const INTERNAL_DIRECTORY: &str = "internal-dubbo";
/// User-provided overrides.
pub const USER_DIRECTORY: &str = "dubbo";
/// Compatibility with the ambient platform's standard SPI layout.
pub const SERVICES_DIRECTORY: &str = "services";

/// Search order.
pub const DIRECTORIES: [&str; 3] = [INTERNAL_DIRECTORY, USER_DIRECTORY, SERVICES_DIRECTORY];

/// One manifest resource, already read into memory.
#[derive(Debug, Clone)]
pub struct ManifestResource {
    /// Where the resource came from, for diagnostics.
    pub origin: String,
    /// UTF-8 manifest text.
    pub content: String,
}

/// One parsed manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Raw name list (`a` or `a,b`); `None` when the entry only names a
    /// class and the name is derived from it.
    pub name: Option<String>,
    /// Fully-qualified class name.
    pub class: String,
    /// Resource the entry came from.
    pub origin: String,
    /// 1-based line number.
    pub line: usize,
}

/// The set of manifest sources a domain searches.
pub struct ManifestCatalog {
    roots: RwLock<Vec<PathBuf>>,
    embedded: RwLock<Vec<EmbeddedManifest>>,
}

struct EmbeddedManifest {
    directory: String,
    point: String,
    content: String,
}

impl ManifestCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self {
            roots: RwLock::new(Vec::new()),
            embedded: RwLock::new(Vec::new()),
        }
    }

    /// Append a manifest root directory. Only affects points whose classes
    /// have not been loaded yet.
    pub fn add_root(&self, root: impl Into<PathBuf>) {
        self.roots.write().unwrap().push(root.into());
    }

    /// Register an in-memory manifest under one of the search directories.
    /// The framework's own manifests are registered this way; tests use it
    /// to avoid touching the filesystem.
    pub fn add_embedded(
        &self,
        directory: impl Into<String>,
        point: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.embedded.write().unwrap().push(EmbeddedManifest {
            directory: directory.into(),
            point: point.into(),
            content: content.into(),
        });
    }

    /// Collect every manifest resource for `point`, in precedence order.
    /// An existing but unreadable file is logged and skipped.
    pub(crate) fn read_point(&self, point: &str) -> Vec<ManifestResource> {
        let mut resources = Vec::new();
        let roots = self.roots.read().unwrap();
        let embedded = self.embedded.read().unwrap();
        for directory in DIRECTORIES {
            for manifest in embedded.iter() {
                if manifest.directory == directory && manifest.point == point {
                    resources.push(ManifestResource {
                        origin: format!("<embedded>/{directory}/{point}"),
                        content: manifest.content.clone(),
                    });
                }
            }
            for root in roots.iter() {
                let path = root.join(directory).join(point);
                if !path.exists() {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(content) => resources.push(ManifestResource {
                        origin: path.display().to_string(),
                        content,
                    }),
                    Err(e) => {
                        tracing::error!("failed to read manifest {}: {}", path.display(), e);
                    }
                }
            }
        }
        resources
    }
}

impl Default for ManifestCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Parse one resource into entries plus per-line failures.
///
/// Failures carry the offending line text as their key so the loader can
/// remember them without aborting sibling entries.
pub(crate) fn parse_resource(
    point: &str,
    resource: &ManifestResource,
) -> (Vec<ManifestEntry>, Vec<(String, ExtensionError)>) {
    let mut entries = Vec::new();
    let mut failures = Vec::new();

    for (index, raw) in resource.content.lines().enumerate() {
        let line = match raw.find('#') {
            Some(at) => &raw[..at],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fail = |reason: &str| {
            failures.push((
                line.to_string(),
                ExtensionError::Manifest {
                    point: point.to_string(),
                    origin: resource.origin.clone(),
                    reason: format!("line {}: {}", index + 1, reason),
                },
            ));
        };

        match line.split_once('=') {
            Some((name, class)) => {
                let name = name.trim();
                let class = class.trim();
                if name.is_empty() {
                    fail("empty name before '='");
                    continue;
                }
                if class.is_empty() {
                    fail("missing class name after '='");
                    continue;
                }
                if !name.split(',').map(str::trim).all(valid_name) {
                    fail("invalid extension name");
                    continue;
                }
                entries.push(ManifestEntry {
                    name: Some(name.to_string()),
                    class: class.to_string(),
                    origin: resource.origin.clone(),
                    line: index + 1,
                });
            }
            None => entries.push(ManifestEntry {
                name: None,
                class: line.to_string(),
                origin: resource.origin.clone(),
                line: index + 1,
            }),
        }
    }

    (entries, failures)
}
