//! The per-point extension loader.
//!
//! One `ExtensionLoader<P>` exists per extension point and domain. It owns
//! the point's caches:
//!
//! - the class table, populated once from the manifests under a dedicated
//!   lock (classes, reverse names, wrappers, activation metadata, the
//!   discovered adaptive class, the default name, and remembered per-name
//!   load errors);
//! - one holder per extension name, each publishing its instance with
//!   double-checked locking;
//! - the adaptive slot, which caches the adaptive instance or, after a
//!   failed synthesis, stays poisoned with the original error.
//!
//! `create` runs the full assembly line: resolve the class, fetch or build
//! the domain-wide singleton, inject its dependencies, then fold the
//! discovered wrappers around it in discovery order, injecting each.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::TypeId;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use crate::activate::{self, Candidate};
use crate::class::{ActivateMeta, Constructed, ErasedInstance, ExtensionClass};
use crate::config;
use crate::domain::ExtensionDomain;
use crate::error::{ExtensionError, Result};
use crate::factory::ExtensionFactoryPoint;
use crate::manifest::{self, ManifestEntry};
use crate::point::{self, simple_name, ExtensionPoint, Instance};
use crate::url::Url;

/// Double-checked, initialize-at-most-once slot.
struct Holder<T> {
    lock: Mutex<()>,
    slot: OnceLock<T>,
}

impl<T> Holder<T> {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            slot: OnceLock::new(),
        }
    }

    fn get_or_try_init(&self, init: impl FnOnce() -> Result<T>) -> Result<&T> {
        if let Some(value) = self.slot.get() {
            return Ok(value);
        }
        let _guard = self.lock.lock().unwrap();
        if let Some(value) = self.slot.get() {
            return Ok(value);
        }
        let value = init()?;
        Ok(self.slot.get_or_init(|| value))
    }
}

/// A published instance with its diagnostics record.
struct InstanceRecord<P: ExtensionPoint> {
    instance: Instance<P>,
    class: &'static str,
    loaded_at: DateTime<Utc>,
}

/// Per-name instance holder; its own lock grants independent progress
/// between unrelated names.
struct InstanceHolder<P: ExtensionPoint> {
    lock: Mutex<()>,
    slot: OnceLock<InstanceRecord<P>>,
}

impl<P: ExtensionPoint> InstanceHolder<P> {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            slot: OnceLock::new(),
        }
    }
}

/// The adaptive slot: cached instance, or the sticky first failure.
struct AdaptiveSlot<P: ExtensionPoint> {
    lock: Mutex<()>,
    slot: RwLock<Option<std::result::Result<Instance<P>, Arc<ExtensionError>>>>,
}

impl<P: ExtensionPoint> AdaptiveSlot<P> {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            slot: RwLock::new(None),
        }
    }

    #[cfg(feature = "manual-registration")]
    fn clear(&self) {
        *self.slot.write().unwrap() = None;
    }
}

/// Everything learned from the manifests, populated once per point.
struct ClassTable<P: ExtensionPoint> {
    classes: HashMap<String, Arc<ExtensionClass<P>>>,
    names: HashMap<&'static str, String>,
    wrappers: Vec<Arc<ExtensionClass<P>>>,
    adaptive: Option<Arc<ExtensionClass<P>>>,
    activates: Vec<(String, ActivateMeta)>,
    default_name: Option<String>,
    errors: HashMap<String, Arc<ExtensionError>>,
}

impl<P: ExtensionPoint> ClassTable<P> {
    fn new(default_name: Option<String>) -> Self {
        Self {
            classes: HashMap::new(),
            names: HashMap::new(),
            wrappers: Vec::new(),
            adaptive: None,
            activates: Vec::new(),
            default_name,
            errors: HashMap::new(),
        }
    }
}

/// Diagnostics record for one instantiated extension.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedExtension {
    /// Extension name.
    pub name: String,
    /// Fully-qualified class name of the innermost instance.
    pub class: String,
    /// When the instance was published.
    pub loaded_at: DateTime<Utc>,
}

struct Created<P: ExtensionPoint> {
    instance: Instance<P>,
    class: &'static str,
}

/// Loader for one extension point within one domain.
pub struct ExtensionLoader<P: ExtensionPoint> {
    domain: Weak<ExtensionDomain>,
    object_factory: Option<Instance<ExtensionFactoryPoint>>,
    classes: Holder<RwLock<ClassTable<P>>>,
    instances: Mutex<HashMap<String, Arc<InstanceHolder<P>>>>,
    adaptive: AdaptiveSlot<P>,
}

impl<P: ExtensionPoint> ExtensionLoader<P> {
    pub(crate) fn new(domain: &Arc<ExtensionDomain>) -> Result<Self> {
        point::validate_point::<P>()?;
        let object_factory = if TypeId::of::<P>() == TypeId::of::<ExtensionFactoryPoint>() {
            None
        } else {
            Some(domain.loader::<ExtensionFactoryPoint>()?.adaptive()?)
        };
        Ok(Self {
            domain: Arc::downgrade(domain),
            object_factory,
            classes: Holder::new(),
            instances: Mutex::new(HashMap::new()),
            adaptive: AdaptiveSlot::new(),
        })
    }

    fn domain(&self) -> Result<Arc<ExtensionDomain>> {
        self.domain
            .upgrade()
            .ok_or_else(|| ExtensionError::InvalidPoint {
                point: P::NAME.to_string(),
                reason: "extension domain dropped".to_string(),
            })
    }

    /// The singleton instance registered under `name`.
    ///
    /// The literal name `"true"` resolves to the default extension.
    pub fn get(&self, name: &str) -> Result<Instance<P>> {
        if name.is_empty() {
            return Err(ExtensionError::InvalidName);
        }
        if name == config::keys::TRUE {
            return self
                .default_instance()?
                .ok_or_else(|| ExtensionError::NoDefault {
                    point: P::NAME.to_string(),
                });
        }
        let holder = self.instance_holder(name);
        if let Some(record) = holder.slot.get() {
            return Ok(record.instance.clone());
        }
        let _guard = holder.lock.lock().unwrap();
        if let Some(record) = holder.slot.get() {
            return Ok(record.instance.clone());
        }
        let created = self.create(name)?;
        let record = holder.slot.get_or_init(|| InstanceRecord {
            instance: created.instance,
            class: created.class,
            loaded_at: Utc::now(),
        });
        Ok(record.instance.clone())
    }

    /// The default extension, or `None` when the point declares none.
    pub fn default_instance(&self) -> Result<Option<Instance<P>>> {
        match self.default_name()? {
            Some(name) => Ok(Some(self.get(&name)?)),
            None => Ok(None),
        }
    }

    /// The default extension name declared by the point, after loading the
    /// class table.
    pub fn default_name(&self) -> Result<Option<String>> {
        let table = self.class_table()?;
        let name = table.read().unwrap().default_name.clone();
        Ok(name.filter(|n| n != config::keys::TRUE))
    }

    /// The adaptive instance: a discovered class-level adaptive
    /// implementation, or one synthesized from the point's profile.
    ///
    /// The first synthesis failure poisons the slot; every later call
    /// replays the same error.
    pub fn adaptive(&self) -> Result<Instance<P>> {
        if let Some(result) = self.adaptive.slot.read().unwrap().clone() {
            return Self::unwrap_adaptive(result);
        }
        let _guard = self.adaptive.lock.lock().unwrap();
        if let Some(result) = self.adaptive.slot.read().unwrap().clone() {
            return Self::unwrap_adaptive(result);
        }
        let result = self.create_adaptive().map_err(Arc::new);
        *self.adaptive.slot.write().unwrap() = Some(result.clone());
        Self::unwrap_adaptive(result)
    }

    fn unwrap_adaptive(
        result: std::result::Result<Instance<P>, Arc<ExtensionError>>,
    ) -> Result<Instance<P>> {
        result.map_err(|source| ExtensionError::Adaptive {
            point: P::NAME.to_string(),
            source,
        })
    }

    fn create_adaptive(&self) -> Result<Instance<P>> {
        let domain = self.domain()?;
        let table = self.class_table()?;
        let (discovered, default_name) = {
            let table = table.read().unwrap();
            (table.adaptive.clone(), table.default_name.clone())
        };
        if let Some(class) = discovered {
            let constructed = class.construct(&domain)?;
            self.inject(&domain, &constructed);
            return Ok(constructed.instance);
        }
        crate::adaptive::synthesize::<P>(&domain, default_name)
    }

    /// Whether `name` resolves to a loadable class.
    pub fn has_extension(&self, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Err(ExtensionError::InvalidName);
        }
        let table = self.class_table()?;
        let present = table.read().unwrap().classes.contains_key(name);
        Ok(present)
    }

    /// All registered names, sorted.
    pub fn supported_names(&self) -> Result<BTreeSet<String>> {
        let table = self.class_table()?;
        let names = table.read().unwrap().classes.keys().cloned().collect();
        Ok(names)
    }

    /// The name a class was first registered under.
    pub fn extension_name_of(&self, class_fqn: &str) -> Result<Option<String>> {
        let table = self.class_table()?;
        let name = table.read().unwrap().names.get(class_fqn).cloned();
        Ok(name)
    }

    /// The already-published instance for `name`, without triggering
    /// creation.
    pub fn loaded_extension(&self, name: &str) -> Result<Option<Instance<P>>> {
        if name.is_empty() {
            return Err(ExtensionError::InvalidName);
        }
        let instances = self.instances.lock().unwrap();
        Ok(instances
            .get(name)
            .and_then(|holder| holder.slot.get())
            .map(|record| record.instance.clone()))
    }

    /// Names with a published instance, sorted.
    pub fn loaded_names(&self) -> BTreeSet<String> {
        let instances = self.instances.lock().unwrap();
        instances
            .iter()
            .filter(|(_, holder)| holder.slot.get().is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Diagnostics records for every published instance, sorted by name.
    pub fn loaded_extensions(&self) -> Vec<LoadedExtension> {
        let instances = self.instances.lock().unwrap();
        let mut records: Vec<LoadedExtension> = instances
            .iter()
            .filter_map(|(name, holder)| {
                holder.slot.get().map(|record| LoadedExtension {
                    name: name.clone(),
                    class: record.class.to_string(),
                    loaded_at: record.loaded_at,
                })
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// The ordered auto-activated batch for `url` and `group`, spliced with
    /// the user-supplied `values` list.
    ///
    /// `-name` excludes an entry, `default` marks where the auto batch goes,
    /// and `-default` suppresses the auto batch entirely.
    pub fn activate(
        &self,
        url: &Url,
        values: &[&str],
        group: Option<&str>,
    ) -> Result<Vec<Instance<P>>> {
        let table = self.class_table()?;
        let activates = { table.read().unwrap().activates.clone() };

        let mut result: Vec<Instance<P>> = Vec::new();
        let suppressed = values
            .iter()
            .any(|v| v.strip_prefix(config::keys::REMOVE_PREFIX) == Some(config::keys::DEFAULT));
        if !suppressed {
            let mut batch = Vec::new();
            for (discovery, (name, meta)) in activates.iter().enumerate() {
                if !activate::group_matches(group, &meta.group) {
                    continue;
                }
                if values.iter().any(|v| *v == name.as_str()) {
                    continue;
                }
                if values
                    .iter()
                    .any(|v| v.strip_prefix(config::keys::REMOVE_PREFIX) == Some(name.as_str()))
                {
                    continue;
                }
                if !activate::is_active(meta, url) {
                    continue;
                }
                batch.push(Candidate {
                    name: name.clone(),
                    meta: meta.clone(),
                    discovery,
                });
            }
            for candidate in activate::sort(batch) {
                result.push(self.get(&candidate.name)?);
            }
        }

        let mut user: Vec<Instance<P>> = Vec::new();
        for value in values {
            if value.starts_with(config::keys::REMOVE_PREFIX) {
                continue;
            }
            if values
                .iter()
                .any(|v| v.strip_prefix(config::keys::REMOVE_PREFIX) == Some(*value))
            {
                continue;
            }
            if *value == config::keys::DEFAULT {
                if !user.is_empty() {
                    user.extend(result.drain(..));
                    result = std::mem::take(&mut user);
                }
            } else {
                user.push(self.get(value)?);
            }
        }
        result.extend(user);
        Ok(result)
    }

    /// [`activate`](Self::activate) with the value list read from the url
    /// parameter `key`, split on commas.
    pub fn activate_by_key(
        &self,
        url: &Url,
        key: &str,
        group: Option<&str>,
    ) -> Result<Vec<Instance<P>>> {
        let raw = url.parameter(key).unwrap_or("");
        let values: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        self.activate(url, &values, group)
    }

    /// Register a new extension class under `name`. Test tooling.
    #[cfg(feature = "manual-registration")]
    pub fn register(&self, name: &str, class: ExtensionClass<P>) -> Result<()> {
        let table = self.class_table()?;
        let mut table = table.write().unwrap();
        self.classify(&mut table, Some(name), Arc::new(class))
    }

    /// Replace an existing extension class. Test tooling; the cached
    /// instance for `name` (or the adaptive instance) is discarded.
    #[cfg(feature = "manual-registration")]
    pub fn replace(&self, name: &str, class: ExtensionClass<P>) -> Result<()> {
        let table = self.class_table()?;
        let class = Arc::new(class);
        let mut guard = table.write().unwrap();
        if class.is_adaptive() {
            if guard.adaptive.is_none() {
                return Err(ExtensionError::InvalidPoint {
                    point: P::NAME.to_string(),
                    reason: "no adaptive class registered to replace".to_string(),
                });
            }
            guard.adaptive = Some(class);
            drop(guard);
            self.adaptive.clear();
        } else {
            if name.is_empty() {
                return Err(ExtensionError::InvalidName);
            }
            if !guard.classes.contains_key(name) {
                return Err(ExtensionError::Unknown {
                    point: P::NAME.to_string(),
                    name: name.to_string(),
                    cause: None,
                });
            }
            guard.names.insert(class.fqn(), name.to_string());
            guard.classes.insert(name.to_string(), class);
            drop(guard);
            self.instances.lock().unwrap().remove(name);
        }
        Ok(())
    }

    fn instance_holder(&self, name: &str) -> Arc<InstanceHolder<P>> {
        let mut instances = self.instances.lock().unwrap();
        instances
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InstanceHolder::new()))
            .clone()
    }

    fn create(&self, name: &str) -> Result<Created<P>> {
        let domain = self.domain()?;
        let table = self.class_table()?;
        let (class, wrappers) = {
            let table = table.read().unwrap();
            let class = match table.classes.get(name) {
                Some(class) => class.clone(),
                None => return Err(self.unknown_error(name, &table)),
            };
            (class, table.wrappers.clone())
        };

        let shared = domain.singleton(&class)?;
        self.inject(&domain, &shared);
        let mut instance = shared.instance.clone();
        for wrapper in &wrappers {
            let composed = wrapper.wrap(&domain, instance)?;
            self.inject(&domain, &composed);
            instance = composed.instance;
        }
        Ok(Created {
            instance,
            class: class.fqn(),
        })
    }

    fn unknown_error(&self, name: &str, table: &ClassTable<P>) -> ExtensionError {
        let cause = table.errors.get(name).cloned().or_else(|| {
            let needle = name.to_lowercase();
            table
                .errors
                .iter()
                .find(|(key, _)| key.to_lowercase().contains(&needle))
                .map(|(_, error)| error.clone())
        });
        ExtensionError::Unknown {
            point: P::NAME.to_string(),
            name: name.to_string(),
            cause,
        }
    }

    /// Best-effort wiring: failures are logged, never raised.
    fn inject(&self, domain: &Arc<ExtensionDomain>, constructed: &Constructed<P>) {
        let Some(factory) = &self.object_factory else {
            return;
        };
        for setter in &constructed.setters {
            if setter.disable_inject {
                continue;
            }
            let Some(value) = factory.extension_for(domain, setter.target, setter.property) else {
                continue;
            };
            if let Err(e) = (setter.apply)(value) {
                tracing::warn!(
                    "failed to inject property {} of {} into an extension of {}: {}",
                    setter.property,
                    setter.target,
                    P::NAME,
                    e
                );
            }
        }
    }

    fn class_table(&self) -> Result<&RwLock<ClassTable<P>>> {
        self.classes.get_or_try_init(|| self.load_class_table())
    }

    fn load_class_table(&self) -> Result<RwLock<ClassTable<P>>> {
        let domain = self.domain()?;
        let mut table = ClassTable::new(point::declared_default::<P>());

        for resource in domain.catalog().read_point(P::NAME) {
            let (entries, failures) = manifest::parse_resource(P::NAME, &resource);
            for (line, error) in failures {
                tracing::error!("{}", error);
                table.errors.insert(line, Arc::new(error));
            }
            for entry in entries {
                self.load_entry(&mut table, &domain, entry)?;
            }
        }

        tracing::debug!(
            "loaded {} extension classes for {} ({} wrappers, {} activates)",
            table.classes.len(),
            P::NAME,
            table.wrappers.len(),
            table.activates.len()
        );
        Ok(RwLock::new(table))
    }

    fn load_entry(
        &self,
        table: &mut ClassTable<P>,
        domain: &Arc<ExtensionDomain>,
        entry: ManifestEntry,
    ) -> Result<()> {
        let key = entry.name.clone().unwrap_or_else(|| entry.class.clone());
        let remember = |table: &mut ClassTable<P>, error: ExtensionError| {
            tracing::error!("{}", error);
            table.errors.insert(key.clone(), Arc::new(error));
        };

        let handle = match domain.resolve_class(&entry.class) {
            Some(handle) => handle,
            None => {
                remember(
                    table,
                    ExtensionError::ClassLoad {
                        point: P::NAME.to_string(),
                        class: entry.class.clone(),
                        reason: format!("class not found ({}:{})", entry.origin, entry.line),
                    },
                );
                return Ok(());
            }
        };
        if handle.point != P::NAME {
            remember(
                table,
                ExtensionError::ClassLoad {
                    point: P::NAME.to_string(),
                    class: entry.class.clone(),
                    reason: format!("class implements {}, not {}", handle.point, P::NAME),
                },
            );
            return Ok(());
        }
        let class = match handle.downcast::<P>() {
            Some(class) => class,
            None => {
                remember(
                    table,
                    ExtensionError::ClassLoad {
                        point: P::NAME.to_string(),
                        class: entry.class.clone(),
                        reason: "descriptor type does not match the extension point".to_string(),
                    },
                );
                return Ok(());
            }
        };

        match self.classify(table, entry.name.as_deref(), class) {
            Ok(()) => Ok(()),
            // Conflicting declarations abort the whole load.
            Err(
                fatal @ (ExtensionError::DuplicateName { .. }
                | ExtensionError::DuplicateAdaptive { .. }),
            ) => Err(fatal),
            Err(error) => {
                remember(table, error);
                Ok(())
            }
        }
    }

    /// Feed one class through the classifier: adaptive, wrapper, or plain
    /// named (optionally auto-activated).
    fn classify(
        &self,
        table: &mut ClassTable<P>,
        raw_name: Option<&str>,
        class: Arc<ExtensionClass<P>>,
    ) -> Result<()> {
        if class.is_adaptive() {
            match &table.adaptive {
                Some(existing) if existing.fqn() != class.fqn() => {
                    return Err(ExtensionError::DuplicateAdaptive {
                        point: P::NAME.to_string(),
                        first: existing.fqn().to_string(),
                        second: class.fqn().to_string(),
                    });
                }
                _ => table.adaptive = Some(class),
            }
            return Ok(());
        }

        if class.is_wrapper() {
            if !table.wrappers.iter().any(|w| w.fqn() == class.fqn()) {
                table.wrappers.push(class);
            }
            return Ok(());
        }

        let raw_name = match raw_name {
            Some(name) => name.to_string(),
            None => derive_name::<P>(class.fqn()).ok_or_else(|| ExtensionError::ClassLoad {
                point: P::NAME.to_string(),
                class: class.fqn().to_string(),
                reason: "no extension name and none can be derived from the class name"
                    .to_string(),
            })?,
        };
        let names: Vec<&str> = raw_name
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(ExtensionError::ClassLoad {
                point: P::NAME.to_string(),
                class: class.fqn().to_string(),
                reason: "empty extension name".to_string(),
            });
        }

        if let Some(meta) = class.activate_meta() {
            if !table.activates.iter().any(|(n, _)| n == names[0]) {
                table.activates.push((names[0].to_string(), meta.clone()));
            }
        }
        table
            .names
            .entry(class.fqn())
            .or_insert_with(|| names[0].to_string());
        for name in names {
            match table.classes.get(name) {
                None => {
                    table.classes.insert(name.to_string(), class.clone());
                }
                Some(existing) if existing.fqn() == class.fqn() => {}
                Some(existing) => {
                    return Err(ExtensionError::DuplicateName {
                        point: P::NAME.to_string(),
                        name: name.to_string(),
                        existing: existing.fqn().to_string(),
                        class: class.fqn().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

pub(crate) trait ErasedLoader: Send + Sync {
    fn adaptive_erased(&self) -> Result<ErasedInstance>;
}

impl<P: ExtensionPoint> ErasedLoader for ExtensionLoader<P> {
    fn adaptive_erased(&self) -> Result<ErasedInstance> {
        Ok(Box::new(self.adaptive()?))
    }
}

/// Derive an extension name from a class name: strip the capability's
/// simple name as a suffix and lowercase the remainder.
fn derive_name<P: ExtensionPoint>(class_fqn: &str) -> Option<String> {
    let class_simple = simple_name(class_fqn);
    let point_simple = simple_name(P::NAME);
    let stem = class_simple.strip_suffix(point_simple).unwrap_or(class_simple);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DemoPoint;
    impl ExtensionPoint for DemoPoint {
        type Contract = dyn Send + Sync;
        const NAME: &'static str = "spindle.loader.Demo";
    }

    #[test]
    fn test_holder_initializes_once() {
        let holder: Holder<i32> = Holder::new();
        let first = holder.get_or_try_init(|| Ok(1)).unwrap();
        assert_eq!(*first, 1);
        let second = holder.get_or_try_init(|| Ok(2)).unwrap();
        assert_eq!(*second, 1);
    }

    #[test]
    fn test_holder_retries_after_failure() {
        let holder: Holder<i32> = Holder::new();
        let failed = holder.get_or_try_init(|| Err(ExtensionError::InvalidName));
        assert!(failed.is_err());
        let value = holder.get_or_try_init(|| Ok(3)).unwrap();
        assert_eq!(*value, 3);
    }

    #[test]
    fn test_derive_name_strips_point_suffix() {
        assert_eq!(
            derive_name::<DemoPoint>("pkg.LoggingDemo"),
            Some("logging".to_string())
        );
        assert_eq!(
            derive_name::<DemoPoint>("pkg.Other"),
            Some("other".to_string())
        );
        assert_eq!(derive_name::<DemoPoint>("pkg.Demo"), None);
    }
}
