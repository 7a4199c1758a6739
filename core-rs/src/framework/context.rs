//! Framework-wide state shared by every bundle, context and registration

use super::activator::ActivatorTable;
use super::bundle::{Bundle, BundleData, BundleState};
use super::{location_path, lock, read_lock, write_lock};
use crate::config::{FrameworkConfig, FRAMEWORK_VENDOR};
use crate::errors::{BundleErrorKind, FrameworkError, Result};
use crate::events::{BundleEvent, BundleEventKind, EventDispatcher, FrameworkEvent, FrameworkEventKind};
use crate::manifest::{BundleDescription, Headers};
use crate::registry::ServiceRegistry;
use crate::resolver::{ResolveReport, Resolver};
use crate::revision::{BundleId, BundleRevision, RevisionId, SYSTEM_BUNDLE_ID};
use crate::storage::{BundleArchive, Storage};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, info, warn};

pub const SYSTEM_BUNDLE_LOCATION: &str = "System Bundle";
pub const SYSTEM_BUNDLE_SYMBOLIC_NAME: &str = "system.bundle";

pub(crate) struct FrameworkContext {
    pub(crate) config: FrameworkConfig,
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) storage: Storage,
    pub(crate) bundles: RwLock<BTreeMap<BundleId, Arc<BundleData>>>,
    /// Uninstalled bundles whose revisions are still wired to others
    pub(crate) zombies: Mutex<BTreeMap<BundleId, Arc<BundleData>>>,
    pub(crate) resolver: Mutex<Resolver>,
    pub(crate) events: Arc<EventDispatcher>,
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) activators: ActivatorTable,
    pub(crate) system: Arc<BundleData>,
    pub(crate) install_lock: Mutex<()>,
    pub(crate) refresh_lock: Mutex<()>,
    pub(crate) restored: AtomicBool,
    this: Weak<FrameworkContext>,
}

impl FrameworkContext {
    pub(crate) fn new(config: FrameworkConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let storage = Storage::open(&config.storage_dir)?;
        let properties = config.framework_properties();
        let system_revision = Arc::new(system_revision(&config)?);

        let mut resolver = Resolver::new();
        resolver.add_revision(Arc::clone(&system_revision));
        let report = resolver.resolve(&[system_revision.id()]);
        if let Some(failure) = report.failures.values().next() {
            return Err(FrameworkError::bundle(BundleErrorKind::ResolveError, failure.to_string()));
        }

        let system = BundleData::new(
            SYSTEM_BUNDLE_ID,
            SYSTEM_BUNDLE_LOCATION,
            None,
            system_revision,
            Utc::now(),
        );
        system.inner().state = BundleState::Resolved;
        let mut bundles = BTreeMap::new();
        bundles.insert(SYSTEM_BUNDLE_ID, Arc::clone(&system));

        let events = Arc::new(EventDispatcher::new());
        let registry = ServiceRegistry::new(Arc::clone(&events));

        info!(storage = %config.storage_dir.display(), "Framework created");
        Ok(Arc::new_cyclic(|this| FrameworkContext {
            config,
            properties,
            storage,
            bundles: RwLock::new(bundles),
            zombies: Mutex::new(BTreeMap::new()),
            resolver: Mutex::new(resolver),
            events,
            registry,
            activators: ActivatorTable::default(),
            system,
            install_lock: Mutex::new(()),
            refresh_lock: Mutex::new(()),
            restored: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    pub(crate) fn handle(&self, data: &Arc<BundleData>) -> Bundle {
        Bundle {
            ctx: self.this.clone(),
            data: Arc::clone(data),
        }
    }

    pub(crate) fn system_bundle(&self) -> Bundle {
        self.handle(&self.system)
    }

    pub(crate) fn bundles(&self) -> Vec<Bundle> {
        read_lock(&self.bundles).values().map(|d| self.handle(d)).collect()
    }

    pub(crate) fn bundle(&self, id: BundleId) -> Option<Bundle> {
        read_lock(&self.bundles).get(&id).map(|d| self.handle(d))
    }

    pub(crate) fn bundle_by_location(&self, location: &str) -> Option<Bundle> {
        read_lock(&self.bundles)
            .values()
            .find(|d| d.location == location)
            .map(|d| self.handle(d))
    }

    /// Installed or uninstalled-but-still-wired bundle record
    pub(crate) fn bundle_data(&self, id: BundleId) -> Option<Arc<BundleData>> {
        if let Some(data) = read_lock(&self.bundles).get(&id) {
            return Some(Arc::clone(data));
        }
        lock(&self.zombies).get(&id).cloned()
    }

    pub(crate) fn fire_bundle(&self, kind: BundleEventKind, data: &Arc<BundleData>) {
        debug!(bundle_id = data.id, event = %kind, "Bundle event");
        self.events.fire_bundle(&BundleEvent {
            kind,
            bundle: self.handle(data),
        });
    }

    pub(crate) fn fire_framework(&self, kind: FrameworkEventKind, data: &Arc<BundleData>, message: Option<String>) {
        self.events.fire_framework(&FrameworkEvent {
            kind,
            bundle: self.handle(data),
            message,
        });
    }

    /// Another installed bundle with the same symbolic name and version
    pub(crate) fn check_duplicate(&self, description: &BundleDescription, except: Option<BundleId>) -> Result<()> {
        let name = match &description.symbolic_name {
            Some(n) => n,
            None => return Ok(()),
        };
        for data in read_lock(&self.bundles).values() {
            if Some(data.id) == except {
                continue;
            }
            let current = data.current_revision();
            if current.symbolic_name() == Some(name.as_str()) && current.version() == &description.version {
                return Err(FrameworkError::bundle(
                    BundleErrorKind::DuplicateBundle,
                    format!(
                        "Bundle {};{} is already installed as bundle {}",
                        name, description.version, data.id
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Install from content; an already installed location returns the
    /// existing bundle
    pub(crate) fn install<R: Read>(&self, location: &str, content: R) -> Result<Bundle> {
        self.ensure_initialized()?;
        let _installing = lock(&self.install_lock);
        if let Some(existing) = self.bundle_by_location(location) {
            debug!(location, bundle_id = existing.id(), "Location already installed");
            return Ok(existing);
        }

        let staged = self.storage.stage(content).map_err(FrameworkError::into_invalid_bundle)?;
        let description = BundleDescription::parse(staged.headers()).map_err(FrameworkError::into_invalid_bundle)?;
        self.check_duplicate(&description, None)?;

        let id = self.storage.next_bundle_id()?;
        self.storage.set_next_bundle_id(id + 1)?;
        let archive = self.storage.insert(
            id,
            location,
            staged,
            description.symbolic_name.clone(),
            description.version.to_string(),
        )?;
        let revision = archive
            .current_content()
            .and_then(|content| BundleRevision::from_content(id, content))
            .map_err(FrameworkError::into_invalid_bundle);
        let revision = match revision {
            Ok(r) => Arc::new(r),
            Err(e) => {
                self.discard_archive(&archive);
                return Err(e);
            }
        };

        let last_modified = archive.meta().last_modified;
        let data = BundleData::new(id, location, Some(archive), Arc::clone(&revision), last_modified);
        lock(&self.resolver).add_revision(revision);
        write_lock(&self.bundles).insert(id, Arc::clone(&data));

        info!(bundle_id = id, location, "Bundle installed");
        self.fire_bundle(BundleEventKind::Installed, &data);
        Ok(self.handle(&data))
    }

    /// Delete a persisted archive. Failures leave the directory behind and
    /// are only logged.
    pub(crate) fn discard_archive(&self, archive: &BundleArchive) -> bool {
        match self.storage.remove(archive) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    bundle_id = archive.id(),
                    dir = %archive.dir().display(),
                    error = %e,
                    "Failed to remove bundle archive"
                );
                false
            }
        }
    }

    pub(crate) fn install_from_location(&self, location: &str) -> Result<Bundle> {
        if let Some(existing) = self.bundle_by_location(location) {
            return Ok(existing);
        }
        let path = location_path(location);
        let file = File::open(&path).map_err(|e| {
            FrameworkError::bundle_with_source(BundleErrorKind::ReadError, format!("Cannot read {}", path.display()), e)
        })?;
        self.install(location, file)
    }

    /// Bundles may only be installed once the framework is initialized
    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        match self.system.state() {
            BundleState::Starting | BundleState::Active => Ok(()),
            other => Err(FrameworkError::illegal_state(format!(
                "Framework is not initialized (state {})",
                other
            ))),
        }
    }

    /// Resolve the current revisions of `targets` (every INSTALLED bundle
    /// when `None`) and move newly resolved bundles to RESOLVED
    pub(crate) fn resolve(&self, targets: Option<&[Arc<BundleData>]>) -> ResolveReport {
        let candidates: Vec<Arc<BundleData>> = match targets {
            Some(list) => list.to_vec(),
            None => read_lock(&self.bundles).values().cloned().collect(),
        };
        let ids: Vec<RevisionId> = candidates
            .iter()
            .filter(|d| d.state() == BundleState::Installed)
            .map(|d| d.current_revision().id())
            .collect();
        if ids.is_empty() {
            return ResolveReport::default();
        }

        let report = lock(&self.resolver).resolve(&ids);
        for revision in &report.resolved {
            let data = match self.bundle_data(revision.bundle) {
                Some(d) => d,
                None => continue,
            };
            let changed = {
                let mut inner = data.inner();
                if inner.current.id() == *revision && inner.state == BundleState::Installed {
                    inner.state = BundleState::Resolved;
                    true
                } else {
                    false
                }
            };
            if changed {
                self.fire_bundle(BundleEventKind::Resolved, &data);
            }
        }
        report
    }
}

fn system_revision(config: &FrameworkConfig) -> Result<BundleRevision> {
    let mut headers = Headers::new();
    headers.insert("Bundle-ManifestVersion", "2");
    headers.insert("Bundle-SymbolicName", SYSTEM_BUNDLE_SYMBOLIC_NAME);
    headers.insert("Bundle-Name", "System Bundle");
    headers.insert("Bundle-Version", crate::config::FRAMEWORK_VERSION);
    headers.insert("Bundle-Vendor", FRAMEWORK_VENDOR);
    if !config.system_packages.trim().is_empty() {
        headers.insert("Export-Package", &config.system_packages);
    }
    let description = BundleDescription::parse(&headers)?;
    Ok(BundleRevision::synthetic(
        RevisionId::new(SYSTEM_BUNDLE_ID, 0),
        headers,
        description,
    ))
}
