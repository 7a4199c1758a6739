//! Bundles and their state

use super::activator::BundleActivator;
use super::context::FrameworkContext;
use super::{lock, BundleContext};
use crate::errors::{BundleErrorKind, FrameworkError, Result};
use crate::manifest::Headers;
use crate::registry::ServiceReference;
use crate::resolver::BundleWiring;
use crate::revision::{BundleId, BundleRevision, RevisionId};
use crate::storage::BundleArchive;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

/// Lifecycle state
///
/// ```text
/// INSTALLED -> RESOLVED -> STARTING -> ACTIVE -> STOPPING -> RESOLVED
///     any state -> UNINSTALLED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BundleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

impl BundleState {
    /// Whether a transition from `self` to `next` is an edge of the state graph
    pub fn can_transition_to(&self, next: BundleState) -> bool {
        use BundleState::*;
        matches!(
            (self, next),
            (Installed, Resolved)
                | (Resolved, Installed)
                | (Resolved, Starting)
                | (Starting, Active)
                // activator start failure
                | (Starting, Stopping)
                | (Active, Stopping)
                | (Stopping, Resolved)
                | (_, Uninstalled)
        ) && *self != Uninstalled
    }

    /// ACTIVE or on its way there
    pub fn is_active(&self) -> bool {
        matches!(self, BundleState::Starting | BundleState::Active)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            BundleState::Resolved | BundleState::Starting | BundleState::Active | BundleState::Stopping
        )
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleState::Installed => "INSTALLED",
            BundleState::Resolved => "RESOLVED",
            BundleState::Starting => "STARTING",
            BundleState::Active => "ACTIVE",
            BundleState::Stopping => "STOPPING",
            BundleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Leave the persistent start flag alone
    pub transient: bool,
}

impl StartOptions {
    pub fn transient() -> Self {
        StartOptions { transient: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Leave the persistent start flag alone
    pub transient: bool,
}

impl StopOptions {
    pub fn transient() -> Self {
        StopOptions { transient: true }
    }
}

pub(crate) struct BundleInner {
    pub(crate) state: BundleState,
    busy: Option<ThreadId>,
    pub(crate) current: Arc<BundleRevision>,
    /// Older revisions still wired to other bundles
    pub(crate) stale: Vec<Arc<BundleRevision>>,
    pub(crate) activator: Option<Box<dyn BundleActivator>>,
    pub(crate) context: Option<BundleContext>,
    pub(crate) last_modified: DateTime<Utc>,
}

impl BundleInner {
    pub(crate) fn revision_ids(&self) -> Vec<RevisionId> {
        let mut ids: Vec<RevisionId> = self.stale.iter().map(|r| r.id()).collect();
        ids.push(self.current.id());
        ids
    }
}

/// Shared per-bundle record
pub(crate) struct BundleData {
    pub(crate) id: BundleId,
    pub(crate) location: String,
    pub(crate) archive: Option<BundleArchive>,
    inner: Mutex<BundleInner>,
    idle: Condvar,
}

impl BundleData {
    pub(crate) fn new(
        id: BundleId,
        location: &str,
        archive: Option<BundleArchive>,
        revision: Arc<BundleRevision>,
        last_modified: DateTime<Utc>,
    ) -> Arc<Self> {
        Arc::new(BundleData {
            id,
            location: location.to_string(),
            archive,
            inner: Mutex::new(BundleInner {
                state: BundleState::Installed,
                busy: None,
                current: revision,
                stale: Vec::new(),
                activator: None,
                context: None,
                last_modified,
            }),
            idle: Condvar::new(),
        })
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, BundleInner> {
        lock(&self.inner)
    }

    pub(crate) fn state(&self) -> BundleState {
        self.inner().state
    }

    pub(crate) fn current_revision(&self) -> Arc<BundleRevision> {
        Arc::clone(&self.inner().current)
    }

    /// Claim the right to change this bundle's state
    ///
    /// Waits while another thread is transitioning the bundle. The thread
    /// already holding the claim gets a STATECHANGE error instead of
    /// deadlocking on itself.
    pub(crate) fn begin_transition(self: &Arc<Self>) -> Result<TransitionGuard> {
        let me = thread::current().id();
        let mut inner = self.inner();
        loop {
            match inner.busy {
                None => break,
                Some(owner) if owner == me => {
                    return Err(FrameworkError::bundle(
                        BundleErrorKind::StateChange,
                        format!("Bundle {} is already changing state on this thread", self.id),
                    ));
                }
                Some(_) => {
                    inner = self.idle.wait(inner).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        inner.busy = Some(me);
        Ok(TransitionGuard {
            data: Arc::clone(self),
        })
    }
}

pub(crate) struct TransitionGuard {
    data: Arc<BundleData>,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        self.data.inner().busy = None;
        self.data.idle.notify_all();
    }
}

/// Handle to an installed bundle
#[derive(Clone)]
pub struct Bundle {
    pub(crate) ctx: Weak<FrameworkContext>,
    pub(crate) data: Arc<BundleData>,
}

impl Bundle {
    pub(crate) fn framework(&self) -> Result<Arc<FrameworkContext>> {
        self.ctx
            .upgrade()
            .ok_or_else(|| FrameworkError::illegal_state("Framework has been shut down"))
    }

    pub fn id(&self) -> BundleId {
        self.data.id
    }

    pub fn location(&self) -> &str {
        &self.data.location
    }

    pub fn state(&self) -> BundleState {
        self.data.state()
    }

    pub fn symbolic_name(&self) -> Option<String> {
        self.data.current_revision().symbolic_name().map(str::to_string)
    }

    pub fn version(&self) -> Version {
        self.data.current_revision().version().clone()
    }

    /// Manifest headers of the current revision
    pub fn headers(&self) -> Headers {
        self.data.current_revision().headers().clone()
    }

    pub fn is_fragment(&self) -> bool {
        self.data.current_revision().is_fragment()
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.data.inner().last_modified
    }

    /// Whether the bundle is restarted when the framework starts
    pub fn is_persistently_started(&self) -> bool {
        self.data
            .archive
            .as_ref()
            .map(|a| a.meta().persistent_start)
            .unwrap_or(false)
    }

    pub fn current_revision(&self) -> Arc<BundleRevision> {
        self.data.current_revision()
    }

    /// Current revision plus stale ones still wired elsewhere
    pub fn revisions(&self) -> Vec<RevisionId> {
        self.data.inner().revision_ids()
    }

    /// Wiring of the current revision, if resolved
    pub fn wiring(&self) -> Option<BundleWiring> {
        let ctx = self.ctx.upgrade()?;
        let revision = self.data.current_revision().id();
        let resolver = lock(&ctx.resolver);
        resolver.wiring(revision).cloned()
    }

    /// Context while the bundle is STARTING, ACTIVE or STOPPING
    pub fn context(&self) -> Option<BundleContext> {
        self.data.inner().context.clone()
    }

    pub fn entry(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.data.current_revision().entry(path)
    }

    pub fn entry_paths(&self, prefix: &str) -> Result<Vec<String>> {
        self.data.current_revision().entry_paths(prefix)
    }

    pub fn registered_services(&self) -> Vec<ServiceReference> {
        match self.ctx.upgrade() {
            Some(ctx) => ctx.registry.registered_by(self.data.id),
            None => Vec::new(),
        }
    }

    pub fn services_in_use(&self) -> Vec<ServiceReference> {
        match self.ctx.upgrade() {
            Some(ctx) => ctx.registry.in_use_by(self.data.id),
            None => Vec::new(),
        }
    }

    pub fn start(&self) -> Result<()> {
        self.start_with(StartOptions::default())
    }

    pub fn start_with(&self, options: StartOptions) -> Result<()> {
        self.framework()?.start_bundle(&self.data, options)
    }

    pub fn stop(&self) -> Result<()> {
        self.stop_with(StopOptions::default())
    }

    pub fn stop_with(&self, options: StopOptions) -> Result<()> {
        self.framework()?.stop_bundle(&self.data, options)
    }

    /// Update from the bundle's own location
    pub fn update(&self) -> Result<()> {
        self.update_from_location(&self.data.location)
    }

    /// Update from the archive at `location` (`file:` prefix optional)
    pub fn update_from_location(&self, location: &str) -> Result<()> {
        let path = super::location_path(location);
        let file = std::fs::File::open(&path).map_err(|e| {
            FrameworkError::bundle_with_source(
                BundleErrorKind::ReadError,
                format!("Cannot read {}", path.display()),
                e,
            )
        })?;
        self.update_from(file)
    }

    pub fn update_from<R: Read>(&self, content: R) -> Result<()> {
        self.framework()?.update_bundle(&self.data, content)
    }

    pub fn uninstall(&self) -> Result<()> {
        self.framework()?.uninstall_bundle(&self.data)
    }
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Eq for Bundle {}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.data.id)
            .field("location", &self.data.location)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revision = self.data.current_revision();
        write!(
            f,
            "{}_{} [{}]",
            revision.symbolic_name().unwrap_or("<unnamed>"),
            revision.version(),
            self.data.id
        )
    }
}
