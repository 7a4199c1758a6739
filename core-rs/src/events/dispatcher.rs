//! Listener bookkeeping and synchronous delivery
//!
//! Every fire takes a snapshot of the listener list first, so listeners
//! added or removed during delivery only affect later events. A panicking
//! listener is logged and skipped.

use super::{
    panic_message, BundleEvent, BundleListener, FrameworkEvent, FrameworkListener, ServiceEvent, ServiceEventKind,
    ServiceListener,
};
use crate::filter::{Filter, Properties};
use crate::revision::BundleId;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

struct Entry<L: ?Sized> {
    id: ListenerId,
    owner: BundleId,
    filter: Option<Filter>,
    listener: Arc<L>,
}

impl<L: ?Sized> Clone for Entry<L> {
    fn clone(&self) -> Self {
        Entry {
            id: self.id,
            owner: self.owner,
            filter: self.filter.clone(),
            listener: Arc::clone(&self.listener),
        }
    }
}

type Entries<L> = RwLock<Vec<Entry<L>>>;

pub struct EventDispatcher {
    next_id: AtomicU64,
    bundle: Entries<dyn BundleListener>,
    service: Entries<dyn ServiceListener>,
    framework: Entries<dyn FrameworkListener>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("bundle_listeners", &snapshot(&self.bundle).len())
            .field("service_listeners", &snapshot(&self.service).len())
            .field("framework_listeners", &snapshot(&self.framework).len())
            .finish()
    }
}

fn snapshot<L: ?Sized>(entries: &Entries<L>) -> Vec<Entry<L>> {
    entries.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn push<L: ?Sized>(entries: &Entries<L>, entry: Entry<L>) {
    entries.write().unwrap_or_else(PoisonError::into_inner).push(entry);
}

fn retain<L: ?Sized, F: Fn(&Entry<L>) -> bool>(entries: &Entries<L>, keep: F) -> usize {
    let mut guard = entries.write().unwrap_or_else(PoisonError::into_inner);
    let before = guard.len();
    guard.retain(|e| keep(e));
    before - guard.len()
}

/// Run one listener callback, containing panics
fn deliver<F: FnOnce()>(kind: &str, id: ListenerId, owner: BundleId, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            listener = %id,
            bundle_id = owner,
            "{} listener panicked: {}",
            kind,
            panic_message(payload.as_ref())
        );
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        EventDispatcher {
            next_id: AtomicU64::new(1),
            bundle: RwLock::new(Vec::new()),
            service: RwLock::new(Vec::new()),
            framework: RwLock::new(Vec::new()),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn add_bundle_listener(&self, owner: BundleId, listener: Arc<dyn BundleListener>) -> ListenerId {
        let id = self.next_id();
        push(
            &self.bundle,
            Entry {
                id,
                owner,
                filter: None,
                listener,
            },
        );
        id
    }

    pub fn add_service_listener(
        &self,
        owner: BundleId,
        listener: Arc<dyn ServiceListener>,
        filter: Option<Filter>,
    ) -> ListenerId {
        let id = self.next_id();
        push(
            &self.service,
            Entry {
                id,
                owner,
                filter,
                listener,
            },
        );
        id
    }

    pub fn add_framework_listener(&self, owner: BundleId, listener: Arc<dyn FrameworkListener>) -> ListenerId {
        let id = self.next_id();
        push(
            &self.framework,
            Entry {
                id,
                owner,
                filter: None,
                listener,
            },
        );
        id
    }

    /// Remove a listener of any kind; false if it was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        retain(&self.bundle, |e| e.id != id)
            + retain(&self.service, |e| e.id != id)
            + retain(&self.framework, |e| e.id != id)
            > 0
    }

    /// Remove a listener only if `owner` added it
    pub fn remove_owned_listener(&self, owner: BundleId, id: ListenerId) -> bool {
        retain(&self.bundle, |e| !(e.id == id && e.owner == owner))
            + retain(&self.service, |e| !(e.id == id && e.owner == owner))
            + retain(&self.framework, |e| !(e.id == id && e.owner == owner))
            > 0
    }

    /// Drop every listener added by `owner`
    pub fn remove_owner(&self, owner: BundleId) -> usize {
        retain(&self.bundle, |e| e.owner != owner)
            + retain(&self.service, |e| e.owner != owner)
            + retain(&self.framework, |e| e.owner != owner)
    }

    pub fn listener_count(&self, owner: BundleId) -> usize {
        snapshot(&self.bundle).iter().filter(|e| e.owner == owner).count()
            + snapshot(&self.service).iter().filter(|e| e.owner == owner).count()
            + snapshot(&self.framework).iter().filter(|e| e.owner == owner).count()
    }

    pub fn fire_bundle(&self, event: &BundleEvent) {
        for entry in snapshot(&self.bundle) {
            deliver("Bundle", entry.id, entry.owner, || entry.listener.bundle_changed(event));
        }
    }

    /// Deliver to service listeners whose filter matches the service
    /// properties
    pub fn fire_service(&self, event: &ServiceEvent) {
        let props = event.reference.properties();
        for entry in snapshot(&self.service) {
            if entry.filter.as_ref().map(|f| f.matches(&props)).unwrap_or(true) {
                deliver("Service", entry.id, entry.owner, || entry.listener.service_changed(event));
            }
        }
    }

    /// MODIFIED to listeners matching the new properties, MODIFIED_ENDMATCH
    /// to those that matched only the previous ones
    pub fn fire_service_modified(&self, event: &ServiceEvent, previous: &Properties) {
        let props = event.reference.properties();
        let endmatch = ServiceEvent {
            kind: ServiceEventKind::ModifiedEndmatch,
            reference: event.reference.clone(),
        };
        for entry in snapshot(&self.service) {
            let target = match &entry.filter {
                None => Some(event),
                Some(f) if f.matches(&props) => Some(event),
                Some(f) if f.matches(previous) => Some(&endmatch),
                Some(_) => None,
            };
            if let Some(ev) = target {
                deliver("Service", entry.id, entry.owner, || entry.listener.service_changed(ev));
            }
        }
    }

    pub fn fire_framework(&self, event: &FrameworkEvent) {
        for entry in snapshot(&self.framework) {
            deliver("Framework", entry.id, entry.owner, || entry.listener.framework_event(event));
        }
    }
}
