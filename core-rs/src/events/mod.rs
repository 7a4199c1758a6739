//! Bundle, service and framework events
//!
//! Events are delivered synchronously on the thread that caused them.

mod dispatcher;

pub use dispatcher::{EventDispatcher, ListenerId};

use crate::framework::Bundle;
use crate::registry::ServiceReference;
use std::any::Any;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleEventKind {
    Installed,
    Resolved,
    Starting,
    Started,
    Stopping,
    Stopped,
    Updated,
    Unresolved,
    Uninstalled,
}

impl fmt::Display for BundleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleEventKind::Installed => "INSTALLED",
            BundleEventKind::Resolved => "RESOLVED",
            BundleEventKind::Starting => "STARTING",
            BundleEventKind::Started => "STARTED",
            BundleEventKind::Stopping => "STOPPING",
            BundleEventKind::Stopped => "STOPPED",
            BundleEventKind::Updated => "UPDATED",
            BundleEventKind::Unresolved => "UNRESOLVED",
            BundleEventKind::Uninstalled => "UNINSTALLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct BundleEvent {
    pub kind: BundleEventKind,
    pub bundle: Bundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    /// Properties changed and no longer match the listener's filter
    ModifiedEndmatch,
    Unregistering,
}

impl fmt::Display for ServiceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceEventKind::Registered => "REGISTERED",
            ServiceEventKind::Modified => "MODIFIED",
            ServiceEventKind::ModifiedEndmatch => "MODIFIED_ENDMATCH",
            ServiceEventKind::Unregistering => "UNREGISTERING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkEventKind {
    Started,
    Stopped,
    Error,
    Warning,
    Info,
    PackagesRefreshed,
}

impl fmt::Display for FrameworkEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameworkEventKind::Started => "STARTED",
            FrameworkEventKind::Stopped => "STOPPED",
            FrameworkEventKind::Error => "ERROR",
            FrameworkEventKind::Warning => "WARNING",
            FrameworkEventKind::Info => "INFO",
            FrameworkEventKind::PackagesRefreshed => "PACKAGES_REFRESHED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    pub kind: FrameworkEventKind,
    /// Bundle the event concerns; the system bundle for framework-wide events
    pub bundle: Bundle,
    pub message: Option<String>,
}

pub trait BundleListener: Send + Sync {
    fn bundle_changed(&self, event: &BundleEvent);
}

impl<F> BundleListener for F
where
    F: Fn(&BundleEvent) + Send + Sync,
{
    fn bundle_changed(&self, event: &BundleEvent) {
        self(event)
    }
}

pub trait ServiceListener: Send + Sync {
    fn service_changed(&self, event: &ServiceEvent);
}

impl<F> ServiceListener for F
where
    F: Fn(&ServiceEvent) + Send + Sync,
{
    fn service_changed(&self, event: &ServiceEvent) {
        self(event)
    }
}

pub trait FrameworkListener: Send + Sync {
    fn framework_event(&self, event: &FrameworkEvent);
}

impl<F> FrameworkListener for F
where
    F: Fn(&FrameworkEvent) + Send + Sync,
{
    fn framework_event(&self, event: &FrameworkEvent) {
        self(event)
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
