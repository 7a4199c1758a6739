//! Execution context handed to a bundle while it is started

use super::bundle::Bundle;
use super::context::FrameworkContext;
use crate::errors::{FrameworkError, Result};
use crate::events::{BundleListener, FrameworkListener, ListenerId, ServiceListener};
use crate::filter::{Filter, Properties};
use crate::registry::{ServiceObject, ServiceProvider, ServiceReference, ServiceRegistration};
use std::any::Any;
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A bundle's view of the framework
///
/// Valid from the moment the bundle starts until it has stopped; every
/// call on an invalid context fails with an illegal state error.
#[derive(Clone)]
pub struct BundleContext {
    bundle: Bundle,
    valid: Arc<AtomicBool>,
}

impl BundleContext {
    pub(crate) fn new(bundle: Bundle) -> Self {
        BundleContext {
            bundle,
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<Arc<FrameworkContext>> {
        if !self.is_valid() {
            return Err(FrameworkError::illegal_state(format!(
                "BundleContext of bundle {} is no longer valid",
                self.bundle.id()
            )));
        }
        self.bundle.framework()
    }

    /// Owning bundle
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Framework property, falling back to the process environment
    pub fn property(&self, key: &str) -> Result<Option<String>> {
        let ctx = self.check()?;
        Ok(ctx.properties.get(key).cloned().or_else(|| std::env::var(key).ok()))
    }

    pub fn install_bundle<R: Read>(&self, location: &str, content: R) -> Result<Bundle> {
        self.check()?.install(location, content)
    }

    pub fn install_bundle_from_location(&self, location: &str) -> Result<Bundle> {
        self.check()?.install_from_location(location)
    }

    pub fn bundles(&self) -> Result<Vec<Bundle>> {
        Ok(self.check()?.bundles())
    }

    pub fn get_bundle(&self, id: u64) -> Result<Option<Bundle>> {
        Ok(self.check()?.bundle(id))
    }

    pub fn register_service(
        &self,
        classes: &[&str],
        provider: impl Into<ServiceProvider>,
        properties: Properties,
    ) -> Result<ServiceRegistration> {
        let ctx = self.check()?;
        ctx.registry.register(&self.bundle, classes, provider.into(), properties)
    }

    /// References ordered by ranking (highest first), then service id
    pub fn service_references(&self, class: Option<&str>, filter: Option<&str>) -> Result<Vec<ServiceReference>> {
        let ctx = self.check()?;
        let filter = filter.map(Filter::parse).transpose()?;
        Ok(ctx.registry.references(class, filter.as_ref()))
    }

    /// Best ranked reference for `class`
    pub fn service_reference(&self, class: &str) -> Result<Option<ServiceReference>> {
        Ok(self.service_references(Some(class), None)?.into_iter().next())
    }

    pub fn get_service(&self, reference: &ServiceReference) -> Result<Option<ServiceObject>> {
        let ctx = self.check()?;
        Ok(ctx.registry.get_service(&self.bundle, reference))
    }

    /// `get_service` downcast to a concrete type
    ///
    /// A wrong type still counts as a use; release it with `unget_service`.
    pub fn get_service_as<T: Any + Send + Sync>(&self, reference: &ServiceReference) -> Result<Option<Arc<T>>> {
        Ok(self.get_service(reference)?.and_then(|object| object.downcast::<T>().ok()))
    }

    pub fn unget_service(&self, reference: &ServiceReference) -> Result<bool> {
        let ctx = self.check()?;
        Ok(ctx.registry.unget_service(&self.bundle, reference))
    }

    pub fn add_bundle_listener<L: BundleListener + 'static>(&self, listener: L) -> Result<ListenerId> {
        let ctx = self.check()?;
        Ok(ctx.events.add_bundle_listener(self.bundle.id(), Arc::new(listener)))
    }

    /// Service listener, optionally restricted by an LDAP filter over the
    /// service properties
    pub fn add_service_listener<L: ServiceListener + 'static>(
        &self,
        listener: L,
        filter: Option<&str>,
    ) -> Result<ListenerId> {
        let ctx = self.check()?;
        let filter = filter.map(Filter::parse).transpose()?;
        Ok(ctx.events.add_service_listener(self.bundle.id(), Arc::new(listener), filter))
    }

    pub fn add_framework_listener<L: FrameworkListener + 'static>(&self, listener: L) -> Result<ListenerId> {
        let ctx = self.check()?;
        Ok(ctx.events.add_framework_listener(self.bundle.id(), Arc::new(listener)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        let ctx = self.check()?;
        Ok(ctx.events.remove_owned_listener(self.bundle.id(), id))
    }
}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle_id", &self.bundle.id())
            .field("valid", &self.is_valid())
            .finish()
    }
}
