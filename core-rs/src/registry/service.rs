//! Service registrations, references and providers

use super::registry::ServiceRegistry;
use super::{SERVICE_RANKING, STANDARD_KEYS};
use crate::errors::{FrameworkError, Result};
use crate::filter::{Properties, PropertyValue};
use crate::framework::Bundle;
use crate::revision::BundleId;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// A published service object
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Produces one service object per consuming bundle
pub trait ServiceFactory: Send + Sync {
    /// Object for `bundle`; `None` makes `get_service` return `None`
    fn get_service(&self, bundle: &Bundle, registration: &ServiceRegistration) -> Option<ServiceObject>;

    /// Called when `bundle` releases its last use of `service`
    fn unget_service(&self, _bundle: &Bundle, _registration: &ServiceRegistration, _service: ServiceObject) {}
}

/// What a registration hands out to consumers
#[derive(Clone)]
pub enum ServiceProvider {
    /// Same object for every consumer
    Singleton(ServiceObject),
    /// Object created per consuming bundle and cached while in use
    PerConsumerFactory(Arc<dyn ServiceFactory>),
}

impl ServiceProvider {
    pub fn singleton<T: Any + Send + Sync>(service: T) -> Self {
        ServiceProvider::Singleton(Arc::new(service))
    }

    pub fn factory<F: ServiceFactory + 'static>(factory: F) -> Self {
        ServiceProvider::PerConsumerFactory(Arc::new(factory))
    }

    /// Value of the `service.scope` property
    pub fn scope(&self) -> &'static str {
        match self {
            ServiceProvider::Singleton(_) => "singleton",
            ServiceProvider::PerConsumerFactory(_) => "bundle",
        }
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceProvider({})", self.scope())
    }
}

impl<T: Any + Send + Sync> From<Arc<T>> for ServiceProvider {
    fn from(service: Arc<T>) -> Self {
        ServiceProvider::Singleton(service)
    }
}

pub(crate) struct Usage {
    pub(crate) consumer: Bundle,
    pub(crate) count: u32,
    pub(crate) object: Option<ServiceObject>,
}

pub(crate) struct RegistrationState {
    pub(crate) properties: Properties,
    pub(crate) ranking: i64,
    pub(crate) unregistering: bool,
    pub(crate) unregistered: bool,
    pub(crate) usage: BTreeMap<BundleId, Usage>,
}

pub(crate) struct RegistrationData {
    pub(crate) id: u64,
    pub(crate) bundle: Bundle,
    pub(crate) classes: Vec<String>,
    pub(crate) provider: ServiceProvider,
    pub(crate) state: Mutex<RegistrationState>,
    /// Held while a factory creates an object, so each consumer gets one
    pub(crate) factory_lock: Mutex<()>,
}

impl RegistrationData {
    pub(crate) fn state(&self) -> MutexGuard<'_, RegistrationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `service.ranking` when it is a Long, else 0
pub(crate) fn ranking_of(props: &Properties) -> i64 {
    props.get(SERVICE_RANKING).and_then(PropertyValue::as_long).unwrap_or(0)
}

/// Handle to a registered service, for consumers
#[derive(Clone)]
pub struct ServiceReference {
    pub(crate) data: Arc<RegistrationData>,
}

impl ServiceReference {
    pub fn id(&self) -> u64 {
        self.data.id
    }

    pub fn object_classes(&self) -> &[String] {
        &self.data.classes
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.data.state().properties.get(key).cloned()
    }

    pub fn property_keys(&self) -> Vec<String> {
        self.data.state().properties.keys().map(str::to_string).collect()
    }

    /// Snapshot of all properties
    pub fn properties(&self) -> Properties {
        self.data.state().properties.clone()
    }

    pub fn ranking(&self) -> i64 {
        self.data.state().ranking
    }

    pub fn bundle_id(&self) -> BundleId {
        self.data.bundle.id()
    }

    /// Registering bundle, or `None` once unregistered
    pub fn bundle(&self) -> Option<Bundle> {
        if self.data.state().unregistered {
            None
        } else {
            Some(self.data.bundle.clone())
        }
    }

    /// Bundles currently holding the service
    pub fn using_bundles(&self) -> Vec<Bundle> {
        self.data
            .state()
            .usage
            .values()
            .filter(|u| u.count > 0)
            .map(|u| u.consumer.clone())
            .collect()
    }

    pub fn is_unregistered(&self) -> bool {
        self.data.state().unregistered
    }

    /// Whether the service is published under `class`
    pub fn is_assignable_to(&self, class: &str) -> bool {
        self.data.classes.iter().any(|c| c == class)
    }

    /// Ordering used for query results: ranking descending, id ascending
    pub fn compare_rank(&self, other: &ServiceReference) -> Ordering {
        other.ranking().cmp(&self.ranking()).then(self.id().cmp(&other.id()))
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.data.id == other.data.id
    }
}

impl Eq for ServiceReference {}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.data.id)
            .field("classes", &self.data.classes)
            .field("bundle_id", &self.data.bundle.id())
            .finish()
    }
}

impl fmt::Display for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.data.id, self.data.classes.join(", "))
    }
}

/// Handle kept by the registering bundle
#[derive(Clone)]
pub struct ServiceRegistration {
    pub(crate) data: Arc<RegistrationData>,
    pub(crate) registry: Weak<ServiceRegistry>,
}

impl ServiceRegistration {
    pub fn id(&self) -> u64 {
        self.data.id
    }

    pub fn reference(&self) -> Result<ServiceReference> {
        if self.data.state().unregistered {
            return Err(FrameworkError::illegal_state(format!(
                "Service {} has been unregistered",
                self.data.id
            )));
        }
        Ok(ServiceReference {
            data: Arc::clone(&self.data),
        })
    }

    /// Replace the properties and fire MODIFIED. Standard keys
    /// (`objectClass`, `service.id`, ...) keep their values.
    pub fn set_properties(&self, properties: Properties) -> Result<()> {
        self.registry()?.set_properties(&self.data, properties)
    }

    pub fn unregister(&self) -> Result<()> {
        self.registry()?.unregister(&self.data)
    }

    fn registry(&self) -> Result<Arc<ServiceRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| FrameworkError::illegal_state("Framework has been shut down"))
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.data.id)
            .field("classes", &self.data.classes)
            .finish()
    }
}

/// `objectClass` list stored on every registration
pub(crate) fn object_class_value(classes: &[String]) -> PropertyValue {
    PropertyValue::List(classes.iter().map(|c| PropertyValue::String(c.clone())).collect())
}

pub(crate) fn has_standard_key(key: &str) -> bool {
    STANDARD_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}
