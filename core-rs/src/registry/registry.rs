/**
 * registry.rs
 * Framework-wide service registry
 *
 * Lookup map:
 * - service id -> registration, for every registration visible to queries
 * - a registration leaves the map before UNREGISTERING is delivered
 *
 * No lock is held while calling factories or listeners.
 */

use super::service::{
    has_standard_key, object_class_value, ranking_of, RegistrationData, RegistrationState, ServiceObject,
    ServiceProvider, ServiceReference, ServiceRegistration, Usage,
};
use super::{OBJECTCLASS, SERVICE_BUNDLEID, SERVICE_ID, SERVICE_SCOPE};
use crate::errors::{FrameworkError, Result};
use crate::events::{
    panic_message, EventDispatcher, FrameworkEvent, FrameworkEventKind, ServiceEvent, ServiceEventKind,
};
use crate::filter::{Filter, Properties, PropertyValue};
use crate::framework::Bundle;
use crate::revision::BundleId;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, error, warn};

pub struct ServiceRegistry {
    next_id: AtomicU64,
    services: RwLock<BTreeMap<u64, Arc<RegistrationData>>>,
    events: Arc<EventDispatcher>,
    this: Weak<ServiceRegistry>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .field("services", &self.snapshot().len())
            .finish()
    }
}

impl ServiceRegistry {
    pub(crate) fn new(events: Arc<EventDispatcher>) -> Arc<Self> {
        Arc::new_cyclic(|this| ServiceRegistry {
            next_id: AtomicU64::new(1),
            services: RwLock::new(BTreeMap::new()),
            events,
            this: this.clone(),
        })
    }

    fn snapshot(&self) -> Vec<Arc<RegistrationData>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn registration(&self, data: &Arc<RegistrationData>) -> ServiceRegistration {
        ServiceRegistration {
            data: Arc::clone(data),
            registry: self.this.clone(),
        }
    }

    /// Publish a service under `classes` and fire REGISTERED
    pub(crate) fn register(
        &self,
        bundle: &Bundle,
        classes: &[&str],
        provider: ServiceProvider,
        properties: Properties,
    ) -> Result<ServiceRegistration> {
        if classes.is_empty() {
            return Err(FrameworkError::InvalidArgument(
                "A service must be registered under at least one class name".to_string(),
            ));
        }
        if let Some(bad) = classes.iter().find(|c| c.trim().is_empty()) {
            return Err(FrameworkError::InvalidArgument(format!("Invalid class name '{}'", bad)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();

        let mut props = Properties::new();
        for (key, value) in properties.iter() {
            if !has_standard_key(key) {
                props.insert(key, value.clone());
            }
        }
        props.insert(OBJECTCLASS, object_class_value(&classes));
        props.insert(SERVICE_ID, PropertyValue::Long(id as i64));
        props.insert(SERVICE_BUNDLEID, PropertyValue::Long(bundle.id() as i64));
        props.insert(SERVICE_SCOPE, provider.scope());
        let ranking = ranking_of(&props);

        let data = Arc::new(RegistrationData {
            id,
            bundle: bundle.clone(),
            classes,
            provider,
            state: Mutex::new(RegistrationState {
                properties: props,
                ranking,
                unregistering: false,
                unregistered: false,
                usage: BTreeMap::new(),
            }),
            factory_lock: Mutex::new(()),
        });

        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&data));
        debug!(service_id = id, bundle_id = bundle.id(), classes = ?data.classes, "Service registered");

        self.events.fire_service(&ServiceEvent {
            kind: ServiceEventKind::Registered,
            reference: ServiceReference {
                data: Arc::clone(&data),
            },
        });
        Ok(self.registration(&data))
    }

    /// References matching `class` and `filter`, best ranked first
    pub(crate) fn references(&self, class: Option<&str>, filter: Option<&Filter>) -> Vec<ServiceReference> {
        let mut refs: Vec<ServiceReference> = self
            .snapshot()
            .into_iter()
            .filter(|data| class.map(|c| data.classes.iter().any(|x| x == c)).unwrap_or(true))
            .filter(|data| match filter {
                Some(f) => f.matches(&data.state().properties),
                None => true,
            })
            .map(|data| ServiceReference { data })
            .collect();
        refs.sort_by(|a, b| a.compare_rank(b));
        refs
    }

    pub(crate) fn registered_by(&self, bundle_id: BundleId) -> Vec<ServiceReference> {
        self.snapshot()
            .into_iter()
            .filter(|data| data.bundle.id() == bundle_id)
            .map(|data| ServiceReference { data })
            .collect()
    }

    pub(crate) fn in_use_by(&self, bundle_id: BundleId) -> Vec<ServiceReference> {
        self.snapshot()
            .into_iter()
            .filter(|data| data.state().usage.get(&bundle_id).map(|u| u.count > 0).unwrap_or(false))
            .map(|data| ServiceReference { data })
            .collect()
    }

    /// Get the service object for `consumer`, counting the use
    ///
    /// Returns `None` once the registration is unregistered or when a
    /// factory produces nothing.
    pub(crate) fn get_service(&self, consumer: &Bundle, reference: &ServiceReference) -> Option<ServiceObject> {
        let data = &reference.data;
        let factory = match &data.provider {
            ServiceProvider::Singleton(object) => {
                let mut state = data.state();
                if state.unregistered {
                    return None;
                }
                let usage = state.usage.entry(consumer.id()).or_insert_with(|| Usage {
                    consumer: consumer.clone(),
                    count: 0,
                    object: Some(Arc::clone(object)),
                });
                usage.count += 1;
                return Some(Arc::clone(object));
            }
            ServiceProvider::PerConsumerFactory(factory) => Arc::clone(factory),
        };

        if let Some(object) = cached_use(data, consumer.id()) {
            return object;
        }

        let _creating = data.factory_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(object) = cached_use(data, consumer.id()) {
            return object;
        }

        let registration = self.registration(data);
        let produced = panic::catch_unwind(AssertUnwindSafe(|| factory.get_service(consumer, &registration)));
        let object = match produced {
            Ok(Some(object)) => object,
            Ok(None) => {
                warn!(service_id = data.id, bundle_id = consumer.id(), "Service factory returned no object");
                self.factory_error(data, "ServiceFactory.getService() returned no object");
                return None;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(service_id = data.id, bundle_id = consumer.id(), "Service factory panicked: {}", message);
                self.factory_error(data, &format!("ServiceFactory.getService() failed: {}", message));
                return None;
            }
        };

        let mut state = data.state();
        if state.unregistered {
            drop(state);
            ungetting(&factory, consumer, &registration, object);
            return None;
        }
        state.usage.insert(
            consumer.id(),
            Usage {
                consumer: consumer.clone(),
                count: 1,
                object: Some(Arc::clone(&object)),
            },
        );
        Some(object)
    }

    /// Release one use; false if `consumer` was not using the service
    pub(crate) fn unget_service(&self, consumer: &Bundle, reference: &ServiceReference) -> bool {
        let data = &reference.data;
        let released = {
            let mut state = data.state();
            let usage = match state.usage.get_mut(&consumer.id()) {
                Some(u) if u.count > 0 => u,
                _ => return false,
            };
            usage.count -= 1;
            if usage.count > 0 {
                return true;
            }
            state.usage.remove(&consumer.id())
        };

        if let (ServiceProvider::PerConsumerFactory(factory), Some(Usage { object: Some(object), .. })) =
            (&data.provider, released)
        {
            ungetting(factory, consumer, &self.registration(data), object);
        }
        true
    }

    /// Unregister: hide from queries, fire UNREGISTERING, then release
    /// every holder
    pub(crate) fn unregister(&self, data: &Arc<RegistrationData>) -> Result<()> {
        {
            let mut state = data.state();
            if state.unregistering || state.unregistered {
                return Err(FrameworkError::illegal_state(format!(
                    "Service {} is already unregistered",
                    data.id
                )));
            }
            state.unregistering = true;
        }

        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&data.id);

        self.events.fire_service(&ServiceEvent {
            kind: ServiceEventKind::Unregistering,
            reference: ServiceReference {
                data: Arc::clone(data),
            },
        });

        let usages = {
            let mut state = data.state();
            state.unregistered = true;
            std::mem::take(&mut state.usage)
        };

        if let ServiceProvider::PerConsumerFactory(factory) = &data.provider {
            let registration = self.registration(data);
            for usage in usages.into_values() {
                if let Some(object) = usage.object {
                    ungetting(factory, &usage.consumer, &registration, object);
                }
            }
        }
        debug!(service_id = data.id, bundle_id = data.bundle.id(), "Service unregistered");
        Ok(())
    }

    pub(crate) fn set_properties(&self, data: &Arc<RegistrationData>, properties: Properties) -> Result<()> {
        let previous = {
            let mut state = data.state();
            if state.unregistering || state.unregistered {
                return Err(FrameworkError::illegal_state(format!(
                    "Service {} is already unregistered",
                    data.id
                )));
            }
            let previous = state.properties.clone();
            let mut props = Properties::new();
            for (key, value) in properties.iter() {
                if !has_standard_key(key) {
                    props.insert(key, value.clone());
                }
            }
            for (key, value) in previous.iter() {
                if has_standard_key(key) {
                    props.insert(key, value.clone());
                }
            }
            state.ranking = ranking_of(&props);
            state.properties = props;
            previous
        };

        self.events.fire_service_modified(
            &ServiceEvent {
                kind: ServiceEventKind::Modified,
                reference: ServiceReference {
                    data: Arc::clone(data),
                },
            },
            &previous,
        );
        Ok(())
    }

    /// Unregister everything `bundle_id` registered
    pub(crate) fn unregister_all(&self, bundle_id: BundleId) {
        for data in self.snapshot().into_iter().filter(|d| d.bundle.id() == bundle_id) {
            if let Err(e) = self.unregister(&data) {
                debug!(service_id = data.id, "{}", e);
            }
        }
    }

    /// Drop every use `consumer` still holds
    pub(crate) fn release_all(&self, consumer: &Bundle) {
        for data in self.snapshot() {
            let released = data.state().usage.remove(&consumer.id());
            if let (ServiceProvider::PerConsumerFactory(factory), Some(Usage { object: Some(object), .. })) =
                (&data.provider, released)
            {
                ungetting(factory, consumer, &self.registration(&data), object);
            }
        }
    }

    fn factory_error(&self, data: &RegistrationData, message: &str) {
        self.events.fire_framework(&FrameworkEvent {
            kind: FrameworkEventKind::Error,
            bundle: data.bundle.clone(),
            message: Some(message.to_string()),
        });
    }
}

/// `Some(result)` when the consumer already holds an object (or the
/// registration is gone), counting the use
fn cached_use(data: &RegistrationData, consumer: BundleId) -> Option<Option<ServiceObject>> {
    let mut state = data.state();
    if state.unregistered {
        return Some(None);
    }
    match state.usage.get_mut(&consumer) {
        Some(usage) if usage.object.is_some() => {
            usage.count += 1;
            Some(usage.object.clone())
        }
        _ => None,
    }
}

fn ungetting(
    factory: &Arc<dyn super::ServiceFactory>,
    consumer: &Bundle,
    registration: &ServiceRegistration,
    object: ServiceObject,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| factory.unget_service(consumer, registration, object)));
    if let Err(payload) = result {
        error!(
            service_id = registration.id(),
            bundle_id = consumer.id(),
            "Service factory panicked in unget: {}",
            panic_message(payload.as_ref())
        );
    }
}
