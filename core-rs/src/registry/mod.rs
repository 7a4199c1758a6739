//! Service registry
//!
//! Bundles publish objects under one or more class names with a property
//! dictionary; other bundles look them up by class name and LDAP filter.

pub mod registry;
pub mod service;

pub use registry::ServiceRegistry;
pub use service::{ServiceFactory, ServiceObject, ServiceProvider, ServiceReference, ServiceRegistration};

pub const OBJECTCLASS: &str = "objectClass";
pub const SERVICE_ID: &str = "service.id";
pub const SERVICE_BUNDLEID: &str = "service.bundleid";
pub const SERVICE_SCOPE: &str = "service.scope";
pub const SERVICE_RANKING: &str = "service.ranking";

/// Keys the registry owns; callers cannot set or change them
pub(crate) const STANDARD_KEYS: &[&str] = &[OBJECTCLASS, SERVICE_ID, SERVICE_BUNDLEID, SERVICE_SCOPE];
