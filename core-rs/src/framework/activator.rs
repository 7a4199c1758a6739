//! Bundle activators
//!
//! `Bundle-Activator` names a native activator registered with
//! [`Framework::register_activator`](super::Framework::register_activator).

use super::BundleContext;
use crate::errors::BoxError;
use crate::events::panic_message;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

pub trait BundleActivator: Send {
    fn start(&mut self, context: &BundleContext) -> Result<(), BoxError>;

    fn stop(&mut self, context: &BundleContext) -> Result<(), BoxError>;
}

/// Creates a fresh activator instance for each start
pub type ActivatorFactory = Arc<dyn Fn() -> Box<dyn BundleActivator> + Send + Sync>;

#[derive(Default)]
pub(crate) struct ActivatorTable {
    factories: RwLock<HashMap<String, ActivatorFactory>>,
}

impl ActivatorTable {
    pub(crate) fn register(&self, name: &str, factory: ActivatorFactory) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), factory);
    }

    pub(crate) fn create(&self, name: &str) -> Option<Box<dyn BundleActivator>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        Some(factory())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Activator call with panics turned into errors
pub(crate) fn guarded<F>(f: F) -> Result<(), BoxError>
where
    F: FnOnce() -> Result<(), BoxError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(format!("activator panicked: {}", panic_message(payload.as_ref())).into()),
    }
}
