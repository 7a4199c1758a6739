//! Framework runtime
//!
//! Owns the installed bundles, drives their lifecycle and exposes the
//! [`Framework`] handle an embedding program works with:
//!
//! ```ignore
//! let framework = Framework::new(FrameworkConfig::default_for("/var/lib/kf"))?;
//! framework.init()?;
//! let bundle = framework.install_bundle("file:/opt/bundles/a.tar.gz", content)?;
//! framework.start()?;
//! bundle.start()?;
//! ```

pub mod activator;
pub mod bundle;
pub mod bundle_context;
pub(crate) mod context;
mod lifecycle;

pub use activator::{ActivatorFactory, BundleActivator};
pub use bundle::{Bundle, BundleState, StartOptions, StopOptions};
pub use bundle_context::BundleContext;
pub use context::{SYSTEM_BUNDLE_LOCATION, SYSTEM_BUNDLE_SYMBOLIC_NAME};

use crate::config::FrameworkConfig;
use crate::errors::Result;
use crate::revision::BundleId;
use context::FrameworkContext;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

/// Filesystem path named by a bundle location (`file:` prefix optional)
pub(crate) fn location_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file:").unwrap_or(location))
}

/// Embedding handle for one framework instance
///
/// Dropping the handle does not stop bundles; call [`Framework::stop`].
pub struct Framework {
    ctx: Arc<FrameworkContext>,
}

impl Framework {
    /// Create a framework over the configured storage. Nothing is loaded
    /// until [`Framework::init`].
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        Ok(Framework {
            ctx: FrameworkContext::new(config)?,
        })
    }

    /// Restore persisted bundles (first call only) and move the system
    /// bundle to STARTING
    pub fn init(&self) -> Result<()> {
        self.ctx.init_framework()
    }

    /// Initialize if needed, resolve everything and start persistently
    /// started bundles
    pub fn start(&self) -> Result<()> {
        self.ctx.start_framework()
    }

    /// Stop every bundle in reverse id order. The bundles stay installed.
    pub fn stop(&self) -> Result<()> {
        self.ctx.stop_framework()
    }

    pub fn state(&self) -> BundleState {
        self.ctx.system.state()
    }

    pub fn system_bundle(&self) -> Bundle {
        self.ctx.system_bundle()
    }

    /// System bundle context, available between `init` and `stop`
    pub fn context(&self) -> Option<BundleContext> {
        self.ctx.system_bundle().context()
    }

    pub fn install_bundle<R: Read>(&self, location: &str, content: R) -> Result<Bundle> {
        self.ctx.install(location, content)
    }

    pub fn install_bundle_from_location(&self, location: &str) -> Result<Bundle> {
        self.ctx.install_from_location(location)
    }

    /// Installed bundles in id order, the system bundle first
    pub fn bundles(&self) -> Vec<Bundle> {
        self.ctx.bundles()
    }

    pub fn bundle(&self, id: BundleId) -> Option<Bundle> {
        self.ctx.bundle(id)
    }

    pub fn bundle_by_location(&self, location: &str) -> Option<Bundle> {
        self.ctx.bundle_by_location(location)
    }

    /// Resolve `bundles` (every INSTALLED bundle when `None`). True when
    /// all of them ended up resolved.
    pub fn resolve_bundles(&self, bundles: Option<&[Bundle]>) -> bool {
        let targets: Option<Vec<_>> = bundles.map(|list| list.iter().map(|b| Arc::clone(&b.data)).collect());
        let report = self.ctx.resolve(targets.as_deref());
        if !report.failures.is_empty() {
            return false;
        }
        match bundles {
            Some(list) => list.iter().all(|b| b.state().is_resolved()),
            None => self
                .ctx
                .bundles()
                .iter()
                .all(|b| b.state().is_resolved() || b.state() == BundleState::Uninstalled),
        }
    }

    /// Drop stale revisions and rewire their dependents. With `None`,
    /// refreshes every bundle that has pending removals.
    pub fn refresh_bundles(&self, bundles: Option<&[Bundle]>) -> Result<()> {
        let targets: Option<Vec<_>> = bundles.map(|list| list.iter().map(|b| Arc::clone(&b.data)).collect());
        self.ctx.refresh(targets.as_deref())
    }

    /// Make a native activator available under the name used in
    /// `Bundle-Activator`
    pub fn register_activator<F, A>(&self, name: &str, factory: F)
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: BundleActivator + 'static,
    {
        let factory: ActivatorFactory = Arc::new(move || Box::new(factory()) as Box<dyn BundleActivator>);
        self.ctx.activators.register(name, factory);
    }

    /// Names accepted in `Bundle-Activator`
    pub fn activator_names(&self) -> Vec<String> {
        self.ctx.activators.names()
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.ctx.config
    }

    /// Framework property, falling back to the process environment
    pub fn property(&self, key: &str) -> Option<String> {
        self.ctx.properties.get(key).cloned().or_else(|| std::env::var(key).ok())
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("storage", &self.ctx.config.storage_dir)
            .field("state", &self.state())
            .finish()
    }
}
