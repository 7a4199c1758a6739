//! # KF Core - Knopflerfish Framework Runtime
//!
//! Bundle lifecycle, module resolution and a dynamic service registry in
//! one process. Bundles are gzip-compressed tar archives carrying a
//! `META-INF/MANIFEST.MF`; the framework installs them into persistent
//! storage, wires their package imports to other bundles' exports, runs
//! their activators and lets them publish and consume services.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Framework (system bundle 0, BundleContext)   │
//! └──────────────────────────────────────────────┘
//!     │ install/update      │ start/stop      │ register/get
//!     ▼                     ▼                 ▼
//! ┌─────────┐  ┌──────────┐ ┌───────────┐ ┌──────────┐
//! │ storage │─▶│ manifest │▶│ resolver  │ │ registry │
//! └─────────┘  └──────────┘ └───────────┘ └──────────┘
//!                                 │               │
//!                                 ▼               ▼
//!                         events (bundle / service / framework)
//! ```

pub mod config;
pub mod errors;
pub mod events;
pub mod filter;
pub mod framework;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod revision;
pub mod storage;
pub mod version;

pub use config::{FrameworkConfig, StorageClean};
pub use errors::{ActivatorFailure, BoxError, BundleErrorKind, FrameworkError};
pub use events::{
    BundleEvent, BundleEventKind, BundleListener, FrameworkEvent, FrameworkEventKind, FrameworkListener, ListenerId,
    ServiceEvent, ServiceEventKind, ServiceListener,
};
pub use filter::{Filter, Properties, PropertyValue};
pub use framework::{
    Bundle, BundleActivator, BundleContext, BundleState, Framework, StartOptions, StopOptions,
};
pub use manifest::{BundleDescription, Headers};
pub use registry::{ServiceFactory, ServiceObject, ServiceProvider, ServiceReference, ServiceRegistration};
pub use resolver::{BundleWiring, Wire, WireKind};
pub use revision::{BundleId, BundleRevision, RevisionId};
pub use storage::ArchiveBuilder;
pub use version::{Version, VersionRange};

/// Version of this framework implementation
pub const VERSION: &str = config::FRAMEWORK_VERSION;
