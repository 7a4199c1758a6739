//! Package and bundle resolution
//!
//! Computes wires between revisions: every mandatory requirement of a
//! resolved revision is satisfied by exactly one resolved provider, and no
//! revision sees two providers of one package.

pub mod engine;
pub mod wiring;

pub use engine::Resolver;
pub use wiring::{BundleWiring, ResolutionFailure, ResolveReport, Wire, WireKind};
