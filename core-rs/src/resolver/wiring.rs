//! Wires and per-revision wiring snapshots

use crate::manifest::{ExportedPackage, Requirement};
use crate::revision::RevisionId;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireKind {
    /// Import-Package wire for the named package
    Package(String),
    /// Require-Bundle wire
    Bundle { reexport: bool },
    /// Fragment attached to its host
    Host,
}

/// Directed edge from a requirer to the provider satisfying one requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    pub requirer: RevisionId,
    pub provider: RevisionId,
    pub requirement: Requirement,
    pub kind: WireKind,
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.requirer, self.provider, self.requirement)
    }
}

/// Resolved state of one revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleWiring {
    pub revision: RevisionId,
    /// Outgoing wires. A fragment holds only its host wire; its imports are
    /// wired on the host.
    pub required: Vec<Wire>,
    /// Fragments attached to this host
    pub fragments: Vec<RevisionId>,
    /// Host this fragment is attached to
    pub host: Option<RevisionId>,
    /// Visible packages and the revision providing each one
    pub package_space: BTreeMap<String, RevisionId>,
    /// Effective exports, fragment contributions included
    pub exports: Vec<ExportedPackage>,
}

impl BundleWiring {
    pub fn is_fragment(&self) -> bool {
        self.host.is_some()
    }

    /// Provider of a visible package
    pub fn provider_of(&self, package: &str) -> Option<RevisionId> {
        self.package_space.get(package).copied()
    }

    pub fn package_wires(&self) -> impl Iterator<Item = &Wire> {
        self.required
            .iter()
            .filter(|w| matches!(w.kind, WireKind::Package(_)))
    }

    pub fn bundle_wires(&self) -> impl Iterator<Item = &Wire> {
        self.required
            .iter()
            .filter(|w| matches!(w.kind, WireKind::Bundle { .. }))
    }

    /// Revisions this one depends on
    pub fn providers(&self) -> impl Iterator<Item = RevisionId> + '_ {
        self.required.iter().map(|w| w.provider).filter(move |p| *p != self.revision)
    }
}

/// Why a revision did not resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    pub revision: RevisionId,
    /// First requirement that could not be satisfied, when there is one
    pub requirement: Option<Requirement>,
    pub reason: String,
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.requirement {
            Some(req) => write!(f, "Unable to resolve {}: {} [{}]", self.revision, self.reason, req),
            None => write!(f, "Unable to resolve {}: {}", self.revision, self.reason),
        }
    }
}

/// Result of one resolve pass
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    /// Revisions resolved by this pass, in id order
    pub resolved: Vec<RevisionId>,
    pub failures: BTreeMap<RevisionId, ResolutionFailure>,
}

impl ResolveReport {
    pub fn failure(&self, revision: RevisionId) -> Option<&ResolutionFailure> {
        self.failures.get(&revision)
    }
}
