//! Bundle revisions
//!
//! A revision is one immutable, loaded version of a bundle's content. A
//! bundle may have several alive at once: the current one plus stale ones
//! that stay wired to consumers until a refresh.

use crate::errors::Result;
use crate::manifest::{BundleDescription, ExportedPackage, Headers};
use crate::storage::RevisionContent;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type BundleId = u64;

/// Id of the system bundle
pub const SYSTEM_BUNDLE_ID: BundleId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionId {
    pub bundle: BundleId,
    pub number: u32,
}

impl RevisionId {
    pub const fn new(bundle: BundleId, number: u32) -> Self {
        RevisionId { bundle, number }
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.bundle, self.number)
    }
}

#[derive(Debug)]
pub struct BundleRevision {
    id: RevisionId,
    headers: Headers,
    description: BundleDescription,
    content: Option<RevisionContent>,
}

impl BundleRevision {
    /// Revision backed by stored content
    pub fn from_content(bundle: BundleId, content: RevisionContent) -> Result<Self> {
        let headers = content.headers().clone();
        let description = BundleDescription::parse(&headers)?;
        Ok(BundleRevision {
            id: RevisionId::new(bundle, content.number()),
            headers,
            description,
            content: Some(content),
        })
    }

    /// Revision without stored content (the system bundle)
    pub fn synthetic(id: RevisionId, headers: Headers, description: BundleDescription) -> Self {
        BundleRevision {
            id,
            headers,
            description,
            content: None,
        }
    }

    pub fn id(&self) -> RevisionId {
        self.id
    }

    pub fn bundle_id(&self) -> BundleId {
        self.id.bundle
    }

    pub fn symbolic_name(&self) -> Option<&str> {
        self.description.symbolic_name.as_deref()
    }

    pub fn version(&self) -> &Version {
        &self.description.version
    }

    pub fn description(&self) -> &BundleDescription {
        &self.description
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn exports(&self) -> &[ExportedPackage] {
        &self.description.exports
    }

    pub fn is_fragment(&self) -> bool {
        self.description.is_fragment()
    }

    pub fn entry(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match &self.content {
            Some(content) => content.entry(path),
            None => Ok(None),
        }
    }

    pub fn entry_paths(&self, prefix: &str) -> Result<Vec<String>> {
        match &self.content {
            Some(content) => content.entry_paths(prefix),
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Display for BundleRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{} [{}]",
            self.symbolic_name().unwrap_or("<unnamed>"),
            self.version(),
            self.id
        )
    }
}
