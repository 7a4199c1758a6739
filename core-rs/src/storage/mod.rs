//! Bundle archive storage
//!
//! Persists each installed bundle's content and metadata under a storage
//! root, keeps pending revisions next to the active one until a refresh
//! purges them, and restores everything on restart.

pub mod archive;
pub mod content;

pub use archive::{BundleArchive, BundleMeta, RevisionContent, RevisionRecord, StagedContent, Storage};
pub use content::ArchiveBuilder;
