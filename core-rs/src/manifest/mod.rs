//! Bundle manifest parsing
//!
//! Raw `META-INF/MANIFEST.MF` text becomes [`Headers`]; headers become a
//! typed [`BundleDescription`] with the capabilities and requirements the
//! resolver works on.

pub mod clause;
pub mod description;
pub mod headers;

pub use clause::{parse_clauses, Clause};
pub use description::{
    parse_capabilities, parse_export_list, BundleDescription, Capability, ExportedPackage, FragmentHost,
    ImportedPackage, RequiredBundle, Requirement, Resolution,
};
pub use headers::{Headers, MANIFEST_PATH};
