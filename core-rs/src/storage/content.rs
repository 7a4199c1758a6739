//! Bundle content archives
//!
//! Bundle content is a gzip-compressed tar archive holding
//! `META-INF/MANIFEST.MF` plus arbitrary resource entries.

use crate::errors::{BundleErrorKind, FrameworkError, Result};
use crate::manifest::{Headers, MANIFEST_PATH};
use crate::version::Version;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::Path;
use tar::{Archive, Builder, Header};

/// Builds bundle archives in memory
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    headers: Headers,
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        let mut headers = Headers::new();
        headers.insert("Bundle-ManifestVersion", "2");
        ArchiveBuilder {
            headers,
            entries: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn symbolic_name(self, name: &str) -> Self {
        self.header("Bundle-SymbolicName", name)
    }

    pub fn version(self, version: &str) -> Self {
        self.header("Bundle-Version", version)
    }

    pub fn exports(self, value: &str) -> Self {
        self.header("Export-Package", value)
    }

    pub fn imports(self, value: &str) -> Self {
        self.header("Import-Package", value)
    }

    pub fn activator(self, name: &str) -> Self {
        self.header("Bundle-Activator", name)
    }

    pub fn entry(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push((path.trim_start_matches('/').to_string(), data.into()));
        self
    }

    /// Archive bytes (tar.gz)
    pub fn build(&self) -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = Builder::new(encoder);

        append_bytes(&mut tar, MANIFEST_PATH, self.headers.to_manifest_string().as_bytes())?;
        for (path, data) in &self.entries {
            append_bytes(&mut tar, path, data)?;
        }

        let encoder = tar
            .into_inner()
            .map_err(|e| FrameworkError::Storage(format!("Failed to finish archive: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| FrameworkError::Storage(format!("Failed to compress archive: {}", e)))
    }

    /// Convenience for a bundle with just a name and version
    pub fn simple(symbolic_name: &str, version: &Version) -> Result<Vec<u8>> {
        ArchiveBuilder::new()
            .symbolic_name(symbolic_name)
            .version(&version.to_string())
            .build()
    }
}

fn append_bytes<W: std::io::Write>(tar: &mut Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append_data(&mut header, path, data)
        .map_err(|e| FrameworkError::Storage(format!("Failed to add {} to archive: {}", path, e)))
}

/// Extract tar.gz to target directory
pub(crate) fn extract_tarball(tarball_path: &Path, target_dir: &Path) -> Result<()> {
    let tar_gz = File::open(tarball_path)?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz));

    archive.unpack(target_dir).map_err(|e| {
        FrameworkError::bundle_with_source(
            BundleErrorKind::Invalid,
            format!("Unreadable bundle content: {}", e),
            e,
        )
    })
}

/// Read and parse the manifest of an extracted revision
pub(crate) fn read_manifest(entries_dir: &Path) -> Result<Headers> {
    let path = entries_dir.join(MANIFEST_PATH);
    if !path.is_file() {
        return Err(FrameworkError::bundle(
            BundleErrorKind::Invalid,
            format!("Bundle content has no {}", MANIFEST_PATH),
        ));
    }
    let bytes = std::fs::read(&path)?;
    let text = String::from_utf8(bytes).map_err(|_| {
        FrameworkError::bundle(BundleErrorKind::Invalid, "Manifest is not valid UTF-8")
    })?;
    Headers::parse(&text).map_err(FrameworkError::into_invalid_bundle)
}
