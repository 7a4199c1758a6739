//! Persistent bundle archives
//!
//! Layout under the storage root:
//!
//! ```text
//! framework.json              next bundle id
//! bundles/<id>/meta.json      BundleMeta
//! bundles/<id>/r<N>/content.tar.gz
//! bundles/<id>/r<N>/entries/  extracted entries
//! tmp/<uuid>/                 staging area for installs and updates
//! ```
//!
//! Installs and updates are staged under `tmp/` and moved into place with a
//! rename; a staged directory that is never committed is deleted on drop.

use super::content::{extract_tarball, read_manifest};
use crate::errors::{BundleErrorKind, FrameworkError, Result};
use crate::manifest::Headers;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use walkdir::WalkDir;

const CONTENT_FILE: &str = "content.tar.gz";
const ENTRIES_DIR: &str = "entries";
const META_FILE: &str = "meta.json";
const FRAMEWORK_FILE: &str = "framework.json";

/// One stored revision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRecord {
    pub number: u32,
    pub crc32: u32,
}

/// Metadata record kept next to the archived content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    pub id: u64,
    pub location: String,
    pub symbolic_name: Option<String>,
    pub version: String,
    pub persistent_start: bool,
    pub current_revision: u32,
    pub revisions: Vec<RevisionRecord>,
    pub installed_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameworkRecord {
    next_bundle_id: u64,
}

/// Content written to the staging area but not yet part of any bundle
#[derive(Debug)]
pub struct StagedContent {
    dir: PathBuf,
    headers: Headers,
    crc32: u32,
    committed: bool,
}

impl StagedContent {
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }
}

impl Drop for StagedContent {
    fn drop(&mut self) {
        if !self.committed && self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "failed to roll back staged content");
            }
        }
    }
}

/// Read-only view of one revision's entries
#[derive(Debug, Clone)]
pub struct RevisionContent {
    number: u32,
    entries_dir: PathBuf,
    headers: Headers,
}

impl RevisionContent {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Bytes of the entry at `path`, or `None` if absent
    pub fn entry(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let relative = sanitize_entry_path(path)?;
        let full = self.entries_dir.join(relative);
        if !full.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read(full)?))
    }

    /// Entry paths (`/`-separated) under `prefix`, sorted
    pub fn entry_paths(&self, prefix: &str) -> Result<Vec<String>> {
        let relative = sanitize_entry_path(prefix)?;
        let base = self.entries_dir.join(relative);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| FrameworkError::Storage(format!("Failed to list entries: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.entries_dir) {
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                paths.push(parts.join("/"));
            }
        }
        paths.sort();
        Ok(paths)
    }
}

fn sanitize_entry_path(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    let relative = PathBuf::from(trimmed);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(FrameworkError::Storage(format!(
                    "Entry path escapes bundle content: {}",
                    path
                )))
            }
        }
    }
    Ok(relative)
}

/// Persistent state of one installed bundle
#[derive(Debug)]
pub struct BundleArchive {
    dir: PathBuf,
    meta: Mutex<BundleMeta>,
}

impl BundleArchive {
    pub fn id(&self) -> u64 {
        self.meta().id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of the metadata record
    pub fn meta(&self) -> BundleMeta {
        match self.meta.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_meta<F: FnOnce(&mut BundleMeta)>(&self, f: F) -> Result<()> {
        let snapshot = {
            let mut guard = match self.meta.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut guard);
            guard.clone()
        };
        write_meta(&self.dir, &snapshot)
    }

    pub fn set_persistent_start(&self, value: bool) -> Result<()> {
        if self.meta().persistent_start == value {
            return Ok(());
        }
        self.update_meta(|m| m.persistent_start = value)
    }

    pub fn revision_content(&self, number: u32) -> Result<RevisionContent> {
        let entries_dir = revision_dir(&self.dir, number).join(ENTRIES_DIR);
        if !entries_dir.is_dir() {
            return Err(FrameworkError::Storage(format!(
                "Revision {} of bundle {} is missing",
                number,
                self.id()
            )));
        }
        let headers = read_manifest(&entries_dir)?;
        Ok(RevisionContent {
            number,
            entries_dir,
            headers,
        })
    }

    pub fn current_content(&self) -> Result<RevisionContent> {
        self.revision_content(self.meta().current_revision)
    }
}

fn revision_dir(bundle_dir: &Path, number: u32) -> PathBuf {
    bundle_dir.join(format!("r{}", number))
}

fn write_meta(dir: &Path, meta: &BundleMeta) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)?;
    let tmp = dir.join(format!("{}.tmp", META_FILE));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, dir.join(META_FILE))?;
    Ok(())
}

/// Bundle storage rooted at one directory
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open (creating if needed) storage at `root`
    ///
    /// Leftover staging directories from an interrupted install are removed.
    pub fn open(root: &Path) -> Result<Self> {
        let storage = Storage {
            root: root.to_path_buf(),
        };
        fs::create_dir_all(storage.bundles_dir()).map_err(|e| {
            FrameworkError::Storage(format!("Failed to create storage directory {}: {}", root.display(), e))
        })?;
        let tmp = storage.tmp_dir();
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bundles_dir(&self) -> PathBuf {
        self.root.join("bundles")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn bundle_dir(&self, id: u64) -> PathBuf {
        self.bundles_dir().join(id.to_string())
    }

    /// True when nothing has ever been installed here
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.root.join(FRAMEWORK_FILE).exists()
            && fs::read_dir(self.bundles_dir())?.next().is_none())
    }

    /// Remove all persisted bundles and counters
    pub fn clean(&self) -> Result<()> {
        debug!(root = %self.root.display(), "cleaning bundle storage");
        let bundles = self.bundles_dir();
        if bundles.exists() {
            fs::remove_dir_all(&bundles)?;
        }
        fs::create_dir_all(&bundles)?;
        let record = self.root.join(FRAMEWORK_FILE);
        if record.exists() {
            fs::remove_file(record)?;
        }
        Ok(())
    }

    /// Persisted bundle id counter (1 when fresh; 0 is the system bundle)
    pub fn next_bundle_id(&self) -> Result<u64> {
        let path = self.root.join(FRAMEWORK_FILE);
        if !path.exists() {
            return Ok(1);
        }
        let record: FrameworkRecord = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(record.next_bundle_id.max(1))
    }

    pub fn set_next_bundle_id(&self, next: u64) -> Result<()> {
        let json = serde_json::to_string(&FrameworkRecord { next_bundle_id: next })?;
        let tmp = self.root.join(format!("{}.tmp", FRAMEWORK_FILE));
        fs::write(&tmp, json)?;
        fs::rename(tmp, self.root.join(FRAMEWORK_FILE))?;
        Ok(())
    }

    /// Write content to the staging area, extract it and read its manifest
    pub fn stage<R: Read>(&self, mut reader: R) -> Result<StagedContent> {
        let dir = self.tmp_dir().join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)?;

        // constructed first so any failure below removes the directory
        let mut staged = StagedContent {
            dir,
            headers: Headers::new(),
            crc32: 0,
            committed: false,
        };

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|e| {
            FrameworkError::bundle_with_source(BundleErrorKind::ReadError, "Failed to read bundle content", e)
        })?;
        staged.crc32 = crc32fast::hash(&bytes);

        let tarball = staged.dir.join(CONTENT_FILE);
        fs::write(&tarball, &bytes)?;

        let entries = staged.dir.join(ENTRIES_DIR);
        fs::create_dir_all(&entries)?;
        extract_tarball(&tarball, &entries)?;
        staged.headers = read_manifest(&entries)?;
        Ok(staged)
    }

    /// Commit staged content as revision 1 of a new bundle
    pub fn insert(&self, id: u64, location: &str, staged: StagedContent, symbolic_name: Option<String>, version: String) -> Result<BundleArchive> {
        let dir = self.bundle_dir(id);
        if dir.exists() {
            return Err(FrameworkError::Storage(format!("Bundle directory {} already exists", dir.display())));
        }
        fs::create_dir_all(&dir)?;

        let now = Utc::now();
        let meta = BundleMeta {
            id,
            location: location.to_string(),
            symbolic_name,
            version,
            persistent_start: false,
            current_revision: 1,
            revisions: vec![RevisionRecord {
                number: 1,
                crc32: staged.crc32,
            }],
            installed_at: now,
            last_modified: now,
        };

        let result = move_staged(staged, &revision_dir(&dir, 1)).and_then(|_| write_meta(&dir, &meta));
        if let Err(e) = result {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        debug!(bundle_id = id, location, "bundle archive created");
        Ok(BundleArchive {
            dir,
            meta: Mutex::new(meta),
        })
    }

    /// Commit staged content as the next revision of `archive`
    ///
    /// Earlier revisions stay on disk until purged.
    pub fn update(&self, archive: &BundleArchive, staged: StagedContent, symbolic_name: Option<String>, version: String) -> Result<RevisionContent> {
        let meta = archive.meta();
        let number = meta.revisions.iter().map(|r| r.number).max().unwrap_or(0) + 1;
        let crc32 = staged.crc32;
        move_staged(staged, &revision_dir(&archive.dir, number))?;

        archive.update_meta(|m| {
            m.current_revision = number;
            m.revisions.push(RevisionRecord { number, crc32 });
            m.symbolic_name = symbolic_name;
            m.version = version;
            m.last_modified = Utc::now();
        })?;

        debug!(bundle_id = meta.id, revision = number, "bundle archive updated");
        archive.revision_content(number)
    }

    /// Delete all revisions of `archive` except those in `keep`
    pub fn purge_stale_revisions(&self, archive: &BundleArchive, keep: &[u32]) -> Result<()> {
        let meta = archive.meta();
        for record in &meta.revisions {
            if keep.contains(&record.number) || record.number == meta.current_revision {
                continue;
            }
            let dir = revision_dir(&archive.dir, record.number);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }
        archive.update_meta(|m| {
            let current = m.current_revision;
            m.revisions.retain(|r| keep.contains(&r.number) || r.number == current);
        })
    }

    /// Delete the archive and all its revisions
    pub fn remove(&self, archive: &BundleArchive) -> Result<()> {
        if archive.dir.exists() {
            fs::remove_dir_all(&archive.dir)?;
        }
        debug!(bundle_id = archive.id(), "bundle archive removed");
        Ok(())
    }

    /// Load every persisted bundle archive, ordered by id
    ///
    /// Stale revisions are purged and archives whose current content fails
    /// its checksum are skipped.
    pub fn load_all(&self) -> Result<Vec<(BundleArchive, RevisionContent)>> {
        let mut loaded = Vec::new();
        for entry in fs::read_dir(self.bundles_dir())? {
            let entry = entry?;
            let dir = entry.path();
            let meta_path = dir.join(META_FILE);
            if !meta_path.is_file() {
                warn!(dir = %dir.display(), "ignoring bundle directory without metadata");
                continue;
            }

            let meta: BundleMeta = match fs::read_to_string(&meta_path)
                .map_err(FrameworkError::from)
                .and_then(|s| serde_json::from_str(&s).map_err(FrameworkError::from))
            {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "ignoring unreadable bundle metadata");
                    continue;
                }
            };

            let current = meta.current_revision;
            let expected = meta.revisions.iter().find(|r| r.number == current).map(|r| r.crc32);
            let actual = fs::read(revision_dir(&dir, current).join(CONTENT_FILE))
                .ok()
                .map(|bytes| crc32fast::hash(&bytes));
            if expected.is_none() || expected != actual {
                warn!(bundle_id = meta.id, "ignoring bundle whose content checksum does not match");
                continue;
            }

            let archive = BundleArchive {
                dir,
                meta: Mutex::new(meta),
            };
            self.purge_stale_revisions(&archive, &[])?;
            let content = archive.current_content()?;
            loaded.push((archive, content));
        }
        loaded.sort_by_key(|(a, _)| a.id());
        Ok(loaded)
    }
}

fn move_staged(mut staged: StagedContent, target: &Path) -> Result<()> {
    fs::rename(&staged.dir, target).map_err(|e| {
        FrameworkError::Storage(format!("Failed to move staged content into {}: {}", target.display(), e))
    })?;
    staged.committed = true;
    Ok(())
}
