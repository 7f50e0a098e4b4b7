use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// One regular file captured during a crawl. Built by stat+hash when the
/// containing directory is visited and read-only afterward; every crawl
/// pass produces fresh values rather than mutating old ones.
#[derive(Debug, Clone)]
pub struct File {
    /// Containing directory (absolute, mount-specific).
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// Last-write time, unix seconds.
    pub modified: i64,
    /// Content checksum (CRC32).
    pub fingerprint: u32,
    /// Unix seconds of the last successful verification, 0 if never.
    pub last_checked: i64,
}

impl File {
    pub fn new(
        path: PathBuf,
        name: String,
        metadata: &Metadata,
        fingerprint: u32,
    ) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        File {
            path,
            name,
            size: metadata.len(),
            modified,
            fingerprint,
            last_checked: 0,
        }
    }

    /// Full mount-specific path of the file.
    pub fn full_path(&self) -> PathBuf {
        self.path.join(&self.name)
    }

    /// Stricter than `==`: also requires equal path, so it only holds for
    /// the exact same on-disk file, not its counterpart on another mirror.
    pub fn identical(&self, other: &File) -> bool {
        self == other && self.path == other.path
    }
}

/// Equality is content-identity: the same logical file on two mirrors
/// compares equal even though the mount-specific paths differ.
impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.size == other.size
            && self.modified == other.modified
            && self.fingerprint == other.fingerprint
    }
}

impl Eq for File {}

/// One directory level of a scan, produced fresh by the crawler and
/// discarded after reconciliation.
#[derive(Debug, Clone)]
pub struct Directory {
    /// Absolute, mount-specific path.
    pub path: PathBuf,
    /// Path relative to the mount root; the cross-mirror alignment key.
    /// The mount root itself is "/".
    pub name: String,
    pub files: HashMap<String, File>,
}

impl Directory {
    pub fn new(path: PathBuf, name: String, files: HashMap<String, File>) -> Self {
        Directory { path, name, files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Mount-relative name for `path` under `mount`; the mount root maps to "/".
pub fn relative_name(mount: &Path, path: &Path) -> String {
    match path.strip_prefix(mount) {
        Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
        Ok(rel) => format!("/{}", rel.to_string_lossy()),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}
