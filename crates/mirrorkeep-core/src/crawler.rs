use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use crate::checksum::Checksum;
use crate::model::{relative_name, Directory, File};

/// One mount point under scan. Holds the frontier of discovered but not yet
/// visited subdirectories; the disk is exhausted exactly when the frontier
/// is empty. Rebuilt at the start of every full pass.
pub struct Disk {
    mount: PathBuf,
    frontier: Vec<PathBuf>,
    checksum: Arc<dyn Checksum>,
}

impl Disk {
    pub fn new(mount: impl Into<PathBuf>, checksum: Arc<dyn Checksum>) -> Self {
        let mount = mount.into();
        Disk {
            frontier: vec![mount.clone()],
            mount,
            checksum,
        }
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    pub fn is_exhausted(&self) -> bool {
        self.frontier.is_empty()
    }

    /// Next directory in depth-first order (stack discipline:
    /// most-recently-discovered first), with its regular files stat'd and
    /// fingerprinted. Directories with zero regular files are descended
    /// through rather than returned, so `None` always means the whole
    /// mount is exhausted, not that one level happened to be empty.
    /// Unreadable directories are logged and skipped; their subtree is
    /// simply absent from this pass.
    pub fn next_directory(&mut self) -> Option<Directory> {
        let mut files: HashMap<String, File> = HashMap::new();
        let mut path = PathBuf::new();

        while files.is_empty() {
            path = self.frontier.pop()?;
            debug!("Processing {}", path.display());

            let reader = match fs::read_dir(&path) {
                Ok(reader) => reader,
                Err(err) => {
                    error!("Cannot open {}: {}", path.display(), err);
                    continue;
                }
            };

            // Listing order is filesystem-dependent; sorting keeps the
            // depth-first order identical across mirrors so lockstep
            // crawlers stay aligned on identical structures.
            let mut entries: Vec<fs::DirEntry> = Vec::new();
            for entry in reader {
                match entry {
                    Ok(entry) => entries.push(entry),
                    Err(err) => {
                        error!("Error reading entry in {}: {}", path.display(), err);
                    }
                }
            }
            entries.sort_by_key(|e| e.file_name());

            let mut subdirs: Vec<PathBuf> = Vec::new();
            for entry in entries {
                let file_type = match entry.file_type() {
                    Ok(t) => t,
                    Err(err) => {
                        error!(
                            "Error getting file type for {}: {}",
                            entry.path().display(),
                            err
                        );
                        continue;
                    }
                };

                if file_type.is_dir() {
                    subdirs.push(entry.path());
                } else if file_type.is_file() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if let Some(file) = self.build_file(&path, &entry.path(), name) {
                        files.insert(file.name.clone(), file);
                    }
                }
                // symlinks and special files are ignored
            }

            // Reverse before pushing so the stack pops subdirectories in
            // ascending name order.
            self.frontier.extend(subdirs.into_iter().rev());
        }

        let name = relative_name(&self.mount, &path);
        Some(Directory::new(path, name, files))
    }

    /// Stat and hash one regular file. Fingerprinting happens here, at
    /// crawl time, not at comparison time.
    fn build_file(&self, dir: &Path, full: &Path, name: String) -> Option<File> {
        let metadata = match fs::metadata(full) {
            Ok(m) => m,
            Err(err) => {
                error!("Error getting metadata for {}: {}", full.display(), err);
                return None;
            }
        };

        let fingerprint = match self.checksum.fingerprint(full) {
            Ok(crc) => crc,
            Err(err) => {
                error!("Error hashing {}: {}", full.display(), err);
                return None;
            }
        };

        Some(File::new(dir.to_path_buf(), name, &metadata, fingerprint))
    }
}
