use std::fs;
use std::io;
use std::path::Path;

/// Byte-for-byte copy between mounts. Implementations may use plain
/// read/write or a zero-copy syscall; callers only rely on the result.
pub trait Transfer: Send + Sync {
    fn copy(&self, src: &Path, dst: &Path) -> io::Result<u64>;
}

/// Plain `std::fs::copy` transfer. Creates the destination's parent
/// directory when the mirror is missing the whole subtree.
pub struct ByteCopier;

impl Transfer for ByteCopier {
    fn copy(&self, src: &Path, dst: &Path) -> io::Result<u64> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)
    }
}
