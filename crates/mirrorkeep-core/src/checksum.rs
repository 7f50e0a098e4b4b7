use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 4096;

/// Content fingerprint provider. Deterministic and content-only: no file
/// metadata is mixed into the value.
pub trait Checksum: Send + Sync {
    fn fingerprint(&self, path: &Path) -> io::Result<u32>;
}

/// CRC32 fingerprints, streamed in 4KB chunks.
pub struct Crc32;

impl Checksum for Crc32 {
    fn fingerprint(&self, path: &Path) -> io::Result<u32> {
        let mut file = File::open(path)?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = [0u8; CHUNK_SIZE];

        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hasher.finalize())
    }
}
