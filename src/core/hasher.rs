//! MD5 checksums for definition files.
//!
//! The shared definitions store tags every uploaded file with the MD5 hex
//! digest of its content. `FileHasher` computes the same digest locally so
//! unchanged multi-hundred-megabyte databases are neither re-downloaded nor
//! re-uploaded.

use crate::core::error::{AvError, AvResult};

use md5::{Digest, Md5};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Streams file content through MD5.
///
/// # Examples
///
/// ```rust
/// use bucket_antivirus::core::FileHasher;
///
/// let hasher = FileHasher::new();
/// assert_eq!(hasher.hash_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
/// ```
#[derive(Debug, Clone)]
pub struct FileHasher {
    /// Read buffer size in bytes.
    chunk_size: usize,
}

impl Default for FileHasher {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

impl FileHasher {
    /// Creates a new hasher with a 64 KiB read buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the read buffer size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Computes the hex digest of in-memory bytes.
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Computes the hex digest of a synchronous reader.
    pub fn hash_reader<R: Read>(&self, reader: &mut R) -> AvResult<String> {
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Computes the hex digest of a file, streaming it from disk.
    pub fn hash_file(&self, path: &Path) -> AvResult<String> {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::new(file);
        self.hash_reader(&mut reader)
    }

    /// Computes the digest of a file if it exists.
    ///
    /// Returns `Ok(None)` when there is no file at `path`.
    pub fn hash_file_if_exists(&self, path: &Path) -> AvResult<Option<String>> {
        match self.hash_file(path) {
            Ok(digest) => Ok(Some(digest)),
            Err(AvError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Hashes a file on the blocking pool.
    pub async fn hash_file_async(&self, path: impl Into<PathBuf>) -> AvResult<Option<String>> {
        let hasher = self.clone();
        let path = path.into();
        tokio::task::spawn_blocking(move || hasher.hash_file_if_exists(&path))
            .await
            .map_err(|e| AvError::internal(format!("hashing task failed: {}", e)))?
    }
}
