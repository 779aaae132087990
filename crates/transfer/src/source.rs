//! Byte sources the engine can slice and hash.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::chunked::checksum_bytes;

/// An immutable, sized, sliceable buffer.
pub trait ByteSource: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Copies bytes `[start, end)`.
    fn slice(&self, start: u64, end: u64) -> Result<Vec<u8>, TransferError>;

    /// Hex-encoded SHA-256 of the whole source.
    fn compute_hash(&self) -> Result<String, TransferError> {
        let data = self.slice(0, self.size())?;
        Ok(checksum_bytes(&data))
    }
}

fn check_range(start: u64, end: u64, size: u64) -> Result<(), TransferError> {
    if start > end || end > size {
        return Err(TransferError::InvalidOptions(format!(
            "slice {start}..{end} out of bounds for source of {size} bytes"
        )));
    }
    Ok(())
}

impl ByteSource for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn slice(&self, start: u64, end: u64) -> Result<Vec<u8>, TransferError> {
        check_range(start, end, self.size())?;
        Ok(self[start as usize..end as usize].to_vec())
    }

    fn compute_hash(&self) -> Result<String, TransferError> {
        Ok(checksum_bytes(self))
    }
}

/// A file on disk read with positional slices.
///
/// The size is captured at open time; the file must not change while a
/// transfer is running.
pub struct FileSource {
    file: Mutex<std::fs::File>,
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Opens `path` for slicing.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            size,
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn slice(&self, start: u64, end: u64) -> Result<Vec<u8>, TransferError> {
        check_range(start, end, self.size)?;
        let mut buf = vec![0u8; (end - start) as usize];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Streams the file through SHA-256 without loading it whole.
    fn compute_hash(&self) -> Result<String, TransferError> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
