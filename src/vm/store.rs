//! Backing Stores
//!
//! Offset-addressed byte stores used for the executable image and the swap
//! area. The core never buffers more than one page at a time.
//!
//! - [`MemStore`]: in-memory store, optionally bounded
//! - [`FileStore`]: host file (requires the `std` feature)

use alloc::vec::Vec;

use crate::error::StoreError;

// ============================================================================
// Backing Store Trait
// ============================================================================

/// Block-oriented store accessed by byte offset
pub trait BackingStore: Send {
    /// Read up to `buf.len()` bytes at `offset`; returns bytes read
    ///
    /// Reads past the end are short, not errors.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StoreError>;

    /// Write `buf` at `offset`; returns bytes written
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, StoreError>;

    /// Current length in bytes
    fn len(&self) -> u64;

    /// Check if the store holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// Backing store held in memory
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    /// Store contents
    data: Vec<u8>,
    /// Maximum length, if bounded
    capacity: Option<u64>,
}

impl MemStore {
    /// Create an empty, unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that refuses writes past `capacity` bytes
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            data: Vec::new(),
            capacity: Some(capacity),
        }
    }

    /// Create a store holding `bytes`
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes,
            capacity: None,
        }
    }

    /// Borrow the contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl BackingStore for MemStore {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StoreError> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, StoreError> {
        let end = offset + buf.len() as u64;
        if let Some(capacity) = self.capacity {
            if end > capacity {
                return Err(StoreError::OutOfRange { offset, capacity });
            }
        }
        if end as usize > self.data.len() {
            self.data.resize(end as usize, 0);
        }
        let start = offset as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

// ============================================================================
// File Store
// ============================================================================

#[cfg(feature = "std")]
pub use file::FileStore;

#[cfg(feature = "std")]
mod file {
    use std::fs::{File, OpenOptions};
    use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
    use std::path::Path;

    use super::BackingStore;
    use crate::error::StoreError;

    /// Backing store kept in a host file
    #[derive(Debug)]
    pub struct FileStore {
        file: File,
    }

    impl FileStore {
        /// Open an existing file read-only (executable images)
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
            let file = File::open(path).map_err(|_| StoreError::Unavailable)?;
            Ok(Self { file })
        }

        /// Create or truncate a read-write file (swap)
        pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|_| StoreError::Unavailable)?;
            Ok(Self { file })
        }
    }

    impl BackingStore for FileStore {
        fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StoreError> {
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(|_| StoreError::Io { offset })?;
            let mut total = 0;
            while total < buf.len() {
                match self.file.read(&mut buf[total..]) {
                    Ok(0) => break,
                    Ok(n) => total += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => return Err(StoreError::Io { offset }),
                }
            }
            Ok(total)
        }

        fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, StoreError> {
            self.file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.write_all(buf))
                .map_err(|_| StoreError::Io { offset })?;
            Ok(buf.len())
        }

        fn len(&self) -> u64 {
            self.file.metadata().map(|m| m.len()).unwrap_or(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_mem_store_short_read() {
        let mut store = MemStore::from_bytes(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(store.read_at(&mut buf, 3).unwrap(), 2);
        assert_eq!(buf, [4, 5, 0, 0]);
        assert_eq!(store.read_at(&mut buf, 10).unwrap(), 0);
    }

    #[test]
    fn test_mem_store_write_extends() {
        let mut store = MemStore::new();
        assert_eq!(store.write_at(&[9, 9], 4).unwrap(), 2);
        assert_eq!(store.as_bytes(), &[0, 0, 0, 0, 9, 9]);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn test_mem_store_capacity() {
        let mut store = MemStore::with_capacity(8);
        assert!(store.write_at(&[1; 8], 0).is_ok());
        assert_eq!(
            store.write_at(&[1; 4], 6),
            Err(StoreError::OutOfRange { offset: 6, capacity: 8 })
        );
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SWAP");
        let mut store = FileStore::create(&path).unwrap();
        store.write_at(&[7u8; 16], 32).unwrap();
        assert_eq!(store.len(), 48);

        let mut buf = [0u8; 16];
        assert_eq!(store.read_at(&mut buf, 32).unwrap(), 16);
        assert_eq!(buf, [7u8; 16]);
        assert_eq!(store.read_at(&mut buf, 40).unwrap(), 8);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_file_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            FileStore::open(dir.path().join("missing")).unwrap_err(),
            StoreError::Unavailable
        );
    }
}
