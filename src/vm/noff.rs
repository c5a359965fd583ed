//! NOFF Program Header
//!
//! Fixed-layout descriptor at the start of every executable image: a magic
//! word followed by `(virtual_addr, in_file_addr, size)` for the code,
//! initialized data and uninitialized data segments. All ten fields are
//! 32-bit words written little-endian; an image produced with the opposite
//! byte order is recognised by its byte-swapped magic and converted.

use crate::error::{VmError, VmResult};
use crate::vm::store::BackingStore;

/// Magic number identifying a NOFF image
pub const NOFF_MAGIC: u32 = 0x00ba_dfad;

/// Size of the encoded header in bytes
pub const NOFF_HEADER_SIZE: usize = 40;

// ============================================================================
// Segment Descriptor
// ============================================================================

/// Location of one segment in the address space and in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoffSegment {
    /// Virtual address the segment is linked at
    pub virtual_addr: u32,
    /// Byte offset of the segment inside the image
    pub in_file_addr: u32,
    /// Segment size in bytes
    pub size: u32,
}

impl NoffSegment {
    pub const fn new(virtual_addr: u32, in_file_addr: u32, size: u32) -> Self {
        Self {
            virtual_addr,
            in_file_addr,
            size,
        }
    }
}

// ============================================================================
// Header
// ============================================================================

/// Parsed NOFF header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoffHeader {
    /// Code segment
    pub code: NoffSegment,
    /// Initialized data segment
    pub init_data: NoffSegment,
    /// Uninitialized data segment
    pub uninit_data: NoffSegment,
}

impl NoffHeader {
    /// Decode a header, byte-swapping when the producer used big-endian
    pub fn parse(bytes: &[u8]) -> VmResult<Self> {
        if bytes.len() < NOFF_HEADER_SIZE {
            return Err(VmError::TruncatedHeader(bytes.len()));
        }

        let mut words = [0u32; 10];
        for (i, word) in words.iter_mut().enumerate() {
            let raw = [bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]];
            *word = u32::from_le_bytes(raw);
        }

        if words[0] != NOFF_MAGIC {
            if words[0].swap_bytes() != NOFF_MAGIC {
                return Err(VmError::BadMagic(words[0]));
            }
            for word in words.iter_mut() {
                *word = word.swap_bytes();
            }
        }

        Ok(Self {
            code: NoffSegment::new(words[1], words[2], words[3]),
            init_data: NoffSegment::new(words[4], words[5], words[6]),
            uninit_data: NoffSegment::new(words[7], words[8], words[9]),
        })
    }

    /// Read and decode the header at offset 0 of an image
    pub fn read_from(store: &mut dyn BackingStore) -> VmResult<Self> {
        let mut buf = [0u8; NOFF_HEADER_SIZE];
        let read = store.read_at(&mut buf, 0)?;
        Self::parse(&buf[..read])
    }

    /// Encode the header little-endian
    pub fn to_bytes(&self) -> [u8; NOFF_HEADER_SIZE] {
        let words = [
            NOFF_MAGIC,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.code.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.init_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
            self.uninit_data.size,
        ];
        let mut out = [0u8; NOFF_HEADER_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Bytes needed by the three segments
    pub fn image_size(&self) -> usize {
        self.code.size as usize + self.init_data.size as usize + self.uninit_data.size as usize
    }
}
