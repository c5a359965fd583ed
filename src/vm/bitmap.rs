//! Bitmap Allocator
//!
//! Tracks which units of a fixed pool are in use. One instance manages
//! physical frames, a second one manages swap slots; both share the same
//! contract: `acquire` hands out the lowest free unit or `None` when the pool
//! is exhausted, `release` returns a unit. Neither operation blocks and
//! neither decides policy; eviction is the caller's business.

use alloc::vec;
use alloc::vec::Vec;

/// Bits per byte in the map
const BITS_PER_BYTE: usize = 8;

// ============================================================================
// Bitmap Allocator
// ============================================================================

/// Free-unit allocator backed by a bitmap
#[derive(Debug, Clone)]
pub struct BitmapAllocator {
    /// The occupancy bitmap
    map: Vec<u8>,
    /// Number of units tracked
    capacity: usize,
    /// Number of bits set
    used: usize,
}

impl BitmapAllocator {
    /// Create an allocator with every unit free
    pub fn new(capacity: usize) -> Self {
        Self {
            map: vec![0u8; capacity.div_ceil(BITS_PER_BYTE)],
            capacity,
            used: 0,
        }
    }

    fn locate(unit: usize) -> (usize, u8) {
        (unit / BITS_PER_BYTE, 1 << (unit % BITS_PER_BYTE))
    }

    /// Check whether a unit is in use
    pub fn test(&self, unit: usize) -> bool {
        if unit >= self.capacity {
            return false;
        }
        let (byte, mask) = Self::locate(unit);
        self.map[byte] & mask != 0
    }

    /// Mark a unit as used; returns false if it already was
    pub fn mark(&mut self, unit: usize) -> bool {
        if unit >= self.capacity || self.test(unit) {
            return false;
        }
        let (byte, mask) = Self::locate(unit);
        self.map[byte] |= mask;
        self.used += 1;
        true
    }

    /// Find the lowest free unit and mark it used
    pub fn acquire(&mut self) -> Option<usize> {
        let byte = self.map.iter().position(|&b| b != u8::MAX)?;
        let unit = byte * BITS_PER_BYTE + self.map[byte].trailing_ones() as usize;
        if unit >= self.capacity {
            return None;
        }
        self.mark(unit);
        Some(unit)
    }

    /// Return a unit to the pool; returns false if it was not in use
    pub fn release(&mut self, unit: usize) -> bool {
        if !self.test(unit) {
            return false;
        }
        let (byte, mask) = Self::locate(unit);
        self.map[byte] &= !mask;
        self.used -= 1;
        true
    }

    /// Number of units tracked
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of units in use
    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of free units
    pub fn free(&self) -> usize {
        self.capacity - self.used
    }

    /// Check if every unit is in use
    pub fn is_full(&self) -> bool {
        self.used == self.capacity
    }

    /// Iterate over the units currently in use
    pub fn iter_used(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |&unit| self.test(unit))
    }
}
