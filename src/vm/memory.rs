//! Physical Memory
//!
//! Flat byte array indexed by `frame * page_size + offset`. The VM core only
//! touches it in whole, page-aligned frames; byte access is for the
//! hardware translation path.

use alloc::vec;
use alloc::vec::Vec;

/// Simulated main memory
pub struct PhysicalMemory {
    data: Vec<u8>,
    page_size: usize,
}

impl PhysicalMemory {
    /// Create zeroed memory of `num_frames` frames
    pub fn new(num_frames: usize, page_size: usize) -> Self {
        Self {
            data: vec![0u8; num_frames * page_size],
            page_size,
        }
    }

    /// Number of frames
    pub fn num_frames(&self) -> usize {
        self.data.len() / self.page_size
    }

    /// Bytes per frame
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Calculate the starting address of a frame
    #[inline]
    pub fn frame_to_address(&self, frame: usize) -> usize {
        frame * self.page_size
    }

    /// Borrow a whole frame
    pub fn frame(&self, frame: usize) -> &[u8] {
        let base = self.frame_to_address(frame);
        &self.data[base..base + self.page_size]
    }

    /// Mutably borrow a whole frame
    pub fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        let base = self.frame_to_address(frame);
        &mut self.data[base..base + self.page_size]
    }

    /// Zero a frame
    pub fn zero_frame(&mut self, frame: usize) {
        self.frame_mut(frame).fill(0);
    }

    /// Read a byte at a physical address
    #[inline]
    pub fn read(&self, address: usize) -> u8 {
        self.data[address]
    }

    /// Write a byte at a physical address
    #[inline]
    pub fn write(&mut self, address: usize, value: u8) {
        self.data[address] = value;
    }
}

impl core::fmt::Debug for PhysicalMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalMemory")
            .field("num_frames", &self.num_frames())
            .field("page_size", &self.page_size)
            .finish()
    }
}
