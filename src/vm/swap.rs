//! Swap Manager
//!
//! Moves page contents between physical frames and page-sized slots of the
//! swap store. Slot `n` lives at byte offset `n * page_size`. A slot is held
//! from the moment a dirty page is written out until that page is read back
//! in or its address space is destroyed.

use alloc::boxed::Box;
use alloc::vec;

use crate::console;
use crate::error::{StoreError, VmError, VmResult};
use crate::vm::bitmap::BitmapAllocator;
use crate::vm::memory::PhysicalMemory;
use crate::vm::store::BackingStore;

/// Paging area on a backing store
pub struct SwapSpace {
    /// Store holding the slots
    store: Box<dyn BackingStore>,
    /// Slot occupancy
    slots: BitmapAllocator,
    /// Bytes per slot
    page_size: usize,
}

impl SwapSpace {
    /// Create a swap area of `num_slots` page-sized slots on `store`
    pub fn new(store: Box<dyn BackingStore>, num_slots: usize, page_size: usize) -> Self {
        Self {
            store,
            slots: BitmapAllocator::new(num_slots),
            page_size,
        }
    }

    fn offset(&self, slot: usize) -> u64 {
        (slot * self.page_size) as u64
    }

    /// Write a frame to a freshly allocated slot
    pub fn swap_out(&mut self, memory: &PhysicalMemory, frame: usize) -> VmResult<usize> {
        let slot = self.slots.acquire().ok_or(VmError::SwapExhausted)?;
        let offset = self.offset(slot);
        match self.store.write_at(memory.frame(frame), offset) {
            Ok(written) if written == self.page_size => {}
            Ok(_) => {
                self.slots.release(slot);
                return Err(StoreError::Io { offset }.into());
            }
            Err(e) => {
                self.slots.release(slot);
                return Err(e.into());
            }
        }
        crate::vm_debug!(console::SWAP, "swap out frame {} -> slot {}", frame, slot);
        Ok(slot)
    }

    /// Offset of a slot that currently holds a page
    fn allocated_offset(&self, slot: usize) -> VmResult<u64> {
        if !self.slots.test(slot) {
            return Err(StoreError::OutOfRange {
                offset: self.offset(slot),
                capacity: self.offset(self.slots.capacity()),
            }
            .into());
        }
        Ok(self.offset(slot))
    }

    /// Read a slot into a frame and release the slot
    ///
    /// Bytes past the end of the store read as zero.
    pub fn swap_in(&mut self, slot: usize, memory: &mut PhysicalMemory, frame: usize) -> VmResult<()> {
        let offset = self.allocated_offset(slot)?;
        let page = memory.frame_mut(frame);
        let read = self.store.read_at(page, offset)?;
        page[read..].fill(0);
        self.slots.release(slot);
        crate::vm_debug!(console::SWAP, "swap in slot {} -> frame {}", slot, frame);
        Ok(())
    }

    /// Release a slot without reading it
    pub fn discard(&mut self, slot: usize) -> bool {
        self.slots.release(slot)
    }

    /// Check whether a slot holds a page
    pub fn is_allocated(&self, slot: usize) -> bool {
        self.slots.test(slot)
    }

    /// Slots currently holding pages
    pub fn used_slots(&self) -> usize {
        self.slots.used()
    }

    /// Slots still available
    pub fn free_slots(&self) -> usize {
        self.slots.free()
    }

    /// Iterate over allocated slots
    pub fn iter_used(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter_used()
    }

    /// Read an allocated slot's bytes without releasing it
    pub fn peek(&mut self, slot: usize) -> VmResult<alloc::vec::Vec<u8>> {
        let offset = self.allocated_offset(slot)?;
        let mut page = vec![0u8; self.page_size];
        self.store.read_at(&mut page, offset)?;
        Ok(page)
    }
}

impl core::fmt::Debug for SwapSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwapSpace")
            .field("slots", &self.slots)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::store::MemStore;

    fn swap(slots: usize) -> SwapSpace {
        SwapSpace::new(Box::new(MemStore::new()), slots, 16)
    }

    #[test]
    fn test_round_trip_releases_slot() {
        let mut memory = PhysicalMemory::new(4, 16);
        let mut swap = swap(4);
        memory.frame_mut(1).copy_from_slice(&[0x5a; 16]);

        let slot = swap.swap_out(&memory, 1).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(swap.used_slots(), 1);
        assert_eq!(swap.peek(slot).unwrap(), vec![0x5a; 16]);

        swap.swap_in(slot, &mut memory, 3).unwrap();
        assert_eq!(memory.frame(3), &[0x5a; 16]);
        assert_eq!(swap.used_slots(), 0);
        assert!(!swap.is_allocated(slot));
    }

    #[test]
    fn test_exhausted() {
        let memory = PhysicalMemory::new(2, 16);
        let mut swap = swap(1);
        swap.swap_out(&memory, 0).unwrap();
        assert_eq!(swap.swap_out(&memory, 1), Err(VmError::SwapExhausted));
        assert!(VmError::SwapExhausted.is_fatal());
    }

    #[test]
    fn test_store_failure_returns_slot() {
        let memory = PhysicalMemory::new(2, 16);
        let mut swap = SwapSpace::new(Box::new(MemStore::with_capacity(16)), 4, 16);
        assert_eq!(swap.swap_out(&memory, 0).unwrap(), 0);
        assert!(matches!(
            swap.swap_out(&memory, 1),
            Err(VmError::Store(StoreError::OutOfRange { .. }))
        ));
        assert_eq!(swap.used_slots(), 1);
    }

    #[test]
    fn test_discard_and_unallocated_swap_in() {
        let mut memory = PhysicalMemory::new(2, 16);
        let mut swap = swap(2);
        let slot = swap.swap_out(&memory, 0).unwrap();
        assert!(swap.discard(slot));
        assert!(!swap.discard(slot));
        assert!(swap.swap_in(slot, &mut memory, 1).is_err());
    }

    #[test]
    fn test_peek_requires_allocated_slot() {
        let mut memory = PhysicalMemory::new(2, 16);
        memory.frame_mut(0).fill(0x11);
        let mut swap = swap(2);
        let slot = swap.swap_out(&memory, 0).unwrap();
        assert!(swap.discard(slot));

        // Freed slot still holds the old bytes in the store
        assert_eq!(
            swap.peek(slot),
            Err(VmError::Store(StoreError::OutOfRange { offset: 0, capacity: 32 }))
        );
        assert!(swap.peek(5).is_err());
    }
}
