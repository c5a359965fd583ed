//! Translation Lookaside Buffer
//!
//! A small, fixed-size cache of translations for the running address space.
//! The page table stays authoritative: hardware-accumulated `used`/`dirty`
//! bits only become durable when a slot is written back, which happens when
//! the slot is overwritten, when the TLB is flushed on a context switch, and
//! when the eviction path steals a slot.
//!
//! ## Replacement
//!
//! FIFO: a single rotating cursor names the next slot to overwrite,
//! independent of how recently any slot was used. Entries carry no address
//! space tag, so the whole TLB is invalidated and the cursor reset whenever
//! the running space changes.

use heapless::Vec;

use crate::config::MAX_TLB_SIZE;
use crate::error::{VmError, VmResult};
use crate::vm::page_table::{PageTable, TranslationEntry};

// ============================================================================
// TLB Entry
// ============================================================================

/// One hardware TLB slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlbEntry {
    /// Virtual page number
    pub vpn: usize,
    /// Physical frame
    pub frame: usize,
    /// Slot holds a usable translation
    pub valid: bool,
    /// Referenced through this slot
    pub used: bool,
    /// Written through this slot
    pub dirty: bool,
    /// Writes fault
    pub read_only: bool,
}

impl TlbEntry {
    /// Copy a page table entry into slot form
    pub fn from_translation(entry: &TranslationEntry) -> Self {
        Self {
            vpn: entry.vpn,
            frame: entry.frame().unwrap_or(0),
            valid: entry.is_valid(),
            used: entry.used,
            dirty: entry.dirty,
            read_only: entry.read_only,
        }
    }
}

// ============================================================================
// TLB
// ============================================================================

/// FIFO-refilled translation cache
#[derive(Debug)]
pub struct Tlb {
    /// Hardware slots
    slots: Vec<TlbEntry, MAX_TLB_SIZE>,
    /// Next slot to overwrite
    cursor: usize,
}

impl Tlb {
    /// Create a TLB with `size` invalid slots
    pub fn new(size: usize) -> VmResult<Self> {
        let mut slots: Vec<TlbEntry, MAX_TLB_SIZE> = Vec::new();
        if size == 0 || slots.resize_default(size).is_err() {
            return Err(VmError::Config("TLB size must be in 1..=64"));
        }
        Ok(Self { slots, cursor: 0 })
    }

    /// Number of slots
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Next slot the FIFO cursor will overwrite
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Read a slot
    pub fn slot(&self, index: usize) -> Option<&TlbEntry> {
        self.slots.get(index)
    }

    /// Iterate over all slots
    pub fn iter(&self) -> impl Iterator<Item = &TlbEntry> {
        self.slots.iter()
    }

    /// Find the valid slot caching `vpn`
    pub fn lookup(&self, vpn: usize) -> Option<usize> {
        self.slots.iter().position(|e| e.valid && e.vpn == vpn)
    }

    /// Find the valid slot mapping `frame`
    pub fn find_frame(&self, frame: usize) -> Option<usize> {
        self.slots.iter().position(|e| e.valid && e.frame == frame)
    }

    /// Hardware lookup for an access to `vpn`
    ///
    /// On a hit the slot's `used` bit is set, plus `dirty` for writes, and the
    /// frame is returned. `None` is a miss and must be serviced by the fault
    /// engine.
    pub fn access(&mut self, vpn: usize, write: bool) -> VmResult<Option<usize>> {
        let Some(index) = self.lookup(vpn) else {
            return Ok(None);
        };
        let slot = &mut self.slots[index];
        if write && slot.read_only {
            return Err(VmError::ReadOnly(vpn));
        }
        slot.used = true;
        if write {
            slot.dirty = true;
        }
        Ok(Some(slot.frame))
    }

    /// Invalidate a slot, returning its previous contents if it was valid
    pub fn invalidate(&mut self, index: usize) -> Option<TlbEntry> {
        let slot = self.slots.get_mut(index)?;
        if !slot.valid {
            return None;
        }
        let old = *slot;
        slot.valid = false;
        Some(old)
    }

    fn write_back(slot: &TlbEntry, table: &mut PageTable) -> VmResult<()> {
        if slot.valid {
            table.mark(slot.vpn, slot.used, slot.dirty)?;
        }
        Ok(())
    }

    /// Install a translation into the slot under the FIFO cursor
    ///
    /// A valid occupant is written back into `table` first. If `vpn` is
    /// already cached its slot is refreshed in place instead, so a page
    /// never occupies two slots. Returns the slot used.
    pub fn install(&mut self, entry: &TranslationEntry, table: &mut PageTable) -> VmResult<usize> {
        if let Some(index) = self.lookup(entry.vpn) {
            Self::write_back(&self.slots[index], table)?;
            let refreshed = table.translate(entry.vpn)?;
            self.slots[index] = TlbEntry::from_translation(refreshed);
            return Ok(index);
        }

        let index = self.cursor;
        Self::write_back(&self.slots[index], table)?;
        self.slots[index] = TlbEntry::from_translation(entry);
        self.cursor = (self.cursor + 1) % self.slots.len();
        Ok(index)
    }

    /// Install a translation into a specific slot
    ///
    /// Used when the eviction path already emptied a slot; the FIFO cursor
    /// does not move.
    pub fn install_at(&mut self, index: usize, entry: &TranslationEntry) -> VmResult<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(VmError::Config("TLB slot out of range"))?;
        *slot = TlbEntry::from_translation(entry);
        Ok(())
    }

    /// Write back every valid slot, then invalidate all (save state)
    pub fn flush(&mut self, table: &mut PageTable) -> VmResult<()> {
        for slot in self.slots.iter() {
            Self::write_back(slot, table)?;
        }
        self.invalidate_all();
        Ok(())
    }

    /// Invalidate every slot and reset the cursor (restore state)
    pub fn invalidate_all(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.valid = false;
        }
        self.cursor = 0;
    }

    /// Number of valid slots
    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|e| e.valid).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::page_table::{PageLocation, SegmentLayout};

    fn table() -> PageTable {
        let mut table = PageTable::new(SegmentLayout::new(2, 3, 3, 11).unwrap());
        for vpn in 0..11 {
            table.entry_mut(vpn).unwrap().location = PageLocation::Resident(vpn + 20);
        }
        table
    }

    fn install(tlb: &mut Tlb, table: &mut PageTable, vpn: usize) -> usize {
        let entry = *table.translate(vpn).unwrap();
        tlb.install(&entry, table).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_size() {
        assert!(Tlb::new(0).is_err());
        assert!(Tlb::new(MAX_TLB_SIZE + 1).is_err());
        assert_eq!(Tlb::new(4).unwrap().size(), 4);
    }

    #[test]
    fn test_fifo_rotation() {
        let mut tlb = Tlb::new(4).unwrap();
        let mut table = table();
        for (i, vpn) in [3, 4, 5, 6].into_iter().enumerate() {
            assert_eq!(install(&mut tlb, &mut table, vpn), i);
        }
        assert_eq!(tlb.cursor(), 0);
        // Fifth install replaces the oldest slot regardless of use
        tlb.access(3, false).unwrap();
        assert_eq!(install(&mut tlb, &mut table, 7), 0);
        assert_eq!(tlb.lookup(3), None);
        assert_eq!(tlb.lookup(7), Some(0));
        assert_eq!(tlb.cursor(), 1);
    }

    #[test]
    fn test_overwrite_writes_back_bits() {
        let mut tlb = Tlb::new(1).unwrap();
        let mut table = table();
        install(&mut tlb, &mut table, 4);
        assert_eq!(tlb.access(4, true).unwrap(), Some(24));
        assert!(!table.translate(4).unwrap().dirty);

        install(&mut tlb, &mut table, 5);
        let entry = table.translate(4).unwrap();
        assert!(entry.dirty);
        assert!(entry.used);
    }

    #[test]
    fn test_access_miss_and_read_only() {
        let mut tlb = Tlb::new(2).unwrap();
        let mut table = table();
        assert_eq!(tlb.access(0, false).unwrap(), None);
        table.entry_mut(0).unwrap().read_only = true;
        install(&mut tlb, &mut table, 0);
        assert_eq!(tlb.access(0, false).unwrap(), Some(20));
        assert_eq!(tlb.access(0, true), Err(VmError::ReadOnly(0)));
    }

    #[test]
    fn test_reinstall_refreshes_in_place() {
        let mut tlb = Tlb::new(4).unwrap();
        let mut table = table();
        install(&mut tlb, &mut table, 8);
        tlb.access(8, true).unwrap();
        install(&mut tlb, &mut table, 9);
        assert_eq!(install(&mut tlb, &mut table, 8), 0);
        assert_eq!(tlb.valid_count(), 2);
        assert_eq!(tlb.cursor(), 2);
        assert!(tlb.slot(0).unwrap().dirty);
    }

    #[test]
    fn test_flush_and_invalidate() {
        let mut tlb = Tlb::new(4).unwrap();
        let mut table = table();
        install(&mut tlb, &mut table, 3);
        install(&mut tlb, &mut table, 4);
        tlb.access(4, true).unwrap();
        tlb.flush(&mut table).unwrap();
        assert_eq!(tlb.valid_count(), 0);
        assert_eq!(tlb.cursor(), 0);
        assert!(table.translate(4).unwrap().dirty);
        assert!(!table.translate(3).unwrap().used);
    }

    #[test]
    fn test_find_frame_and_invalidate() {
        let mut tlb = Tlb::new(4).unwrap();
        let mut table = table();
        install(&mut tlb, &mut table, 5);
        let slot = tlb.find_frame(25).unwrap();
        let old = tlb.invalidate(slot).unwrap();
        assert_eq!(old.vpn, 5);
        assert_eq!(tlb.find_frame(25), None);
        assert_eq!(tlb.invalidate(slot), None);
    }
}
