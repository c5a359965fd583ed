//! Machine - Paging State of the Simulated Computer
//!
//! Owns every shared paging service: physical memory, the frame allocator,
//! the frame directory, the TLB, swap, the victim cursor and the address
//! spaces. All of it is manipulated through `&mut self`, so one fault runs
//! to completion before the next begins. [`SharedMachine`] puts the whole
//! machine behind a single spin lock for callers on several threads.
//!
//! ## Access path
//!
//! ```text
//! read_byte / write_byte
//!        |
//!        v
//!   Tlb::access --hit--> physical memory
//!        |
//!       miss
//!        v
//!   page_fault (fault.rs) --> Tlb::access (retry once)
//! ```

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use core::fmt::Write;

use spin::{Mutex, MutexGuard};

use crate::config::VmConfig;
use crate::console;
use crate::error::{VmError, VmResult};
use crate::types::{FrameOwner, SpaceId};
use crate::vm::addr_space::AddrSpace;
use crate::vm::bitmap::BitmapAllocator;
use crate::vm::directory::FrameDirectory;
use crate::vm::fault::{StatsSnapshot, VmStats};
use crate::vm::memory::PhysicalMemory;
use crate::vm::page_table::PageLocation;
use crate::vm::store::BackingStore;
use crate::vm::swap::SwapSpace;
use crate::vm::tlb::Tlb;

// ============================================================================
// Machine
// ============================================================================

/// Paging state of the simulated machine
#[derive(Debug)]
pub struct Machine {
    pub(crate) config: VmConfig,
    pub(crate) memory: PhysicalMemory,
    /// Free-frame bitmap
    pub(crate) frames: BitmapAllocator,
    /// Inverted page table
    pub(crate) directory: FrameDirectory,
    pub(crate) tlb: Tlb,
    pub(crate) swap: SwapSpace,
    pub(crate) spaces: BTreeMap<SpaceId, AddrSpace>,
    /// Space whose translations the TLB caches
    pub(crate) current: Option<SpaceId>,
    /// Next FIFO eviction victim
    pub(crate) victim_cursor: usize,
    next_space: u32,
    pub(crate) stats: VmStats,
}

impl Machine {
    /// Build a machine with empty memory and `swap_store` as paging area
    ///
    /// `config.debug_flags` are switched on in the process-wide console.
    /// Flags only accumulate: a later machine built with fewer flags does
    /// not turn off the ones an earlier machine enabled.
    pub fn new(config: VmConfig, swap_store: Box<dyn BackingStore>) -> VmResult<Self> {
        config.validate()?;
        console::enable(config.debug_flags);

        let tlb = Tlb::new(config.tlb_size)?;
        Ok(Self {
            memory: PhysicalMemory::new(config.num_frames, config.page_size),
            frames: BitmapAllocator::new(config.num_frames),
            directory: FrameDirectory::new(config.num_frames),
            tlb,
            swap: SwapSpace::new(swap_store, config.swap_slots, config.page_size),
            spaces: BTreeMap::new(),
            current: None,
            victim_cursor: 0,
            next_space: 1,
            stats: VmStats::new(),
            config,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Address space by id
    pub fn space(&self, id: SpaceId) -> VmResult<&AddrSpace> {
        self.spaces.get(&id).ok_or(VmError::UnknownSpace(id))
    }

    /// Running address space
    pub fn current(&self) -> Option<SpaceId> {
        self.current
    }

    /// Number of live address spaces
    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    /// Frames not holding any page
    pub fn free_frames(&self) -> usize {
        self.frames.free()
    }

    /// Swap slots holding pages
    pub fn swap_slots_used(&self) -> usize {
        self.swap.used_slots()
    }

    /// Frame the FIFO policy will evict next
    pub fn victim_cursor(&self) -> usize {
        self.victim_cursor
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    pub fn directory(&self) -> &FrameDirectory {
        &self.directory
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // Address space lifecycle
    // ========================================================================

    /// Create an address space for an executable image
    ///
    /// With demand paging disabled every page is mapped and loaded now;
    /// running out of frames is `OutOfMemory` and nothing is left behind.
    pub fn create_space(&mut self, executable: Box<dyn BackingStore>) -> VmResult<SpaceId> {
        let id = SpaceId(self.next_space);
        let space = AddrSpace::load(id, executable, &self.config)?;
        self.next_space += 1;
        self.spaces.insert(id, space);

        if !self.config.demand_paging {
            if let Err(e) = self.map_eagerly(id) {
                self.destroy_space(id)?;
                return Err(e);
            }
        }
        Ok(id)
    }

    fn map_eagerly(&mut self, id: SpaceId) -> VmResult<()> {
        let num_pages = self.space(id)?.num_pages();
        if num_pages > self.frames.free() {
            return Err(VmError::OutOfMemory);
        }
        for vpn in 0..num_pages {
            let frame = self.frames.acquire().ok_or(VmError::OutOfMemory)?;
            self.fill_frame(id, vpn, frame)?;
        }
        crate::vm_debug!(console::ADDRSPACE, "{}: {} pages mapped eagerly", id, num_pages);
        Ok(())
    }

    /// Tear down an address space, returning its frames and swap slots
    pub fn destroy_space(&mut self, id: SpaceId) -> VmResult<()> {
        let space = self.spaces.remove(&id).ok_or(VmError::UnknownSpace(id))?;
        if self.current == Some(id) {
            self.tlb.invalidate_all();
            self.current = None;
        }

        for entry in space.page_table().iter() {
            match entry.location {
                PageLocation::Resident(frame) => {
                    if self.directory.release(frame) != Some(FrameOwner::new(id, entry.vpn)) {
                        return Err(VmError::DirectoryInconsistent(frame));
                    }
                    self.memory.zero_frame(frame);
                    self.frames.release(frame);
                }
                PageLocation::Swapped(slot) => {
                    self.swap.discard(slot);
                }
                PageLocation::Unbacked => {}
            }
        }
        crate::vm_debug!(console::ADDRSPACE, "{}: destroyed", id);
        Ok(())
    }

    /// Make `id` the running address space
    ///
    /// The outgoing space's TLB bits are written back to its page table,
    /// then every slot is invalidated.
    pub fn switch_to(&mut self, id: SpaceId) -> VmResult<()> {
        if !self.spaces.contains_key(&id) {
            return Err(VmError::UnknownSpace(id));
        }
        if let Some(old) = self.current {
            if let Some(space) = self.spaces.get_mut(&old) {
                self.tlb.flush(space.page_table_mut())?;
            }
        }
        self.tlb.invalidate_all();
        self.current = Some(id);
        crate::vm_debug!(console::CONTEXT, "switch to {}", id);
        Ok(())
    }

    // ========================================================================
    // Memory access
    // ========================================================================

    /// Translate a virtual address of the running space
    ///
    /// A TLB miss traps into [`Machine::page_fault`] and the lookup is
    /// retried once.
    pub fn translate(&mut self, vaddr: usize, write: bool) -> VmResult<usize> {
        let page_size = self.config.page_size;
        let (vpn, offset) = (vaddr / page_size, vaddr % page_size);
        let frame = match self.tlb.access(vpn, write)? {
            Some(frame) => frame,
            None => {
                let outcome = self.page_fault(vpn)?;
                self.tlb.access(vpn, write)?.unwrap_or(outcome.frame)
            }
        };
        Ok(self.memory.frame_to_address(frame) + offset)
    }

    pub fn read_byte(&mut self, vaddr: usize) -> VmResult<u8> {
        let paddr = self.translate(vaddr, false)?;
        Ok(self.memory.read(paddr))
    }

    pub fn write_byte(&mut self, vaddr: usize, value: u8) -> VmResult<()> {
        let paddr = self.translate(vaddr, true)?;
        self.memory.write(paddr, value);
        Ok(())
    }

    pub fn read_bytes(&mut self, vaddr: usize, buf: &mut [u8]) -> VmResult<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(vaddr + i)?;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, vaddr: usize, data: &[u8]) -> VmResult<()> {
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(vaddr + i, byte)?;
        }
        Ok(())
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Verify that bitmap, directory, page tables, swap and TLB agree
    pub fn check_invariants(&self) -> VmResult<()> {
        for frame in 0..self.directory.len() {
            let owned = self.directory.owner(frame);
            if owned.is_some() != self.frames.test(frame) {
                return Err(VmError::DirectoryInconsistent(frame));
            }
            if let Some(owner) = owned {
                let entry = self
                    .spaces
                    .get(&owner.space)
                    .and_then(|space| space.page_table().translate(owner.vpn).ok())
                    .ok_or(VmError::DirectoryInconsistent(frame))?;
                if entry.frame() != Some(frame) {
                    return Err(VmError::DirectoryInconsistent(frame));
                }
            }
        }

        let mut swapped = BTreeSet::new();
        for (&id, space) in &self.spaces {
            for entry in space.page_table().iter() {
                match entry.location {
                    PageLocation::Resident(frame) => {
                        if self.directory.owner(frame) != Some(FrameOwner::new(id, entry.vpn)) {
                            return Err(VmError::DirectoryInconsistent(frame));
                        }
                    }
                    PageLocation::Swapped(slot) => {
                        if !entry.dirty {
                            return Err(VmError::Invariant("swapped page is not dirty"));
                        }
                        if !self.swap.is_allocated(slot) {
                            return Err(VmError::Invariant("page refers to a free swap slot"));
                        }
                        if !swapped.insert(slot) {
                            return Err(VmError::Invariant("swap slot shared by two pages"));
                        }
                    }
                    PageLocation::Unbacked => {}
                }
            }
        }
        if self.swap.iter_used().any(|slot| !swapped.contains(&slot)) {
            return Err(VmError::Invariant("allocated swap slot without an owner"));
        }

        if let Some(id) = self.current {
            let table = self.space(id)?.page_table();
            for slot in self.tlb.iter().filter(|slot| slot.valid) {
                let entry = table.translate(slot.vpn)?;
                if entry.frame() != Some(slot.frame) {
                    return Err(VmError::Invariant("TLB slot disagrees with page table"));
                }
            }
        } else if self.tlb.valid_count() != 0 {
            return Err(VmError::Invariant("TLB holds entries with no running space"));
        }
        Ok(())
    }

    // ========================================================================
    // Debug dumps
    // ========================================================================

    /// Render the TLB, one slot per line
    pub fn dump_tlb(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "TLB (cursor {}):", self.tlb.cursor());
        for (i, slot) in self.tlb.iter().enumerate() {
            if slot.valid {
                let _ = writeln!(
                    out,
                    "  [{}] vpn {:>4} -> frame {:>3}{}{}{}",
                    i,
                    slot.vpn,
                    slot.frame,
                    if slot.used { " U" } else { "" },
                    if slot.dirty { " D" } else { "" },
                    if slot.read_only { " RO" } else { "" }
                );
            } else {
                let _ = writeln!(out, "  [{}] invalid", i);
            }
        }
        out
    }

    /// Render the occupied frames of the frame directory
    pub fn dump_directory(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Frames ({} of {} used, next victim {}):",
            self.directory.occupied(),
            self.directory.len(),
            self.victim_cursor
        );
        for (frame, owner) in self.directory.iter() {
            let _ = writeln!(out, "  frame {:>3}: {} vpn {}", frame, owner.space, owner.vpn);
        }
        out
    }

    /// Render one address space's page table
    pub fn dump_page_table(&self, id: SpaceId) -> VmResult<String> {
        let table = self.space(id)?.page_table();
        let layout = table.layout();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} page table: code [0, {}) data [{}, {}) bss [{}, {}) stack [{}, {})",
            id,
            layout.code_end,
            layout.code_end,
            layout.data_end,
            layout.data_end,
            layout.bss_end,
            layout.bss_end,
            layout.num_pages
        );
        for entry in table.iter() {
            let location = match entry.location {
                PageLocation::Unbacked => String::from("-"),
                PageLocation::Resident(frame) => alloc::format!("frame {}", frame),
                PageLocation::Swapped(slot) => alloc::format!("swap {}", slot),
            };
            let _ = writeln!(
                out,
                "  vpn {:>4}: {:<10}{}{}{}",
                entry.vpn,
                location,
                if entry.used { " U" } else { "" },
                if entry.dirty { " D" } else { "" },
                if entry.read_only { " RO" } else { "" }
            );
        }
        Ok(out)
    }
}

// ============================================================================
// Shared Machine
// ============================================================================

/// A machine behind one lock
///
/// Every fault, context switch and teardown holds the lock for its whole
/// duration.
#[derive(Debug)]
pub struct SharedMachine {
    inner: Mutex<Machine>,
}

impl SharedMachine {
    pub fn new(machine: Machine) -> Self {
        Self {
            inner: Mutex::new(machine),
        }
    }

    /// Lock the machine
    pub fn lock(&self) -> MutexGuard<'_, Machine> {
        self.inner.lock()
    }

    /// Run `f` with the machine locked
    pub fn with<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> Machine {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::noff::{NoffHeader, NoffSegment, NOFF_HEADER_SIZE};
    use crate::vm::store::MemStore;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    fn image(code: u32, data: u32, bss: u32) -> Vec<u8> {
        let base = NOFF_HEADER_SIZE as u32;
        let header = NoffHeader {
            code: NoffSegment::new(0, base, code),
            init_data: NoffSegment::new(code, base + code, data),
            uninit_data: NoffSegment::new(code + data, 0, bss),
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend((0..code + data).map(|i| (i % 251) as u8));
        bytes
    }

    fn machine(config: VmConfig) -> Machine {
        Machine::new(config, Box::new(MemStore::new())).unwrap()
    }

    fn load(machine: &mut Machine) -> SpaceId {
        machine
            .create_space(Box::new(MemStore::from_bytes(image(256, 128, 0))))
            .unwrap()
    }

    #[test]
    fn test_rejects_bad_config() {
        let result = Machine::new(VmConfig::default().with_tlb_size(0), Box::new(MemStore::new()));
        assert!(matches!(result, Err(VmError::Config(_))));
    }

    #[test]
    fn test_read_through_translation() {
        let mut machine = machine(VmConfig::default());
        let id = load(&mut machine);
        machine.switch_to(id).unwrap();

        let mut buf = [0u8; 4];
        machine.read_bytes(300, &mut buf).unwrap();
        assert_eq!(buf, [49, 50, 51, 52]);
        assert_eq!(machine.stats().tlb_misses, 1);

        machine.read_byte(301).unwrap();
        assert_eq!(machine.stats().tlb_misses, 1);
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_write_to_code_faults() {
        let mut machine = machine(VmConfig::default());
        let id = load(&mut machine);
        machine.switch_to(id).unwrap();
        assert_eq!(machine.write_byte(5, 1), Err(VmError::ReadOnly(0)));
        machine.write_bytes(256, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        machine.read_bytes(256, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut machine = machine(VmConfig::default());
        let id = load(&mut machine);
        machine.switch_to(id).unwrap();
        assert!(matches!(
            machine.read_byte(11 * 128),
            Err(VmError::AddressOutOfRange { vpn: 11, .. })
        ));
    }

    #[test]
    fn test_switch_flushes_bits() {
        let mut machine = machine(VmConfig::default());
        let a = load(&mut machine);
        let b = load(&mut machine);
        machine.switch_to(a).unwrap();
        machine.write_byte(9 * 128, 7).unwrap();
        assert!(!machine.space(a).unwrap().page_table().translate(9).unwrap().dirty);

        machine.switch_to(b).unwrap();
        assert!(machine.space(a).unwrap().page_table().translate(9).unwrap().dirty);
        assert_eq!(machine.tlb().valid_count(), 0);
        assert_eq!(machine.tlb().cursor(), 0);
        assert_eq!(machine.read_byte(9 * 128).unwrap(), 0);
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut machine = machine(VmConfig::default().with_frames(3));
        let id = load(&mut machine);
        machine.switch_to(id).unwrap();
        for vpn in 3..8 {
            machine.write_byte(vpn * 128, vpn as u8).unwrap();
        }
        assert!(machine.swap_slots_used() > 0);

        machine.destroy_space(id).unwrap();
        assert_eq!(machine.free_frames(), 3);
        assert_eq!(machine.swap_slots_used(), 0);
        assert_eq!(machine.directory().occupied(), 0);
        assert_eq!(machine.current(), None);
        assert!(machine.memory().frame(0).iter().all(|&b| b == 0));
        assert_eq!(machine.destroy_space(id), Err(VmError::UnknownSpace(id)));
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_eager_mapping() {
        let mut machine = machine(VmConfig::default().with_demand_paging(false));
        let id = load(&mut machine);
        assert_eq!(machine.space(id).unwrap().page_table().resident_count(), 11);
        assert_eq!(machine.free_frames(), 32 - 11);
        machine.switch_to(id).unwrap();
        assert_eq!(machine.read_byte(130).unwrap(), 130);
        assert_eq!(machine.stats().page_faults, 0);
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_eager_out_of_memory_leaves_nothing() {
        let mut machine = machine(VmConfig::default().with_frames(8).with_demand_paging(false));
        let err = machine
            .create_space(Box::new(MemStore::from_bytes(image(256, 128, 0))))
            .unwrap_err();
        assert_eq!(err, VmError::OutOfMemory);
        assert_eq!(machine.space_count(), 0);
        assert_eq!(machine.free_frames(), 8);
    }

    #[test]
    fn test_swap_slot_ownership_checked() {
        let mut machine = machine(VmConfig::default().with_frames(1));
        let id = load(&mut machine);
        machine.switch_to(id).unwrap();
        machine.write_byte(3 * 128, 1).unwrap();
        machine.write_byte(4 * 128, 2).unwrap();
        machine.check_invariants().unwrap();

        let table = machine.spaces.get_mut(&id).unwrap().page_table_mut();
        let entry = table.entry_mut(5).unwrap();
        entry.location = PageLocation::Swapped(0);
        entry.dirty = true;
        assert_eq!(
            machine.check_invariants(),
            Err(VmError::Invariant("swap slot shared by two pages"))
        );

        let table = machine.spaces.get_mut(&id).unwrap().page_table_mut();
        table.entry_mut(3).unwrap().location = PageLocation::Unbacked;
        table.entry_mut(5).unwrap().location = PageLocation::Unbacked;
        assert_eq!(
            machine.check_invariants(),
            Err(VmError::Invariant("allocated swap slot without an owner"))
        );
    }

    #[test]
    fn test_debug_flags_accumulate() {
        // 'R' is not used by any other test
        let _first = machine(VmConfig::default().with_debug_flags("R"));
        assert!(console::enabled('R'));
        let _second = machine(VmConfig::default());
        assert!(console::enabled('R'));
    }

    #[test]
    fn test_dumps() {
        let mut machine = machine(VmConfig::default());
        let id = load(&mut machine);
        machine.switch_to(id).unwrap();
        machine.write_byte(10 * 128, 1).unwrap();
        assert!(machine.dump_tlb().contains("vpn   10 -> frame   0 U D"));
        assert!(machine.dump_directory().contains("frame   0: as1 vpn 10"));
        let table = machine.dump_page_table(id).unwrap();
        assert!(table.contains("stack [3, 11)"));
        assert!(table.contains("vpn    0: -"));
    }

    #[test]
    fn test_shared_machine_serializes_faults() {
        let mut inner = machine(VmConfig::default().with_frames(4));
        let id = load(&mut inner);
        inner.switch_to(id).unwrap();
        let shared = Arc::new(SharedMachine::new(inner));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for vpn in 3..11 {
                        shared
                            .with(|m| m.write_byte(vpn * 128 + t, t as u8 + 1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(shared.lock().space(id).unwrap().page_table().resident_count() <= 4);

        let mut machine = Arc::try_unwrap(shared).unwrap().into_inner();
        machine.check_invariants().unwrap();
        for t in 0..4 {
            assert_eq!(machine.read_byte(5 * 128 + t).unwrap(), t as u8 + 1);
        }
    }
}
