//! Page Fault Handler
//!
//! Services TLB misses for the running address space. Depending on where
//! the faulting page lives, the handler either refreshes the TLB (page
//! already resident), demand-loads it from the executable or zero-fills it
//! (unbacked), or pages it back in from swap.
//!
//! ## Frame replacement
//!
//! When the frame allocator is empty a victim is chosen by a global FIFO
//! cursor over physical frames. The frame directory names the victim's
//! owner. Dirty victims are written to swap; clean victims are dropped and
//! re-fetched from their source on the next fault. If the victim belongs to
//! the running space and sits in the TLB, its hardware bits are folded back
//! into its page table entry and the freed TLB slot is handed to the
//! faulting page.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::console;
use crate::error::{VmError, VmResult};
use crate::types::{FrameOwner, SpaceId};
use crate::vm::machine::Machine;
use crate::vm::page_table::PageLocation;

// ============================================================================
// Statistics
// ============================================================================

/// Paging statistics counters
#[derive(Debug, Default)]
pub struct VmStats {
    /// Traps into the fault handler
    pub tlb_misses: AtomicU64,
    /// Faults that had to move a page into memory
    pub page_faults: AtomicU64,
    /// Pages read from an executable image
    pub image_loads: AtomicU64,
    /// Pages zero-filled
    pub zero_fills: AtomicU64,
    /// Pages read back from swap
    pub swap_ins: AtomicU64,
    /// Pages written to swap
    pub swap_outs: AtomicU64,
    /// Clean victims dropped without I/O
    pub discards: AtomicU64,
    /// Frames reclaimed by eviction
    pub evictions: AtomicU64,
    /// TLB slots inherited from an evicted page
    pub tlb_victim_reuses: AtomicU64,
}

/// Point-in-time copy of [`VmStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub tlb_misses: u64,
    pub page_faults: u64,
    pub image_loads: u64,
    pub zero_fills: u64,
    pub swap_ins: u64,
    pub swap_outs: u64,
    pub discards: u64,
    pub evictions: u64,
    pub tlb_victim_reuses: u64,
}

impl VmStats {
    pub const fn new() -> Self {
        Self {
            tlb_misses: AtomicU64::new(0),
            page_faults: AtomicU64::new(0),
            image_loads: AtomicU64::new(0),
            zero_fills: AtomicU64::new(0),
            swap_ins: AtomicU64::new(0),
            swap_outs: AtomicU64::new(0),
            discards: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            tlb_victim_reuses: AtomicU64::new(0),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tlb_misses: self.tlb_misses.load(Ordering::Relaxed),
            page_faults: self.page_faults.load(Ordering::Relaxed),
            image_loads: self.image_loads.load(Ordering::Relaxed),
            zero_fills: self.zero_fills.load(Ordering::Relaxed),
            swap_ins: self.swap_ins.load(Ordering::Relaxed),
            swap_outs: self.swap_outs.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            tlb_victim_reuses: self.tlb_victim_reuses.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Fault Outcome
// ============================================================================

/// How a fault was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Page was resident; only the TLB was refilled
    Hit,
    /// Page read from the executable image
    LoadedFromImage,
    /// Page zero-filled
    ZeroFilled,
    /// Page read back from swap
    SwappedIn,
}

/// A page pushed out of memory to make room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    /// Frame that was reclaimed
    pub frame: usize,
    /// Page that occupied it
    pub owner: FrameOwner,
    /// Swap slot the page was written to; `None` if it was clean
    pub swapped_to: Option<usize>,
}

/// Result of servicing one fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultOutcome {
    pub kind: FaultKind,
    /// Frame now holding the page
    pub frame: usize,
    /// TLB slot holding the translation
    pub tlb_slot: usize,
    /// Victim evicted to obtain the frame
    pub evicted: Option<Eviction>,
}

/// A frame ready to receive a page
struct FreshFrame {
    frame: usize,
    reuse_slot: Option<usize>,
    evicted: Option<Eviction>,
}

// ============================================================================
// Fault Handling
// ============================================================================

impl Machine {
    /// Service a TLB miss on `vpn` of the running address space
    pub fn page_fault(&mut self, vpn: usize) -> VmResult<FaultOutcome> {
        let id = self.current.ok_or(VmError::NoCurrentSpace)?;
        VmStats::incr(&self.stats.tlb_misses);

        let entry = *self.space(id)?.page_table().translate(vpn)?;

        let (kind, fresh) = match entry.location {
            PageLocation::Resident(frame) => (
                FaultKind::Hit,
                FreshFrame {
                    frame,
                    reuse_slot: None,
                    evicted: None,
                },
            ),
            PageLocation::Unbacked => {
                let fresh = self.obtain_frame()?;
                let kind = self.fill_frame(id, vpn, fresh.frame)?;
                (kind, fresh)
            }
            PageLocation::Swapped(slot) => {
                let fresh = self.obtain_frame()?;
                if let Err(e) = self.swap.swap_in(slot, &mut self.memory, fresh.frame) {
                    self.abandon_frame(fresh.frame);
                    return Err(e);
                }
                VmStats::incr(&self.stats.swap_ins);
                self.map_frame(id, vpn, fresh.frame)?;
                (FaultKind::SwappedIn, fresh)
            }
        };

        if kind != FaultKind::Hit {
            VmStats::incr(&self.stats.page_faults);
        }

        let space = self.spaces.get_mut(&id).ok_or(VmError::UnknownSpace(id))?;
        let entry = *space.page_table().translate(vpn)?;
        let tlb_slot = match fresh.reuse_slot {
            Some(slot) => {
                self.tlb.install_at(slot, &entry)?;
                slot
            }
            None => self.tlb.install(&entry, space.page_table_mut())?,
        };

        crate::vm_debug!(
            console::PAGING,
            "{}: vpn {} {:?} -> frame {}, tlb slot {}",
            id,
            vpn,
            kind,
            fresh.frame,
            tlb_slot
        );

        Ok(FaultOutcome {
            kind,
            frame: fresh.frame,
            tlb_slot,
            evicted: fresh.evicted,
        })
    }

    /// Load a page that has never been resident (or was dropped while clean)
    ///
    /// The frame is zeroed first; image-backed pages are then read from the
    /// executable. If that read fails the frame goes back to the free pool
    /// and the page stays unbacked.
    pub(crate) fn fill_frame(&mut self, id: SpaceId, vpn: usize, frame: usize) -> VmResult<FaultKind> {
        self.memory.zero_frame(frame);
        let space = self.spaces.get_mut(&id).ok_or(VmError::UnknownSpace(id))?;
        let loaded = match space.load_page(vpn, &mut self.memory, frame) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.abandon_frame(frame);
                return Err(e);
            }
        };
        let kind = if loaded {
            VmStats::incr(&self.stats.image_loads);
            FaultKind::LoadedFromImage
        } else {
            VmStats::incr(&self.stats.zero_fills);
            FaultKind::ZeroFilled
        };
        self.map_frame(id, vpn, frame)?;
        Ok(kind)
    }

    /// Return a frame that never got an owner to the free pool
    fn abandon_frame(&mut self, frame: usize) {
        self.memory.zero_frame(frame);
        self.frames.release(frame);
    }

    /// Point a page at its new frame and record the owner
    fn map_frame(&mut self, id: SpaceId, vpn: usize, frame: usize) -> VmResult<()> {
        self.directory.claim(frame, FrameOwner::new(id, vpn))?;
        let space = self.spaces.get_mut(&id).ok_or(VmError::UnknownSpace(id))?;
        space.page_table_mut().entry_mut(vpn)?.location = PageLocation::Resident(frame);
        Ok(())
    }

    /// Take a free frame, evicting the FIFO victim when none is left
    fn obtain_frame(&mut self) -> VmResult<FreshFrame> {
        if let Some(frame) = self.frames.acquire() {
            return Ok(FreshFrame {
                frame,
                reuse_slot: None,
                evicted: None,
            });
        }

        let victim = self.victim_cursor;
        let (evicted, reuse_slot) = self.evict(victim)?;
        let frame = self
            .frames
            .acquire()
            .ok_or(VmError::DirectoryInconsistent(victim))?;
        Ok(FreshFrame {
            frame,
            reuse_slot,
            evicted: Some(evicted),
        })
    }

    /// Push the page in `frame` out of memory and free the frame
    ///
    /// Returns the eviction record and the TLB slot the victim vacated.
    fn evict(&mut self, frame: usize) -> VmResult<(Eviction, Option<usize>)> {
        let owner = self
            .directory
            .owner(frame)
            .ok_or(VmError::DirectoryInconsistent(frame))?;
        let space = self
            .spaces
            .get_mut(&owner.space)
            .ok_or(VmError::DirectoryInconsistent(frame))?;

        let mut reuse_slot = None;
        if self.current == Some(owner.space) {
            if let Some(index) = self.tlb.find_frame(frame) {
                if let Some(old) = self.tlb.invalidate(index) {
                    space.page_table_mut().mark(owner.vpn, old.used, old.dirty)?;
                }
                VmStats::incr(&self.stats.tlb_victim_reuses);
                reuse_slot = Some(index);
            }
        }

        let entry = space.page_table_mut().entry_mut(owner.vpn)?;
        if entry.frame() != Some(frame) {
            return Err(VmError::DirectoryInconsistent(frame));
        }

        let swapped_to = if entry.dirty {
            let slot = self.swap.swap_out(&self.memory, frame)?;
            entry.location = PageLocation::Swapped(slot);
            VmStats::incr(&self.stats.swap_outs);
            Some(slot)
        } else {
            entry.location = PageLocation::Unbacked;
            VmStats::incr(&self.stats.discards);
            None
        };

        self.memory.zero_frame(frame);
        self.directory.release(frame);
        self.frames.release(frame);
        self.victim_cursor = (self.victim_cursor + 1) % self.memory.num_frames();
        VmStats::incr(&self.stats.evictions);

        crate::vm_debug!(
            console::PAGING,
            "evict frame {} ({} vpn {}){}",
            frame,
            owner.space,
            owner.vpn,
            if swapped_to.is_some() { " to swap" } else { ", clean" }
        );

        Ok((
            Eviction {
                frame,
                owner,
                swapped_to,
            },
            reuse_slot,
        ))
    }
}
