//! Page Table - Per-Process Translation Entries
//!
//! A linear page table: one [`TranslationEntry`] per virtual page of the
//! address space. The table is the source of truth for where a page lives;
//! the TLB only caches a subset of it.
//!
//! ## Segment layout
//!
//! Segment boundaries are cumulative page offsets:
//!
//! ```text
//! [0, code_end)          code
//! [code_end, data_end)   initialized data
//! [data_end, bss_end)    uninitialized data
//! [bss_end, num_pages)   stack
//! ```

use alloc::vec::Vec;

use crate::error::{VmError, VmResult};

// ============================================================================
// Page Location
// ============================================================================

/// Where the contents of a virtual page currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageLocation {
    /// Never loaded, or discarded while clean
    #[default]
    Unbacked,
    /// Resident in a physical frame
    Resident(usize),
    /// Paged out to a swap slot
    Swapped(usize),
}

// ============================================================================
// Translation Entry
// ============================================================================

/// Translation for one virtual page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// Virtual page number
    pub vpn: usize,
    /// Current location of the page contents
    pub location: PageLocation,
    /// Contents diverge from the executable image and must be preserved
    pub dirty: bool,
    /// Referenced since the bit was last cleared
    pub used: bool,
    /// Writes fault
    pub read_only: bool,
}

impl TranslationEntry {
    /// Create an unbacked entry
    pub const fn new(vpn: usize) -> Self {
        Self {
            vpn,
            location: PageLocation::Unbacked,
            dirty: false,
            used: false,
            read_only: false,
        }
    }

    /// Check if the page is resident in a frame
    pub fn is_valid(&self) -> bool {
        matches!(self.location, PageLocation::Resident(_))
    }

    /// Frame holding the page, if resident
    pub fn frame(&self) -> Option<usize> {
        match self.location {
            PageLocation::Resident(frame) => Some(frame),
            _ => None,
        }
    }

    /// Swap slot holding the page, if swapped out
    pub fn swap_slot(&self) -> Option<usize> {
        match self.location {
            PageLocation::Swapped(slot) => Some(slot),
            _ => None,
        }
    }
}

// ============================================================================
// Segments
// ============================================================================

/// Segment a virtual page belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// Program text, fetched from the image
    Code,
    /// Initialized data, fetched from the image
    InitData,
    /// Uninitialized data, zero-filled
    UninitData,
    /// User stack, zero-filled
    Stack,
}

impl Segment {
    /// Check if pages of this segment are read from the executable image
    pub fn is_image_backed(&self) -> bool {
        matches!(self, Segment::Code | Segment::InitData)
    }
}

/// Segment boundaries of an address space, in pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    /// First page past the code segment
    pub code_end: usize,
    /// First page past the initialized data segment
    pub data_end: usize,
    /// First page past the uninitialized data segment (stack start)
    pub bss_end: usize,
    /// Total pages in the address space
    pub num_pages: usize,
}

impl SegmentLayout {
    /// Build a layout; boundaries must be monotonic
    pub fn new(code_end: usize, data_end: usize, bss_end: usize, num_pages: usize) -> VmResult<Self> {
        if code_end > data_end || data_end > bss_end || bss_end > num_pages {
            return Err(VmError::Config("segment boundaries are not monotonic"));
        }
        Ok(Self {
            code_end,
            data_end,
            bss_end,
            num_pages,
        })
    }

    /// Classify a virtual page
    pub fn classify(&self, vpn: usize) -> VmResult<Segment> {
        if vpn < self.code_end {
            Ok(Segment::Code)
        } else if vpn < self.data_end {
            Ok(Segment::InitData)
        } else if vpn < self.bss_end {
            Ok(Segment::UninitData)
        } else if vpn < self.num_pages {
            Ok(Segment::Stack)
        } else {
            Err(VmError::AddressOutOfRange {
                vpn,
                num_pages: self.num_pages,
            })
        }
    }
}

// ============================================================================
// Page Table
// ============================================================================

/// Linear page table of one address space
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<TranslationEntry>,
    layout: SegmentLayout,
}

impl PageTable {
    /// Create a table with every entry unbacked
    pub fn new(layout: SegmentLayout) -> Self {
        Self {
            entries: (0..layout.num_pages).map(TranslationEntry::new).collect(),
            layout,
        }
    }

    /// Segment boundaries
    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    /// Number of pages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no pages
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn out_of_range(&self, vpn: usize) -> VmError {
        VmError::AddressOutOfRange {
            vpn,
            num_pages: self.entries.len(),
        }
    }

    /// Look up the entry for a virtual page
    pub fn translate(&self, vpn: usize) -> VmResult<&TranslationEntry> {
        self.entries.get(vpn).ok_or_else(|| self.out_of_range(vpn))
    }

    /// Mutable entry lookup
    pub fn entry_mut(&mut self, vpn: usize) -> VmResult<&mut TranslationEntry> {
        let err = self.out_of_range(vpn);
        self.entries.get_mut(vpn).ok_or(err)
    }

    /// Persist hardware-accumulated bits from a TLB slot
    ///
    /// `used` is copied as is; `dirty` is sticky.
    pub fn mark(&mut self, vpn: usize, used: bool, dirty: bool) -> VmResult<()> {
        let entry = self.entry_mut(vpn)?;
        entry.used = used;
        entry.dirty |= dirty;
        Ok(())
    }

    /// Classify a virtual page by segment
    pub fn segment_of(&self, vpn: usize) -> VmResult<Segment> {
        self.layout.classify(vpn)
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }

    /// Number of resident pages
    pub fn resident_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_valid()).count()
    }
}
