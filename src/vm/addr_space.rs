//! Address Space
//!
//! One per user process: the page table, the segment layout derived from the
//! executable header, and the open executable used to fetch code and
//! initialized-data pages on demand.

use alloc::boxed::Box;

use crate::config::VmConfig;
use crate::console;
use crate::error::VmResult;
use crate::types::SpaceId;
use crate::vm::memory::PhysicalMemory;
use crate::vm::noff::{NoffHeader, NoffSegment};
use crate::vm::page_table::{PageTable, Segment, SegmentLayout};
use crate::vm::store::BackingStore;

/// A process's virtual address space
pub struct AddrSpace {
    id: SpaceId,
    page_table: PageTable,
    executable: Box<dyn BackingStore>,
    header: NoffHeader,
}

impl AddrSpace {
    /// Build an address space from an executable image
    ///
    /// Every entry starts unbacked. When code fills whole pages those pages
    /// are marked read-only.
    pub fn load(id: SpaceId, mut executable: Box<dyn BackingStore>, config: &VmConfig) -> VmResult<Self> {
        let header = NoffHeader::read_from(executable.as_mut())?;
        let layout = Self::layout_for(&header, config)?;
        let mut page_table = PageTable::new(layout);

        let code = header.code.size as usize;
        if code > 0 && code % config.page_size == 0 {
            for vpn in 0..layout.code_end {
                page_table.entry_mut(vpn)?.read_only = true;
            }
        }

        crate::vm_debug!(
            console::ADDRSPACE,
            "{}: {} pages (code {}, data {}, bss {}), {} bytes",
            id,
            layout.num_pages,
            layout.code_end,
            layout.data_end - layout.code_end,
            layout.bss_end - layout.data_end,
            layout.num_pages * config.page_size
        );

        Ok(Self {
            id,
            page_table,
            executable,
            header,
        })
    }

    /// Segment boundaries for a header plus the stack allowance
    pub fn layout_for(header: &NoffHeader, config: &VmConfig) -> VmResult<SegmentLayout> {
        let code_end = config.pages_for(header.code.size as usize);
        let data_end = code_end + config.pages_for(header.init_data.size as usize);
        let bss_end = data_end + config.pages_for(header.uninit_data.size as usize);
        let num_pages = config
            .pages_for(header.image_size() + config.user_stack_size)
            .max(bss_end);
        SegmentLayout::new(code_end, data_end, bss_end, num_pages)
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn header(&self) -> &NoffHeader {
        &self.header
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    /// Number of virtual pages
    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    /// Bytes of virtual address space
    pub fn size(&self, page_size: usize) -> usize {
        self.page_table.len() * page_size
    }

    fn image_segment(&self, segment: Segment) -> Option<&NoffSegment> {
        match segment {
            Segment::Code => Some(&self.header.code),
            Segment::InitData => Some(&self.header.init_data),
            Segment::UninitData | Segment::Stack => None,
        }
    }

    /// Fill a zeroed frame with a page's contents from the executable
    ///
    /// The file offset follows the page's virtual address relative to the
    /// segment's, so segments that start mid-page land where the image put
    /// them. A page that begins below its segment is filled from the segment
    /// start onward. A full page is read even when the segment ends
    /// mid-page; bytes past the end of the image stay zero. Returns `false`
    /// for pages that are not image-backed; the frame is left zeroed.
    pub fn load_page(&mut self, vpn: usize, memory: &mut PhysicalMemory, frame: usize) -> VmResult<bool> {
        let segment = self.page_table.segment_of(vpn)?;
        let Some(desc) = self.image_segment(segment).copied() else {
            return Ok(false);
        };

        let page_size = memory.page_size();
        let page_start = vpn * page_size;
        let segment_start = desc.virtual_addr as usize;
        let skip = segment_start.saturating_sub(page_start).min(page_size);
        let offset = desc.in_file_addr as u64 + page_start.saturating_sub(segment_start) as u64;

        let read = self.executable.read_at(&mut memory.frame_mut(frame)[skip..], offset)?;
        crate::vm_debug!(
            console::ADDRSPACE,
            "{}: vpn {} <- image offset {} ({} bytes)",
            self.id,
            vpn,
            offset,
            read
        );
        Ok(true)
    }
}

impl core::fmt::Debug for AddrSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddrSpace")
            .field("id", &self.id)
            .field("layout", self.page_table.layout())
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
