//! Demand-Paging Virtual Memory
//!
//! Provides the paging engine of the simulated machine:
//! - bitmap: free frame and swap slot allocation
//! - page_table: per-space translation entries and segment layout
//! - directory: frame-indexed owners (inverted page table)
//! - tlb: FIFO-refilled translation cache
//! - swap: paging area on a backing store
//! - noff: executable header
//! - addr_space: per-process address space
//! - fault: page fault handler, eviction and statistics
//! - machine: the services tied together

pub mod addr_space;
pub mod bitmap;
pub mod directory;
pub mod fault;
pub mod machine;
pub mod memory;
pub mod noff;
pub mod page_table;
pub mod store;
pub mod swap;
pub mod tlb;

pub use addr_space::AddrSpace;
pub use bitmap::BitmapAllocator;
pub use directory::FrameDirectory;
pub use fault::{Eviction, FaultKind, FaultOutcome, StatsSnapshot, VmStats};
pub use machine::{Machine, SharedMachine};
pub use memory::PhysicalMemory;
pub use noff::{NoffHeader, NoffSegment, NOFF_HEADER_SIZE, NOFF_MAGIC};
pub use page_table::{PageLocation, PageTable, Segment, SegmentLayout, TranslationEntry};
#[cfg(feature = "std")]
pub use store::FileStore;
pub use store::{BackingStore, MemStore};
pub use swap::SwapSpace;
pub use tlb::{Tlb, TlbEntry};
