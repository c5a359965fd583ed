//! nachos_vm - Demand-paging virtual memory for a teaching operating system
//!
//! This crate multiplexes one simulated physical memory among user address
//! spaces: per-process page tables, a frame allocator, a frame directory
//! (inverted page table), a FIFO-refilled TLB and a swap area on a backing
//! store. Pages are loaded lazily from the executable image, zero-filled, or
//! read back from swap when a TLB miss traps into the fault handler.
//!
//! The library is `no_std` + `alloc`. The `std` feature adds a host file
//! backed store, stderr debug output and the `nachos-vm` binary.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
// Page and slot arithmetic reads clearer with explicit casts
#![allow(clippy::unnecessary_cast)]

extern crate alloc;

#[macro_use]
pub mod console;

pub mod config;
pub mod error;
pub mod types;
pub mod vm;

pub use config::VmConfig;
pub use error::{Severity, StoreError, VmError, VmResult};
pub use types::{FrameOwner, SpaceId};
pub use vm::{BackingStore, FaultKind, FaultOutcome, Machine, MemStore, SharedMachine, StatsSnapshot};

#[cfg(feature = "std")]
pub use vm::FileStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
