//! Machine configuration
//!
//! Sizes of the simulated machine and the switches that select between
//! demand paging and the eager fallback.

use crate::error::{VmError, VmResult};

// ============================================================================
// Machine Constants
// ============================================================================

/// Bytes per page (and per frame, and per disk sector)
pub const PAGE_SIZE: usize = 128;

/// Physical frames in main memory
pub const NUM_PHYS_PAGES: usize = 32;

/// Hardware TLB slots
pub const TLB_SIZE: usize = 4;

/// Upper bound on TLB slots (capacity of the fixed TLB array)
pub const MAX_TLB_SIZE: usize = 64;

/// Page-sized slots in the swap store
pub const SWAP_SLOTS: usize = 64;

/// Bytes reserved for the user stack at the top of every address space
pub const USER_STACK_SIZE: usize = 1024;

// ============================================================================
// VmConfig
// ============================================================================

/// Configuration of the VM subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Page and frame size in bytes
    pub page_size: usize,
    /// Number of physical frames
    pub num_frames: usize,
    /// Number of TLB slots
    pub tlb_size: usize,
    /// Number of swap slots
    pub swap_slots: usize,
    /// Stack allowance added to every address space
    pub user_stack_size: usize,
    /// Load pages lazily on fault; when false every page is mapped at load time
    pub demand_paging: bool,
    /// Debug flags to enable (see [`crate::console`])
    pub debug_flags: &'static str,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            num_frames: NUM_PHYS_PAGES,
            tlb_size: TLB_SIZE,
            swap_slots: SWAP_SLOTS,
            user_stack_size: USER_STACK_SIZE,
            demand_paging: true,
            debug_flags: "",
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn with_tlb_size(mut self, tlb_size: usize) -> Self {
        self.tlb_size = tlb_size;
        self
    }

    pub fn with_swap_slots(mut self, swap_slots: usize) -> Self {
        self.swap_slots = swap_slots;
        self
    }

    pub fn with_stack_size(mut self, user_stack_size: usize) -> Self {
        self.user_stack_size = user_stack_size;
        self
    }

    pub fn with_demand_paging(mut self, enabled: bool) -> Self {
        self.demand_paging = enabled;
        self
    }

    pub fn with_debug_flags(mut self, flags: &'static str) -> Self {
        self.debug_flags = flags;
        self
    }

    /// Size of physical memory in bytes
    pub fn memory_size(&self) -> usize {
        self.num_frames * self.page_size
    }

    /// Number of pages needed to hold `bytes`
    pub fn pages_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.page_size)
    }

    /// Check the configuration before building a machine
    pub fn validate(&self) -> VmResult<()> {
        if self.page_size == 0 {
            return Err(VmError::Config("page size must be non-zero"));
        }
        if self.num_frames == 0 {
            return Err(VmError::Config("machine needs at least one frame"));
        }
        if self.tlb_size == 0 || self.tlb_size > MAX_TLB_SIZE {
            return Err(VmError::Config("TLB size must be in 1..=64"));
        }
        if self.swap_slots == 0 {
            return Err(VmError::Config("swap needs at least one slot"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.page_size, 128);
        assert_eq!(config.num_frames, 32);
        assert_eq!(config.tlb_size, 4);
        assert!(config.demand_paging);
        assert_eq!(config.memory_size(), 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pages_for() {
        let config = VmConfig::default();
        assert_eq!(config.pages_for(0), 0);
        assert_eq!(config.pages_for(1), 1);
        assert_eq!(config.pages_for(128), 1);
        assert_eq!(config.pages_for(129), 2);
        assert_eq!(config.pages_for(USER_STACK_SIZE), 8);
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        assert!(VmConfig::new().with_frames(0).validate().is_err());
        assert!(VmConfig::new().with_tlb_size(0).validate().is_err());
        assert!(VmConfig::new().with_tlb_size(MAX_TLB_SIZE + 1).validate().is_err());
        assert!(VmConfig::new().with_page_size(0).validate().is_err());
        assert!(VmConfig::new().with_swap_slots(0).validate().is_err());
    }
}
