//! Common types used across nachos_vm
//!
//! This module defines shared identifiers to avoid circular dependencies
//! between the VM services.

use core::fmt;

/// Address space identifier
///
/// Handed out by the [`Machine`](crate::vm::Machine) when a process image is
/// loaded. The frame directory refers to pages through `(SpaceId, vpn)` pairs
/// rather than by pointer, so a destroyed space can never be reached through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as{}", self.0)
    }
}

/// Back-reference from a physical frame to the page that occupies it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    /// Owning address space
    pub space: SpaceId,
    /// Virtual page number inside that space
    pub vpn: usize,
}

impl FrameOwner {
    pub const fn new(space: SpaceId, vpn: usize) -> Self {
        Self { space, vpn }
    }
}
