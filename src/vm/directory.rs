//! Frame Directory - Inverted Page Table
//!
//! One slot per physical frame, shared by every address space. A slot names
//! the page that occupies the frame as a `(SpaceId, vpn)` pair so the
//! eviction path can find the victim's translation entry without scanning
//! every page table.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{VmError, VmResult};
use crate::types::{FrameOwner, SpaceId};

/// Frame-indexed back-references to translation entries
#[derive(Debug, Clone)]
pub struct FrameDirectory {
    slots: Vec<Option<FrameOwner>>,
}

impl FrameDirectory {
    /// Create a directory with every frame empty
    pub fn new(num_frames: usize) -> Self {
        Self {
            slots: vec![None; num_frames],
        }
    }

    /// Number of frames covered
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the directory covers no frames
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record the page now occupying `frame`
    ///
    /// A frame already claimed by someone else is a bookkeeping failure.
    pub fn claim(&mut self, frame: usize, owner: FrameOwner) -> VmResult<()> {
        match self.slots.get_mut(frame) {
            Some(slot) if slot.is_none() => {
                *slot = Some(owner);
                Ok(())
            }
            _ => Err(VmError::DirectoryInconsistent(frame)),
        }
    }

    /// Clear a frame's slot, returning the previous owner
    pub fn release(&mut self, frame: usize) -> Option<FrameOwner> {
        self.slots.get_mut(frame).and_then(Option::take)
    }

    /// Owner of a frame
    pub fn owner(&self, frame: usize) -> Option<FrameOwner> {
        self.slots.get(frame).copied().flatten()
    }

    /// Frames owned by an address space
    pub fn frames_of(&self, space: SpaceId) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, slot)| matches!(slot, Some(owner) if owner.space == space))
            .map(|(frame, _)| frame)
    }

    /// Iterate over occupied frames
    pub fn iter(&self) -> impl Iterator<Item = (usize, FrameOwner)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(frame, slot)| slot.map(|owner| (frame, owner)))
    }

    /// Number of occupied frames
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let mut dir = FrameDirectory::new(4);
        let owner = FrameOwner::new(SpaceId(1), 7);
        dir.claim(2, owner).unwrap();
        assert_eq!(dir.owner(2), Some(owner));
        assert_eq!(dir.occupied(), 1);
        assert_eq!(dir.release(2), Some(owner));
        assert_eq!(dir.owner(2), None);
        assert_eq!(dir.release(2), None);
    }

    #[test]
    fn test_double_claim_is_inconsistent() {
        let mut dir = FrameDirectory::new(4);
        dir.claim(1, FrameOwner::new(SpaceId(1), 0)).unwrap();
        assert_eq!(
            dir.claim(1, FrameOwner::new(SpaceId(2), 0)),
            Err(VmError::DirectoryInconsistent(1))
        );
        assert_eq!(
            dir.claim(9, FrameOwner::new(SpaceId(2), 0)),
            Err(VmError::DirectoryInconsistent(9))
        );
    }

    #[test]
    fn test_frames_of() {
        let mut dir = FrameDirectory::new(5);
        dir.claim(0, FrameOwner::new(SpaceId(1), 0)).unwrap();
        dir.claim(3, FrameOwner::new(SpaceId(2), 4)).unwrap();
        dir.claim(4, FrameOwner::new(SpaceId(1), 9)).unwrap();
        let frames: Vec<usize> = dir.frames_of(SpaceId(1)).collect();
        assert_eq!(frames, vec![0, 4]);
        assert_eq!(dir.iter().count(), 3);
    }
}
