//! Block-level introspection
//!
//! Both allocators can describe their heap as an ordered list of blocks.
//! The list covers every heap byte exactly once, which makes it the main
//! probe for checking allocator state in tests.

use core::ptr::NonNull;

/// Size and state of one block, as reported by [`crate::BlocksInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    /// Block size in bytes, metadata included.
    pub size: usize,
    pub occupied: bool,
}

impl BlockInfo {
    pub const fn occupied(size: usize) -> Self {
        Self {
            size,
            occupied: true,
        }
    }

    pub const fn free(size: usize) -> Self {
        Self {
            size,
            occupied: false,
        }
    }
}

/// One step of a block cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Offset of the block from the heap start.
    pub offset: usize,
    /// Block size in bytes, metadata included.
    pub size: usize,
    pub occupied: bool,
    /// First byte usable by the caller: the payload of an occupied block,
    /// the first byte of a free one.
    pub data: NonNull<u8>,
}

impl From<Block> for BlockInfo {
    fn from(block: Block) -> Self {
        Self {
            size: block.size,
            occupied: block.occupied,
        }
    }
}

/// Sum of all block sizes.
pub fn total_size(blocks: &[BlockInfo]) -> usize {
    blocks.iter().map(|b| b.size).sum()
}

/// Sum of occupied block sizes.
pub fn occupied_size(blocks: &[BlockInfo]) -> usize {
    blocks.iter().filter(|b| b.occupied).map(|b| b.size).sum()
}

/// Whether two adjacent free blocks of one power-of-two size sit at buddy
/// positions, i.e. a merge was missed.
pub fn has_unmerged_buddies(blocks: &[BlockInfo]) -> bool {
    let mut offset = 0;
    for pair in blocks.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if !a.occupied
            && !b.occupied
            && a.size == b.size
            && a.size.is_power_of_two()
            && offset % (a.size << 1) == 0
        {
            return true;
        }
        offset += a.size;
    }
    false
}
