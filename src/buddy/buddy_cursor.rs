use kspin::SpinNoIrqGuard;

use super::buddy_block::BuddyHeap;
use crate::info::Block;

/// Forward cursor over every block of a buddy heap.
///
/// Holds the allocator lock until dropped.
pub struct BuddyCursor<'a> {
    heap: SpinNoIrqGuard<'a, BuddyHeap>,
    offset: usize,
}

impl<'a> BuddyCursor<'a> {
    pub(crate) fn new(heap: SpinNoIrqGuard<'a, BuddyHeap>) -> Self {
        Self { heap, offset: 0 }
    }
}

impl Iterator for BuddyCursor<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.offset >= self.heap.heap_size() {
            return None;
        }
        let offset = self.offset;
        let meta = self.heap.read_meta(offset);
        self.offset += meta.size();
        Some(Block {
            offset,
            size: meta.size(),
            occupied: meta.occupied,
            data: if meta.occupied {
                self.heap.payload(offset)
            } else {
                self.heap.block_ptr(offset)
            },
        })
    }
}
