//! Bidirectional block cursor for the boundary-tag heap
//!
//! Occupied blocks come from the chain; free blocks are the gaps between
//! them. Stepping from either end moves by exactly one block, so the two
//! ends meet without overlap.

use kspin::SpinNoIrqGuard;

use super::boundary_block::BoundaryHeap;
use crate::info::Block;

/// Cursor over every block of a boundary-tag heap, free gaps included.
///
/// Holds the allocator lock until dropped; do not call into the same
/// allocator while a cursor is alive.
pub struct BoundaryCursor<'a> {
    heap: SpinNoIrqGuard<'a, BoundaryHeap>,
    /// Heap offset of the next block from the front.
    front: usize,
    /// Heap offset one past the next block from the back.
    back: usize,
    /// First occupied block at or after `front`.
    front_block: Option<usize>,
    /// Last occupied block ending at or before `back`.
    back_block: Option<usize>,
}

impl<'a> BoundaryCursor<'a> {
    pub(crate) fn new(heap: SpinNoIrqGuard<'a, BoundaryHeap>) -> Self {
        let back = heap.heap_size();
        let front_block = heap.first_block();
        let back_block = heap.last_block();
        Self {
            heap,
            front: 0,
            back,
            front_block,
            back_block,
        }
    }

    fn free(&self, offset: usize, size: usize) -> Block {
        Block {
            offset,
            size,
            occupied: false,
            data: self.heap.heap_ptr(offset),
        }
    }
}

impl Iterator for BoundaryCursor<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.front >= self.back {
            return None;
        }

        if self.front_block == Some(self.front) {
            let meta = self.heap.read_meta(self.front);
            let block = Block {
                offset: self.front,
                size: meta.span(),
                occupied: true,
                data: self.heap.payload(self.front),
            };
            self.front_block = meta.next;
            self.front += meta.span();
            return Some(block);
        }

        let end = self
            .front_block
            .unwrap_or_else(|| self.heap.heap_size())
            .min(self.back);
        let block = self.free(self.front, end - self.front);
        self.front = end;
        Some(block)
    }
}

impl DoubleEndedIterator for BoundaryCursor<'_> {
    fn next_back(&mut self) -> Option<Block> {
        if self.back <= self.front {
            return None;
        }

        if let Some(offset) = self.back_block {
            let meta = self.heap.read_meta(offset);
            if offset + meta.span() == self.back {
                self.back_block = meta.prev;
                self.back = offset;
                return Some(Block {
                    offset,
                    size: meta.span(),
                    occupied: true,
                    data: self.heap.payload(offset),
                });
            }
        }

        let start = self
            .back_block
            .map_or(0, |offset| offset + self.heap.read_meta(offset).span())
            .max(self.front);
        let block = self.free(start, self.back - start);
        self.back = start;
        Some(block)
    }
}
