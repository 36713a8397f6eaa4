//! Boundary-tag arena layout
//!
//! ```text
//! arena: | fit mode | heap size | first block | heap ...                    |
//! block: | tag | next | prev | owner | payload ...                           |
//! ```
//!
//! Every field is one machine word. The tag holds `(payload_size << 1) |
//! occupied`. Links are heap-relative offsets with [`NIL`] meaning none, so
//! the layout does not depend on where the arena lives.

use crate::arena::RawArena;
use crate::fit::{Candidate, FitMode};
use crate::info::BlockInfo;
use crate::stats::ArenaStats;

const WORD: usize = core::mem::size_of::<usize>();

/// Size of the arena header preceding the heap.
pub const HEADER_SIZE: usize = 3 * WORD;

/// Metadata stored in front of every occupied block's payload.
pub const BLOCK_METADATA_SIZE: usize = 4 * WORD;

const FIT_MODE_OFFSET: usize = 0;
const HEAP_SIZE_OFFSET: usize = WORD;
const FIRST_BLOCK_OFFSET: usize = 2 * WORD;

const TAG_OFFSET: usize = 0;
const NEXT_OFFSET: usize = WORD;
const PREV_OFFSET: usize = 2 * WORD;
const OWNER_OFFSET: usize = 3 * WORD;

/// Encoded "no block" link.
pub(crate) const NIL: usize = usize::MAX;

#[inline]
const fn encode_link(link: Option<usize>) -> usize {
    match link {
        Some(offset) => offset,
        None => NIL,
    }
}

#[inline]
const fn decode_link(raw: usize) -> Option<usize> {
    if raw == NIL {
        None
    } else {
        Some(raw)
    }
}

/// Decoded metadata of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockMeta {
    /// Payload bytes, metadata excluded.
    pub size: usize,
    pub occupied: bool,
    pub next: Option<usize>,
    pub prev: Option<usize>,
    pub owner: usize,
}

impl BlockMeta {
    /// Bytes the block takes in the heap.
    pub const fn span(&self) -> usize {
        self.size + BLOCK_METADATA_SIZE
    }
}

/// Free space between two occupied blocks (or a heap edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Gap {
    pub offset: usize,
    pub len: usize,
    /// Occupied block ending at `offset`.
    pub prev: Option<usize>,
    /// Occupied block starting at `offset + len`.
    pub next: Option<usize>,
}

impl Candidate for Gap {
    fn size(&self) -> usize {
        self.len
    }
}

/// Typed view over a boundary-tag arena. Offsets taken by block accessors
/// are relative to the heap start.
pub(crate) struct BoundaryHeap {
    arena: RawArena,
}

impl BoundaryHeap {
    /// Write an empty header for a heap of `heap_size` bytes.
    pub fn init(mut arena: RawArena, heap_size: usize, mode: FitMode) -> Self {
        debug_assert_eq!(arena.len(), HEADER_SIZE + heap_size);
        arena.write_usize(FIT_MODE_OFFSET, mode.into_raw());
        arena.write_usize(HEAP_SIZE_OFFSET, heap_size);
        arena.write_usize(FIRST_BLOCK_OFFSET, NIL);
        Self { arena }
    }

    pub fn fit_mode(&self) -> FitMode {
        FitMode::from_raw(self.arena.read_usize(FIT_MODE_OFFSET))
    }

    pub fn set_fit_mode(&mut self, mode: FitMode) {
        self.arena.write_usize(FIT_MODE_OFFSET, mode.into_raw());
    }

    pub fn heap_size(&self) -> usize {
        self.arena.read_usize(HEAP_SIZE_OFFSET)
    }

    pub fn first_block(&self) -> Option<usize> {
        decode_link(self.arena.read_usize(FIRST_BLOCK_OFFSET))
    }

    pub fn set_first_block(&mut self, block: Option<usize>) {
        self.arena.write_usize(FIRST_BLOCK_OFFSET, encode_link(block));
    }

    /// Last block of the occupied chain.
    pub fn last_block(&self) -> Option<usize> {
        let mut last = None;
        let mut current = self.first_block();
        while let Some(offset) = current {
            last = Some(offset);
            current = self.read_meta(offset).next;
        }
        last
    }

    #[inline]
    fn field(block: usize, field: usize) -> usize {
        HEADER_SIZE + block + field
    }

    pub fn read_meta(&self, block: usize) -> BlockMeta {
        let tag = self.arena.read_usize(Self::field(block, TAG_OFFSET));
        BlockMeta {
            size: tag >> 1,
            occupied: tag & 1 == 1,
            next: decode_link(self.arena.read_usize(Self::field(block, NEXT_OFFSET))),
            prev: decode_link(self.arena.read_usize(Self::field(block, PREV_OFFSET))),
            owner: self.arena.read_usize(Self::field(block, OWNER_OFFSET)),
        }
    }

    pub fn write_meta(&mut self, block: usize, meta: &BlockMeta) {
        debug_assert!(block + meta.span() <= self.heap_size());
        self.set_tag(block, meta.size, meta.occupied);
        self.set_next(block, meta.next);
        self.set_prev(block, meta.prev);
        self.arena
            .write_usize(Self::field(block, OWNER_OFFSET), meta.owner);
    }

    pub fn set_tag(&mut self, block: usize, size: usize, occupied: bool) {
        self.arena.write_usize(
            Self::field(block, TAG_OFFSET),
            (size << 1) | occupied as usize,
        );
    }

    pub fn set_next(&mut self, block: usize, next: Option<usize>) {
        self.arena
            .write_usize(Self::field(block, NEXT_OFFSET), encode_link(next));
    }

    pub fn set_prev(&mut self, block: usize, prev: Option<usize>) {
        self.arena
            .write_usize(Self::field(block, PREV_OFFSET), encode_link(prev));
    }

    /// Payload address of the block at `block`.
    pub fn payload(&self, block: usize) -> core::ptr::NonNull<u8> {
        self.arena.ptr_at(HEADER_SIZE + block + BLOCK_METADATA_SIZE)
    }

    /// First byte of the heap region at `offset`.
    pub fn heap_ptr(&self, offset: usize) -> core::ptr::NonNull<u8> {
        self.arena.ptr_at(HEADER_SIZE + offset)
    }

    /// Block offset owning the payload `ptr`, if `ptr` can be a payload of
    /// this heap. The payload of an empty block at the heap end equals the
    /// arena end, so the upper bound is inclusive.
    pub fn block_of(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        let first_payload = self.arena.base_addr() + HEADER_SIZE + BLOCK_METADATA_SIZE;
        let arena_end = self.arena.base_addr() + self.arena.len();
        if addr < first_payload || addr > arena_end {
            return None;
        }
        Some(addr - first_payload)
    }

    /// Free gaps in address order, empty ones included.
    pub fn gaps(&self) -> GapIter<'_> {
        GapIter {
            heap: self,
            cursor: 0,
            prev: None,
            next: self.first_block(),
            done: false,
        }
    }

    /// Usage summary without ordering the blocks.
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats::new();
        for gap in self.gaps() {
            if gap.len > 0 {
                stats.add(BlockInfo::free(gap.len));
            }
            if let Some(block) = gap.next {
                stats.add(BlockInfo::occupied(self.read_meta(block).span()));
            }
        }
        stats
    }

    /// Carve a block of `size` payload bytes at the start of `gap`, absorb
    /// slack too small to hold another block, and link it into the chain.
    ///
    /// Returns the block offset.
    pub fn place(&mut self, gap: Gap, size: usize, owner: usize) -> usize {
        debug_assert!(gap.len >= size + BLOCK_METADATA_SIZE);
        let slack = gap.len - size - BLOCK_METADATA_SIZE;
        let size = if slack < BLOCK_METADATA_SIZE {
            size + slack
        } else {
            size
        };

        self.write_meta(
            gap.offset,
            &BlockMeta {
                size,
                occupied: true,
                next: gap.next,
                prev: gap.prev,
                owner,
            },
        );
        match gap.prev {
            Some(prev) => self.set_next(prev, Some(gap.offset)),
            None => self.set_first_block(Some(gap.offset)),
        }
        if let Some(next) = gap.next {
            self.set_prev(next, Some(gap.offset));
        }
        gap.offset
    }

    /// Remove the block at `block` from the chain and clear its tag.
    pub fn unlink(&mut self, block: usize) -> BlockMeta {
        let meta = self.read_meta(block);
        match meta.prev {
            Some(prev) => self.set_next(prev, meta.next),
            None => self.set_first_block(meta.next),
        }
        if let Some(next) = meta.next {
            self.set_prev(next, meta.prev);
        }
        self.set_tag(block, meta.size, false);
        meta
    }
}

/// Iterator over the gaps of a [`BoundaryHeap`].
pub(crate) struct GapIter<'a> {
    heap: &'a BoundaryHeap,
    /// End of the previous occupied block.
    cursor: usize,
    prev: Option<usize>,
    next: Option<usize>,
    done: bool,
}

impl Iterator for GapIter<'_> {
    type Item = Gap;

    fn next(&mut self) -> Option<Gap> {
        if self.done {
            return None;
        }
        let end = self.next.unwrap_or_else(|| self.heap.heap_size());
        let gap = Gap {
            offset: self.cursor,
            len: end - self.cursor,
            prev: self.prev,
            next: self.next,
        };
        match self.next {
            Some(block) => {
                let meta = self.heap.read_meta(block);
                self.cursor = block + meta.span();
                self.prev = Some(block);
                self.next = meta.next;
            }
            None => self.done = true,
        }
        Some(gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::default_parent;
    use alloc::vec::Vec;

    fn heap(size: usize) -> BoundaryHeap {
        let arena = RawArena::new(HEADER_SIZE + size, default_parent()).unwrap();
        BoundaryHeap::init(arena, size, FitMode::FirstFit)
    }

    #[test]
    fn test_header_round_trip() {
        let mut heap = heap(256);
        assert_eq!(heap.heap_size(), 256);
        assert_eq!(heap.fit_mode(), FitMode::FirstFit);
        assert_eq!(heap.first_block(), None);

        heap.set_fit_mode(FitMode::WorstFit);
        assert_eq!(heap.fit_mode(), FitMode::WorstFit);
    }

    #[test]
    fn test_empty_heap_is_one_gap() {
        let heap = heap(256);
        let gaps: Vec<Gap> = heap.gaps().collect();
        assert_eq!(
            gaps,
            [Gap {
                offset: 0,
                len: 256,
                prev: None,
                next: None
            }]
        );
    }

    #[test]
    fn test_place_links_blocks_in_order() {
        let mut heap = heap(256);
        let gap = heap.gaps().next().unwrap();
        let a = heap.place(gap, 16, 1);
        let gap = heap.gaps().last().unwrap();
        let b = heap.place(gap, 16, 1);

        assert_eq!(a, 0);
        assert_eq!(b, 16 + BLOCK_METADATA_SIZE);
        assert_eq!(heap.first_block(), Some(a));
        assert_eq!(heap.last_block(), Some(b));
        assert_eq!(heap.read_meta(a).next, Some(b));
        assert_eq!(heap.read_meta(b).prev, Some(a));

        let lens: Vec<usize> = heap.gaps().map(|g| g.len).collect();
        assert_eq!(lens, [0, 0, 256 - 2 * (16 + BLOCK_METADATA_SIZE)]);
    }

    #[test]
    fn test_slack_absorbed() {
        let mut heap = heap(100);
        let gap = heap.gaps().next().unwrap();
        // 100 - 60 - META < META
        let block = heap.place(gap, 60, 1);
        assert_eq!(heap.read_meta(block).size, 100 - BLOCK_METADATA_SIZE);
    }

    #[test]
    fn test_slack_of_exactly_one_metadata_kept() {
        let mut heap = heap(100);
        let gap = heap.gaps().next().unwrap();
        let size = 100 - 2 * BLOCK_METADATA_SIZE;
        let block = heap.place(gap, size, 1);
        assert_eq!(heap.read_meta(block).size, size);
        assert_eq!(heap.gaps().last().unwrap().len, BLOCK_METADATA_SIZE);
    }

    #[test]
    fn test_unlink_middle_block() {
        let mut heap = heap(512);
        let mut blocks = Vec::new();
        for _ in 0..3 {
            let gap = heap.gaps().last().unwrap();
            blocks.push(heap.place(gap, 8, 1));
        }

        let meta = heap.unlink(blocks[1]);
        assert!(meta.occupied);
        assert!(!heap.read_meta(blocks[1]).occupied);
        assert_eq!(heap.read_meta(blocks[0]).next, Some(blocks[2]));
        assert_eq!(heap.read_meta(blocks[2]).prev, Some(blocks[0]));

        heap.unlink(blocks[0]);
        assert_eq!(heap.first_block(), Some(blocks[2]));
    }

    #[test]
    fn test_stats_match_layout() {
        let mut heap = heap(200);
        let gap = heap.gaps().next().unwrap();
        heap.place(gap, 8, 1);
        let stats = heap.stats();
        assert_eq!(stats.total_bytes, 200);
        assert_eq!(stats.used_bytes, 8 + BLOCK_METADATA_SIZE);
        assert_eq!(stats.occupied_blocks, 1);
        assert_eq!(stats.free_blocks, 1);
    }

    #[test]
    fn test_block_of_bounds() {
        let heap = heap(64);
        let first = heap.payload(0).as_ptr();
        assert_eq!(heap.block_of(first), Some(0));
        assert_eq!(heap.block_of(heap.heap_ptr(0).as_ptr()), None);
        let end = heap.heap_ptr(64).as_ptr();
        assert_eq!(heap.block_of(end), Some(64 - BLOCK_METADATA_SIZE));
    }
}
