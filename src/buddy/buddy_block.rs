//! Buddy block metadata and arena layout
//!
//! ```text
//! arena: | fit mode | size power | heap (1 << size power bytes) ...         |
//! block: | occupied: u8 | size power: u8 | payload ...                      |
//! ```
//!
//! Every block, free or occupied, starts with its two metadata bytes. Block
//! offsets are relative to the heap start and always a multiple of the
//! block size, which is what makes the XOR buddy identity work regardless
//! of where the arena lives.

use core::ptr::NonNull;

use crate::arena::RawArena;
use crate::fit::{Candidate, FitMode};

const WORD: usize = core::mem::size_of::<usize>();

/// Size of the arena header preceding the heap.
pub const HEADER_SIZE: usize = 2 * WORD;

/// Metadata stored at the start of every block.
pub const BLOCK_METADATA_SIZE: usize = 2;

/// Smallest block is `1 << MIN_SIZE_POWER` bytes.
pub const MIN_SIZE_POWER: usize = 4;

/// Largest supported heap power.
pub const MAX_SIZE_POWER: usize = usize::BITS as usize - 2;

const FIT_MODE_OFFSET: usize = 0;
const SIZE_POWER_OFFSET: usize = WORD;

const OCCUPIED_OFFSET: usize = 0;
const POWER_OFFSET: usize = 1;

/// Smallest `k` with `1 << k >= n`, or `None` if that overflows.
pub fn ceil_log2(n: usize) -> Option<usize> {
    n.checked_next_power_of_two()
        .map(|p| p.trailing_zeros() as usize)
}

/// Offset of the buddy of the block at `offset` with size power `power`.
#[inline]
pub const fn buddy_of(offset: usize, power: usize) -> usize {
    offset ^ (1 << power)
}

/// Offset of the block of power `power + 1` containing `offset`.
#[inline]
pub const fn parent_of(offset: usize, power: usize) -> usize {
    offset & !(1 << power)
}

/// Offsets of the two halves of the block at `offset` with power `power`.
#[inline]
pub const fn split(offset: usize, power: usize) -> (usize, usize) {
    (offset, offset + (1 << (power - 1)))
}

/// Whether `offset` can start a block of power `power`.
#[inline]
pub const fn is_aligned(offset: usize, power: usize) -> bool {
    offset & ((1 << power) - 1) == 0
}

/// Decoded metadata of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BuddyMeta {
    pub occupied: bool,
    pub power: usize,
}

impl BuddyMeta {
    pub const fn size(&self) -> usize {
        1 << self.power
    }
}

/// A free block offered to the fit-mode search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeBlock {
    pub offset: usize,
    pub power: usize,
}

impl Candidate for FreeBlock {
    fn size(&self) -> usize {
        1 << self.power
    }
}

/// Typed view over a buddy arena. Block offsets are relative to the heap
/// start.
pub(crate) struct BuddyHeap {
    arena: RawArena,
}

impl BuddyHeap {
    /// Write the header and one free block spanning the heap.
    pub fn init(mut arena: RawArena, size_power: usize, mode: FitMode) -> Self {
        debug_assert_eq!(arena.len(), HEADER_SIZE + (1 << size_power));
        arena.write_usize(FIT_MODE_OFFSET, mode.into_raw());
        arena.write_usize(SIZE_POWER_OFFSET, size_power);
        let mut heap = Self { arena };
        heap.write_meta(
            0,
            BuddyMeta {
                occupied: false,
                power: size_power,
            },
        );
        heap
    }

    /// Wrap an arena that already holds a valid buddy heap.
    pub fn from_copy(arena: RawArena) -> Self {
        Self { arena }
    }

    pub fn arena(&self) -> &RawArena {
        &self.arena
    }

    pub fn fit_mode(&self) -> FitMode {
        FitMode::from_raw(self.arena.read_usize(FIT_MODE_OFFSET))
    }

    pub fn set_fit_mode(&mut self, mode: FitMode) {
        self.arena.write_usize(FIT_MODE_OFFSET, mode.into_raw());
    }

    pub fn size_power(&self) -> usize {
        self.arena.read_usize(SIZE_POWER_OFFSET)
    }

    pub fn heap_size(&self) -> usize {
        1 << self.size_power()
    }

    pub fn read_meta(&self, offset: usize) -> BuddyMeta {
        BuddyMeta {
            occupied: self.arena.read_u8(HEADER_SIZE + offset + OCCUPIED_OFFSET) != 0,
            power: self.arena.read_u8(HEADER_SIZE + offset + POWER_OFFSET) as usize,
        }
    }

    pub fn write_meta(&mut self, offset: usize, meta: BuddyMeta) {
        debug_assert!(is_aligned(offset, meta.power));
        self.arena
            .write_u8(HEADER_SIZE + offset + OCCUPIED_OFFSET, meta.occupied as u8);
        self.arena
            .write_u8(HEADER_SIZE + offset + POWER_OFFSET, meta.power as u8);
    }

    /// Payload address of the block at `offset`.
    pub fn payload(&self, offset: usize) -> NonNull<u8> {
        self.arena
            .ptr_at(HEADER_SIZE + offset + BLOCK_METADATA_SIZE)
    }

    /// First byte of the block at `offset`.
    pub fn block_ptr(&self, offset: usize) -> NonNull<u8> {
        self.arena.ptr_at(HEADER_SIZE + offset)
    }

    /// Block offset for a payload pointer inside this heap.
    pub fn block_of(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        let first_payload = self.arena.base_addr() + HEADER_SIZE + BLOCK_METADATA_SIZE;
        let heap_end = self.arena.base_addr() + self.arena.len();
        if addr < first_payload || addr >= heap_end {
            return None;
        }
        Some(addr - first_payload)
    }

    /// Blocks in address order.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            heap: self,
            offset: 0,
            end: self.heap_size(),
        }
    }

    /// Free blocks in address order.
    pub fn free_blocks(&self) -> impl Iterator<Item = FreeBlock> + '_ {
        self.walk()
            .filter(|(_, meta)| !meta.occupied)
            .map(|(offset, meta)| FreeBlock {
                offset,
                power: meta.power,
            })
    }

    /// Halve the free block at `offset` until it has power `target`, then
    /// mark it occupied. Each split leaves the upper half as a free buddy.
    pub fn split_and_occupy(&mut self, offset: usize, target: usize) {
        let mut meta = self.read_meta(offset);
        debug_assert!(!meta.occupied && meta.power >= target);
        while meta.power > target {
            let (_, upper) = split(offset, meta.power);
            meta.power -= 1;
            self.write_meta(
                upper,
                BuddyMeta {
                    occupied: false,
                    power: meta.power,
                },
            );
        }
        meta.occupied = true;
        self.write_meta(offset, meta);
    }

    /// Mark the block at `offset` free and merge it with free buddies of
    /// equal power as far as possible.
    ///
    /// Returns the offset and power of the resulting free block.
    pub fn release(&mut self, offset: usize) -> (usize, usize) {
        let max_power = self.size_power();
        let mut offset = offset;
        let mut power = self.read_meta(offset).power;
        // The freed header stays behind when the block merges downward, so
        // it must already read free.
        self.write_meta(
            offset,
            BuddyMeta {
                occupied: false,
                power,
            },
        );

        while power < max_power {
            let buddy = buddy_of(offset, power);
            if buddy + (1 << power) > self.heap_size() {
                break;
            }
            let buddy_meta = self.read_meta(buddy);
            if buddy_meta.occupied || buddy_meta.power != power {
                break;
            }
            offset = parent_of(offset, power);
            power += 1;
        }

        self.write_meta(
            offset,
            BuddyMeta {
                occupied: false,
                power,
            },
        );
        (offset, power)
    }
}

/// Forward walk over all blocks of a [`BuddyHeap`].
pub(crate) struct Walk<'a> {
    heap: &'a BuddyHeap,
    offset: usize,
    end: usize,
}

impl Iterator for Walk<'_> {
    type Item = (usize, BuddyMeta);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let offset = self.offset;
        let meta = self.heap.read_meta(offset);
        self.offset += meta.size();
        Some((offset, meta))
    }
}
