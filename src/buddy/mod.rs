//! Buddy allocator module
//!
//! Power-of-two blocks carved from one arena, each prefixed by two bytes of
//! metadata. Buddies are located by XOR on heap-relative offsets.

pub mod buddy_allocator;
pub mod buddy_block;
pub mod buddy_cursor;

pub use buddy_allocator::BuddyAllocator;
pub use buddy_block::{
    buddy_of, ceil_log2, parent_of, split, BLOCK_METADATA_SIZE, HEADER_SIZE, MIN_SIZE_POWER,
};
pub use buddy_cursor::BuddyCursor;
