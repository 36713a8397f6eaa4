//! Boundary-tag allocator module
//!
//! Occupied blocks form an address-ordered doubly-linked chain inside the
//! arena; free space is whatever lies between them.

pub mod boundary_allocator;
pub mod boundary_block;
pub mod boundary_cursor;

pub use boundary_allocator::BoundaryTagAllocator;
pub use boundary_block::{BLOCK_METADATA_SIZE, HEADER_SIZE};
pub use boundary_cursor::BoundaryCursor;
