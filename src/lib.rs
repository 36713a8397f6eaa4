//! Arena Allocators
//!
//! Two allocators that each manage one contiguous arena obtained from a
//! parent allocator, with metadata and payload living side by side in the
//! arena bytes:
//! - Boundary-tag allocator: an address-ordered chain of occupied blocks
//!   with first/best/worst-fit placement into the gaps between them
//! - Buddy allocator: power-of-two blocks split on allocation and merged
//!   with their buddies on deallocation
//! - Shared fit-mode policy and a block-walk introspector for verification

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use core::ptr::NonNull;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Heap size is zero, below the minimum granule, or not representable.
    InvalidSize,
    /// No enough memory to allocate.
    NoMemory,
    /// Deallocate a block that is already free.
    DoubleFree,
    /// Deallocate a pointer that does not belong to this arena.
    NotAllocated,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            AllocError::InvalidSize => "invalid arena size",
            AllocError::NoMemory => "out of memory",
            AllocError::DoubleFree => "double free detected",
            AllocError::NotAllocated => "pointer was not allocated by this arena",
        };
        f.write_str(msg)
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Byte-granularity allocator over a single arena.
pub trait ArenaAllocator {
    /// Allocate `size` bytes of payload.
    ///
    /// The returned pointer carries no alignment guarantee beyond one byte
    /// (buddy payloads sit two bytes past a block start). Use unaligned
    /// reads and writes for anything wider than `u8`.
    fn allocate(&self, size: usize) -> AllocResult<NonNull<u8>>;

    /// Deallocate a pointer previously returned by [`ArenaAllocator::allocate`].
    ///
    /// A null pointer is a no-op.
    fn deallocate(&self, ptr: *mut u8) -> AllocResult;

    /// Returns the heap size in bytes.
    fn total_bytes(&self) -> usize;

    /// Returns bytes taken by occupied blocks, metadata included.
    fn used_bytes(&self) -> usize;

    /// Returns bytes not taken by any occupied block.
    fn available_bytes(&self) -> usize {
        self.total_bytes() - self.used_bytes()
    }
}

/// Allocators whose placement policy can be switched at run time.
pub trait FitModeAllocator {
    /// Replace the placement policy used by subsequent allocations.
    fn set_fit_mode(&self, mode: FitMode);

    /// Returns the current placement policy.
    fn fit_mode(&self) -> FitMode;
}

/// Allocators that can describe their heap as an ordered block list.
pub trait BlocksInfo {
    /// Walk the heap under the arena lock and report every block in address
    /// order. Sizes include metadata and always add up to the heap size.
    fn blocks_info(&self) -> Vec<BlockInfo>;
}

pub mod arena;
pub use arena::{GlobalHeap, ParentAllocator};

pub mod fit;
pub use fit::FitMode;

#[macro_use]
pub mod sink;
pub use sink::{DiagnosticSink, Severity};

pub mod info;
pub use info::BlockInfo;

pub mod stats;
pub use stats::ArenaStats;

pub mod boundary;
pub use boundary::BoundaryTagAllocator;

pub mod buddy;
pub use buddy::BuddyAllocator;
