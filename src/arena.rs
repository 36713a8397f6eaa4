//! Arena storage shared by both allocators
//!
//! An arena is one allocation obtained from a parent allocator. Every read
//! and write of header or block metadata goes through the offset accessors
//! here, so the rest of the crate never touches raw pointers directly.

use alloc::sync::Arc;
use core::alloc::Layout;
use core::ptr::NonNull;

use crate::{AllocError, AllocResult};

#[cfg(feature = "log")]
use log::trace;

/// Alignment requested from the parent for every arena.
pub(crate) const ARENA_ALIGN: usize = core::mem::align_of::<usize>();

/// Upstream memory source an arena is carved from.
///
/// Implementations are shared between allocators, so they take `&self` and
/// must be thread-safe.
pub trait ParentAllocator: Send + Sync {
    /// Allocate a block described by `layout`.
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>>;

    /// Return a block obtained from [`ParentAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this parent with the same `layout`
    /// and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Pass-through parent backed by the process-wide heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalHeap;

impl ParentAllocator for GlobalHeap {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(AllocError::InvalidSize);
        }
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::NoMemory)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

pub(crate) fn default_parent() -> Arc<dyn ParentAllocator> {
    Arc::new(GlobalHeap)
}

/// One owned arena allocation.
///
/// Released through the recorded parent when dropped.
pub(crate) struct RawArena {
    base: NonNull<u8>,
    layout: Layout,
    parent: Arc<dyn ParentAllocator>,
}

// The arena bytes are only reached through the owning allocator's lock.
unsafe impl Send for RawArena {}

impl RawArena {
    /// Allocate `size` bytes from `parent`.
    pub fn new(size: usize, parent: Arc<dyn ParentAllocator>) -> AllocResult<Self> {
        let layout =
            Layout::from_size_align(size, ARENA_ALIGN).map_err(|_| AllocError::InvalidSize)?;
        let base = parent.allocate(layout)?;
        trace!(
            "arena: acquired {} bytes at {:#x}",
            size,
            base.as_ptr() as usize
        );
        Ok(Self {
            base,
            layout,
            parent,
        })
    }

    /// Byte-for-byte copy into fresh storage from the same parent.
    pub fn duplicate(&self) -> AllocResult<Self> {
        let copy = Self::new(self.len(), self.parent.clone())?;
        unsafe {
            core::ptr::copy_nonoverlapping(self.base.as_ptr(), copy.base.as_ptr(), self.len());
        }
        Ok(copy)
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Address of the first arena byte, used as the arena identity.
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Pointer to the byte at `offset`.
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len(), "arena offset {:#x} out of range", offset);
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    #[inline]
    fn check(&self, offset: usize, width: usize) {
        assert!(
            offset
                .checked_add(width)
                .is_some_and(|end| end <= self.len()),
            "arena access [{:#x}, +{}) out of range (len {:#x})",
            offset,
            width,
            self.len()
        );
    }

    pub fn read_usize(&self, offset: usize) -> usize {
        self.check(offset, core::mem::size_of::<usize>());
        unsafe { (self.base.as_ptr().add(offset) as *const usize).read_unaligned() }
    }

    pub fn write_usize(&mut self, offset: usize, value: usize) {
        self.check(offset, core::mem::size_of::<usize>());
        unsafe { (self.base.as_ptr().add(offset) as *mut usize).write_unaligned(value) }
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.check(offset, 1);
        unsafe { self.base.as_ptr().add(offset).read() }
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.check(offset, 1);
        unsafe { self.base.as_ptr().add(offset).write(value) }
    }
}

impl Drop for RawArena {
    fn drop(&mut self) {
        trace!(
            "arena: releasing {} bytes at {:#x}",
            self.len(),
            self.base_addr()
        );
        unsafe { self.parent.deallocate(self.base, self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        allocs: AtomicUsize,
        frees: AtomicUsize,
    }

    impl ParentAllocator for Counting {
        fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            GlobalHeap.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            GlobalHeap.deallocate(ptr, layout)
        }
    }

    #[test]
    fn test_arena_released_once() {
        let parent = Arc::new(Counting {
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        });
        {
            let arena = RawArena::new(64, parent.clone()).unwrap();
            let moved = arena;
            assert_eq!(moved.len(), 64);
        }
        assert_eq!(parent.allocs.load(Ordering::SeqCst), 1);
        assert_eq!(parent.frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_arena_accessors() {
        let mut arena = RawArena::new(32, default_parent()).unwrap();
        arena.write_usize(3, 0xdead_beef);
        arena.write_u8(20, 7);
        assert_eq!(arena.read_usize(3), 0xdead_beef);
        assert_eq!(arena.read_u8(20), 7);

        let inside = arena.ptr_at(5).as_ptr();
        assert_eq!(inside as usize - arena.base_addr(), 5);
    }

    #[test]
    fn test_arena_duplicate_copies_bytes() {
        let mut arena = RawArena::new(16, default_parent()).unwrap();
        arena.write_usize(0, 42);
        let copy = arena.duplicate().unwrap();
        assert_ne!(copy.base_addr(), arena.base_addr());
        assert_eq!(copy.read_usize(0), 42);
    }

    #[test]
    #[should_panic]
    fn test_arena_out_of_range_access() {
        let arena = RawArena::new(16, default_parent()).unwrap();
        arena.read_usize(12);
    }

    #[test]
    fn test_zero_sized_arena_rejected() {
        assert_eq!(
            RawArena::new(0, default_parent()).err(),
            Some(AllocError::InvalidSize)
        );
    }
}
