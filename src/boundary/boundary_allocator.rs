//! Boundary-tag allocator
//!
//! Keeps occupied blocks in an address-ordered doubly-linked chain embedded
//! in the arena. Free space is never tracked explicitly: the gaps between
//! chained blocks are computed during each allocation, so freed neighbours
//! coalesce without a merge step.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;

use kspin::{SpinNoIrq, SpinNoIrqGuard};

use super::boundary_block::{BoundaryHeap, BLOCK_METADATA_SIZE, HEADER_SIZE};
use super::boundary_cursor::BoundaryCursor;
use crate::arena::{default_parent, ParentAllocator, RawArena};
use crate::fit::{self, FitMode};
use crate::info::BlockInfo;
use crate::sink::{DiagnosticSink, Reporter, Severity};
use crate::stats::ArenaStats;
use crate::{AllocError, AllocResult, ArenaAllocator, BlocksInfo, FitModeAllocator};

/// Boundary-tag allocator over a single arena.
///
/// Double deallocation of the same pointer is a caller error. It is only
/// caught by a debug assertion; release builds leave the chain in an
/// unspecified (but memory-safe) state.
pub struct BoundaryTagAllocator {
    heap: SpinNoIrq<BoundaryHeap>,
    /// Arena base address, stamped into every block as its owner.
    id: usize,
    reporter: Reporter,
}

impl BoundaryTagAllocator {
    /// Create an allocator managing `heap_size` bytes.
    ///
    /// The arena (`HEADER_SIZE + heap_size` bytes) comes from `parent`, or
    /// from the process heap when `parent` is `None`.
    pub fn new(
        heap_size: usize,
        parent: Option<Arc<dyn ParentAllocator>>,
        sink: Option<&Arc<dyn DiagnosticSink>>,
        fit_mode: FitMode,
    ) -> AllocResult<Self> {
        let reporter = Reporter::new(sink);
        report!(reporter, Severity::Debug, "boundary tags: construction started");

        if heap_size == 0 {
            report!(reporter, Severity::Error, "boundary tags: heap size must be non-zero");
            return Err(AllocError::InvalidSize);
        }
        let total = HEADER_SIZE
            .checked_add(heap_size)
            .ok_or(AllocError::InvalidSize)?;
        let parent = parent.unwrap_or_else(default_parent);

        let arena = RawArena::new(total, parent).map_err(|e| {
            report!(
                reporter,
                Severity::Error,
                "boundary tags: failed to obtain {} bytes from parent: {}",
                total,
                e
            );
            e
        })?;
        let id = arena.base_addr();
        let heap = BoundaryHeap::init(arena, heap_size, fit_mode);

        report!(
            reporter,
            Severity::Information,
            "boundary tags: {} bytes available ({} bytes with header)",
            heap_size,
            total
        );
        Ok(Self {
            heap: SpinNoIrq::new(heap),
            id,
            reporter,
        })
    }

    /// Heap size in bytes, header excluded.
    pub fn heap_size(&self) -> usize {
        self.heap.lock().heap_size()
    }

    /// Cursor over all blocks in address order, walkable from both ends.
    ///
    /// The allocator stays locked while the cursor is alive.
    pub fn blocks(&self) -> BoundaryCursor<'_> {
        BoundaryCursor::new(self.heap.lock())
    }

    /// Usage summary from one walk of the chain.
    pub fn stats(&self) -> ArenaStats {
        self.heap.lock().stats()
    }

    /// Release the lock, then report the failed request.
    fn out_of_memory(&self, heap: SpinNoIrqGuard<'_, BoundaryHeap>, size: usize) -> AllocError {
        let mode = heap.fit_mode();
        #[cfg(feature = "tracking")]
        let stats = heap.stats();
        drop(heap);

        report!(
            self.reporter,
            Severity::Error,
            "boundary tags: allocation of {} bytes failed ({:?})",
            size,
            mode
        );
        #[cfg(feature = "tracking")]
        crate::stats::MemoryStatsReporter::print_alloc_failure_stats("boundary tags", &stats, size);
        AllocError::NoMemory
    }
}

impl ArenaAllocator for BoundaryTagAllocator {
    fn allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        report!(self.reporter, Severity::Debug, "boundary tags: allocating {} bytes", size);
        let mut heap = self.heap.lock();

        let required = match size.checked_add(BLOCK_METADATA_SIZE) {
            Some(required) if required <= heap.heap_size() => required,
            _ => return Err(self.out_of_memory(heap, size)),
        };

        let mode = heap.fit_mode();
        let selected = fit::select(mode, required, heap.gaps());
        let Some(gap) = selected else {
            return Err(self.out_of_memory(heap, size));
        };

        let block = heap.place(gap, size, self.id);
        let ptr = heap.payload(block);
        drop(heap);

        report!(
            self.reporter,
            Severity::Debug,
            "boundary tags: placed {} bytes at offset {:#x} ({:?})",
            size,
            block,
            mode
        );
        Ok(ptr)
    }

    fn deallocate(&self, ptr: *mut u8) -> AllocResult {
        if ptr.is_null() {
            return Ok(());
        }
        let mut heap = self.heap.lock();

        let Some(block) = heap.block_of(ptr) else {
            drop(heap);
            report!(
                self.reporter,
                Severity::Error,
                "boundary tags: pointer {:#x} does not belong to arena {:#x}",
                ptr as usize,
                self.id
            );
            return Err(AllocError::NotAllocated);
        };

        debug_assert_eq!(
            heap.read_meta(block).owner,
            self.id,
            "block at {:#x} is not owned by this arena",
            block
        );
        debug_assert!(
            heap.read_meta(block).occupied,
            "double free of block at {:#x}",
            block
        );

        let meta = heap.unlink(block);
        drop(heap);

        report!(
            self.reporter,
            Severity::Debug,
            "boundary tags: released {} bytes at offset {:#x}",
            meta.size,
            block
        );
        Ok(())
    }

    fn total_bytes(&self) -> usize {
        self.heap_size()
    }

    fn used_bytes(&self) -> usize {
        self.stats().used_bytes
    }
}

impl FitModeAllocator for BoundaryTagAllocator {
    fn set_fit_mode(&self, mode: FitMode) {
        self.heap.lock().set_fit_mode(mode);
    }

    fn fit_mode(&self) -> FitMode {
        self.heap.lock().fit_mode()
    }
}

impl BlocksInfo for BoundaryTagAllocator {
    fn blocks_info(&self) -> Vec<BlockInfo> {
        report!(self.reporter, Severity::Trace, "boundary tags: collecting blocks");
        let blocks: Vec<BlockInfo> = self.blocks().map(BlockInfo::from).collect();
        report!(
            self.reporter,
            Severity::Information,
            "boundary tags: retrieved {} blocks",
            blocks.len()
        );
        blocks
    }
}

impl PartialEq for BoundaryTagAllocator {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BoundaryTagAllocator {}

impl core::fmt::Debug for BoundaryTagAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoundaryTagAllocator")
            .field("arena", &format_args!("{:#x}", self.id))
            .finish()
    }
}

impl Drop for BoundaryTagAllocator {
    fn drop(&mut self) {
        report!(self.reporter, Severity::Debug, "boundary tags: releasing arena {:#x}", self.id);
    }
}
