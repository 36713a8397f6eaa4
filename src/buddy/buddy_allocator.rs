//! Buddy allocator
//!
//! Manages one power-of-two heap. Allocation halves the chosen free block
//! until it is just large enough; deallocation merges the block with its
//! free buddy repeatedly, so the heap never holds two free buddies of equal
//! size side by side.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;

use kspin::{SpinNoIrq, SpinNoIrqGuard};

use super::buddy_block::{
    ceil_log2, is_aligned, BuddyHeap, BLOCK_METADATA_SIZE, HEADER_SIZE, MAX_SIZE_POWER,
    MIN_SIZE_POWER,
};
use super::buddy_cursor::BuddyCursor;
use crate::arena::{default_parent, ParentAllocator, RawArena};
use crate::fit::{self, FitMode};
use crate::info::BlockInfo;
use crate::sink::{DiagnosticSink, Reporter, Severity};
use crate::stats::ArenaStats;
use crate::{AllocError, AllocResult, ArenaAllocator, BlocksInfo, FitModeAllocator};

/// Buddy allocator over a single power-of-two arena.
pub struct BuddyAllocator {
    heap: SpinNoIrq<BuddyHeap>,
    /// Arena base address.
    id: usize,
    reporter: Reporter,
}

impl BuddyAllocator {
    /// Create an allocator whose heap is the smallest power of two holding
    /// `heap_size` bytes.
    ///
    /// Heaps smaller than the minimum block (16 bytes) are rejected with
    /// [`AllocError::InvalidSize`].
    pub fn new(
        heap_size: usize,
        parent: Option<Arc<dyn ParentAllocator>>,
        sink: Option<&Arc<dyn DiagnosticSink>>,
        fit_mode: FitMode,
    ) -> AllocResult<Self> {
        let reporter = Reporter::new(sink);
        report!(reporter, Severity::Debug, "buddy: construction started");

        if heap_size < 1 << MIN_SIZE_POWER {
            report!(
                reporter,
                Severity::Error,
                "buddy: heap size {} is below the {} byte minimum",
                heap_size,
                1usize << MIN_SIZE_POWER
            );
            return Err(AllocError::InvalidSize);
        }
        let size_power = ceil_log2(heap_size)
            .filter(|&power| power <= MAX_SIZE_POWER)
            .ok_or(AllocError::InvalidSize)?;
        let total = HEADER_SIZE
            .checked_add(1 << size_power)
            .ok_or(AllocError::InvalidSize)?;
        let parent = parent.unwrap_or_else(default_parent);

        let arena = RawArena::new(total, parent).map_err(|e| {
            report!(
                reporter,
                Severity::Error,
                "buddy: failed to obtain {} bytes from parent: {}",
                total,
                e
            );
            e
        })?;
        let id = arena.base_addr();
        let heap = BuddyHeap::init(arena, size_power, fit_mode);

        report!(
            reporter,
            Severity::Information,
            "buddy: {} bytes available (2^{}, {} requested)",
            1usize << size_power,
            size_power,
            heap_size
        );
        Ok(Self {
            heap: SpinNoIrq::new(heap),
            id,
            reporter,
        })
    }

    /// Deep copy: fresh storage from the same parent holding the same bytes.
    ///
    /// Pointers handed out by `self` are not valid for the copy.
    pub fn try_clone(&self) -> AllocResult<Self> {
        let copy = self.heap.lock().arena().duplicate();
        let arena = copy.map_err(|e| {
            report!(self.reporter, Severity::Error, "buddy: copy failed: {}", e);
            e
        })?;
        let id = arena.base_addr();
        report!(
            self.reporter,
            Severity::Debug,
            "buddy: copied arena {:#x} to {:#x}",
            self.id,
            id
        );
        Ok(Self {
            heap: SpinNoIrq::new(BuddyHeap::from_copy(arena)),
            id,
            reporter: self.reporter.clone(),
        })
    }

    /// Heap size in bytes, always a power of two.
    pub fn heap_size(&self) -> usize {
        self.heap.lock().heap_size()
    }

    /// Power of two of the heap size.
    pub fn size_power(&self) -> usize {
        self.heap.lock().size_power()
    }

    /// Cursor over all blocks in address order.
    ///
    /// The allocator stays locked while the cursor is alive.
    pub fn blocks(&self) -> BuddyCursor<'_> {
        BuddyCursor::new(self.heap.lock())
    }

    /// Usage summary from one walk of the heap.
    pub fn stats(&self) -> ArenaStats {
        self.blocks().map(BlockInfo::from).collect()
    }

    /// Release the lock, then report the failed request.
    fn out_of_memory(&self, heap: SpinNoIrqGuard<'_, BuddyHeap>, size: usize) -> AllocError {
        let mode = heap.fit_mode();
        #[cfg(feature = "tracking")]
        let stats: ArenaStats = heap
            .walk()
            .map(|(_, meta)| BlockInfo {
                size: meta.size(),
                occupied: meta.occupied,
            })
            .collect();
        drop(heap);

        report!(
            self.reporter,
            Severity::Error,
            "buddy: allocation of {} bytes failed ({:?})",
            size,
            mode
        );
        #[cfg(feature = "tracking")]
        crate::stats::MemoryStatsReporter::print_alloc_failure_stats("buddy", &stats, size);
        AllocError::NoMemory
    }

    fn not_allocated(&self, ptr: *mut u8) -> AllocError {
        report!(
            self.reporter,
            Severity::Error,
            "buddy: pointer {:#x} is not a block of arena {:#x}",
            ptr as usize,
            self.id
        );
        AllocError::NotAllocated
    }
}

impl ArenaAllocator for BuddyAllocator {
    fn allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        report!(self.reporter, Severity::Debug, "buddy: allocating {} bytes", size);
        let mut heap = self.heap.lock();

        let required = match size
            .max(1)
            .checked_add(BLOCK_METADATA_SIZE)
            .and_then(ceil_log2)
        {
            Some(power) if power <= heap.size_power() => power.max(MIN_SIZE_POWER),
            _ => return Err(self.out_of_memory(heap, size)),
        };

        let mode = heap.fit_mode();
        let selected = fit::select(mode, 1 << required, heap.free_blocks());
        let Some(block) = selected else {
            return Err(self.out_of_memory(heap, size));
        };

        heap.split_and_occupy(block.offset, required);
        let ptr = heap.payload(block.offset);
        drop(heap);

        report!(
            self.reporter,
            Severity::Debug,
            "buddy: {} bytes at offset {:#x} (2^{} from 2^{}, {:?})",
            size,
            block.offset,
            required,
            block.power,
            mode
        );
        Ok(ptr)
    }

    fn deallocate(&self, ptr: *mut u8) -> AllocResult {
        if ptr.is_null() {
            return Ok(());
        }
        let mut heap = self.heap.lock();

        let Some(offset) = heap.block_of(ptr) else {
            drop(heap);
            return Err(self.not_allocated(ptr));
        };
        let meta = heap.read_meta(offset);
        if meta.power < MIN_SIZE_POWER
            || meta.power > heap.size_power()
            || !is_aligned(offset, meta.power)
        {
            drop(heap);
            return Err(self.not_allocated(ptr));
        }
        if !meta.occupied {
            drop(heap);
            report!(
                self.reporter,
                Severity::Error,
                "buddy: double free of block at offset {:#x}",
                offset
            );
            return Err(AllocError::DoubleFree);
        }

        let (merged, power) = heap.release(offset);
        drop(heap);

        report!(
            self.reporter,
            Severity::Debug,
            "buddy: released 2^{} at offset {:#x}, free block now 2^{} at {:#x}",
            meta.power,
            offset,
            power,
            merged
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

impl FitModeAllocator for BuddyAllocator {
    fn set_fit_mode(&self, mode: FitMode) {
        self.heap.lock().set_fit_mode(mode);
    }

    fn fit_mode(&self) -> FitMode {
        self.heap.lock().fit_mode()
    }
}

impl BlocksInfo for BuddyAllocator {
    fn blocks_info(&self) -> Vec<BlockInfo> {
        report!(self.reporter, Severity::Trace, "buddy: collecting blocks");
        let blocks: Vec<BlockInfo> = self.blocks().map(BlockInfo::from).collect();
        report!(
            self.reporter,
            Severity::Information,
            "buddy: retrieved {} blocks",
            blocks.len()
        );
        blocks
    }
}

impl Clone for BuddyAllocator {
    /// Panics if the parent cannot supply the copy; see
    /// [`BuddyAllocator::try_clone`] for the fallible form.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(copy) => copy,
            Err(e) => panic!("buddy: failed to copy arena {:#x}: {}", self.id, e),
        }
    }
}

impl PartialEq for BuddyAllocator {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BuddyAllocator {}

impl core::fmt::Debug for BuddyAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BuddyAllocator")
            .field("arena", &format_args!("{:#x}", self.id))
            .finish()
    }
}

impl Drop for BuddyAllocator {
    fn drop(&mut self) {
        report!(self.reporter, Severity::Debug, "buddy: releasing arena {:#x}", self.id);
    }
}
