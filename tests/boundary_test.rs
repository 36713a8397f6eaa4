//! Integration tests for the boundary-tag allocator
//!
//! Layouts are checked through `blocks_info`, which reports every block
//! with its metadata so sizes always add up to the heap size.

#![no_std]

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use arena_allocators::boundary::BLOCK_METADATA_SIZE as META;
use arena_allocators::{
    info, AllocError, ArenaAllocator, BlockInfo, BlocksInfo, BoundaryTagAllocator,
    DiagnosticSink, FitMode, FitModeAllocator, Severity,
};
use kspin::SpinNoIrq;

fn allocator(size: usize, mode: FitMode) -> BoundaryTagAllocator {
    BoundaryTagAllocator::new(size, None, None, mode).unwrap()
}

/// Heap of 280 bytes holding three 40-byte blocks with the middle one freed.
fn three_blocks_middle_free(mode: FitMode) -> BoundaryTagAllocator {
    let allocator = allocator(280, mode);
    let _a = allocator.allocate(40).unwrap();
    let b = allocator.allocate(40).unwrap();
    let _c = allocator.allocate(40).unwrap();
    allocator.deallocate(b.as_ptr()).unwrap();
    assert_eq!(
        allocator.blocks_info(),
        [
            BlockInfo::occupied(40 + META),
            BlockInfo::free(40 + META),
            BlockInfo::occupied(40 + META),
            BlockInfo::free(280 - 3 * (40 + META)),
        ]
    );
    allocator
}

#[test]
fn test_reuse_absorbs_slack() {
    let allocator = allocator(3000, FitMode::FirstFit);
    let a = allocator.allocate(1000).unwrap();
    let _b = allocator.allocate(0).unwrap();
    allocator.deallocate(a.as_ptr()).unwrap();

    // 999 bytes leave one byte of slack in the 1032-byte gap, too little for
    // another block, so the new block takes the whole gap.
    let c = allocator.allocate(999).unwrap();
    assert_eq!(c, a);
    assert_eq!(
        allocator.blocks_info(),
        [
            BlockInfo::occupied(1000 + META),
            BlockInfo::occupied(META),
            BlockInfo::free(3000 - 1000 - 2 * META),
        ]
    );
}

#[test]
fn test_worst_fit_takes_largest_gap() {
    let allocator = three_blocks_middle_free(FitMode::WorstFit);
    allocator.allocate(4).unwrap();
    assert_eq!(
        allocator.blocks_info(),
        [
            BlockInfo::occupied(40 + META),
            BlockInfo::occupied(4 + META),
            BlockInfo::free(36),
            BlockInfo::occupied(40 + META),
            BlockInfo::free(64),
        ]
    );
}

#[test]
fn test_best_fit_takes_tightest_gap() {
    let allocator = three_blocks_middle_free(FitMode::BestFit);
    allocator.allocate(4).unwrap();
    assert_eq!(
        allocator.blocks_info(),
        [
            BlockInfo::occupied(40 + META),
            BlockInfo::free(40 + META),
            BlockInfo::occupied(40 + META),
            BlockInfo::occupied(64),
        ]
    );
}

#[test]
fn test_first_fit_takes_lowest_gap() {
    let allocator = three_blocks_middle_free(FitMode::FirstFit);
    allocator.allocate(4).unwrap();
    assert_eq!(allocator.blocks_info()[1], BlockInfo::occupied(4 + META));
}

#[test]
fn test_fit_mode_switch() {
    let allocator = three_blocks_middle_free(FitMode::FirstFit);
    assert_eq!(allocator.fit_mode(), FitMode::FirstFit);
    allocator.set_fit_mode(FitMode::BestFit);
    assert_eq!(allocator.fit_mode(), FitMode::BestFit);
    allocator.allocate(4).unwrap();
    assert_eq!(allocator.blocks_info()[3], BlockInfo::occupied(64));
}

#[test]
fn test_exhaustion() {
    let allocator = allocator(3000, FitMode::FirstFit);
    assert_eq!(allocator.allocate(3000).err(), Some(AllocError::NoMemory));
    assert_eq!(allocator.allocate(usize::MAX).err(), Some(AllocError::NoMemory));
    assert_eq!(allocator.blocks_info(), [BlockInfo::free(3000)]);

    let whole = allocator.allocate(3000 - META).unwrap();
    assert_eq!(allocator.available_bytes(), 0);
    assert_eq!(allocator.allocate(0).err(), Some(AllocError::NoMemory));
    allocator.deallocate(whole.as_ptr()).unwrap();
    assert_eq!(allocator.available_bytes(), 3000);
}

#[test]
fn test_zero_sized_block_at_heap_end() {
    let allocator = allocator(META * 2, FitMode::FirstFit);
    let a = allocator.allocate(0).unwrap();
    let b = allocator.allocate(0).unwrap();
    assert_eq!(
        allocator.blocks_info(),
        [BlockInfo::occupied(META), BlockInfo::occupied(META)]
    );
    allocator.deallocate(b.as_ptr()).unwrap();
    allocator.deallocate(a.as_ptr()).unwrap();
    assert_eq!(allocator.blocks_info(), [BlockInfo::free(META * 2)]);
}

#[test]
fn test_round_trip_restores_heap() {
    let allocator = allocator(4096, FitMode::FirstFit);
    let sizes = [1, 17, 256, 0, 100, 33, 512, 8];
    let ptrs: Vec<_> = sizes
        .iter()
        .map(|&size| allocator.allocate(size).unwrap())
        .collect();

    let blocks = allocator.blocks_info();
    assert_eq!(info::total_size(&blocks), 4096);
    assert_eq!(
        info::occupied_size(&blocks),
        sizes.iter().map(|s| s + META).sum::<usize>()
    );

    // Free every other block, then the rest.
    for ptr in ptrs.iter().step_by(2) {
        allocator.deallocate(ptr.as_ptr()).unwrap();
    }
    assert_eq!(info::total_size(&allocator.blocks_info()), 4096);
    for ptr in ptrs.iter().skip(1).step_by(2) {
        allocator.deallocate(ptr.as_ptr()).unwrap();
    }
    assert_eq!(allocator.blocks_info(), [BlockInfo::free(4096)]);
}

#[test]
fn test_stats_match_blocks() {
    let allocator = allocator(1024, FitMode::FirstFit);
    let a = allocator.allocate(100).unwrap();
    let _b = allocator.allocate(200).unwrap();
    allocator.deallocate(a.as_ptr()).unwrap();

    let stats = allocator.stats();
    assert_eq!(stats.total_bytes, 1024);
    assert_eq!(stats.used_bytes, 200 + META);
    assert_eq!(stats.occupied_blocks, 1);
    assert_eq!(stats.free_blocks, 2);
    assert_eq!(stats.largest_free_block, 1024 - 100 - 200 - 2 * META);
    assert_eq!(allocator.used_bytes(), stats.used_bytes);
}

struct Collect {
    lines: SpinNoIrq<Vec<Severity>>,
}

impl Collect {
    fn new() -> Self {
        Self {
            lines: SpinNoIrq::new(Vec::new()),
        }
    }
}

impl DiagnosticSink for Collect {
    fn log(&self, severity: Severity, _message: &str) {
        self.lines.lock().push(severity);
    }
}

#[test]
fn test_sink_receives_reports() {
    let collect = Arc::new(Collect::new());
    let sink: Arc<dyn DiagnosticSink> = collect.clone();
    let allocator = BoundaryTagAllocator::new(128, None, Some(&sink), FitMode::FirstFit).unwrap();
    assert_eq!(allocator.allocate(1000).err(), Some(AllocError::NoMemory));
    assert!(collect.lines.lock().contains(&Severity::Error));

    // The allocator holds the sink weakly.
    drop(sink);
    assert_eq!(Arc::strong_count(&collect), 1);
    let before = collect.lines.lock().len();
    allocator.allocate(8).unwrap();
    assert!(collect.lines.lock().len() > before);

    drop(collect);
    allocator.allocate(8).unwrap();
}
