//! Statistics and failure reporting
//!
//! Statistics are derived from a single block walk rather than maintained
//! incrementally, so they are always consistent with [`crate::BlocksInfo`].

use crate::info::BlockInfo;

/// Usage summary of one arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub occupied_blocks: usize,
    pub free_blocks: usize,
    pub largest_free_block: usize,
}

impl ArenaStats {
    pub const fn new() -> Self {
        Self {
            total_bytes: 0,
            used_bytes: 0,
            free_bytes: 0,
            occupied_blocks: 0,
            free_blocks: 0,
            largest_free_block: 0,
        }
    }

    /// Account for one block.
    pub fn add(&mut self, block: BlockInfo) {
        self.total_bytes += block.size;
        if block.occupied {
            self.used_bytes += block.size;
            self.occupied_blocks += 1;
        } else {
            self.free_bytes += block.size;
            self.free_blocks += 1;
            self.largest_free_block = self.largest_free_block.max(block.size);
        }
    }
}

impl FromIterator<BlockInfo> for ArenaStats {
    fn from_iter<I: IntoIterator<Item = BlockInfo>>(iter: I) -> Self {
        let mut stats = Self::new();
        for block in iter {
            stats.add(block);
        }
        stats
    }
}

/// Detailed memory statistics reporter
pub struct MemoryStatsReporter;

impl MemoryStatsReporter {
    /// Print the arena state after an allocation failure
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(kind: &str, stats: &ArenaStats, request_bytes: usize) {
        #[cfg(feature = "log")]
        use log::error;
        error!("========================================");
        error!("{}: request of {} bytes failed", kind, request_bytes);
        error!(
            "  Total: {} bytes, used: {} bytes, free: {} bytes",
            stats.total_bytes, stats.used_bytes, stats.free_bytes
        );
        error!(
            "  Blocks: {} occupied, {} free, largest free {} bytes",
            stats.occupied_blocks, stats.free_blocks, stats.largest_free_block
        );
        error!("========================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_stats() {
        let stats: ArenaStats = [
            BlockInfo::occupied(64),
            BlockInfo::free(64),
            BlockInfo::free(128),
        ]
        .into_iter()
        .collect();

        assert_eq!(stats.total_bytes, 256);
        assert_eq!(stats.used_bytes, 64);
        assert_eq!(stats.free_bytes, 192);
        assert_eq!(stats.occupied_blocks, 1);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.largest_free_block, 128);
    }
}
