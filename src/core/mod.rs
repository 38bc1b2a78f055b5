//! Core module - chunk model and the engine tying the stages together
//!
//! Data flows strictly forward: scan → link → export. Each stage commits
//! its results to the [`CheckpointStore`](crate::checkpoint::CheckpointStore)
//! before the next one starts.

mod engine;

pub use engine::{ChunkRow, RecoveryEngine, StoreSummary};

use serde::{Deserialize, Serialize};

use crate::scan::header::ticks_to_secs;

/// A maximal run of consecutive blocks with continuous stream-clock headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id, assigned by the store on first insert
    pub id: u64,
    /// First block of the chunk in the virtual address space
    pub block_start: u64,
    /// Length in blocks
    pub block_size: u64,
    /// Clock of the first block
    pub clock_start: u64,
    /// Clock of the last block
    pub clock_end: u64,
    /// Global order assigned by the linker
    #[serde(default)]
    pub position: Option<u64>,
    /// Continues the chunk before it in position order
    #[serde(default)]
    pub concat: bool,
}

impl Chunk {
    /// Playback length implied by the clocks, in seconds
    pub fn duration_secs(&self) -> f64 {
        ticks_to_secs(self.clock_end.saturating_sub(self.clock_start))
    }

    /// Byte offset of the first block
    pub fn byte_offset(&self, block_size: u64) -> u64 {
        self.block_start * block_size
    }

    /// Size in bytes
    pub fn byte_len(&self, block_size: u64) -> u64 {
        self.block_size * block_size
    }

    /// True for a chunk that starts a reconstructed recording
    pub fn is_head(&self) -> bool {
        !self.concat
    }
}

/// A chunk discovered by the scanner, not yet persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewChunk {
    pub block_start: u64,
    pub block_size: u64,
    pub clock_start: u64,
    pub clock_end: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_byte_math() {
        let chunk = Chunk {
            id: 1,
            block_start: 10,
            block_size: 4,
            clock_start: 90_000,
            clock_end: 270_000,
            position: None,
            concat: false,
        };
        assert_eq!(chunk.byte_offset(2048), 20_480);
        assert_eq!(chunk.byte_len(2048), 8192);
        assert!((chunk.duration_secs() - 2.0).abs() < f64::EPSILON);
        assert!(chunk.is_head());
    }
}
