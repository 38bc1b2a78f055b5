//! Chunk scanner - resumable forward scan for stream-clock runs
//!
//! Walks every full block of the virtual stream once, parses the pack
//! header at the start of each block and groups consecutive blocks with
//! continuous clocks into chunks.
//!
//! # Design
//!
//! - **Sequential I/O**: one seek at the resume point, then block-sized
//!   exact reads until the end of the stream
//! - **Time-based checkpoints**: every `checkpoint_interval` of wall time
//!   the cursor (and any chunk it is building) is written to the store in
//!   the same commit as the chunks closed since the last one
//! - **Refuse to rescan**: a store with chunks but no checkpoint belongs to
//!   a finished scan; running again would duplicate or clobber its chunks
//! - **No wraparound**: a clock that goes backwards always ends the chunk,
//!   including a legitimate wrap at 2^33

pub mod header;

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use crate::checkpoint::{CheckpointStore, ScanCheckpoint};
use crate::core::NewChunk;
use crate::error::{DrillError, Result};
use crate::stream::VirtualBlockStream;
use header::parse_scr;

/// Default filesystem block size in bytes
pub const DEFAULT_BLOCK_SIZE: u64 = 2048;

/// Default minimum chunk size in blocks (50 MiB at 2048-byte blocks)
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 25_600;

/// Default maximum clock step inside one chunk (one second)
pub const DEFAULT_MAX_CREATE_GAP: u64 = 90_000;

/// Default wall time between checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

/// Options for a scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Block size in bytes
    pub block_size: u64,
    /// Runs shorter than this many blocks are dropped
    pub min_chunk_size: u64,
    /// Largest forward clock step that keeps a chunk open
    pub max_create_gap: u64,
    /// Wall time between checkpoint commits (zero = before every block)
    pub checkpoint_interval: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_create_gap: DEFAULT_MAX_CREATE_GAP,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

/// Lifecycle of a scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    /// Full pass done, checkpoint cleared
    Finished,
    /// Stopped by the progress callback right after a checkpoint commit
    Aborted,
}

/// Progress report emitted after each checkpoint commit
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Next block to examine
    pub current_block: u64,
    pub total_blocks: u64,
    /// Chunks in the store, including ones from before a resume
    pub chunks_found: usize,
    /// Throughput since the previous report
    pub blocks_per_sec: f64,
    pub bytes_per_sec: f64,
    pub elapsed: Duration,
}

impl ScanProgress {
    pub fn percentage(&self) -> f64 {
        if self.total_blocks == 0 {
            100.0
        } else {
            self.current_block as f64 / self.total_blocks as f64 * 100.0
        }
    }
}

/// Outcome of a scan run
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// `Finished` or `Aborted`
    pub state: ScanState,
    /// Block the run started at (non-zero after a resume)
    pub start_block: u64,
    /// Next block that would have been examined
    pub end_block: u64,
    pub total_blocks: u64,
    /// Chunks persisted by this run
    pub chunks_added: usize,
    /// Chunks in the store afterwards
    pub chunks_total: usize,
    pub duration: Duration,
}

impl ScanResult {
    pub fn blocks_scanned(&self) -> u64 {
        self.end_block - self.start_block
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenChunk {
    block_start: u64,
    clock_start: u64,
}

/// Position and partial state of the scan, exactly what a checkpoint holds
#[derive(Debug, Clone, Copy)]
struct ScanCursor {
    current_block: u64,
    open: Option<OpenChunk>,
    old_clock: Option<u64>,
}

impl ScanCursor {
    fn from_checkpoint(cp: ScanCheckpoint) -> Self {
        Self {
            current_block: cp.current_block,
            open: cp.open_chunk().map(|(block_start, clock_start)| OpenChunk {
                block_start,
                clock_start,
            }),
            old_clock: cp.old_clock,
        }
    }

    fn checkpoint(&self) -> ScanCheckpoint {
        ScanCheckpoint {
            current_block: self.current_block,
            block_start: self.open.map(|o| o.block_start),
            clock_start: self.open.map(|o| o.clock_start),
            old_clock: self.old_clock,
        }
    }
}

/// The chunk scanner
pub struct ChunkScanner {
    options: ScanOptions,
    state: ScanState,
}

impl ChunkScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan with a progress callback. The callback runs after every
    /// checkpoint commit; returning `Break` stops the scan there.
    pub fn scan_with_progress<F>(
        &mut self,
        stream: &mut VirtualBlockStream,
        store: &mut CheckpointStore,
        mut on_progress: F,
    ) -> Result<ScanResult>
    where
        F: FnMut(&ScanProgress) -> ControlFlow<()>,
    {
        let block_size = self.options.block_size;
        if block_size == 0 {
            return Err(DrillError::Config("block size must be positive".into()));
        }
        store.ensure_block_size(block_size)?;
        let total_blocks = stream.total_blocks(block_size);

        let mut cursor = match store.checkpoint() {
            Some(cp) => {
                tracing::info!(
                    current_block = cp.current_block,
                    open_chunk = cp.open_chunk().is_some(),
                    chunks = store.chunk_count(),
                    "Resuming scan from checkpoint"
                );
                ScanCursor::from_checkpoint(cp)
            }
            None if store.chunk_count() != 0 => {
                return Err(DrillError::ScanInvariant(format!(
                    "no scan in progress but the store already holds {} chunks; \
                     the previous scan probably finished. Run `reset-chunks` to \
                     discard them before scanning again",
                    store.chunk_count()
                )));
            }
            None => ScanCursor::from_checkpoint(ScanCheckpoint::start()),
        };

        if cursor.current_block > total_blocks {
            return Err(DrillError::ScanInvariant(format!(
                "checkpoint is at block {} but the input only has {} blocks; \
                 were the input files changed?",
                cursor.current_block, total_blocks
            )));
        }

        let start_block = cursor.current_block;
        let chunks_before = store.chunk_count();
        let started = Instant::now();

        tracing::info!(
            start_block,
            total_blocks,
            block_size,
            min_chunk_size = self.options.min_chunk_size,
            max_create_gap = self.options.max_create_gap,
            "Starting chunk scan"
        );

        self.state = ScanState::Scanning;
        store.set_block_size(block_size);
        store.set_checkpoint(cursor.checkpoint());
        store.commit()?;

        stream.seek(cursor.current_block * block_size)?;
        let mut buf = vec![0u8; block_size as usize];

        let mut last_save = Instant::now();
        let mut blocks_at_last_save = cursor.current_block;

        while cursor.current_block < total_blocks {
            let since_save = last_save.elapsed();
            if since_save >= self.options.checkpoint_interval {
                store.set_checkpoint(cursor.checkpoint());
                store.commit()?;
                tracing::debug!(
                    current_block = cursor.current_block,
                    chunks = store.chunk_count(),
                    "Checkpoint committed"
                );

                let secs = since_save.as_secs_f64();
                let blocks_per_sec = if secs > 0.0 {
                    (cursor.current_block - blocks_at_last_save) as f64 / secs
                } else {
                    0.0
                };
                let progress = ScanProgress {
                    current_block: cursor.current_block,
                    total_blocks,
                    chunks_found: store.chunk_count(),
                    blocks_per_sec,
                    bytes_per_sec: blocks_per_sec * block_size as f64,
                    elapsed: started.elapsed(),
                };

                if on_progress(&progress).is_break() {
                    self.state = ScanState::Aborted;
                    tracing::info!(
                        current_block = cursor.current_block,
                        "Scan stopped at checkpoint"
                    );
                    return Ok(ScanResult {
                        state: self.state,
                        start_block,
                        end_block: cursor.current_block,
                        total_blocks,
                        chunks_added: store.chunk_count() - chunks_before,
                        chunks_total: store.chunk_count(),
                        duration: started.elapsed(),
                    });
                }

                last_save = Instant::now();
                blocks_at_last_save = cursor.current_block;
            }

            stream.read_exact_into(&mut buf)?;
            self.step(&mut cursor, parse_scr(&buf), store);
            cursor.current_block += 1;
        }

        self.close_chunk(&mut cursor, store);
        store.clear_checkpoint();
        store.commit()?;
        stream.close();

        self.state = ScanState::Finished;
        let result = ScanResult {
            state: self.state,
            start_block,
            end_block: cursor.current_block,
            total_blocks,
            chunks_added: store.chunk_count() - chunks_before,
            chunks_total: store.chunk_count(),
            duration: started.elapsed(),
        };

        tracing::info!(
            blocks = result.blocks_scanned(),
            chunks_added = result.chunks_added,
            chunks_total = result.chunks_total,
            duration_ms = result.duration.as_millis() as u64,
            "Scan complete"
        );

        Ok(result)
    }

    /// Scan without progress reporting
    pub fn scan(
        &mut self,
        stream: &mut VirtualBlockStream,
        store: &mut CheckpointStore,
    ) -> Result<ScanResult> {
        self.scan_with_progress(stream, store, |_| ControlFlow::Continue(()))
    }

    /// Apply one block's header to the cursor
    fn step(&self, cursor: &mut ScanCursor, clock: Option<u64>, store: &mut CheckpointStore) {
        let Some(clock) = clock else {
            self.close_chunk(cursor, store);
            return;
        };

        match (cursor.open, cursor.old_clock) {
            (Some(_), Some(old)) => {
                let continuous = clock >= old && clock - old <= self.options.max_create_gap;
                if !continuous {
                    self.close_chunk(cursor, store);
                    cursor.open = Some(OpenChunk {
                        block_start: cursor.current_block,
                        clock_start: clock,
                    });
                }
            }
            _ => {
                cursor.open = Some(OpenChunk {
                    block_start: cursor.current_block,
                    clock_start: clock,
                });
            }
        }

        cursor.old_clock = Some(clock);
    }

    /// End the open chunk at `cursor.current_block`, keeping it only if it
    /// reaches the minimum size.
    fn close_chunk(&self, cursor: &mut ScanCursor, store: &mut CheckpointStore) {
        let Some(open) = cursor.open.take() else {
            return;
        };

        let block_size = cursor
            .current_block
            .saturating_sub(1)
            .saturating_sub(open.block_start);
        let clock_end = cursor.old_clock.unwrap_or(open.clock_start);

        if block_size >= self.options.min_chunk_size {
            let id = store.insert_chunk(NewChunk {
                block_start: open.block_start,
                block_size,
                clock_start: open.clock_start,
                clock_end,
            });
            tracing::debug!(
                id,
                block_start = open.block_start,
                block_size,
                clock_start = open.clock_start,
                clock_end,
                "Chunk found"
            );
        } else {
            tracing::trace!(
                block_start = open.block_start,
                block_size,
                "Run below minimum chunk size discarded"
            );
        }
    }
}
