//! Chunk linker - order chunks and chain the pieces of one recording
//!
//! A paused or briefly interrupted recording leaves several chunks whose
//! clocks almost touch. Starting from the earliest unclaimed chunk, the
//! linker repeatedly appends the unclaimed chunk whose `clock_start` is the
//! nearest at-or-after the chain tail's `clock_end`, within `max_sort_gap`.
//! When nothing is in reach the chain ends and the next unclaimed chunk
//! starts a new one.
//!
//! The pick is greedy: a locally nearest successor can steal a chunk that
//! a later chain would have matched better. That is accepted.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::checkpoint::CheckpointStore;
use crate::core::Chunk;
use crate::error::{DrillError, Result};

/// Default maximum clock gap between a chain tail and its successor
pub const DEFAULT_MAX_SORT_GAP: u64 = 90_000;

/// One chunk's place in the linked order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAssignment {
    pub id: u64,
    pub position: u64,
    pub concat: bool,
}

/// Summary of a link pass
#[derive(Debug, Clone, Default)]
pub struct LinkResult {
    pub chunks: usize,
    /// Number of reconstructed recordings (head chunks)
    pub chains: usize,
    /// Length in chunks of the longest chain
    pub longest_chain: usize,
    pub duration_ms: u64,
}

pub struct ChunkLinker {
    max_sort_gap: u64,
}

impl ChunkLinker {
    pub fn new(max_sort_gap: u64) -> Self {
        Self { max_sort_gap }
    }

    /// Compute the linked order of `chunks` without touching any store.
    ///
    /// Input order does not matter; chains are seeded in ascending
    /// `clock_start` order (ties by id).
    pub fn plan(&self, chunks: &[Chunk]) -> Vec<LinkAssignment> {
        let mut by_clock: Vec<&Chunk> = chunks.iter().collect();
        by_clock.sort_by_key(|c| (c.clock_start, c.id));

        // (clock_start, index into by_clock)
        let mut unclaimed: BTreeSet<(u64, usize)> = by_clock
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clock_start, i))
            .collect();

        let mut ordered: Vec<(usize, bool)> = Vec::with_capacity(by_clock.len());

        for seed in 0..by_clock.len() {
            if !unclaimed.remove(&(by_clock[seed].clock_start, seed)) {
                continue;
            }
            ordered.push((seed, false));

            let mut tail = seed;
            while let Some(next) = self.nearest_successor(&unclaimed, by_clock[tail]) {
                unclaimed.remove(&(by_clock[next].clock_start, next));
                ordered.push((next, true));
                tail = next;
            }
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(position, (i, concat))| LinkAssignment {
                id: by_clock[i].id,
                position: position as u64,
                concat,
            })
            .collect()
    }

    /// Unclaimed chunk with the smallest `clock_start - tail.clock_end` in
    /// `0..=max_sort_gap`. Among equal distances the earliest seed wins.
    fn nearest_successor(&self, unclaimed: &BTreeSet<(u64, usize)>, tail: &Chunk) -> Option<usize> {
        let &(clock_start, index) = unclaimed.range((tail.clock_end, 0)..).next()?;
        (clock_start - tail.clock_end <= self.max_sort_gap).then_some(index)
    }

    /// Link every chunk in the store and commit the result.
    ///
    /// Refused while a scan checkpoint exists: the chunk set is incomplete.
    pub fn link(&self, store: &mut CheckpointStore) -> Result<LinkResult> {
        if let Some(cp) = store.checkpoint() {
            return Err(DrillError::ScanInvariant(format!(
                "a scan is still in progress (next block {}); finish it with `scan` \
                 or drop it with `reset-scan-state` before linking",
                cp.current_block
            )));
        }

        let started = Instant::now();
        let chunks = store.chunks_by_clock();
        let plan = self.plan(&chunks);

        let mut result = LinkResult {
            chunks: plan.len(),
            ..Default::default()
        };
        let mut chain_len = 0usize;
        let mut head = None;

        for assignment in &plan {
            if !assignment.concat {
                if let Some(head) = head {
                    tracing::debug!(head, chunks = chain_len, "Chain linked");
                }
                head = Some(assignment.id);
                result.chains += 1;
                chain_len = 0;
            }
            chain_len += 1;
            result.longest_chain = result.longest_chain.max(chain_len);

            if let Some(chunk) = store.get_chunk(assignment.id) {
                let mut chunk = chunk.clone();
                chunk.position = Some(assignment.position);
                chunk.concat = assignment.concat;
                store.update_chunk(&chunk)?;
            }
        }

        if let Some(head) = head {
            tracing::debug!(head, chunks = chain_len, "Chain linked");
        }

        store.commit()?;
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            chunks = result.chunks,
            chains = result.chains,
            longest_chain = result.longest_chain,
            max_sort_gap = self.max_sort_gap,
            "Link complete"
        );

        Ok(result)
    }
}

impl Default for ChunkLinker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SORT_GAP)
    }
}
