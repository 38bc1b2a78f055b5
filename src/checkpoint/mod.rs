//! Checkpoint store - durable chunk table and scan progress
//!
//! Both logical tables (`chunk` and `scan_checkpoint`) live in one JSON
//! document. Mutations are staged in memory and only become durable on
//! [`CheckpointStore::commit`], which writes a temporary sibling file and
//! renames it over the store. A crash therefore leaves either the previous
//! commit or the new one, never a checkpoint that refers to chunks which
//! were not written with it.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Chunk, NewChunk};
use crate::error::{DrillError, Result};

/// Resumable state of an in-progress scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    /// Next block to examine
    pub current_block: u64,
    /// First block of the chunk open at checkpoint time
    pub block_start: Option<u64>,
    /// Clock of the first block of the open chunk
    pub clock_start: Option<u64>,
    /// Clock seen at the previous block
    pub old_clock: Option<u64>,
}

impl ScanCheckpoint {
    /// Checkpoint at the very start of a fresh scan
    pub fn start() -> Self {
        Self {
            current_block: 0,
            block_start: None,
            clock_start: None,
            old_clock: None,
        }
    }

    /// `(block_start, clock_start)` of the chunk that was open, if any
    pub fn open_chunk(&self) -> Option<(u64, u64)> {
        match (self.block_start, self.clock_start) {
            (Some(b), Some(c)) => Some((b, c)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    next_id: u64,
    /// Block size the addresses below are measured in
    #[serde(default)]
    block_size: Option<u64>,
    #[serde(default)]
    chunks: Vec<Chunk>,
    #[serde(default)]
    scan_checkpoint: Option<ScanCheckpoint>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    next_id: u64,
    block_size: Option<u64>,
    chunks: BTreeMap<u64, Chunk>,
    checkpoint: Option<ScanCheckpoint>,
}

impl StoreState {
    fn from_document(doc: StoreDocument) -> Self {
        let chunks = doc.chunks.into_iter().map(|c| (c.id, c)).collect();
        Self {
            next_id: doc.next_id,
            block_size: doc.block_size,
            chunks,
            checkpoint: doc.scan_checkpoint,
        }
    }

    fn to_document(&self) -> StoreDocument {
        StoreDocument {
            version: CheckpointStore::VERSION,
            next_id: self.next_id,
            block_size: self.block_size,
            chunks: self.chunks.values().cloned().collect(),
            scan_checkpoint: self.checkpoint,
            updated_at: Utc::now(),
        }
    }
}

/// Transactional store for chunk records and the scan checkpoint
pub struct CheckpointStore {
    path: PathBuf,
    state: StoreState,
    dirty: bool,
}

impl CheckpointStore {
    const VERSION: u32 = 1;

    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let state = Self::read_state(path)?;
        tracing::debug!(
            path = %path.display(),
            chunks = state.chunks.len(),
            scanning = state.checkpoint.is_some(),
            "Store opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            state,
            dirty: false,
        })
    }

    fn read_state(path: &Path) -> Result<StoreState> {
        if !path.exists() {
            return Ok(StoreState {
                next_id: 1,
                ..Default::default()
            });
        }

        let data = fs::read_to_string(path).map_err(|e| {
            DrillError::Store(format!("cannot read {}: {}", path.display(), e))
        })?;
        let doc: StoreDocument = serde_json::from_str(&data)?;
        if doc.version != Self::VERSION {
            return Err(DrillError::Store(format!(
                "{} has format version {}, expected {}",
                path.display(),
                doc.version,
                Self::VERSION
            )));
        }
        Ok(StoreState::from_document(doc))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staged changes not yet committed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Block size the stored chunks and checkpoint were scanned with
    pub fn block_size(&self) -> Option<u64> {
        self.state.block_size
    }

    pub fn set_block_size(&mut self, block_size: u64) {
        if self.state.block_size != Some(block_size) {
            self.state.block_size = Some(block_size);
            self.dirty = true;
        }
    }

    /// Fail if chunks or a checkpoint exist that were measured in another
    /// block size. An empty store accepts any size.
    pub fn ensure_block_size(&self, block_size: u64) -> Result<()> {
        let holds_scan = !self.state.chunks.is_empty() || self.state.checkpoint.is_some();
        match self.state.block_size {
            Some(recorded) if holds_scan && recorded != block_size => {
                Err(DrillError::Config(format!(
                    "block_size is {} but {} was scanned with {}; restore the setting \
                     or run `reset-chunks` and `reset-scan-state` to scan again",
                    block_size,
                    self.path.display(),
                    recorded
                )))
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // chunk table
    // ------------------------------------------------------------------

    /// Stage a new chunk record and return its id
    pub fn insert_chunk(&mut self, chunk: NewChunk) -> u64 {
        let id = self.state.next_id;
        self.state.next_id += 1;
        self.state.chunks.insert(
            id,
            Chunk {
                id,
                block_start: chunk.block_start,
                block_size: chunk.block_size,
                clock_start: chunk.clock_start,
                clock_end: chunk.clock_end,
                position: None,
                concat: false,
            },
        );
        self.dirty = true;
        id
    }

    /// Stage an update of an existing record
    pub fn update_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        match self.state.chunks.get_mut(&chunk.id) {
            Some(slot) => {
                *slot = chunk.clone();
                self.dirty = true;
                Ok(())
            }
            None => Err(DrillError::Store(format!("no chunk with id {}", chunk.id))),
        }
    }

    pub fn get_chunk(&self, id: u64) -> Option<&Chunk> {
        self.state.chunks.get(&id)
    }

    pub fn chunk_count(&self) -> usize {
        self.state.chunks.len()
    }

    /// All chunks by ascending `clock_start`, ties broken by id
    pub fn chunks_by_clock(&self) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self.state.chunks.values().cloned().collect();
        chunks.sort_by_key(|c| (c.clock_start, c.id));
        chunks
    }

    /// Linked chunks by position, then any unlinked ones by `block_start`
    pub fn chunks_by_position(&self) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self.state.chunks.values().cloned().collect();
        chunks.sort_by_key(|c| match c.position {
            Some(p) => (0, p, c.id),
            None => (1, c.block_start, c.id),
        });
        chunks
    }

    /// True once every chunk carries a position
    pub fn is_linked(&self) -> bool {
        self.state.chunks.values().all(|c| c.position.is_some())
    }

    /// Drop every chunk record (`reset-chunks`)
    pub fn clear_chunks(&mut self) {
        if !self.state.chunks.is_empty() {
            self.state.chunks.clear();
            self.dirty = true;
        }
    }

    /// Forget positions and concat flags (`unlink`)
    pub fn clear_links(&mut self) {
        for chunk in self.state.chunks.values_mut() {
            chunk.position = None;
            chunk.concat = false;
        }
        self.dirty = true;
    }

    // ------------------------------------------------------------------
    // scan_checkpoint
    // ------------------------------------------------------------------

    pub fn checkpoint(&self) -> Option<ScanCheckpoint> {
        self.state.checkpoint
    }

    pub fn set_checkpoint(&mut self, checkpoint: ScanCheckpoint) {
        self.state.checkpoint = Some(checkpoint);
        self.dirty = true;
    }

    /// Mark that no scan is in progress
    pub fn clear_checkpoint(&mut self) {
        self.state.checkpoint = None;
        self.dirty = true;
    }

    // ------------------------------------------------------------------
    // transactions
    // ------------------------------------------------------------------

    /// Atomically persist every staged change
    pub fn commit(&mut self) -> Result<()> {
        self.write_document().map_err(|e| {
            DrillError::Store(format!("cannot commit {}: {}", self.path.display(), e))
        })?;

        self.dirty = false;
        tracing::trace!(
            path = %self.path.display(),
            chunks = self.state.chunks.len(),
            "Store committed"
        );
        Ok(())
    }

    fn write_document(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &self.state.to_document())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Discard staged changes, returning to the last commit
    pub fn rollback(&mut self) -> Result<()> {
        self.state = Self::read_state(&self.path)?;
        self.dirty = false;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
