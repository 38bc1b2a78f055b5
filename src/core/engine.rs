//! RecoveryEngine - ties the config, store, stream and the three passes together
//!
//! Each operation opens the store (and the image, when it needs one), runs
//! one pass and returns its summary. Display is left to the caller.

use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use super::Chunk;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::export::{ExportProgress, ExportResult, Exporter};
use crate::link::{ChunkLinker, LinkResult};
use crate::scan::{ChunkScanner, ScanProgress, ScanResult};
use crate::stream::VirtualBlockStream;

/// One row of the chunk listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRow {
    /// Index in position order, as accepted by `export <index>`
    pub index: usize,
    pub id: u64,
    pub block_start: u64,
    pub block_size: u64,
    pub clock_start: u64,
    pub clock_end: u64,
    pub position: Option<u64>,
    pub concat: bool,
    pub duration_secs: f64,
    pub bytes: u64,
}

/// Store overview for `setup show` and `list`
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSummary {
    pub chunks: usize,
    pub recordings: usize,
    pub linked: bool,
    /// Block the next scan resumes at, when a scan was interrupted
    pub resume_block: Option<u64>,
    pub total_bytes: u64,
}

/// The main dvr-drill engine
pub struct RecoveryEngine {
    config: Config,
}

impl RecoveryEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the chunk store named in the config
    pub fn open_store(&self) -> Result<CheckpointStore> {
        CheckpointStore::open(&self.config.store_path).with_context(|| {
            format!(
                "Failed to open state file: {}",
                self.config.store_path.display()
            )
        })
    }

    fn open_stream(&self) -> Result<VirtualBlockStream> {
        self.config.validate()?;
        let stream = VirtualBlockStream::open(&self.config.inputs)
            .context("Failed to open input files")?;
        tracing::debug!(
            parts = stream.parts().len(),
            bytes = stream.total_size(),
            "Opened input"
        );
        Ok(stream)
    }

    /// Scan (or resume scanning) the inputs for chunks
    pub fn scan_with_progress<F>(&self, on_progress: F) -> Result<ScanResult>
    where
        F: FnMut(&ScanProgress) -> ControlFlow<()>,
    {
        let mut stream = self.open_stream()?;
        let mut store = self.open_store()?;
        let mut scanner = ChunkScanner::new(self.config.scan_options());

        let result = scanner
            .scan_with_progress(&mut stream, &mut store, on_progress)
            .context("Scan failed");
        stream.close();
        result
    }

    pub fn scan(&self) -> Result<ScanResult> {
        self.scan_with_progress(|_| ControlFlow::Continue(()))
    }

    /// Order the chunks and chain the pieces of each recording
    pub fn link(&self) -> Result<LinkResult> {
        let mut store = self.open_store()?;
        let linker = ChunkLinker::new(self.config.max_sort_gap);
        linker.link(&mut store).context("Link failed")
    }

    /// Forget the linked order, keeping the chunks. Returns the chunk count.
    pub fn unlink(&self) -> Result<usize> {
        let mut store = self.open_store()?;
        store.clear_links();
        store.commit()?;
        tracing::info!(chunks = store.chunk_count(), "Links cleared");
        Ok(store.chunk_count())
    }

    /// Delete every chunk. The scan checkpoint is left alone.
    pub fn reset_chunks(&self) -> Result<usize> {
        let mut store = self.open_store()?;
        let removed = store.chunk_count();
        store.clear_chunks();
        store.commit()?;
        tracing::info!(removed, "Chunk table cleared");
        Ok(removed)
    }

    /// Drop the scan checkpoint. Returns whether one existed.
    pub fn reset_scan_state(&self) -> Result<bool> {
        let mut store = self.open_store()?;
        let existed = store.checkpoint().is_some();
        store.clear_checkpoint();
        store.commit()?;
        tracing::info!(existed, "Scan state cleared");
        Ok(existed)
    }

    /// Chunks in position order
    pub fn chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.open_store()?.chunks_by_position())
    }

    /// The position-ordered chunk table
    pub fn list(&self) -> Result<Vec<ChunkRow>> {
        let block_size = self.config.block_size;
        Ok(self
            .chunks()?
            .into_iter()
            .enumerate()
            .map(|(index, c)| ChunkRow {
                index,
                id: c.id,
                block_start: c.block_start,
                block_size: c.block_size,
                clock_start: c.clock_start,
                clock_end: c.clock_end,
                position: c.position,
                concat: c.concat,
                duration_secs: c.duration_secs(),
                bytes: c.byte_len(block_size),
            })
            .collect())
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let store = self.open_store()?;
        let chunks = store.chunks_by_position();
        let linked = store.chunk_count() > 0 && store.is_linked();
        Ok(StoreSummary {
            chunks: chunks.len(),
            recordings: if linked {
                chunks.iter().filter(|c| c.is_head()).count()
            } else {
                0
            },
            linked,
            resume_block: store.checkpoint().map(|cp| cp.current_block),
            total_bytes: chunks
                .iter()
                .map(|c| c.byte_len(self.config.block_size))
                .sum(),
        })
    }

    /// Export every recording, or only the one whose head sits at `index`.
    ///
    /// `dest` overrides the configured export directory.
    pub fn export_with_progress<F>(
        &self,
        index: Option<usize>,
        dest: Option<PathBuf>,
        on_progress: F,
    ) -> Result<ExportResult>
    where
        F: FnMut(ExportProgress),
    {
        let dest = match dest {
            Some(dest) => {
                self.config.validate()?;
                if !dest.is_dir() {
                    bail!("Export directory {} does not exist", dest.display());
                }
                dest
            }
            None => self.config.validate_for_export()?.to_path_buf(),
        };

        let exporter = Exporter::new(self.config.export_options(dest));
        let store = self.open_store()?;
        exporter
            .verify_block_size(&store)
            .context("Export failed")?;
        let chunks = store.chunks_by_position();
        let mut stream = self.open_stream()?;

        let result = match index {
            Some(index) => {
                exporter.export_chain_with_progress(&mut stream, &chunks, index, on_progress)
            }
            None => exporter.export_all_with_progress(&mut stream, &chunks, on_progress),
        };
        stream.close();

        result.context("Export failed")
    }

    pub fn export(&self, index: Option<usize>, dest: Option<PathBuf>) -> Result<ExportResult> {
        self.export_with_progress(index, dest, |_| {})
    }
}
