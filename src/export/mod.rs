//! Export module - replay linked chunks into recording files
//!
//! Each chain (a head chunk plus the `concat` chunks after it in position
//! order) becomes one `.mpg` file. Chunk bytes are copied block by block
//! from the virtual stream and hashed with blake3 on the way out, so the
//! manifest never needs a second read of the output.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStore;
use crate::core::Chunk;
use crate::error::{DrillError, Result};
use crate::stream::VirtualBlockStream;

/// Export configuration options
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Destination directory
    pub dest: PathBuf,
    /// Block size the chunks were scanned with
    pub block_size: u64,
    /// Keep going with the next recording when one fails to write
    pub continue_on_error: bool,
    /// Write a manifest with per-file blake3 hashes
    pub create_manifest: bool,
    /// Report what would be written without writing
    pub dry_run: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            dest: PathBuf::from("recovered"),
            block_size: crate::scan::DEFAULT_BLOCK_SIZE,
            continue_on_error: true,
            create_manifest: true,
            dry_run: false,
        }
    }
}

/// Result of an export operation
#[derive(Debug, Clone, Default)]
pub struct ExportResult {
    /// Recordings written
    pub successful: usize,
    /// Recordings that failed
    pub failed: usize,
    /// Total bytes written
    pub total_bytes: u64,
    /// Output files in export order
    pub files: Vec<PathBuf>,
    /// Path to manifest file if created
    pub manifest_path: Option<PathBuf>,
    /// Errors encountered
    pub errors: Vec<ExportError>,
}

/// A recording that could not be written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportError {
    pub head_position: u64,
    pub dest_path: PathBuf,
    pub error: String,
}

/// Manifest entry for one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub head_position: u64,
    pub chunk_ids: Vec<u64>,
    pub size: u64,
    pub duration_secs: f64,
    pub blake3_hash: String,
    pub exported_at: String,
}

/// Manifest file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub version: u32,
    pub created_at: String,
    pub dest_root: String,
    pub block_size: u64,
    pub total_files: usize,
    pub total_bytes: u64,
    pub entries: Vec<ManifestEntry>,
}

impl ExportManifest {
    pub fn new(dest_root: &Path, block_size: u64) -> Self {
        Self {
            version: 1,
            created_at: Utc::now().to_rfc3339(),
            dest_root: dest_root.to_string_lossy().to_string(),
            block_size,
            total_files: 0,
            total_bytes: 0,
            entries: Vec::new(),
        }
    }
}

/// Progress emitted after each copied chunk
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// 1-based recording counter
    pub recording: usize,
    pub recordings: usize,
    pub chunk_id: u64,
    /// Bytes written so far in this export
    pub bytes_written: u64,
    pub total_bytes: u64,
}

/// Output name for the recording whose head sits at `head_position`
pub fn recording_file_name(head_position: u64) -> String {
    format!("recording_{:04}.mpg", head_position)
}

/// Split position-ordered chunks into chains: each range starts at a head
/// and runs up to (not including) the next head.
pub fn chains(chunks: &[Chunk]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for (i, chunk) in chunks.iter().enumerate().skip(1) {
        if chunk.is_head() {
            ranges.push(start..i);
            start = i;
        }
    }
    if !chunks.is_empty() {
        ranges.push(start..chunks.len());
    }
    ranges
}

/// Writer that hashes everything passing through it
struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Recording exporter
pub struct Exporter {
    options: ExportOptions,
}

impl Exporter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Fail unless `store` was scanned with the block size used for export
    pub fn verify_block_size(&self, store: &CheckpointStore) -> Result<()> {
        store.ensure_block_size(self.options.block_size)
    }

    /// Export every chain. `chunks` must be in position order.
    pub fn export_all_with_progress<F>(
        &self,
        stream: &mut VirtualBlockStream,
        chunks: &[Chunk],
        on_progress: F,
    ) -> Result<ExportResult>
    where
        F: FnMut(ExportProgress),
    {
        ensure_linked(chunks)?;
        let ranges = chains(chunks);
        self.export_ranges(stream, chunks, &ranges, "manifest.json", on_progress)
    }

    pub fn export_all(
        &self,
        stream: &mut VirtualBlockStream,
        chunks: &[Chunk],
    ) -> Result<ExportResult> {
        self.export_all_with_progress(stream, chunks, |_| {})
    }

    /// Export the single chain starting at position index `index`.
    ///
    /// Fails if that chunk continues another one.
    pub fn export_chain_with_progress<F>(
        &self,
        stream: &mut VirtualBlockStream,
        chunks: &[Chunk],
        index: usize,
        on_progress: F,
    ) -> Result<ExportResult>
    where
        F: FnMut(ExportProgress),
    {
        ensure_linked(chunks)?;
        let head = chunks.get(index).ok_or_else(|| {
            DrillError::Export(format!(
                "no chunk #{} (there are {} chunks)",
                index,
                chunks.len()
            ))
        })?;
        if head.concat {
            return Err(DrillError::Export(format!(
                "chunk #{} continues the chunk before it; export its head chunk instead",
                index
            )));
        }

        let end = chunks[index + 1..]
            .iter()
            .position(Chunk::is_head)
            .map(|offset| index + 1 + offset)
            .unwrap_or(chunks.len());

        let manifest_name = format!("manifest_{:04}.json", head.position.unwrap_or(index as u64));
        self.export_ranges(stream, chunks, &[index..end], &manifest_name, on_progress)
    }

    pub fn export_chain(
        &self,
        stream: &mut VirtualBlockStream,
        chunks: &[Chunk],
        index: usize,
    ) -> Result<ExportResult> {
        self.export_chain_with_progress(stream, chunks, index, |_| {})
    }

    fn export_ranges<F>(
        &self,
        stream: &mut VirtualBlockStream,
        chunks: &[Chunk],
        ranges: &[Range<usize>],
        manifest_name: &str,
        mut on_progress: F,
    ) -> Result<ExportResult>
    where
        F: FnMut(ExportProgress),
    {
        let started = Instant::now();
        let block_size = self.options.block_size;
        let dest = &self.options.dest;
        let mut result = ExportResult::default();
        let mut manifest = ExportManifest::new(dest, block_size);

        let total_bytes: u64 = ranges
            .iter()
            .flat_map(|r| &chunks[r.clone()])
            .map(|c| c.byte_len(block_size))
            .sum();

        if !self.options.dry_run {
            fs::create_dir_all(dest).map_err(|e| {
                DrillError::Export(format!("cannot create {}: {}", dest.display(), e))
            })?;
        }

        tracing::info!(
            dest = %dest.display(),
            recordings = ranges.len(),
            total_bytes,
            dry_run = self.options.dry_run,
            "Starting export"
        );

        for (n, range) in ranges.iter().enumerate() {
            let chain = &chunks[range.clone()];
            let head_position = chain[0].position.unwrap_or(range.start as u64);
            let path = dest.join(recording_file_name(head_position));

            let mut report = |chunk_id: u64, written: u64| {
                on_progress(ExportProgress {
                    recording: n + 1,
                    recordings: ranges.len(),
                    chunk_id,
                    bytes_written: written,
                    total_bytes,
                })
            };

            if self.options.dry_run {
                let size: u64 = chain.iter().map(|c| c.byte_len(block_size)).sum();
                result.total_bytes += size;
                result.successful += 1;
                result.files.push(path);
                report(chain[chain.len() - 1].id, result.total_bytes);
                continue;
            }

            let base = result.total_bytes;
            match self.write_chain(stream, chain, &path, |id, w| report(id, base + w)) {
                Ok((size, hash)) => {
                    tracing::info!(
                        file = %path.display(),
                        chunks = chain.len(),
                        size,
                        "Recording exported"
                    );
                    result.successful += 1;
                    result.total_bytes += size;
                    manifest.entries.push(ManifestEntry {
                        file: recording_file_name(head_position),
                        head_position,
                        chunk_ids: chain.iter().map(|c| c.id).collect(),
                        size,
                        duration_secs: chain.iter().map(Chunk::duration_secs).sum(),
                        blake3_hash: hash,
                        exported_at: Utc::now().to_rfc3339(),
                    });
                    result.files.push(path);
                }
                // Reading the image failed: the stage cannot continue
                Err(e) if e.kind() == crate::error::ErrorKind::Stream => {
                    remove_partial(&path);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Recording export failed");
                    remove_partial(&path);
                    result.failed += 1;
                    result.errors.push(ExportError {
                        head_position,
                        dest_path: path,
                        error: e.to_string(),
                    });
                    if !self.options.continue_on_error {
                        return Err(e);
                    }
                }
            }
        }

        stream.close();

        if self.options.create_manifest && !self.options.dry_run && !manifest.entries.is_empty() {
            manifest.total_files = manifest.entries.len();
            manifest.total_bytes = result.total_bytes;
            let manifest_path = dest.join(manifest_name);
            let json = serde_json::to_string_pretty(&manifest)?;
            fs::write(&manifest_path, json).map_err(|e| {
                DrillError::Export(format!("cannot write {}: {}", manifest_path.display(), e))
            })?;
            result.manifest_path = Some(manifest_path);
        }

        tracing::info!(
            successful = result.successful,
            failed = result.failed,
            total_bytes = result.total_bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Export complete"
        );

        Ok(result)
    }

    /// Write one chain to `path`; returns (bytes, blake3 hex)
    fn write_chain<F>(
        &self,
        stream: &mut VirtualBlockStream,
        chain: &[Chunk],
        path: &Path,
        mut on_chunk: F,
    ) -> Result<(u64, String)>
    where
        F: FnMut(u64, u64),
    {
        let out_err = |e: io::Error| DrillError::Export(format!("writing {}: {}", path.display(), e));

        let file = File::create(path).map_err(out_err)?;
        let mut out = HashingWriter {
            inner: BufWriter::new(file),
            hasher: blake3::Hasher::new(),
        };

        let mut written = 0u64;
        for chunk in chain {
            written += self.copy_chunk(stream, chunk, &mut out)?;
            on_chunk(chunk.id, written);
        }
        out.flush().map_err(out_err)?;

        Ok((written, out.hasher.finalize().to_hex().to_string()))
    }

    /// Copy one chunk's blocks to `out`, returning the bytes written.
    ///
    /// The stored `block_size` must be fully readable; a short read means the
    /// image or the chunk table is inconsistent.
    pub fn copy_chunk<W: Write>(
        &self,
        stream: &mut VirtualBlockStream,
        chunk: &Chunk,
        out: &mut W,
    ) -> Result<u64> {
        let block_size = self.options.block_size;
        stream.seek(chunk.byte_offset(block_size))?;

        let mut buf = vec![0u8; block_size as usize];
        for _ in 0..chunk.block_size {
            stream.read_exact_into(&mut buf)?;
            out.write_all(&buf).map_err(|e| DrillError::Export(e.to_string()))?;
        }

        tracing::debug!(
            id = chunk.id,
            block_start = chunk.block_start,
            block_size = chunk.block_size,
            "Chunk copied"
        );
        Ok(chunk.byte_len(block_size))
    }
}

/// Delete a recording whose write did not complete
fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::debug!(file = %path.display(), error = %e, "No partial output to remove");
    }
}

fn ensure_linked(chunks: &[Chunk]) -> Result<()> {
    if chunks.iter().any(|c| c.position.is_none()) {
        return Err(DrillError::NotLinked);
    }
    Ok(())
}
