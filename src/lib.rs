//! dvr-drill Library
//!
//! Offline recovery of recordings from the raw disk of a hard-disk video
//! recorder whose filesystem is unreadable. Recorders of this kind write
//! MPEG program streams in fixed-size blocks, each starting with a pack
//! header that carries the 90 kHz stream clock.
//!
//! # Pipeline
//!
//! - **Scan**: read the image block by block, group runs of blocks with a
//!   continuous clock into chunks. Resumable from periodic checkpoints.
//! - **Link**: order chunks and chain the pieces of each recording by
//!   matching one chunk's end clock to another's start clock.
//! - **Export**: concatenate each chain into a `.mpg` file, hashing it with
//!   blake3 on the way out.
//!
//! Input files are opened read-only and never written.
//!
//! # Example
//!
//! ```no_run
//! use dvr_drill::{Config, RecoveryEngine};
//! use std::path::PathBuf;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.add_input(PathBuf::from("disk.img"))?;
//!     config.export_dir = Some(PathBuf::from("recovered"));
//!
//!     let engine = RecoveryEngine::new(config);
//!     engine.scan()?;
//!     engine.link()?;
//!     let result = engine.export(None, None)?;
//!
//!     println!("Recovered {} recordings", result.successful);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod export;
pub mod link;
pub mod scan;
pub mod stream;

// Re-export commonly used types
pub use checkpoint::{CheckpointStore, ScanCheckpoint};
pub use config::Config;
pub use core::{Chunk, ChunkRow, NewChunk, RecoveryEngine, StoreSummary};
pub use error::{DrillError, ErrorKind, Result};
pub use export::{ExportOptions, ExportResult, Exporter};
pub use link::{ChunkLinker, LinkResult};
pub use scan::{ChunkScanner, ScanOptions, ScanProgress, ScanResult, ScanState};
pub use stream::VirtualBlockStream;
