//! Virtual block stream - several image fragments read as one volume
//!
//! A disk is often imaged in pieces (`disk.000`, `disk.001`, ...). The
//! stream presents the ordered fragments as one linear byte space so the
//! scanner and exporter can address blocks without knowing where one
//! fragment ends and the next begins.
//!
//! Every read is exact: the caller asks for `n` bytes and either gets all
//! of them or a [`DrillError::ShortRead`]. Only one fragment is open at a
//! time; crossing a boundary closes the exhausted file before opening the
//! next one.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{DrillError, Result};

/// Prefix of the Windows device namespace (`\\.\PhysicalDrive0`).
const DEVICE_NAMESPACE_PREFIX: &str = r"\\.";

/// One physical fragment of the volume
#[derive(Debug, Clone)]
pub struct StreamPart {
    pub path: PathBuf,
    pub size: u64,
    /// Offset of the first byte of this part in the virtual stream
    pub start: u64,
}

impl StreamPart {
    fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Open fragment plus the absolute stream offset its cursor points at
struct ActivePart {
    index: usize,
    file: File,
}

pub struct VirtualBlockStream {
    parts: Vec<StreamPart>,
    total_size: u64,
    active: Option<ActivePart>,
    position: u64,
}

impl VirtualBlockStream {
    /// Build a stream over `paths`, in order. Sizes are captured now; the
    /// files are only opened when read.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        if paths.is_empty() {
            return Err(DrillError::Config("no input files configured".into()));
        }

        let mut parts = Vec::with_capacity(paths.len());
        let mut start = 0u64;

        for path in paths {
            let path = path.as_ref();
            if is_device_path(path) {
                return Err(DrillError::UnsupportedDevice(path.to_path_buf()));
            }

            let metadata = std::fs::metadata(path).map_err(|source| DrillError::Input {
                path: path.to_path_buf(),
                source,
            })?;
            if metadata.is_dir() {
                return Err(DrillError::Config(format!(
                    "input {} is a directory",
                    path.display()
                )));
            }

            let size = metadata.len();
            parts.push(StreamPart {
                path: path.to_path_buf(),
                size,
                start,
            });
            start += size;
        }

        tracing::debug!(parts = parts.len(), total_size = start, "Virtual stream opened");

        Ok(Self {
            parts,
            total_size: start,
            active: None,
            position: 0,
        })
    }

    /// Sum of all fragment sizes in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of complete blocks of `block_size` bytes
    pub fn total_blocks(&self, block_size: u64) -> u64 {
        if block_size == 0 {
            return 0;
        }
        self.total_size / block_size
    }

    pub fn parts(&self) -> &[StreamPart] {
        &self.parts
    }

    /// Current absolute offset
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Position the stream at an absolute byte offset.
    ///
    /// Seeking to exactly `total_size()` is allowed; the next read fails.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.total_size {
            return Err(DrillError::SeekOutOfRange {
                offset,
                total: self.total_size,
            });
        }

        match self.part_index(offset) {
            Some(index) => {
                let local = offset - self.parts[index].start;
                let reuse = matches!(self.active, Some(ref a) if a.index == index);
                if !reuse {
                    self.open_part(index)?;
                }
                if let Some(active) = self.active.as_mut() {
                    active.file.seek(SeekFrom::Start(local))?;
                }
            }
            None => self.close(),
        }

        self.position = offset;
        Ok(())
    }

    /// Read exactly `n` bytes from the current position.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` completely, crossing fragment boundaries as needed.
    pub fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let start_offset = self.position;
        let mut filled = 0;

        if self.active.is_none() && self.position < self.total_size {
            // After open() or a boundary close, re-establish the cursor
            self.seek(self.position)?;
        }

        while filled < buf.len() {
            let Some(active) = self.active.as_mut() else {
                return Err(DrillError::ShortRead {
                    offset: start_offset,
                    wanted: buf.len(),
                    got: filled,
                });
            };

            let n = match active.file.read(&mut buf[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if n > 0 {
                filled += n;
                self.position += n as u64;
                continue;
            }

            let index = active.index;
            if self.position < self.parts[index].end() {
                // The file got shorter than it was when the stream was built
                return Err(DrillError::ShortRead {
                    offset: start_offset,
                    wanted: buf.len(),
                    got: filled,
                });
            }
            self.next_part(index)?;
        }

        Ok(())
    }

    /// Close the active fragment, if any
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::trace!(part = active.index, "Closing stream part");
        }
    }

    fn part_index(&self, offset: u64) -> Option<usize> {
        self.parts
            .iter()
            .position(|p| offset >= p.start && offset < p.end())
    }

    fn open_part(&mut self, index: usize) -> Result<()> {
        self.close();
        let path = &self.parts[index].path;
        let file = File::open(path).map_err(|source| DrillError::Input {
            path: path.clone(),
            source,
        })?;
        tracing::trace!(part = index, path = %path.display(), "Opened stream part");
        self.active = Some(ActivePart { index, file });
        Ok(())
    }

    fn next_part(&mut self, current: usize) -> Result<()> {
        if current + 1 < self.parts.len() {
            self.open_part(current + 1)
        } else {
            self.close();
            Ok(())
        }
    }
}

/// True for paths in the Windows raw-device namespace
pub fn is_device_path(path: &Path) -> bool {
    path.to_string_lossy().starts_with(DEVICE_NAMESPACE_PREFIX)
}
