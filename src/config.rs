//! Configuration Module - recovery settings from dvr-drill.toml
//!
//! One settings file per recovery project, kept next to the state file:
//! - Ordered list of input image fragments
//! - Export destination
//! - Block size, minimum chunk size and the two clock gaps
//! - Checkpoint interval and export behaviour

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DrillError;
use crate::export::ExportOptions;
use crate::link::DEFAULT_MAX_SORT_GAP;
use crate::scan::header::HEADER_LEN;
use crate::scan::{ScanOptions, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CREATE_GAP, DEFAULT_MIN_CHUNK_SIZE};
use crate::stream::is_device_path;

/// Default settings file name
pub const DEFAULT_CONFIG_FILE: &str = "dvr-drill.toml";

/// Default state file name
pub const DEFAULT_STORE_FILE: &str = "dvr-drill.state.json";

/// Keys accepted by [`Config::set`]
pub const SETTABLE_KEYS: &[&str] = &[
    "export_dir",
    "store_path",
    "block_size",
    "min_chunk_size",
    "max_create_gap",
    "max_sort_gap",
    "checkpoint_interval_secs",
    "create_manifest",
    "continue_on_error",
];

/// Recovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image fragments, read as one volume in this order
    pub inputs: Vec<PathBuf>,
    /// Where recordings are written
    pub export_dir: Option<PathBuf>,
    /// Chunk table and scan checkpoint
    pub store_path: PathBuf,
    /// Filesystem block size in bytes
    pub block_size: u64,
    /// Runs shorter than this (in blocks) are ignored
    pub min_chunk_size: u64,
    /// Largest clock step (90 kHz ticks) inside one chunk
    pub max_create_gap: u64,
    /// Largest clock gap (90 kHz ticks) between linked chunks
    pub max_sort_gap: u64,
    /// Seconds between scan checkpoints
    pub checkpoint_interval_secs: u64,
    /// Write manifest.json with blake3 hashes on export
    pub create_manifest: bool,
    /// Keep exporting other recordings when one fails
    pub continue_on_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            export_dir: None,
            store_path: PathBuf::from(DEFAULT_STORE_FILE),
            block_size: DEFAULT_BLOCK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_create_gap: DEFAULT_MAX_CREATE_GAP,
            max_sort_gap: DEFAULT_MAX_SORT_GAP,
            checkpoint_interval_secs: 30,
            create_manifest: true,
            continue_on_error: true,
        }
    }
}

impl Config {
    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Load config, or defaults when the file does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        Ok(())
    }

    /// Append an input fragment; exact duplicates are ignored.
    ///
    /// Returns false when the path was already listed.
    pub fn add_input(&mut self, path: PathBuf) -> Result<bool, DrillError> {
        if is_device_path(&path) {
            return Err(DrillError::UnsupportedDevice(path));
        }
        if self.inputs.contains(&path) {
            return Ok(false);
        }
        self.inputs.push(path);
        Ok(true)
    }

    /// Remove an input fragment
    pub fn remove_input(&mut self, path: &Path) -> Result<(), DrillError> {
        let before = self.inputs.len();
        self.inputs.retain(|p| p != path);
        if self.inputs.len() == before {
            return Err(DrillError::Config(format!(
                "{} is not in the input list",
                path.display()
            )));
        }
        Ok(())
    }

    pub fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    /// Set a scalar setting from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), DrillError> {
        let number = || {
            value.trim().parse::<u64>().map_err(|_| {
                DrillError::Config(format!("{} expects a non-negative integer, got {:?}", key, value))
            })
        };
        let flag = || {
            value.trim().parse::<bool>().map_err(|_| {
                DrillError::Config(format!("{} expects true or false, got {:?}", key, value))
            })
        };

        match key {
            "export_dir" => {
                self.export_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            "store_path" => self.store_path = PathBuf::from(value),
            "block_size" => self.block_size = number()?,
            "min_chunk_size" => self.min_chunk_size = number()?,
            "max_create_gap" => self.max_create_gap = number()?,
            "max_sort_gap" => self.max_sort_gap = number()?,
            "checkpoint_interval_secs" => self.checkpoint_interval_secs = number()?,
            "create_manifest" => self.create_manifest = flag()?,
            "continue_on_error" => self.continue_on_error = flag()?,
            other => {
                return Err(DrillError::Config(format!(
                    "unknown setting {:?} (expected one of: {})",
                    other,
                    SETTABLE_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// Check the settings needed to read the inputs
    pub fn validate(&self) -> Result<(), DrillError> {
        if self.inputs.is_empty() {
            return Err(DrillError::Config(
                "no input files configured, use `setup input add <FILE>`".into(),
            ));
        }
        for input in &self.inputs {
            if is_device_path(input) {
                return Err(DrillError::UnsupportedDevice(input.clone()));
            }
            fs::metadata(input).map_err(|source| DrillError::Input {
                path: input.clone(),
                source,
            })?;
        }
        if self.block_size < HEADER_LEN as u64 {
            return Err(DrillError::Config(format!(
                "block_size must be at least {} bytes, got {}",
                HEADER_LEN, self.block_size
            )));
        }
        Ok(())
    }

    /// Check everything `export` needs on top of [`Config::validate`]
    pub fn validate_for_export(&self) -> Result<&Path, DrillError> {
        self.validate()?;
        match self.export_dir.as_deref() {
            Some(dir) if dir.is_dir() => Ok(dir),
            Some(dir) => Err(DrillError::Config(format!(
                "export directory {} does not exist",
                dir.display()
            ))),
            None => Err(DrillError::Config(
                "no export directory configured, use `setup set export_dir <DIR>`".into(),
            )),
        }
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            block_size: self.block_size,
            min_chunk_size: self.min_chunk_size,
            max_create_gap: self.max_create_gap,
            checkpoint_interval: self.checkpoint_interval(),
        }
    }

    pub fn export_options(&self, dest: PathBuf) -> ExportOptions {
        ExportOptions {
            dest,
            block_size: self.block_size,
            continue_on_error: self.continue_on_error,
            create_manifest: self.create_manifest,
            dry_run: false,
        }
    }
}

/// Generate a sample config file with comments
pub fn generate_sample_config() -> String {
    r#"# dvr-drill configuration

# Image fragments, read as one volume in this order. A whole-disk copy
# made with dd works, as do several pieces of one (disk.000, disk.001).
inputs = []

# Where recovered recordings are written (must exist)
# export_dir = "recovered"

# Chunk table and scan checkpoint
store_path = "dvr-drill.state.json"

# Filesystem block size of the recorder disk, in bytes
block_size = 2048

# Runs shorter than this many blocks are ignored (25600 blocks = 50 MiB)
min_chunk_size = 25600

# Split a chunk when consecutive blocks' clocks differ by more than this.
# The clock runs at 90 kHz, so 90000 is one second.
max_create_gap = 90000

# Join two chunks when the second starts within this many ticks of the
# end of the first
max_sort_gap = 90000

# Seconds between scan checkpoints
checkpoint_interval_secs = 30

# Write manifest.json with blake3 hashes of exported recordings
create_manifest = true

# Keep exporting other recordings when one fails to write
continue_on_error = true
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.block_size, 2048);
        assert_eq!(config.min_chunk_size, 25_600);
        assert_eq!(config.max_create_gap, 90_000);
        assert_eq!(config.max_sort_gap, 90_000);
        assert!(config.inputs.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test_config.toml");

        let mut config = Config::default();
        config.add_input(PathBuf::from("a.img")).unwrap();
        config.add_input(PathBuf::from("b.img")).unwrap();
        config.set("max_sort_gap", "45000").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_sample_config() {
        let sample = generate_sample_config();
        let config: Config = toml::from_str(&sample).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_input_list_semantics() {
        let mut config = Config::default();
        assert!(config.add_input(PathBuf::from("x")).unwrap());
        assert!(!config.add_input(PathBuf::from("x")).unwrap());
        assert!(config.add_input(PathBuf::from("y")).unwrap());
        assert_eq!(config.inputs, vec![PathBuf::from("x"), PathBuf::from("y")]);

        config.remove_input(Path::new("x")).unwrap();
        assert_eq!(config.inputs, vec![PathBuf::from("y")]);
        assert!(config.remove_input(Path::new("x")).is_err());

        config.clear_inputs();
        assert!(config.inputs.is_empty());

        assert!(matches!(
            config.add_input(PathBuf::from(r"\\.\PhysicalDrive0")),
            Err(DrillError::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("block_size", "abc").is_err());
        assert!(config.set("create_manifest", "maybe").is_err());
        assert!(config.set("colour", "blue").is_err());
        config.set("export_dir", "out").unwrap();
        assert_eq!(config.export_dir, Some(PathBuf::from("out")));
        config.set("export_dir", "").unwrap();
        assert_eq!(config.export_dir, None);
    }

    #[test]
    fn test_validate() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("disk.img");
        std::fs::write(&img, [0u8; 64]).unwrap();

        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.add_input(img).unwrap();
        config.validate().unwrap();

        config.block_size = 4;
        assert!(config.validate().is_err());
        config.block_size = 2048;

        assert!(config.validate_for_export().is_err());
        config.export_dir = Some(dir.path().to_path_buf());
        assert_eq!(config.validate_for_export().unwrap(), dir.path());

        config.add_input(dir.path().join("missing.img")).unwrap();
        assert_eq!(
            config.validate().unwrap_err().kind(),
            crate::error::ErrorKind::Configuration
        );
    }
}
