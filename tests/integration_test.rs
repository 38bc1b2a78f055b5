//! Integration tests for dvr-drill

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use dvr_drill::export::ExportManifest;
use dvr_drill::scan::header::encode_scr;
use dvr_drill::{Config, DrillError, ErrorKind, RecoveryEngine, ScanState};
use tempfile::{tempdir, TempDir};

const BS: usize = 64;

/// Blocks of a small recorder disk. `Some(clock)` blocks start with a pack
/// header; the rest of every block is a byte pattern unique to the block.
///
/// - 2..8   first half of recording A
/// - 9..15  recording B
/// - 16..22 second half of A, its clock 5000 ticks after the first half
/// - 23..25 a two-block run, too short to keep
fn disk_layout() -> Vec<Option<u64>> {
    let mut blocks = vec![None, None];
    blocks.extend((0..6).map(|i| Some(i * 3_000)));
    blocks.push(None);
    blocks.extend((0..6).map(|i| Some(50_000_000 + i * 3_000)));
    blocks.push(None);
    blocks.extend((0..6).map(|i| Some(20_000 + i * 3_000)));
    blocks.push(None);
    blocks.extend([Some(90_000_000), Some(90_003_000)]);
    blocks.extend([None, None]);
    blocks
}

fn block_bytes(index: usize, clock: Option<u64>) -> Vec<u8> {
    let mut block: Vec<u8> = (0..BS).map(|j| (index * 7 + j) as u8 | 0x80).collect();
    if let Some(clock) = clock {
        block[..9].copy_from_slice(&encode_scr(clock));
    }
    block
}

/// Write the disk split into two fragments, cut in the middle of block 13
fn write_fragments(dir: &Path) -> (Vec<PathBuf>, Vec<u8>) {
    let image: Vec<u8> = disk_layout()
        .into_iter()
        .enumerate()
        .flat_map(|(i, clock)| block_bytes(i, clock))
        .collect();
    let cut = 13 * BS + 10;
    let parts = vec![dir.join("disk.000"), dir.join("disk.001")];
    fs::write(&parts[0], &image[..cut]).unwrap();
    fs::write(&parts[1], &image[cut..]).unwrap();
    (parts, image)
}

fn setup(dir: &TempDir) -> (Config, Vec<u8>) {
    let (parts, image) = write_fragments(dir.path());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let mut config = Config::default();
    for part in parts {
        config.add_input(part).unwrap();
    }
    config.export_dir = Some(out);
    config.store_path = dir.path().join("state.json");
    config.block_size = BS as u64;
    config.min_chunk_size = 3;
    config.checkpoint_interval_secs = 0;
    (config, image)
}

fn blocks(image: &[u8], range: std::ops::Range<usize>) -> Vec<u8> {
    image[range.start * BS..range.end * BS].to_vec()
}

#[test]
fn test_full_workflow() {
    let dir = tempdir().unwrap();
    let (config, image) = setup(&dir);
    let engine = RecoveryEngine::new(config);

    let scan = engine.scan().unwrap();
    assert_eq!(scan.state, ScanState::Finished);
    assert_eq!(scan.total_blocks, 27);
    assert_eq!(scan.chunks_total, 3);

    let link = engine.link().unwrap();
    assert_eq!(link.chains, 2);
    assert_eq!(link.longest_chain, 2);

    let rows = engine.list().unwrap();
    let table: Vec<(u64, u64, bool)> = rows
        .iter()
        .map(|r| (r.block_start, r.block_size, r.concat))
        .collect();
    assert_eq!(table, vec![(2, 5, false), (16, 5, true), (9, 5, false)]);
    assert_eq!(rows[0].clock_end, 15_000);
    assert_eq!(rows[1].clock_start, 20_000);

    let result = engine.export(None, None).unwrap();
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 0);

    let out = dir.path().join("out");
    let a = fs::read(out.join("recording_0000.mpg")).unwrap();
    let mut expected = blocks(&image, 2..7);
    expected.extend(blocks(&image, 16..21));
    assert_eq!(a, expected);

    // Recording B spans the fragment boundary
    let b = fs::read(out.join("recording_0002.mpg")).unwrap();
    assert_eq!(b, blocks(&image, 9..14));
    assert_eq!(result.total_bytes, (a.len() + b.len()) as u64);

    let manifest: ExportManifest =
        serde_json::from_str(&fs::read_to_string(out.join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest.total_files, 2);
    for entry in &manifest.entries {
        let data = fs::read(out.join(&entry.file)).unwrap();
        assert_eq!(entry.size, data.len() as u64);
        assert_eq!(entry.blake3_hash, blake3::hash(&data).to_hex().to_string());
    }
    assert_eq!(manifest.entries[0].chunk_ids.len(), 2);
}

#[test]
fn test_single_recording_export() {
    let dir = tempdir().unwrap();
    let (config, image) = setup(&dir);
    let engine = RecoveryEngine::new(config);
    engine.scan().unwrap();
    engine.link().unwrap();

    let err = engine.export(Some(1), None).unwrap_err();
    assert!(err.to_string().contains("Export failed"));

    let other = dir.path().join("single");
    fs::create_dir(&other).unwrap();
    let result = engine.export(Some(2), Some(other.clone())).unwrap();
    assert_eq!(result.successful, 1);
    assert_eq!(
        fs::read(other.join("recording_0002.mpg")).unwrap(),
        blocks(&image, 9..14)
    );
    assert!(other.join("manifest_0002.json").exists());
    assert!(!other.join("recording_0000.mpg").exists());
}

#[test]
fn test_interrupted_scan_matches_full_scan() {
    let reference = {
        let dir = tempdir().unwrap();
        let (config, _) = setup(&dir);
        let engine = RecoveryEngine::new(config);
        engine.scan().unwrap();
        engine
            .chunks()
            .unwrap()
            .into_iter()
            .map(|c| (c.block_start, c.block_size, c.clock_start, c.clock_end))
            .collect::<Vec<_>>()
    };

    for stop_after in [1, 3, 9, 15, 17, 24, 27] {
        let dir = tempdir().unwrap();
        let (config, _) = setup(&dir);

        let mut calls = 0;
        let first = RecoveryEngine::new(config.clone())
            .scan_with_progress(|_| {
                calls += 1;
                if calls == stop_after {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(first.state, ScanState::Aborted, "stop after {}", stop_after);

        // A fresh engine, as a new process would build
        let engine = RecoveryEngine::new(config);
        let second = engine.scan().unwrap();
        assert_eq!(second.state, ScanState::Finished);

        let chunks: Vec<_> = engine
            .chunks()
            .unwrap()
            .into_iter()
            .map(|c| (c.block_start, c.block_size, c.clock_start, c.clock_end))
            .collect();
        assert_eq!(chunks, reference, "stop after {}", stop_after);
    }
}

#[test]
fn test_rescan_refused_until_reset() {
    let dir = tempdir().unwrap();
    let (config, _) = setup(&dir);
    let engine = RecoveryEngine::new(config);
    engine.scan().unwrap();

    let err = engine.scan().unwrap_err();
    let kind = err
        .chain()
        .find_map(|e| e.downcast_ref::<DrillError>())
        .map(DrillError::kind);
    assert_eq!(kind, Some(ErrorKind::ScanInvariant));

    engine.reset_chunks().unwrap();
    assert_eq!(engine.scan().unwrap().chunks_total, 3);
}

#[test]
fn test_export_continues_past_failed_recording() {
    let dir = tempdir().unwrap();
    let (config, image) = setup(&dir);
    let engine = RecoveryEngine::new(config.clone());
    engine.scan().unwrap();
    engine.link().unwrap();

    // A directory where the first recording's file should go
    fs::create_dir(dir.path().join("out").join("recording_0000.mpg")).unwrap();

    let result = engine.export(None, None).unwrap();
    assert_eq!(result.successful, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors[0].head_position, 0);
    assert_eq!(
        fs::read(dir.path().join("out").join("recording_0002.mpg")).unwrap(),
        blocks(&image, 9..14)
    );

    let mut strict = config;
    strict.continue_on_error = false;
    let err = RecoveryEngine::new(strict).export(None, None).unwrap_err();
    let kind = err
        .chain()
        .find_map(|e| e.downcast_ref::<DrillError>())
        .map(DrillError::kind);
    assert_eq!(kind, Some(ErrorKind::Export));
}

#[test]
fn test_relink_after_unlink_is_stable() {
    let dir = tempdir().unwrap();
    let (config, _) = setup(&dir);
    let engine = RecoveryEngine::new(config);
    engine.scan().unwrap();

    engine.link().unwrap();
    let first = engine.list().unwrap();
    engine.link().unwrap();
    assert_eq!(engine.list().unwrap(), first);

    engine.unlink().unwrap();
    assert!(!engine.summary().unwrap().linked);
    engine.link().unwrap();
    assert_eq!(engine.list().unwrap(), first);
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempdir().unwrap();
    let (config, _) = setup(&dir);
    let path = dir.path().join("dvr-drill.toml");
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    loaded.validate().unwrap();
    assert!(loaded.validate_for_export().is_ok());
}
