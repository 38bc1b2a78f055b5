//! Terminal output: progress bars, the chunk table and run summaries

use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::core::{ChunkRow, StoreSummary};
use crate::export::ExportResult;
use crate::link::LinkResult;
use crate::scan::{ScanResult, ScanState};

fn bytes(n: u64) -> String {
    humansize::format_size(n, humansize::BINARY)
}

fn clock_duration(secs: f64) -> String {
    humantime::format_duration(Duration::from_secs(secs.max(0.0) as u64)).to_string()
}

/// Bar over the block range of a scan
pub fn scan_bar(total_blocks: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_blocks);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("█▓▒░"));
    }
    pb
}

/// Bar over the bytes of an export
pub fn export_bar(total_bytes: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_bytes);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
    {
        pb.set_style(style.progress_chars("█▓▒░"));
    }
    pb
}

/// Fixed-width chunk table, one row per chunk in position order
pub fn render_table(rows: &[ChunkRow]) -> String {
    let width = rows.len().saturating_sub(1).to_string().len().max(1);
    let rule = format!(
        "{}-+--------------+--------------+--------------+--------------+--------+-----------",
        "-".repeat(width)
    );

    let mut out = format!("{}\n", rule);
    out.push_str(&format!(
        "{:>width$} |  Block Start |   Block Size |  Clock Start |    Clock End | Concat | Duration\n",
        "",
        width = width
    ));
    out.push_str(&format!("{}\n", rule));
    for row in rows {
        out.push_str(&format!(
            "{:>width$} | {:>12} | {:>12} | {:>12} | {:>12} | {:>6} | {}\n",
            row.index,
            row.block_start,
            row.block_size,
            row.clock_start,
            row.clock_end,
            if row.concat { "yes" } else { "no" },
            clock_duration(row.duration_secs),
            width = width
        ));
    }
    out
}

pub fn print_config(config: &Config, summary: &StoreSummary) {
    println!("{}", "Inputs".bold());
    if config.inputs.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (i, input) in config.inputs.iter().enumerate() {
        println!("  {:>2}. {}", i, input.display());
    }
    println!();
    println!("{}", "Settings".bold());
    match &config.export_dir {
        Some(dir) => println!("  export_dir               = {}", dir.display()),
        None => println!("  export_dir               = {}", "(unset)".dimmed()),
    }
    println!("  store_path               = {}", config.store_path.display());
    println!("  block_size               = {}", config.block_size);
    println!("  min_chunk_size           = {}", config.min_chunk_size);
    println!("  max_create_gap           = {}", config.max_create_gap);
    println!("  max_sort_gap             = {}", config.max_sort_gap);
    println!("  checkpoint_interval_secs = {}", config.checkpoint_interval_secs);
    println!("  create_manifest          = {}", config.create_manifest);
    println!("  continue_on_error        = {}", config.continue_on_error);
    println!();
    print_summary(summary);
}

pub fn print_summary(summary: &StoreSummary) {
    println!("{}", "State".bold());
    println!(
        "  {} chunks ({}), {}",
        summary.chunks,
        bytes(summary.total_bytes),
        if summary.linked {
            format!("linked into {} recordings", summary.recordings)
        } else {
            "not linked".to_string()
        }
    );
    if let Some(block) = summary.resume_block {
        println!("  {} scan interrupted, resumes at block {}", "⚠".yellow(), block);
    }
}

pub fn print_scan_result(result: &ScanResult, block_size: u64) {
    let elapsed = Duration::from_secs(result.duration.as_secs());
    match result.state {
        ScanState::Aborted => println!(
            "\n{} Scan stopped at block {} of {}; run `scan` again to resume",
            "⚠".yellow(),
            result.end_block,
            result.total_blocks
        ),
        _ => println!(
            "\n{} Scanned {} in {}",
            "✓".bright_green(),
            bytes(result.blocks_scanned() * block_size),
            humantime::format_duration(elapsed)
        ),
    }
    println!(
        "  {} new chunks, {} in total",
        result.chunks_added, result.chunks_total
    );
}

pub fn print_link_result(result: &LinkResult) {
    println!(
        "{} Linked {} chunks into {} recordings (longest: {} chunks)",
        "✓".bright_green(),
        result.chunks,
        result.chains,
        result.longest_chain
    );
}

pub fn print_export_result(result: &ExportResult) {
    println!(
        "\n{} Exported {} recordings ({} total)",
        "✓".bright_green(),
        result.successful,
        bytes(result.total_bytes)
    );
    for file in &result.files {
        println!("  {}", file.display());
    }
    if result.failed > 0 {
        println!("{} {} recordings failed", "⚠".yellow(), result.failed);
        for err in &result.errors {
            eprintln!("  {} {}: {}", "✗".bright_red(), err.dest_path.display(), err.error);
        }
    }
    if let Some(manifest) = &result.manifest_path {
        println!("  Manifest saved: {}", manifest.display());
    }
}
