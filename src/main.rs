//! dvr-drill - recover recordings from raw DVR disk images
//!
//! Settings live in a TOML file next to the chunk store; every subcommand
//! loads them, runs one step and saves what changed. A scan killed with
//! Ctrl-C resumes from its last checkpoint on the next `scan`.

use std::ops::ControlFlow;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dvr_drill::cli::{report, Cli, Commands, InputCommand, SetupCommand};
use dvr_drill::config::{generate_sample_config, Config};
use dvr_drill::core::RecoveryEngine;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "dvr_drill=debug" } else { "dvr_drill=info" };
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).compact())
            .with(filter)
            .init();
    }

    let mut config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Setup(cmd) => {
            let changed = run_setup(cmd, &mut config)?;
            if changed {
                config.save_to(&cli.config)?;
                println!("{} Saved {}", "✓".bright_green(), cli.config.display());
            }
        }
        Commands::Scan(args) => {
            let engine = RecoveryEngine::new(config);
            let block_size = engine.config().block_size;
            let pb = (!args.quiet).then(|| report::scan_bar(0));

            let result = engine.scan_with_progress(|p| {
                if let Some(pb) = &pb {
                    pb.set_length(p.total_blocks);
                    pb.set_position(p.current_block);
                    pb.set_message(format!(
                        "{} chunks, {}/s",
                        p.chunks_found,
                        humansize::format_size(p.bytes_per_sec as u64, humansize::BINARY)
                    ));
                }
                ControlFlow::Continue(())
            })?;

            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            report::print_scan_result(&result, block_size);
        }
        Commands::Link => {
            let result = RecoveryEngine::new(config).link()?;
            report::print_link_result(&result);
        }
        Commands::List(args) => {
            let engine = RecoveryEngine::new(config);
            let rows = engine.list()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", report::render_table(&rows));
                report::print_summary(&engine.summary()?);
            }
        }
        Commands::Export(args) => {
            let engine = RecoveryEngine::new(config);
            let total: u64 = engine.list()?.iter().map(|r| r.bytes).sum();
            let pb = report::export_bar(total);

            let result = engine.export_with_progress(args.index, args.dest, |p| {
                pb.set_length(p.total_bytes);
                pb.set_position(p.bytes_written);
                pb.set_message(format!("recording {}/{}", p.recording, p.recordings));
            });
            pb.finish_and_clear();

            let result = result?;
            report::print_export_result(&result);
            if result.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Unlink => {
            let chunks = RecoveryEngine::new(config).unlink()?;
            println!("{} Cleared links of {} chunks", "✓".bright_green(), chunks);
        }
        Commands::ResetChunks => {
            let removed = RecoveryEngine::new(config).reset_chunks()?;
            println!("{} Deleted {} chunks", "✓".bright_green(), removed);
        }
        Commands::ResetScanState => {
            if RecoveryEngine::new(config).reset_scan_state()? {
                println!("{} Scan checkpoint dropped", "✓".bright_green());
            } else {
                println!("No scan checkpoint to drop");
            }
        }
    }

    Ok(())
}

/// Apply a `setup` subcommand. Returns true when the config must be saved.
fn run_setup(cmd: SetupCommand, config: &mut Config) -> Result<bool> {
    match cmd {
        SetupCommand::Show => {
            let engine = RecoveryEngine::new(config.clone());
            report::print_config(config, &engine.summary()?);
            Ok(false)
        }
        SetupCommand::Reset => {
            *config = Config::default();
            Ok(true)
        }
        SetupCommand::Sample => {
            print!("{}", generate_sample_config());
            Ok(false)
        }
        SetupCommand::Input(InputCommand::Add { paths }) => {
            for path in paths {
                if !config.add_input(path.clone())? {
                    println!("{} already listed", path.display());
                }
            }
            Ok(true)
        }
        SetupCommand::Input(InputCommand::Remove { path }) => {
            config.remove_input(&path)?;
            Ok(true)
        }
        SetupCommand::Input(InputCommand::Clear) => {
            config.clear_inputs();
            Ok(true)
        }
        SetupCommand::Set { key, value } => {
            config.set(&key, &value)?;
            Ok(true)
        }
    }
}
