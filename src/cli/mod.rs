//! CLI module - Command line interface definitions and handlers

pub mod report;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

/// dvr-drill - recover recordings from a DVR disk whose filesystem is gone
///
/// Scans a raw image for MPEG program-stream chunks, links the pieces of
/// each recording by their stream clock and exports them as .mpg files.
/// Input files are only ever read.
#[derive(Parser, Debug)]
#[command(name = "dvr-drill")]
#[command(version)]
#[command(about = "Recover MPEG-PS recordings from raw DVR disk images", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit log events as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show or change settings
    #[command(subcommand)]
    Setup(SetupCommand),

    /// Scan the inputs for chunks (resumes an interrupted scan)
    Scan(ScanArgs),

    /// Order chunks and chain the pieces of each recording
    Link,

    /// Print the chunk table in linked order
    List(ListArgs),

    /// Export recordings as .mpg files
    Export(ExportArgs),

    /// Forget the linked order, keeping the chunks
    Unlink,

    /// Delete all chunks
    ResetChunks,

    /// Drop the scan checkpoint so the next scan starts over
    ResetScanState,
}

#[derive(Subcommand, Debug)]
pub enum SetupCommand {
    /// Print the current settings and store status
    Show,

    /// Restore default settings (inputs are cleared)
    Reset,

    /// Print a commented sample settings file
    Sample,

    /// Manage the input file list
    #[command(subcommand)]
    Input(InputCommand),

    /// Set a single setting
    Set {
        /// Setting name, e.g. block_size or export_dir
        key: String,
        value: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum InputCommand {
    /// Append an image fragment
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove an image fragment
    Remove { path: PathBuf },

    /// Remove all image fragments
    Clear,
}

#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    /// Hide the progress bar
    #[arg(long, short)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// Export only the recording starting at this list index
    pub index: Option<usize>,

    /// Destination directory (default: export_dir from the settings)
    #[arg(long, short)]
    pub dest: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["dvr-drill", "export", "3", "--dest", "out"]).unwrap();
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.index, Some(3));
                assert_eq!(args.dest, Some(PathBuf::from("out")));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));

        let cli = Cli::try_parse_from(["dvr-drill", "-c", "x.toml", "setup", "input", "add", "a", "b"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(
            cli.command,
            Commands::Setup(SetupCommand::Input(InputCommand::Add { ref paths })) if paths.len() == 2
        ));

        let cli = Cli::try_parse_from(["dvr-drill", "reset-scan-state"]).unwrap();
        assert!(matches!(cli.command, Commands::ResetScanState));
        assert!(!cli.log_json);

        let cli = Cli::try_parse_from(["dvr-drill", "scan", "--log-json"]).unwrap();
        assert!(cli.log_json);

        assert!(Cli::try_parse_from(["dvr-drill", "export", "minus"]).is_err());
    }
}
