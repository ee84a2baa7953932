use std::path::PathBuf;

use clap::Parser;

use crate::Commands;

/// Main CLI application arguments and command structure
#[derive(Parser, Debug)]
#[clap(
    name = "noteflow",
    version,
    about = "Notes with live search and summarized voice memos"
)]
pub struct Cli {
    /// Path to the configuration file
    #[clap(short = 'c', long, value_parser)]
    pub config: Option<PathBuf>,

    /// Root directory for notes, recordings and settings
    #[clap(long, value_parser)]
    pub data_dir: Option<PathBuf>,

    /// Verbose output mode
    #[clap(short, long)]
    pub verbose: bool,

    /// Keep notes in memory only; nothing is written to the notes directory
    #[clap(long)]
    pub ephemeral: bool,

    /// Subcommands for the noteflow application
    #[clap(subcommand)]
    pub command: Commands,
}
