use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "orca", version, about = "Load document albums and publish search artifacts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load every album directory under a root and rebuild the corpus index
    Load(LoadArgs),
    /// Search the corpus and publish one artifact per configured format
    Search(SearchArgs),
    /// Print the version and the latest corpus snapshot
    Overview,
    /// Clear a stale ingestion lock left by an interrupted load
    ResetLock,
    /// Remove a search together with its published artifacts
    DeleteSearch(DeleteSearchArgs),
}

#[derive(Debug, Clone, Args)]
pub struct LoadArgs {
    /// Directory whose immediate subdirectories are albums
    pub path: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    pub query: String,

    /// Seconds between progress reports while artifacts render
    #[arg(long, default_value_t = 2)]
    pub poll_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteSearchArgs {
    pub search_id: String,
}
