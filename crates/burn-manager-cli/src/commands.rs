use burn_manager_core::VolumeId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "burn-manager")]
#[command(about = "Plans, stages and tracks backups to fixed-size volumes", long_about = None)]
pub struct Cli {
    /// Library snapshot to read and update (overrides configuration)
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add folders recursively and checksum the new files
    Ingest {
        /// Folders to add; defaults to the configured root paths
        paths: Vec<String>,
    },
    /// Replace all volumes with a fresh distribution of the library
    Sort {
        #[arg(long)]
        capacity: Option<u64>,
        #[arg(long)]
        cluster: Option<u64>,
        /// Try to keep monolithic collections together
        #[arg(long)]
        group: bool,
    },
    /// Re-read every checksummed file and compare
    Verify,
    /// Copy a volume's files into a directory and write its manifest
    Stage {
        volume: VolumeId,
        dest: PathBuf,
        #[arg(long)]
        skip_log: bool,
    },
    /// Record that a volume was burned now
    MarkBurned { volume: VolumeId },
    /// Print library totals and per-volume usage
    Summary,
    /// Remove a file from the library and from every volume
    RemoveFile { path: String },
    /// Print configuration values
    PrintConfig,
    /// Delete every file and volume from the library
    ClearLibrary,
}
