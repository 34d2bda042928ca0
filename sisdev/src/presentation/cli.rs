use clap::{Parser, Subcommand};
use sis_core::DedupMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "sisdev: spreadsheet batches into the central store", long_about = None)]
pub struct Cli {
    /// Print reports as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import one spreadsheet into the central store (backup, append, verify)
    Import {
        file: PathBuf,
        /// name whose stem becomes the orderCode (defaults to the file's own name)
        #[arg(long)]
        original_name: Option<String>,
        /// keep only these columns, in this order (repeatable)
        #[arg(long = "keep")]
        keep: Vec<String>,
    },

    /// Remove duplicate rows from the central store
    Dedupe {
        /// forceful drops every later duplicate; soft asks per candidate
        #[arg(long, default_value = "forceful")]
        mode: DedupMode,
        /// soft mode only: compare on these columns instead of the full row
        #[arg(long = "key")]
        key: Vec<String>,
    },

    /// Write the central store (optionally projected) to an .xlsx file
    Export {
        out: PathBuf,
        #[arg(long = "columns")]
        columns: Vec<String>,
    },

    /// Take a verified backup of the central store now
    Backup,

    /// Delete backups older than the retention window
    Prune {
        /// defaults to SISMANAGER_BACKUP_RETENTION_DAYS
        #[arg(long)]
        days: Option<u32>,
    },

    /// List backups, newest first
    Backups,

    /// Upload, process, dedupe and export several spreadsheets in one go
    Workflow {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long = "keep")]
        keep: Vec<String>,
        /// skip duplicate removal
        #[arg(long)]
        no_dedup: bool,
        #[arg(long = "columns")]
        columns: Vec<String>,
    },

    /// Show tracked files and their lifecycle status
    Status,

    /// Run one expiry sweep over uploads, processed files and downloads
    Sweep,
}
