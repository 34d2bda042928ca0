pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use sis_core::Settings;
use sis_core::error::Result;

pub fn run(cli: Cli, settings: &Settings) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Import {
            file,
            original_name,
            keep,
        } => handlers::handle_import(settings, json, file, original_name, keep),
        Commands::Dedupe { mode, key } => handlers::handle_dedupe(settings, json, mode, key),
        Commands::Export { out, columns } => handlers::handle_export(settings, json, out, columns),
        Commands::Backup => handlers::handle_backup(settings, json),
        Commands::Prune { days } => handlers::handle_prune(settings, json, days),
        Commands::Backups => handlers::handle_backups(settings, json),
        Commands::Workflow {
            files,
            keep,
            no_dedup,
            columns,
        } => handlers::handle_workflow(settings, json, files, keep, no_dedup, columns),
        Commands::Status => handlers::handle_status(settings, json),
        Commands::Sweep => handlers::handle_sweep(settings, json),
    }
}
