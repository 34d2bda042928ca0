mod application;

mod presentation {
    pub mod cli;
}

use std::process::ExitCode;

use clap::Parser;
use sis_core::Settings;
use tracing_subscriber::EnvFilter;

use crate::presentation::cli::Cli;

fn init_tracing(level: &str) {
    // RUST_LOG wins over SISMANAGER_LOG_LEVEL.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sisdev: invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };
    init_tracing(&settings.log_level);

    match application::run(cli, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
