mod cli;
pub mod csv_codec;
pub mod db;
pub mod desk;
pub mod errors;
pub mod models;
pub mod query;
pub mod shift;
pub mod snapshot;

pub use crate::desk::DeskCore;
pub use crate::errors::{AppError, AppResult};
pub use crate::snapshot::{Snapshot, ViewState};

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub fn run() -> ExitCode {
    let args = cli::Cli::parse();
    let app_data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);

    if let Err(error) = std::fs::create_dir_all(&app_data_dir) {
        eprintln!("{}", to_client_error(AppError::from(error)));
        return ExitCode::FAILURE;
    }
    if let Err(error) = init_tracing(&app_data_dir) {
        eprintln!("logging disabled: {}", error);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("{}", to_client_error(error));
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async move {
        let desk = DeskCore::new(app_data_dir)?;
        cli::execute(&desk, args.command).await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "command failed");
            eprintln!("{}", to_client_error(error));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "camdesk.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

fn default_data_dir() -> PathBuf {
    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".camdesk");
        }
    }

    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(".camdesk");
        }
    }

    PathBuf::from(".camdesk")
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
