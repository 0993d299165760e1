mod app;
mod cli;
mod dialogs;
mod error;
mod logging;
mod message;
mod runtime;
mod settings;
mod single_instance;
mod state;

use std::process::ExitCode;

use bgremover_core::{STALE_UPDATE_AGE, cleanup_stale_update_dirs};
use bgremover_platform::AppPaths;
use clap::Parser;
use log::{error, info, warn};

use crate::app::{App, resolve_remover};
use crate::cli::Cli;
use crate::dialogs::NativeDialogs;
use crate::error::AppError;
use crate::message::Message;
use crate::settings::AppSettings;
use crate::single_instance::{AcquireError, SingleInstance};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let paths = AppPaths::new();
    let settings = paths
        .as_ref()
        .map_or_else(|_| AppSettings::default(), |paths| {
            AppSettings::load_or_init(&paths.settings_file())
        });
    match &paths {
        Ok(paths) => logging::init_logging(
            paths,
            settings.debug_logging || cli.debug,
            settings.max_log_size_bytes,
        ),
        Err(error) => eprintln!("Logging disabled: {error}"),
    }
    info!("BG Remover v{}", env!("CARGO_PKG_VERSION"));

    let _instance = match SingleInstance::acquire() {
        Ok(guard) => Some(guard),
        Err(AcquireError::AlreadyRunning) => {
            eprintln!("BG Remover is already running.");
            return ExitCode::FAILURE;
        }
        Err(error) => {
            warn!("Continuing without instance lock: {error}");
            None
        }
    };

    let mut launch = cli.launch_options(&settings);

    if let Ok(paths) = &paths {
        let failure_log = paths.update_failure_log();
        if let Ok(contents) = std::fs::read_to_string(&failure_log) {
            // Keep the downloaded binary around until the user has seen the report.
            launch.previous_update_failure = Some(contents);
            if let Err(error) = std::fs::remove_file(&failure_log) {
                warn!("Failed to remove {}: {error}", failure_log.display());
            }
        } else {
            let removed = cleanup_stale_update_dirs(
                paths.update_scratch_root(),
                STALE_UPDATE_AGE + settings.handoff_delay(),
            );
            if removed > 0 {
                info!("Removed {removed} leftover update directories");
            }
        }
    }

    let remover = if launch.update_only {
        Err(AppError::message("image processing is disabled"))
    } else {
        resolve_remover(&settings)
    };
    let app = App::new(settings, launch, Box::new(NativeDialogs), remover);

    match runtime::run(app, Message::Started) {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            error!("Failed to start runtime: {error}");
            eprintln!("Failed to start: {error}");
            ExitCode::FAILURE
        }
    }
}
