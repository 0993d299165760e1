use std::path::PathBuf;

use clap::Parser;

use crate::app::LaunchOptions;
use crate::settings::AppSettings;

/// Remove the background from an image, keeping the app itself up to date.
#[derive(Parser, Debug)]
#[command(name = "bgremover")]
#[command(about = "Remove image backgrounds", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Image to process. A file picker opens when omitted.
    pub image: Option<PathBuf>,

    /// Where to save the result. A save dialog opens when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only check for a newer release, then exit.
    #[arg(long, conflicts_with_all = ["image", "output", "no_update_check"])]
    pub check_updates: bool,

    /// Skip the update check that normally runs on startup.
    #[arg(long)]
    pub no_update_check: bool,

    /// Write debug output to the log file.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn launch_options(&self, settings: &AppSettings) -> LaunchOptions {
        LaunchOptions {
            image: self.image.clone(),
            output: self.output.clone(),
            check_updates: self.check_updates
                || (settings.check_updates_on_startup && !self.no_update_check),
            update_only: self.check_updates,
            previous_update_failure: None,
        }
    }
}
