mod auto_update;
mod images;
mod update_checks;

use std::path::PathBuf;
use std::sync::Arc;

use bgremover_core::{BackgroundRemover, InstallOptions, ReleaseSource};
use log::{error, info, warn};

use crate::dialogs::Dialogs;
use crate::error::AppError;
use crate::message::{Message, WorkerKind};
use crate::runtime::Task;
use crate::settings::AppSettings;
use crate::state::{AppState, AppUpdateState, ImageState};

pub(crate) use images::resolve_remover;

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub image: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub check_updates: bool,
    /// Skip the image workflow entirely.
    pub update_only: bool,
    /// Contents of the failure log left by an update helper that could not finish.
    pub previous_update_failure: Option<String>,
}

pub struct App {
    pub(crate) state: AppState,
    pub(crate) settings: AppSettings,
    pub(crate) launch: LaunchOptions,
    pub(crate) current_version: String,
    pub(crate) http_client: reqwest::Client,
    pub(crate) release_source: ReleaseSource,
    /// Overrides the installer's view of the running process.
    pub(crate) install_options: Option<InstallOptions>,
    pub(crate) remover: Result<Arc<dyn BackgroundRemover>, AppError>,
    pub(crate) dialogs: Box<dyn Dialogs>,
}

impl App {
    pub fn new(
        settings: AppSettings,
        launch: LaunchOptions,
        dialogs: Box<dyn Dialogs>,
        remover: Result<Arc<dyn BackgroundRemover>, AppError>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.metadata_timeout())
            .user_agent(format!("bgremover/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        let release_source = ReleaseSource::new(settings.update_repository.clone())
            .with_timeout(settings.metadata_timeout());

        Self {
            state: AppState::default(),
            settings,
            launch,
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            http_client,
            release_source,
            install_options: None,
            remover,
            dialogs,
        }
    }

    /// The single line of user-facing status.
    pub fn status(&self) -> &str {
        &self.state.status
    }

    pub fn update(&mut self, message: Message) -> Task {
        match message {
            Message::Started => self.handle_started(),

            Message::CheckForUpdates => self.handle_check_for_updates(),
            Message::UpdateChecked(result) => self.handle_update_checked(*result),
            Message::StartAppUpdate => self.handle_start_app_update(),
            Message::AppUpdateProgress { downloaded, total } => {
                self.handle_app_update_progress(downloaded, total)
            }
            Message::AppUpdateVerifying => self.handle_app_update_verifying(),
            Message::AppUpdateHandingOff => self.handle_app_update_handing_off(),
            Message::AppUpdateComplete(result) => self.handle_app_update_complete(*result),

            Message::OpenImage(path) => self.handle_open_image(path),
            Message::ImageProcessed { path, result } => self.handle_image_processed(path, result),
            Message::SaveImage(path) => self.handle_save_image(path),
            Message::ImageSaved {
                interactive,
                result,
            } => self.handle_image_saved(interactive, result),

            Message::WorkerFailed { kind, reason } => self.handle_worker_failed(kind, &reason),
        }
    }

    fn handle_started(&mut self) -> Task {
        info!("BG Remover v{} started", self.current_version);

        if let Some(failure) = self.launch.previous_update_failure.take() {
            warn!("Previous update did not finish: {}", failure.trim());
            self.dialogs.show_error(
                "Update failed",
                &format!(
                    "The last update could not be completed:\n\n{}\n\n\
                     If the application does not work, please reinstall it from the release page.",
                    failure.trim()
                ),
            );
        }

        let mut tasks = Vec::new();
        if self.launch.check_updates {
            tasks.push(Task::done(Message::CheckForUpdates));
        }
        if !self.launch.update_only {
            tasks.push(Task::done(Message::OpenImage(self.launch.image.clone())));
        }
        Task::batch(tasks)
    }

    /// Release only the state owned by the job that died.
    fn handle_worker_failed(&mut self, kind: WorkerKind, reason: &str) -> Task {
        error!("Background task {kind:?} failed: {reason}");
        let error = AppError::message(format!("background task failed: {reason}"));

        match kind {
            WorkerKind::UpdateCheck => self.state.update_check_in_flight = false,
            WorkerKind::AppUpdate => {
                if !self.state.app_update_state.can_start() {
                    self.state.app_update_state = AppUpdateState::Failed(error.clone());
                }
            }
            WorkerKind::ImageProcessing => {
                if let ImageState::Processing { source } = &self.state.image {
                    self.state.image = ImageState::Failed {
                        source: source.clone(),
                        error: error.clone(),
                    };
                }
            }
            WorkerKind::ImageSave => self.state.save_in_flight = false,
        }

        self.state.status = format!("Error: {error}");
        self.dialogs.show_error("Error", &error.to_string());
        match kind {
            WorkerKind::ImageProcessing | WorkerKind::ImageSave => self.resume_deferred_update(),
            WorkerKind::UpdateCheck | WorkerKind::AppUpdate => Task::none(),
        }
    }
}
