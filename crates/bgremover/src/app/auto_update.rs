//! Application self-update: download, hand off to the helper, and exit.
//!
//! Handles messages: `StartAppUpdate`, `AppUpdateProgress`, `AppUpdateVerifying`,
//! `AppUpdateHandingOff`, `AppUpdateComplete`

use bgremover_core::{HandoffTicket, InstallOptions, UpdateProgress, download_and_install};
use log::{error, info, warn};

use crate::error::AppError;
use crate::message::{Message, WorkerKind};
use crate::runtime::Task;
use crate::state::{AppUpdateState, download_status};

use super::App;

impl App {
    pub(super) fn handle_start_app_update(&mut self) -> Task {
        if !self.state.app_update_state.can_start() {
            return Task::none();
        }

        let Some(update) = self.state.app_update.clone() else {
            return Task::none();
        };

        if self.image_work_in_flight() {
            info!("Deferring update until the current image is finished");
            self.state.update_deferred = true;
            self.state.status =
                "Update will start after the current image is saved...".to_string();
            return Task::none();
        }

        let options = match self.install_options.clone() {
            Some(options) => options,
            None => match InstallOptions::for_current_process() {
                Ok(options) => options
                    .with_download_timeout(self.settings.download_timeout())
                    .with_handoff_delay(self.settings.handoff_delay()),
                Err(error) => {
                    return self.handle_app_update_complete(Err(AppError::from_install_error(error)));
                }
            },
        };

        info!(
            "Starting update v{} -> v{}",
            update.current_version, update.latest_version
        );
        self.state.app_update_state = AppUpdateState::Downloading {
            downloaded: 0,
            total: 0,
        };
        self.state.status = "Downloading update...".to_string();

        let client = self.http_client.clone();

        Task::run(WorkerKind::AppUpdate, move |emitter| async move {
            let (tx, mut rx) = tokio::sync::mpsc::channel(32);

            let install_handle = tokio::spawn(async move {
                download_and_install(&client, &update, &options, tx).await
            });

            while let Some(progress) = rx.recv().await {
                emitter.emit(match progress {
                    UpdateProgress::Downloading { downloaded, total } => {
                        Message::AppUpdateProgress { downloaded, total }
                    }
                    UpdateProgress::Verifying => Message::AppUpdateVerifying,
                    UpdateProgress::HandingOff => Message::AppUpdateHandingOff,
                });
            }

            let result = match install_handle.await {
                Ok(result) => result.map_err(AppError::from_install_error),
                Err(error) => Err(AppError::auto_update_failed(
                    "task join",
                    format!("update task panicked: {error}"),
                )),
            };

            Message::AppUpdateComplete(Box::new(result))
        })
    }

    pub(super) fn handle_app_update_progress(&mut self, downloaded: u64, total: u64) -> Task {
        self.state.app_update_state = AppUpdateState::Downloading { downloaded, total };
        self.state.status = download_status(downloaded, total);
        Task::none()
    }

    pub(super) fn handle_app_update_verifying(&mut self) -> Task {
        self.state.app_update_state = AppUpdateState::Verifying;
        self.state.status = "Verifying update...".to_string();
        Task::none()
    }

    pub(super) fn handle_app_update_handing_off(&mut self) -> Task {
        self.state.app_update_state = AppUpdateState::HandingOff;
        self.state.status = "Installing update...".to_string();
        Task::none()
    }

    pub(super) fn handle_app_update_complete(
        &mut self,
        result: Result<HandoffTicket, AppError>,
    ) -> Task {
        match result {
            Ok(ticket) => {
                info!(
                    "Update helper (pid {}) will install v{}; exiting",
                    ticket.helper_pid, ticket.version
                );
                self.state.app_update_state = AppUpdateState::Restarting;
                self.state.status = "Installing update, restarting...".to_string();

                // The helper starts deleting the binary once its delay elapses.
                let grace = self
                    .settings
                    .exit_grace()
                    .min(self.settings.handoff_delay() / 2);
                Task::exit(0, grace)
            }
            Err(error) => {
                error!("App update failed: {error}");
                self.state.app_update_state = AppUpdateState::Failed(error.clone());
                self.state.status = format!("Update failed: {error}");
                self.report_update_failure(&error);
                Task::none()
            }
        }
    }

    fn report_update_failure(&self, error: &AppError) {
        let release_url = self
            .state
            .app_update
            .as_ref()
            .and_then(|update| update.release_url.clone());

        if let AppError::NoInstallableAsset { .. } = error
            && let Some(url) = release_url
        {
            let open_page = self.dialogs.confirm(
                "Update failed",
                &format!("{error}.\n\nOpen the release page to download it manually?"),
            );
            if open_page && let Err(open_error) = open::that(&url) {
                warn!("Failed to open {url}: {open_error}");
            }
            return;
        }

        self.dialogs
            .show_error("Update failed", &format!("Failed to install update:\n{error}"));
    }
}
