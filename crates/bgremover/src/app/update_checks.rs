use std::future::Future;
use std::time::Duration;

use bgremover_core::{AppUpdate, UpdateCheck, UpdateError, check_for_update};
use log::{debug, info, warn};

use crate::error::AppError;
use crate::message::{Message, WorkerKind};
use crate::runtime::Task;

use super::App;

const RELEASE_NOTES_PREVIEW_CHARS: usize = 600;

/// Bound the whole check, including connection setup and a slow body.
async fn check_within(
    deadline: Duration,
    check: impl Future<Output = Result<UpdateCheck, UpdateError>>,
) -> Result<UpdateCheck, AppError> {
    tokio::time::timeout(deadline, check)
        .await
        .map_err(|_| AppError::timeout("Update check", deadline.as_secs()))?
        .map_err(AppError::from_update_error)
}

impl App {
    pub(super) fn handle_check_for_updates(&mut self) -> Task {
        if self.state.update_check_in_flight || !self.state.app_update_state.can_start() {
            debug!("Update check already running; ignoring request");
            return Task::none();
        }
        self.state.update_check_in_flight = true;
        self.state.status = "Checking for updates...".to_string();

        let client = self.http_client.clone();
        let source = self.release_source.clone();
        let current_version = self.current_version.clone();
        let deadline = source.timeout() + Duration::from_secs(1);

        Task::perform(
            WorkerKind::UpdateCheck,
            async move {
                check_within(
                    deadline,
                    check_for_update(&client, &source, &current_version),
                )
                .await
            },
            |result| Message::UpdateChecked(Box::new(result)),
        )
    }

    pub(super) fn handle_update_checked(
        &mut self,
        result: Result<UpdateCheck, AppError>,
    ) -> Task {
        self.state.update_check_in_flight = false;

        match result {
            Ok(UpdateCheck::Available(update)) => self.offer_update(update),
            Ok(UpdateCheck::UpToDate { current, latest }) => {
                debug!("Latest release is v{latest}; running v{current}");
                self.state.status = format!("You are running the latest version (v{current})");
                Task::none()
            }
            Err(error) if error.is_network() => {
                warn!("{error}");
                self.state.status = "Network error: could not check for updates".to_string();
                Task::none()
            }
            Err(error) => {
                warn!("{error}");
                self.state.status = "No updates found".to_string();
                Task::none()
            }
        }
    }

    fn offer_update(&mut self, update: AppUpdate) -> Task {
        let latest = update.latest_version.clone();
        self.state.status = format!("Update available: v{latest}");

        let mut prompt = format!(
            "A new version (v{latest}) is available. You are running v{}.\n\n\
             Download and install it now? The application will restart.",
            update.current_version
        );
        if let Some(notes) = update.release_notes.as_deref().map(str::trim)
            && !notes.is_empty()
        {
            let preview: String = notes.chars().take(RELEASE_NOTES_PREVIEW_CHARS).collect();
            prompt.push_str("\n\nWhat's new:\n");
            prompt.push_str(&preview);
        }

        let accepted = self.dialogs.confirm("Update Available", &prompt);
        self.state.app_update = Some(update);

        if accepted {
            info!("User accepted update to v{latest}");
            Task::done(Message::StartAppUpdate)
        } else {
            info!("User postponed update to v{latest}");
            self.state.status = format!("Update to v{latest} postponed");
            Task::none()
        }
    }
}
