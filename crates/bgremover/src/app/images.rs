//! Handles messages: `OpenImage`, `ImageProcessed`, `SaveImage`, `ImageSaved`

use std::path::PathBuf;
use std::sync::Arc;

use bgremover_core::removal::{DEFAULT_OUTPUT_NAME, process_image, save_png};
use bgremover_core::{BackgroundRemover, RembgCommand};
use image::DynamicImage;
use log::{debug, error, info};

use crate::error::AppError;
use crate::message::{Message, WorkerKind};
use crate::runtime::Task;
use crate::settings::AppSettings;
use crate::state::ImageState;

use super::App;

/// Build the configured removal engine, falling back to `rembg` on `PATH`.
pub(crate) fn resolve_remover(
    settings: &AppSettings,
) -> Result<Arc<dyn BackgroundRemover>, AppError> {
    let command = match &settings.rembg_command {
        Some(program) => RembgCommand::new(program.clone()),
        None => RembgCommand::discover().map_err(AppError::remover_unavailable)?,
    }
    .with_model(settings.rembg_model.clone());

    debug!(
        "Using background removal tool at {}",
        command.program().display()
    );
    Ok(Arc::new(command))
}

impl App {
    pub(super) fn handle_open_image(&mut self, path: Option<PathBuf>) -> Task {
        if self.state.image.is_processing() {
            return Task::none();
        }

        let Some(path) = path.or_else(|| self.dialogs.pick_image()) else {
            self.state.status = "No image selected".to_string();
            return Task::none();
        };

        let remover = match &self.remover {
            Ok(remover) => Arc::clone(remover),
            Err(error) => {
                let error = error.clone();
                self.fail_processing(path, error);
                return Task::none();
            }
        };

        info!("Processing {}", path.display());
        self.state.image = ImageState::Processing {
            source: path.clone(),
        };
        self.state.status = "Processing image... Please wait...".to_string();

        Task::perform(
            WorkerKind::ImageProcessing,
            async move {
                let source = path.clone();
                let result =
                    tokio::task::spawn_blocking(move || process_image(remover.as_ref(), &source))
                        .await;
                let result = match result {
                    Ok(Ok(image)) => Ok(Arc::new(image)),
                    Ok(Err(error)) => Err(AppError::image_processing_failed(error)),
                    Err(join_error) => Err(AppError::image_processing_failed(format!(
                        "image worker stopped: {join_error}"
                    ))),
                };
                (path, result)
            },
            |(path, result)| Message::ImageProcessed { path, result },
        )
    }

    pub(super) fn handle_image_processed(
        &mut self,
        path: PathBuf,
        result: Result<Arc<DynamicImage>, AppError>,
    ) -> Task {
        match result {
            Ok(image) => {
                info!(
                    "Background removed from {} ({}x{})",
                    path.display(),
                    image.width(),
                    image.height()
                );
                self.state.image = ImageState::Processed {
                    source: path,
                    image,
                };
                self.state.status = "Image processed successfully!".to_string();
                Task::done(Message::SaveImage(self.launch.output.clone()))
            }
            Err(error) => {
                self.fail_processing(path, error);
                self.resume_deferred_update()
            }
        }
    }

    fn fail_processing(&mut self, source: PathBuf, error: AppError) {
        error!("Failed to process {}: {error}", source.display());
        self.state.status = format!("Error: {error}");
        self.dialogs
            .show_error("Error", &format!("Failed to process image: {error}"));
        self.state.image = ImageState::Failed { source, error };
    }

    pub(super) fn handle_save_image(&mut self, path: Option<PathBuf>) -> Task {
        let Some(image) = self.state.image.processed().cloned() else {
            self.dialogs
                .show_error("Error", &AppError::NoImageToSave.to_string());
            return self.resume_deferred_update();
        };

        let interactive = path.is_none();
        let Some(path) = path.or_else(|| self.dialogs.pick_save_path(DEFAULT_OUTPUT_NAME)) else {
            self.state.status = "Save cancelled".to_string();
            return self.resume_deferred_update();
        };

        self.state.status = "Saving image...".to_string();
        self.state.save_in_flight = true;
        Task::perform(
            WorkerKind::ImageSave,
            async move {
                let target = path.clone();
                match tokio::task::spawn_blocking(move || save_png(&image, &target)).await {
                    Ok(Ok(())) => Ok(path),
                    Ok(Err(error)) => Err(AppError::image_save_failed(error)),
                    Err(join_error) => Err(AppError::image_save_failed(format!(
                        "save worker stopped: {join_error}"
                    ))),
                }
            },
            move |result| Message::ImageSaved {
                interactive,
                result,
            },
        )
    }

    pub(super) fn handle_image_saved(
        &mut self,
        interactive: bool,
        result: Result<PathBuf, AppError>,
    ) -> Task {
        self.state.save_in_flight = false;
        match result {
            Ok(path) => {
                info!("Saved {}", path.display());
                self.state.status = format!("Image saved to: {}", path.display());
                self.state.last_saved = Some(path);
                if interactive {
                    self.dialogs.show_info("Success", "Image saved successfully!");
                }
            }
            Err(error) => {
                error!("{error}");
                self.state.status = format!("Error: {error}");
                self.dialogs.show_error("Error", &error.to_string());
            }
        }
        self.resume_deferred_update()
    }

    /// Whether an image is being processed or written to disk.
    pub(super) fn image_work_in_flight(&self) -> bool {
        self.state.image.is_processing() || self.state.save_in_flight
    }

    /// Start an update that was accepted while image work was running, once
    /// that work is done.
    pub(super) fn resume_deferred_update(&mut self) -> Task {
        if !self.state.update_deferred || self.image_work_in_flight() {
            return Task::none();
        }
        self.state.update_deferred = false;
        info!("Image work finished, starting deferred update");
        Task::done(Message::StartAppUpdate)
    }
}
