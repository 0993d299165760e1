//! Background removal is delegated to an external engine; this module only
//! moves decoded images in and out of it.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{DynamicImage, ImageFormat};
use log::{debug, info};
use thiserror::Error;

/// File name suggested when saving a processed image.
pub const DEFAULT_OUTPUT_NAME: &str = "background_removed.png";

#[derive(Debug, Error)]
pub enum RemovalError {
    #[error("background removal tool '{name}' was not found in PATH")]
    ToolNotFound { name: String },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Image {
        context: &'static str,
        #[source]
        source: image::ImageError,
    },
    #[error("background removal tool exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },
}

impl RemovalError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn image(context: &'static str, source: image::ImageError) -> Self {
        Self::Image { context, source }
    }
}

/// Given a decoded image, produce the same image with its background removed.
pub trait BackgroundRemover: Send + Sync {
    /// # Errors
    /// Returns an error if the engine cannot process the image.
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage, RemovalError>;
}

/// The `rembg` command line tool.
#[derive(Debug, Clone)]
pub struct RembgCommand {
    program: PathBuf,
    model: Option<String>,
}

impl RembgCommand {
    pub const PROGRAM_NAME: &'static str = "rembg";

    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            model: None,
        }
    }

    /// Locate `rembg` on `PATH`.
    ///
    /// # Errors
    /// Returns [`RemovalError::ToolNotFound`] when it is not installed.
    pub fn discover() -> Result<Self, RemovalError> {
        which::which(Self::PROGRAM_NAME)
            .map(Self::new)
            .map_err(|_| RemovalError::ToolNotFound {
                name: Self::PROGRAM_NAME.to_string(),
            })
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["i".into()];
        if let Some(model) = &self.model {
            args.push("-m".into());
            args.push(model.into());
        }
        args.push(input.into());
        args.push(output.into());
        args
    }
}

impl BackgroundRemover for RembgCommand {
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage, RemovalError> {
        let scratch = tempfile::tempdir()
            .map_err(|error| RemovalError::io("failed to create scratch directory", error))?;
        let input = scratch.path().join("input.png");
        let output = scratch.path().join("output.png");

        image
            .save_with_format(&input, ImageFormat::Png)
            .map_err(|error| RemovalError::image("failed to stage input image", error))?;

        debug!("Running {} on {}", self.program.display(), input.display());
        let result = Command::new(&self.program)
            .args(self.args(&input, &output))
            .output()
            .map_err(|error| RemovalError::io("failed to run background removal tool", error))?;

        if !result.status.success() {
            return Err(RemovalError::ToolFailed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        image::open(&output)
            .map_err(|error| RemovalError::image("failed to read processed image", error))
    }
}

/// Decode the image at `path`.
///
/// # Errors
/// Returns an error when the file cannot be read or decoded.
pub fn load_image(path: &Path) -> Result<DynamicImage, RemovalError> {
    image::open(path).map_err(|error| RemovalError::image("failed to open image", error))
}

/// Decode `path` and run it through `remover`.
///
/// # Errors
/// Returns an error when decoding or background removal fails.
pub fn process_image(
    remover: &dyn BackgroundRemover,
    path: &Path,
) -> Result<DynamicImage, RemovalError> {
    let original = load_image(path)?;
    info!(
        "Removing background from {} ({}x{})",
        path.display(),
        original.width(),
        original.height()
    );
    remover.remove_background(&original)
}

/// Save `image` as a PNG, keeping its alpha channel.
///
/// # Errors
/// Returns an error when the file cannot be encoded or written.
pub fn save_png(image: &DynamicImage, path: &Path) -> Result<(), RemovalError> {
    image
        .to_rgba8()
        .save_with_format(path, ImageFormat::Png)
        .map_err(|error| RemovalError::image("failed to save image", error))
}
