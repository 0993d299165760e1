use bgremover_core::{AutoUpdateError, RemovalError, UpdateError};
use thiserror::Error;

/// Cloneable rendering of an underlying failure, so errors can travel inside
/// `Message`s and be compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppErrorDetail {
    #[error("{0}")]
    Message(String),
    #[error("{kind}: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl From<String> for AppErrorDetail {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for AppErrorDetail {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

impl From<std::io::Error> for AppErrorDetail {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

macro_rules! detail_from_display {
    ($($source:ty),+) => {
        $(impl From<$source> for AppErrorDetail {
            fn from(error: $source) -> Self {
                Self::Message(error.to_string())
            }
        })+
    };
}

detail_from_display!(AutoUpdateError, UpdateError, RemovalError);

/// Why an update check ended without an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckFailure {
    /// The release server could not be reached.
    Network,
    /// The server answered but offered nothing usable.
    NoRelease,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("{0}")]
    Message(String),
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
    #[error("Update check failed: {details}")]
    UpdateCheckFailed {
        reason: CheckFailure,
        details: AppErrorDetail,
    },
    #[error("The latest release has no installable file ending in '{suffix}'")]
    NoInstallableAsset { suffix: String },
    #[error("App update {phase} failed: {details}")]
    AutoUpdateFailed {
        phase: &'static str,
        details: AppErrorDetail,
    },
    #[error("Background removal is unavailable: {details}")]
    RemoverUnavailable { details: AppErrorDetail },
    #[error("{details}")]
    ImageProcessingFailed { details: AppErrorDetail },
    #[error("Failed to save image: {details}")]
    ImageSaveFailed { details: AppErrorDetail },
    #[error("No processed image to save!")]
    NoImageToSave,
}

impl AppError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn timeout(operation: &'static str, seconds: u64) -> Self {
        Self::Timeout { operation, seconds }
    }

    pub fn update_check_failed(reason: CheckFailure, details: impl Into<AppErrorDetail>) -> Self {
        Self::UpdateCheckFailed {
            reason,
            details: details.into(),
        }
    }

    pub fn auto_update_failed(phase: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::AutoUpdateFailed {
            phase,
            details: details.into(),
        }
    }

    pub fn remover_unavailable(details: impl Into<AppErrorDetail>) -> Self {
        Self::RemoverUnavailable {
            details: details.into(),
        }
    }

    pub fn image_processing_failed(details: impl Into<AppErrorDetail>) -> Self {
        Self::ImageProcessingFailed {
            details: details.into(),
        }
    }

    pub fn image_save_failed(details: impl Into<AppErrorDetail>) -> Self {
        Self::ImageSaveFailed {
            details: details.into(),
        }
    }

    /// Classify a failed release lookup.
    pub fn from_update_error(error: UpdateError) -> Self {
        let reason = if error.is_network() {
            CheckFailure::Network
        } else {
            CheckFailure::NoRelease
        };
        Self::update_check_failed(reason, error)
    }

    /// Convert an installer failure, keeping "no installable asset" distinct.
    pub fn from_install_error(error: AutoUpdateError) -> Self {
        match error {
            AutoUpdateError::NoInstallableAsset { suffix } => Self::NoInstallableAsset { suffix },
            other if other.is_network() => Self::auto_update_failed("download", other),
            other => Self::auto_update_failed("install", other),
        }
    }

    /// Whether the failure came from an unreachable or slow network.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::UpdateCheckFailed {
                    reason: CheckFailure::Network,
                    ..
                }
        )
    }
}
