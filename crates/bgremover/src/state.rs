use std::path::PathBuf;
use std::sync::Arc;

use bgremover_core::AppUpdate;
use image::DynamicImage;

use crate::error::AppError;

#[derive(Debug, Default)]
pub struct AppState {
    pub status: String,
    pub update_check_in_flight: bool,
    pub app_update: Option<AppUpdate>,
    pub app_update_state: AppUpdateState,
    pub image: ImageState,
    pub save_in_flight: bool,
    /// An accepted update waiting for image work to finish before it starts.
    pub update_deferred: bool,
    pub last_saved: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AppUpdateState {
    #[default]
    Idle,
    Downloading {
        downloaded: u64,
        total: u64,
    },
    Verifying,
    HandingOff,
    Restarting,
    Failed(AppError),
}

impl AppUpdateState {
    /// Whether a new download may begin from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub enum ImageState {
    #[default]
    Empty,
    Processing {
        source: PathBuf,
    },
    Processed {
        source: PathBuf,
        image: Arc<DynamicImage>,
    },
    Failed {
        source: PathBuf,
        error: AppError,
    },
}

impl ImageState {
    pub fn processed(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            Self::Processed { image, .. } => Some(image),
            _ => None,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }
}

/// Human readable progress for the status line.
pub fn download_status(downloaded: u64, total: u64) -> String {
    if total > 0 {
        let percent = downloaded.saturating_mul(100) / total;
        format!("Downloading update... {}%", percent.min(100))
    } else {
        format!("Downloading update... {} KB", downloaded / 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::{AppUpdateState, download_status};
    use crate::error::AppError;

    #[test]
    fn download_status_reports_percent_when_size_known() {
        assert_eq!(download_status(0, 200), "Downloading update... 0%");
        assert_eq!(download_status(50, 200), "Downloading update... 25%");
        assert_eq!(download_status(250, 200), "Downloading update... 100%");
    }

    #[test]
    fn download_status_reports_kilobytes_when_size_unknown() {
        assert_eq!(download_status(4096, 0), "Downloading update... 4 KB");
    }

    #[test]
    fn only_idle_or_failed_updates_can_restart() {
        assert!(AppUpdateState::Idle.can_start());
        assert!(AppUpdateState::Failed(AppError::message("boom")).can_start());
        assert!(
            !AppUpdateState::Downloading {
                downloaded: 1,
                total: 2
            }
            .can_start()
        );
        assert!(!AppUpdateState::HandingOff.can_start());
        assert!(!AppUpdateState::Restarting.can_start());
    }
}
