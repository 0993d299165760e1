use std::path::PathBuf;
use std::sync::Arc;

use bgremover_core::{HandoffTicket, UpdateCheck};
use image::DynamicImage;

use crate::error::AppError;

/// Which background job a [`Message::WorkerFailed`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    UpdateCheck,
    AppUpdate,
    ImageProcessing,
    ImageSave,
}

#[derive(Debug, Clone)]
pub enum Message {
    Started,

    CheckForUpdates,
    UpdateChecked(Box<Result<UpdateCheck, AppError>>),
    StartAppUpdate,
    AppUpdateProgress {
        downloaded: u64,
        total: u64,
    },
    AppUpdateVerifying,
    AppUpdateHandingOff,
    AppUpdateComplete(Box<Result<HandoffTicket, AppError>>),

    OpenImage(Option<PathBuf>),
    ImageProcessed {
        path: PathBuf,
        result: Result<Arc<DynamicImage>, AppError>,
    },
    SaveImage(Option<PathBuf>),
    ImageSaved {
        interactive: bool,
        result: Result<PathBuf, AppError>,
    },

    /// A background task ended without producing its own message.
    WorkerFailed { kind: WorkerKind, reason: String },
}
