use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use bgremover_platform::AppPaths;
use fs2::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("another BG Remover instance is already running")]
    AlreadyRunning,
    #[error("failed to resolve application paths: {0}")]
    Paths(#[from] bgremover_platform::AppPathsError),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl AcquireError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Holds an exclusive lock on the instance file until dropped.
pub struct SingleInstance {
    _file: File,
}

impl SingleInstance {
    pub fn acquire() -> Result<Self, AcquireError> {
        let paths = AppPaths::new()?;
        paths
            .ensure_dirs()
            .map_err(|error| AcquireError::io("failed to create app directories", error))?;
        Self::acquire_at(&paths.instance_lock_file())
    }

    pub fn acquire_at(lock_file_path: &Path) -> Result<Self, AcquireError> {
        let mut lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_file_path)
            .map_err(|error| AcquireError::io("failed to open instance lock file", error))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                return Err(AcquireError::AlreadyRunning);
            }
            Err(error) => {
                return Err(AcquireError::io("failed to acquire instance lock", error));
            }
        }

        lock_file
            .set_len(0)
            .and_then(|()| lock_file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(lock_file, "{}", std::process::id()))
            .map_err(|error| AcquireError::io("failed to write instance lock metadata", error))?;

        Ok(Self { _file: lock_file })
    }
}
