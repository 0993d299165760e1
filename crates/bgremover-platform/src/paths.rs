use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR_NAME: &str = "bgremover";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("could not determine the home directory")]
    HomeDirUnavailable,
    #[error("could not determine the config directory")]
    ConfigDirUnavailable,
    #[error("could not determine the cache directory")]
    CacheDirUnavailable,
    #[error("could not determine the data directory")]
    DataDirUnavailable,
}

/// Per-user directories. Settings live in `config_dir`, update downloads in
/// `cache_dir`, and logs plus the instance lock in `data_dir`.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the directories for the current user and platform.
    ///
    /// # Errors
    /// Returns an error when the platform does not report one of the base
    /// directories.
    pub fn new() -> Result<Self, AppPathsError> {
        let (config, cache, data) = platform_bases()?;
        Ok(Self::from_bases(&config, &cache, &data))
    }

    /// Nest the application directory under explicit base directories.
    #[must_use]
    pub fn from_bases(config: &Path, cache: &Path, data: &Path) -> Self {
        Self {
            config_dir: config.join(APP_DIR_NAME),
            cache_dir: cache.join(APP_DIR_NAME),
            data_dir: data.join(APP_DIR_NAME),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("debug.log")
    }

    #[must_use]
    pub fn instance_lock_file(&self) -> PathBuf {
        self.data_dir.join("instance.lock")
    }

    /// Directory that holds the scratch directories of in-progress updates.
    #[must_use]
    pub fn update_scratch_root(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the detached update helper reports a failed replacement.
    #[must_use]
    pub fn update_failure_log(&self) -> PathBuf {
        self.data_dir.join("update-failed.log")
    }

    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        [&self.config_dir, &self.cache_dir, &self.data_dir]
            .into_iter()
            .try_for_each(std::fs::create_dir_all)
    }
}

#[cfg(target_os = "macos")]
fn platform_bases() -> Result<(PathBuf, PathBuf, PathBuf), AppPathsError> {
    let home = dirs::home_dir().ok_or(AppPathsError::HomeDirUnavailable)?;
    let support = home.join("Library/Application Support");
    Ok((support.clone(), home.join("Library/Caches"), support))
}

#[cfg(not(target_os = "macos"))]
fn platform_bases() -> Result<(PathBuf, PathBuf, PathBuf), AppPathsError> {
    Ok((
        dirs::config_dir().ok_or(AppPathsError::ConfigDirUnavailable)?,
        dirs::cache_dir().ok_or(AppPathsError::CacheDirUnavailable)?,
        dirs::data_dir().ok_or(AppPathsError::DataDirUnavailable)?,
    ))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::AppPaths;

    fn rooted(root: &Path) -> AppPaths {
        AppPaths::from_bases(&root.join("config"), &root.join("cache"), &root.join("data"))
    }

    #[test]
    fn files_live_in_the_expected_directories() {
        let paths = rooted(Path::new("/home/user"));

        assert_eq!(
            paths.settings_file(),
            Path::new("/home/user/config/bgremover/settings.json")
        );
        assert_eq!(
            paths.log_file(),
            Path::new("/home/user/data/bgremover/debug.log")
        );
        assert_eq!(
            paths.instance_lock_file(),
            Path::new("/home/user/data/bgremover/instance.lock")
        );
        assert_eq!(
            paths.update_failure_log(),
            Path::new("/home/user/data/bgremover/update-failed.log")
        );
        assert_eq!(
            paths.update_scratch_root(),
            Path::new("/home/user/cache/bgremover")
        );
    }

    #[test]
    fn ensure_dirs_creates_every_directory() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let paths = rooted(temp.path());

        paths
            .ensure_dirs()
            .expect("ensure_dirs should create application directories");

        assert!(paths.config_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
        assert!(paths.data_dir.is_dir());
    }
}
