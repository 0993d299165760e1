use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::handoff::{self, HandoffPlan};
use crate::release::{AppUpdate, ReleaseAsset};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
pub const HANDOFF_DELAY: Duration = Duration::from_secs(2);

/// Scratch directories younger than this may still belong to a helper that
/// is waiting to run, so startup cleanup leaves them alone.
pub const STALE_UPDATE_AGE: Duration = Duration::from_secs(10 * 60);

/// Prefix of the scratch directories created for a download.
pub const UPDATE_DIR_PREFIX: &str = ".bgremover-update";

#[derive(Debug, Clone)]
pub enum UpdateProgress {
    Downloading { downloaded: u64, total: u64 },
    Verifying,
    HandingOff,
}

/// The release asset chosen for this platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAsset {
    pub name: String,
    pub download_url: String,
    pub size: u64,
    pub sha256: Option<String>,
}

#[derive(Debug, Error)]
pub enum AutoUpdateError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("download failed with status {status}")]
    DownloadStatus { status: reqwest::StatusCode },
    #[error("download timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("release has no installable asset ending in '{suffix}'")]
    NoInstallableAsset { suffix: String },
    #[error("{context}: {details}")]
    Platform {
        context: &'static str,
        details: String,
    },
    #[error("{0}")]
    Invalid(String),
}

impl AutoUpdateError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    fn platform(context: &'static str, details: String) -> Self {
        Self::Platform { context, details }
    }

    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    /// Failures caused by the network rather than by local resources.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::DownloadStatus { .. } | Self::Timeout { .. }
        )
    }
}

/// Everything the installer needs to know about the local installation.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Directory the scratch download directory is created in.
    pub scratch_root: PathBuf,
    /// The executable to replace.
    pub target: PathBuf,
    pub asset_suffix: String,
    pub download_timeout: Duration,
    pub handoff_delay: Duration,
    pub failure_log: PathBuf,
}

impl InstallOptions {
    /// Options describing the running process and its per-user directories.
    ///
    /// # Errors
    /// Returns an error when the application directories or the running
    /// executable cannot be resolved.
    pub fn for_current_process() -> Result<Self, AutoUpdateError> {
        let paths = bgremover_platform::AppPaths::new().map_err(|error| {
            AutoUpdateError::platform("failed to resolve app paths", error.to_string())
        })?;
        let target = bgremover_platform::current_executable()
            .map_err(|error| AutoUpdateError::io("failed to get current executable", error))?;

        Ok(Self {
            scratch_root: paths.update_scratch_root().to_path_buf(),
            target,
            asset_suffix: bgremover_platform::executable_suffix().to_string(),
            download_timeout: DOWNLOAD_TIMEOUT,
            handoff_delay: HANDOFF_DELAY,
            failure_log: paths.update_failure_log(),
        })
    }

    #[must_use]
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handoff_delay(mut self, delay: Duration) -> Self {
        self.handoff_delay = delay;
        self
    }
}

/// A downloaded update waiting to be handed to the helper.
///
/// Dropping it removes the scratch directory and everything in it.
#[derive(Debug)]
pub struct PreparedUpdate {
    temp_dir: TempDir,
    pub version: String,
    pub asset: UpdateAsset,
    pub downloaded: PathBuf,
    pub plan: HandoffPlan,
    pub script: PathBuf,
}

impl PreparedUpdate {
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Proof that the helper is running; the caller should exit now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffTicket {
    pub version: String,
    pub helper_pid: u32,
    pub script: PathBuf,
    pub scratch_dir: PathBuf,
}

/// Pick the asset whose name ends with `suffix` (case-insensitive).
///
/// When several assets match, the first one in release order wins.
///
/// # Errors
/// Returns [`AutoUpdateError::NoInstallableAsset`] when nothing matches.
pub fn select_update_asset(
    assets: &[ReleaseAsset],
    suffix: &str,
) -> Result<UpdateAsset, AutoUpdateError> {
    let suffix_lower = suffix.to_ascii_lowercase();
    let mut matches = assets
        .iter()
        .filter(|asset| asset.name.to_ascii_lowercase().ends_with(&suffix_lower));

    let asset = matches
        .next()
        .ok_or_else(|| AutoUpdateError::NoInstallableAsset {
            suffix: suffix.to_string(),
        })?;

    let skipped = matches.count();
    if skipped > 0 {
        warn!(
            "Release has {} assets ending in '{suffix}', using {}",
            skipped + 1,
            asset.name
        );
    }

    Ok(UpdateAsset {
        name: asset.name.clone(),
        download_url: asset.browser_download_url.clone(),
        size: asset.size,
        sha256: asset.sha256(),
    })
}

/// Download the update and write the helper script, without touching the
/// installed executable.
///
/// # Errors
/// Returns an error when no asset matches, the download fails or times out,
/// the checksum does not match, or the scratch files cannot be written. The
/// scratch directory is removed in every error case.
pub async fn prepare_update(
    client: &reqwest::Client,
    update: &AppUpdate,
    options: &InstallOptions,
    progress: &mpsc::Sender<UpdateProgress>,
) -> Result<PreparedUpdate, AutoUpdateError> {
    let asset = select_update_asset(&update.assets, &options.asset_suffix)?;

    std::fs::create_dir_all(&options.scratch_root).map_err(|error| {
        AutoUpdateError::io_with_path(
            "failed to create cache directory",
            &options.scratch_root,
            &error,
        )
    })?;
    let temp_dir = tempfile::Builder::new()
        .prefix(UPDATE_DIR_PREFIX)
        .tempdir_in(&options.scratch_root)
        .map_err(|error| AutoUpdateError::io("failed to create temp directory", error))?;

    let file_name = download_file_name(&asset.name);
    let download_path = temp_dir.path().join(file_name);

    info!("Downloading update from {}", asset.download_url);
    tokio::time::timeout(
        options.download_timeout,
        download_file(client, &asset, &download_path, progress),
    )
    .await
    .map_err(|_| AutoUpdateError::Timeout {
        seconds: options.download_timeout.as_secs(),
    })??;

    if let Some(expected) = &asset.sha256 {
        let _ = progress.send(UpdateProgress::Verifying).await;
        verify_sha256(&download_path, expected)?;
        info!("Update checksum verified for {}", asset.name);
    }

    make_executable(&download_path)?;

    let plan = HandoffPlan {
        target: options.target.clone(),
        replacement: download_path.clone(),
        process_name: bgremover_platform::process_name(&options.target),
        scratch_dir: temp_dir.path().to_path_buf(),
        failure_log: options.failure_log.clone(),
        delay: options.handoff_delay,
    };
    let script = plan
        .write_script()
        .map_err(|error| AutoUpdateError::io("failed to write update helper", error))?;
    debug!("Update helper written to {}", script.display());

    Ok(PreparedUpdate {
        temp_dir,
        version: update.latest_version.clone(),
        asset,
        downloaded: download_path,
        plan,
        script,
    })
}

/// Start the detached helper and give up ownership of the scratch directory.
///
/// # Errors
/// Returns an error when the helper cannot be spawned; the scratch directory
/// is removed in that case.
pub fn hand_off(prepared: PreparedUpdate) -> Result<HandoffTicket, AutoUpdateError> {
    let helper_pid = handoff::spawn_detached(&prepared.script)
        .map_err(|error| AutoUpdateError::io("failed to launch update helper", error))?;

    // From here on the helper deletes the directory once the new binary is in place.
    let scratch_dir = prepared.temp_dir.keep();
    info!("Update helper running as pid {helper_pid}");

    Ok(HandoffTicket {
        version: prepared.version,
        helper_pid,
        script: prepared.script,
        scratch_dir,
    })
}

/// Download, verify and hand the update to the helper process.
///
/// # Errors
/// Returns an error from [`prepare_update`] or [`hand_off`].
pub async fn download_and_install(
    client: &reqwest::Client,
    update: &AppUpdate,
    options: &InstallOptions,
    progress: mpsc::Sender<UpdateProgress>,
) -> Result<HandoffTicket, AutoUpdateError> {
    let prepared = prepare_update(client, update, options, &progress).await?;
    let _ = progress.send(UpdateProgress::HandingOff).await;
    hand_off(prepared)
}

fn download_file_name(asset_name: &str) -> &str {
    Path::new(asset_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && !n.contains(".."))
        .unwrap_or("update-download")
}

async fn download_file(
    client: &reqwest::Client,
    asset: &UpdateAsset,
    dest: &Path,
    progress: &mpsc::Sender<UpdateProgress>,
) -> Result<(), AutoUpdateError> {
    use futures_util::StreamExt;

    let response = client
        .get(&asset.download_url)
        .send()
        .await
        .map_err(|error| AutoUpdateError::http("download request failed", error))?;

    if !response.status().is_success() {
        return Err(AutoUpdateError::DownloadStatus {
            status: response.status(),
        });
    }

    let total = response.content_length().unwrap_or(asset.size);
    let mut downloaded: u64 = 0;

    let mut file = tokio::fs::File::create(dest).await.map_err(|error| {
        AutoUpdateError::io_with_path("failed to create download file", dest, &error)
    })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| AutoUpdateError::http("download stream error", error))?;
        file.write_all(&chunk).await.map_err(|error| {
            AutoUpdateError::io_with_path("failed to write download data", dest, &error)
        })?;
        downloaded += chunk.len() as u64;
        let _ = progress
            .send(UpdateProgress::Downloading { downloaded, total })
            .await;
    }

    file.flush().await.map_err(|error| {
        AutoUpdateError::io_with_path("failed to flush download file", dest, &error)
    })?;

    if downloaded == 0 {
        return Err(AutoUpdateError::Invalid(
            "Downloaded update is empty".to_string(),
        ));
    }
    if asset.size > 0 && downloaded != asset.size {
        return Err(AutoUpdateError::Invalid(format!(
            "Downloaded {downloaded} bytes of {}, but the release lists {} bytes. Refusing to apply update.",
            asset.name, asset.size
        )));
    }

    info!("Download complete: {downloaded} bytes");
    Ok(())
}

fn verify_sha256(path: &Path, expected: &str) -> Result<(), AutoUpdateError> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(AutoUpdateError::Invalid(format!(
            "Checksum mismatch for {}. Refusing to apply update.",
            path.display()
        )))
    }
}

fn sha256_file(path: &Path) -> Result<String, AutoUpdateError> {
    let mut file = std::fs::File::open(path).map_err(|error| {
        AutoUpdateError::io_with_path("failed to open file for checksum", path, &error)
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file.read(&mut buffer).map_err(|error| {
            AutoUpdateError::io_with_path("failed to read file for checksum", path, &error)
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), AutoUpdateError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|error| {
        AutoUpdateError::io_with_path("failed to mark update executable", path, &error)
    })
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn make_executable(_path: &Path) -> Result<(), AutoUpdateError> {
    Ok(())
}

/// Remove scratch directories left behind by a helper that could not finish.
///
/// Directories modified within `older_than` are kept: their helper may still
/// be inside its start-up delay and about to copy the download into place.
/// Returns how many directories were removed.
pub fn cleanup_stale_update_dirs(scratch_root: &Path, older_than: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(scratch_root) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir()
            || !entry
                .file_name()
                .to_string_lossy()
                .starts_with(UPDATE_DIR_PREFIX)
        {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .unwrap_or(Duration::ZERO);
        if age < older_than {
            debug!("Keeping recent update dir: {}", path.display());
            continue;
        }

        debug!("Cleaning up update temp dir: {}", path.display());
        if std::fs::remove_dir_all(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}
