use std::path::{Path, PathBuf};

use log::info;

/// Suffix that identifies the release asset built for this platform.
#[must_use]
pub const fn executable_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        ".exe"
    } else if cfg!(target_os = "macos") {
        "-macos"
    } else {
        "-linux"
    }
}

/// Resolve the path of the running executable.
///
/// # Errors
/// Returns an error if the operating system cannot report the executable path.
pub fn current_executable() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(strip_deleted_suffix(exe))
}

// On Linux, once the file behind /proc/self/exe is unlinked, current_exe()
// returns the original path with " (deleted)" appended.
fn strip_deleted_suffix(exe: PathBuf) -> PathBuf {
    if !cfg!(target_os = "linux") {
        return exe;
    }

    let path_str = exe.to_string_lossy();
    if let Some(trimmed) = path_str.strip_suffix(" (deleted)") {
        let fixed = PathBuf::from(trimmed);
        info!("Adjusted exe path from deleted inode: {}", fixed.display());
        fixed
    } else {
        exe
    }
}

/// Image name used to force-terminate lingering instances of `exe`.
#[must_use]
pub fn process_name(exe: &Path) -> String {
    exe.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
