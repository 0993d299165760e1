use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use bgremover_platform::AppPaths;
use log::LevelFilter;
#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, Config, ConfigBuilder, SharedLogger, WriteLogger};

/// Log file handle that reopens the file when it disappears, e.g. when the
/// user clears the data directory while the app is running.
struct ReopeningLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ReopeningLog {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_for_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *file = open_for_append(&self.path)?;
        }
        f(&mut file)
    }
}

impl Write for ReopeningLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(Write::flush)
    }
}

fn open_for_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Offset of the first line that starts in the second half of `contents`.
fn recent_half_start(contents: &[u8]) -> usize {
    let half = contents.len() / 2;
    contents[half..]
        .iter()
        .position(|&byte| byte == b'\n')
        .map_or(half, |newline| half + newline + 1)
}

fn shrink_log(path: &Path, max_bytes: u64) -> io::Result<bool> {
    if std::fs::metadata(path)?.len() <= max_bytes {
        return Ok(false);
    }
    let contents = std::fs::read(path)?;
    std::fs::write(path, &contents[recent_half_start(&contents)..])?;
    Ok(true)
}

fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("bgremover")
        .build()
}

/// Route `log` output to `debug.log` in the data directory, and to the
/// terminal in debug builds. Warnings and errors are always recorded.
pub fn init_logging(paths: &AppPaths, debug: bool, max_log_size: u64) {
    let _ = paths.ensure_dirs();
    let log_path = paths.log_file();
    let trimmed = shrink_log(&log_path, max_log_size).unwrap_or(false);

    let config = log_config();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));
    match ReopeningLog::open(log_path.clone()) {
        Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, file)),
        Err(error) => eprintln!("Cannot open {}: {error}", log_path.display()),
    }

    if CombinedLogger::init(loggers).is_err() {
        return;
    }
    log::set_max_level(level_for(debug));

    if trimmed {
        log::debug!("Trimmed {} to stay under {max_log_size} bytes", log_path.display());
    }
    log::debug!("Logging to {}", log_path.display());
}
