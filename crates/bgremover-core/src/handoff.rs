//! The detached helper that swaps the running executable for a downloaded one.
//!
//! The running process cannot reliably replace its own image, so it writes a
//! small shell (Unix) or batch (Windows) script, starts it detached, and
//! exits. The script waits, makes sure the replacement is still there,
//! deletes the old executable (force-killing any lingering instance if the
//! delete does not take), copies the replacement into place and launches it.
//! A missing replacement aborts before the old executable is touched. If the
//! copy fails nothing is launched, the failure is written to a log and
//! announced, and the scratch directory with the downloaded binary is left
//! behind for manual recovery.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use log::info;

#[cfg(windows)]
const SCRIPT_NAME: &str = "finish-update.cmd";
#[cfg(not(windows))]
const SCRIPT_NAME: &str = "finish-update.sh";

const FAILURE_TITLE: &str = "BG Remover update failed";

/// One stage of the helper script, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffStep {
    /// Give the updating process time to exit.
    Wait,
    /// Abort, leaving the old executable alone, if the replacement is gone.
    VerifyReplacement,
    /// Delete the old executable.
    Delete,
    /// Only if the executable is still present: kill it by name and retry.
    ForceKillAndRetryDelete,
    /// Copy the replacement into the original path, if the old one is gone.
    Copy,
    /// Only if the copy succeeded: start the new executable.
    Launch,
    /// Only after launch: remove the scratch directory.
    Cleanup,
    /// Only if the copy failed: log and announce the broken install.
    ReportFailure,
}

#[derive(Debug, Clone)]
pub struct HandoffPlan {
    pub target: PathBuf,
    pub replacement: PathBuf,
    pub process_name: String,
    pub scratch_dir: PathBuf,
    pub failure_log: PathBuf,
    pub delay: Duration,
}

impl HandoffPlan {
    pub const STEPS: [HandoffStep; 8] = [
        HandoffStep::Wait,
        HandoffStep::VerifyReplacement,
        HandoffStep::Delete,
        HandoffStep::ForceKillAndRetryDelete,
        HandoffStep::Copy,
        HandoffStep::Launch,
        HandoffStep::Cleanup,
        HandoffStep::ReportFailure,
    ];

    #[must_use]
    pub fn script_path(&self) -> PathBuf {
        self.scratch_dir.join(SCRIPT_NAME)
    }

    /// Render the helper script for the current platform.
    #[must_use]
    pub fn render(&self) -> String {
        if cfg!(windows) {
            self.render_batch()
        } else {
            self.render_shell()
        }
    }

    /// Write the rendered script into the scratch directory.
    ///
    /// # Errors
    /// Returns an error when the script cannot be written.
    pub fn write_script(&self) -> std::io::Result<PathBuf> {
        let path = self.script_path();
        std::fs::write(&path, self.render())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }

        Ok(path)
    }

    fn failure_message(&self) -> String {
        format!(
            "Could not replace {} with {}. Copy the downloaded file over it manually to restore the application.",
            self.target.display(),
            self.replacement.display()
        )
    }

    fn aborted_message(&self) -> String {
        format!(
            "Update aborted: {} is missing. {} was not changed.",
            self.replacement.display(),
            self.target.display()
        )
    }

    #[must_use]
    pub fn render_shell(&self) -> String {
        let mut script = String::from("#!/bin/sh\n# BG Remover update helper\n");
        let _ = writeln!(script, "TARGET={}", sh_quote(&self.target));
        let _ = writeln!(script, "REPLACEMENT={}", sh_quote(&self.replacement));
        let _ = writeln!(script, "SCRATCH={}", sh_quote(&self.scratch_dir));
        let _ = writeln!(script, "FAILURE_LOG={}", sh_quote(&self.failure_log));

        for step in Self::STEPS {
            match step {
                HandoffStep::Wait => {
                    let _ = writeln!(script, "sleep {}", self.delay.as_secs());
                }
                HandoffStep::VerifyReplacement => {
                    let _ = writeln!(
                        script,
                        "if [ ! -f \"$REPLACEMENT\" ]; then\n    \
                         echo \"$(date) \"{} >> \"$FAILURE_LOG\"\n    \
                         exit 1\nfi",
                        sh_quote_str(&self.aborted_message())
                    );
                }
                HandoffStep::Delete => {
                    script.push_str("rm -f \"$TARGET\" 2>/dev/null\n");
                }
                HandoffStep::ForceKillAndRetryDelete => {
                    let name = sh_quote_str(&self.process_name);
                    script.push_str("if [ -e \"$TARGET\" ]; then\n");
                    let _ = writeln!(
                        script,
                        "    pkill -x {name} 2>/dev/null || killall {name} 2>/dev/null"
                    );
                    script.push_str("    sleep 1\n    rm -f \"$TARGET\" 2>/dev/null\nfi\n");
                }
                HandoffStep::Copy => {
                    script.push_str(
                        "if [ ! -e \"$TARGET\" ] && cp \"$REPLACEMENT\" \"$TARGET\" 2>/dev/null && chmod 755 \"$TARGET\"; then\n",
                    );
                }
                HandoffStep::Launch => {
                    script.push_str("    nohup \"$TARGET\" >/dev/null 2>&1 &\n");
                }
                HandoffStep::Cleanup => {
                    script.push_str("    rm -rf \"$SCRATCH\"\n    exit 0\nfi\n");
                }
                HandoffStep::ReportFailure => {
                    let _ = writeln!(
                        script,
                        "MESSAGE={}",
                        sh_quote_str(&self.failure_message())
                    );
                    script.push_str(
                        "echo \"$(date) $MESSAGE\" >> \"$FAILURE_LOG\"\n\
                         echo \"$MESSAGE\" >&2\n",
                    );
                    script.push_str(&shell_alert());
                    script.push_str("exit 1\n");
                }
            }
        }

        script
    }

    #[must_use]
    pub fn render_batch(&self) -> String {
        let mut script = String::from("@echo off\r\nrem BG Remover update helper\r\nsetlocal\r\n");
        let _ = write!(script, "set \"TARGET={}\"\r\n", batch_escape(&self.target));
        let _ = write!(
            script,
            "set \"REPLACEMENT={}\"\r\n",
            batch_escape(&self.replacement)
        );
        let _ = write!(script, "set \"SCRATCH={}\"\r\n", batch_escape(&self.scratch_dir));
        let _ = write!(
            script,
            "set \"FAILURE_LOG={}\"\r\n",
            batch_escape(&self.failure_log)
        );

        for step in Self::STEPS {
            match step {
                HandoffStep::Wait => {
                    // `timeout` refuses to run without a console; ping does not.
                    let _ = write!(
                        script,
                        "ping -n {} 127.0.0.1 >nul\r\n",
                        self.delay.as_secs() + 1
                    );
                }
                HandoffStep::VerifyReplacement => {
                    script.push_str("if not exist \"%REPLACEMENT%\" goto aborted\r\n");
                }
                HandoffStep::Delete => {
                    script.push_str("del /f /q \"%TARGET%\" >nul 2>&1\r\n");
                }
                HandoffStep::ForceKillAndRetryDelete => {
                    script.push_str("if exist \"%TARGET%\" (\r\n");
                    let _ = write!(
                        script,
                        "    taskkill /f /im \"{}\" >nul 2>&1\r\n",
                        self.process_name.replace('%', "%%")
                    );
                    script.push_str(
                        "    ping -n 2 127.0.0.1 >nul\r\n    del /f /q \"%TARGET%\" >nul 2>&1\r\n)\r\n",
                    );
                }
                HandoffStep::Copy => {
                    script.push_str(
                        "if exist \"%TARGET%\" goto failed\r\n\
                         copy /y \"%REPLACEMENT%\" \"%TARGET%\" >nul 2>&1\r\nif errorlevel 1 goto failed\r\n",
                    );
                }
                HandoffStep::Launch => {
                    script.push_str("start \"\" \"%TARGET%\"\r\n");
                }
                HandoffStep::Cleanup => {
                    // Removes the directory holding this very script, so it
                    // must be the last command that runs.
                    script.push_str("(goto) 2>nul & rmdir /s /q \"%SCRATCH%\"\r\n");
                }
                HandoffStep::ReportFailure => {
                    let message = self.failure_message();
                    script.push_str(":failed\r\n");
                    let _ = write!(
                        script,
                        "echo %date% %time% {} >> \"%FAILURE_LOG%\"\r\n",
                        batch_echo_escape(&message)
                    );
                    let _ = write!(
                        script,
                        "powershell -NoProfile -Command \"Add-Type -AssemblyName PresentationFramework; \
                         [System.Windows.MessageBox]::Show('{}','{FAILURE_TITLE}','OK','Error')\" >nul 2>&1\r\n",
                        message.replace('%', "%%").replace('\'', "''")
                    );
                    script.push_str("exit /b 1\r\n");
                }
            }
        }

        script.push_str(":aborted\r\n");
        let _ = write!(
            script,
            "echo %date% %time% {} >> \"%FAILURE_LOG%\"\r\nexit /b 1\r\n",
            batch_echo_escape(&self.aborted_message())
        );
        script
    }
}

/// The first available modal dialog announces the failure; a desktop
/// notification is the last resort.
fn shell_alert() -> String {
    let title = sh_quote_str(FAILURE_TITLE);
    let apple_alert = sh_quote_str(&format!(
        "display alert \"{FAILURE_TITLE}\" message \"Reinstall BG Remover or copy the downloaded file manually.\" as critical"
    ));
    let xmessage_text = sh_quote_str(&format!("{FAILURE_TITLE}: "));
    let branches = [
        ("osascript", format!("osascript -e {apple_alert}")),
        ("zenity", format!("zenity --error --title={title} --text=\"$MESSAGE\"")),
        ("kdialog", format!("kdialog --title {title} --error \"$MESSAGE\"")),
        (
            "xmessage",
            format!("xmessage -center -buttons OK {xmessage_text}\"$MESSAGE\""),
        ),
        ("notify-send", format!("notify-send -u critical {title} \"$MESSAGE\"")),
    ];

    let mut alert = String::new();
    for (index, (tool, command)) in branches.iter().enumerate() {
        let keyword = if index == 0 { "if" } else { "elif" };
        let _ = writeln!(
            alert,
            "{keyword} command -v {tool} >/dev/null 2>&1; then\n    {command} >/dev/null 2>&1"
        );
    }
    alert.push_str("fi\n");
    alert
}

/// Start the helper script so it outlives the current process.
///
/// # Errors
/// Returns an error when the helper process cannot be spawned.
pub fn spawn_detached(script: &Path) -> std::io::Result<u32> {
    info!("Launching update helper {}", script.display());
    let mut command = helper_command(script);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let child = command.spawn()?;
    Ok(child.id())
}

#[cfg(unix)]
fn helper_command(script: &Path) -> Command {
    use std::os::unix::process::CommandExt;

    let mut command = Command::new("/bin/sh");
    command.arg(script).process_group(0);
    command
}

#[cfg(windows)]
fn helper_command(script: &Path) -> Command {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let mut command = Command::new("cmd");
    command
        .arg("/C")
        .arg(script)
        .creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    command
}

fn sh_quote(path: &Path) -> String {
    sh_quote_str(&path.to_string_lossy())
}

fn sh_quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn batch_escape(path: &Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}

/// Escape text for an unquoted `echo`, where cmd would otherwise act on
/// `&`, `|`, redirections and carets inside a path.
fn batch_echo_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '%' => escaped.push_str("%%"),
            '^' | '&' | '|' | '<' | '>' => {
                escaped.push('^');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}
