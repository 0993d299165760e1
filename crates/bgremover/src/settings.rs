use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bgremover_core::release::{DEFAULT_REPOSITORY, METADATA_TIMEOUT};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default = "default_true")]
    pub check_updates_on_startup: bool,

    #[serde(default = "default_update_repository")]
    pub update_repository: String,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_handoff_delay")]
    pub handoff_delay_secs: u64,

    #[serde(default = "default_exit_grace")]
    pub exit_grace_millis: u64,

    #[serde(default)]
    pub rembg_command: Option<PathBuf>,

    #[serde(default)]
    pub rembg_model: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_update_repository() -> String {
    DEFAULT_REPOSITORY.to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    300
}

fn default_handoff_delay() -> u64 {
    2
}

fn default_exit_grace() -> u64 {
    500
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            check_updates_on_startup: true,
            update_repository: default_update_repository(),
            http_timeout_secs: default_http_timeout(),
            download_timeout_secs: default_download_timeout(),
            handoff_delay_secs: default_handoff_delay(),
            exit_grace_millis: default_exit_grace(),
            rembg_command: None,
            rembg_model: None,
        }
    }
}

impl AppSettings {
    /// Load the settings file, writing the defaults there on first run so the
    /// available options can be discovered and edited.
    pub fn load_or_init(settings_path: &Path) -> Self {
        if settings_path.exists() {
            return Self::load_from(settings_path);
        }

        let settings = Self::default();
        let written = settings_path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| settings.save_to(settings_path));
        if let Err(error) = written {
            log::warn!(
                "Could not write default settings to {}: {error}",
                settings_path.display()
            );
        }
        settings
    }

    pub fn load_from(settings_path: &Path) -> Self {
        if !settings_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(settings_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {error}",
                    settings_path.display()
                );
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, settings_path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(settings_path, content)
    }

    /// Release metadata requests never wait longer than ten seconds.
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs).min(METADATA_TIMEOUT)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn handoff_delay(&self) -> Duration {
        Duration::from_secs(self.handoff_delay_secs)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::AppSettings;

    #[test]
    fn app_settings_defaults_match_expected_timeouts() {
        let settings = AppSettings::default();
        assert!(!settings.debug_logging);
        assert!(settings.check_updates_on_startup);
        assert_eq!(settings.update_repository, "needyamin/img-background-remover");
        assert_eq!(settings.http_timeout_secs, 10);
        assert_eq!(settings.download_timeout_secs, 300);
        assert_eq!(settings.handoff_delay_secs, 2);
        assert_eq!(settings.exit_grace_millis, 500);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert!(settings.rembg_command.is_none());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: AppSettings = serde_json::from_value(json!({
            "debug_logging": true,
            "rembg_model": "u2netp"
        }))
        .expect("partial settings should deserialize");

        assert!(settings.debug_logging);
        assert_eq!(settings.rembg_model.as_deref(), Some("u2netp"));
        assert!(settings.check_updates_on_startup);
        assert_eq!(settings.download_timeout_secs, 300);
    }

    #[test]
    fn metadata_timeout_is_capped_at_ten_seconds() {
        let mut settings = AppSettings::default();
        settings.http_timeout_secs = 60;
        assert_eq!(settings.metadata_timeout(), Duration::from_secs(10));

        settings.http_timeout_secs = 3;
        assert_eq!(settings.metadata_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn save_and_load_preserve_overrides() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("settings.json");
        let mut settings = AppSettings::default();
        settings.check_updates_on_startup = false;
        settings.update_repository = "someone/fork".to_string();

        settings.save_to(&path).expect("settings should be written");
        let loaded = AppSettings::load_from(&path);

        assert!(!loaded.check_updates_on_startup);
        assert_eq!(loaded.update_repository, "someone/fork");
    }

    #[test]
    fn first_run_writes_defaults_without_overwriting_later() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("config").join("settings.json");

        let first = AppSettings::load_or_init(&path);
        assert!(first.check_updates_on_startup);
        let written = std::fs::read_to_string(&path).expect("defaults should be written");
        assert!(written.contains("\"handoff_delay_secs\": 2"));

        std::fs::write(&path, r#"{ "check_updates_on_startup": false }"#)
            .expect("edited settings should be written");
        let edited = AppSettings::load_or_init(&path);
        assert!(!edited.check_updates_on_startup);
        assert_eq!(
            std::fs::read_to_string(&path).expect("settings should be readable"),
            r#"{ "check_updates_on_startup": false }"#
        );
    }

    #[test]
    fn corrupt_settings_file_loads_defaults() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").expect("corrupt file should be written");

        let loaded = AppSettings::load_from(&path);

        assert!(loaded.check_updates_on_startup);
        assert_eq!(loaded.http_timeout_secs, 10);
    }
}
