use crate::domain::config::DecoderConfig;
use crate::domain::models::WheelType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    /// Level for the frame decoders; "trace" logs every frame
    #[serde(default = "default_level")]
    pub decoder_level: String,
    #[serde(default = "default_level")]
    pub connection_level: String,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            decoder_level: default_level(),
            connection_level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "euc-wheel-link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub decoder: DecoderConfig,

    // Last wheel, used for startup auto-connect
    #[serde(default)]
    pub last_wheel_address: Option<String>,
    #[serde(default)]
    pub last_wheel_type: Option<WheelType>,
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    // Connection resilience
    #[serde(default = "default_startup_connect_timeout_ms")]
    pub startup_connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: Vec<u64>,
    #[serde(default = "default_reconnect_settle_ms")]
    pub reconnect_settle_ms: u64,
    #[serde(default = "default_data_timeout_ms")]
    pub data_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            decoder: DecoderConfig::default(),
            last_wheel_address: None,
            last_wheel_type: None,
            auto_connect: true,
            startup_connect_timeout_ms: default_startup_connect_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            reconnect_settle_ms: default_reconnect_settle_ms(),
            data_timeout_ms: default_data_timeout_ms(),
        }
    }
}

fn default_startup_connect_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_backoff_ms() -> Vec<u64> {
    vec![1000, 2000, 4000, 8000, 16000, 30000]
}
fn default_reconnect_settle_ms() -> u64 {
    3000
}
fn default_data_timeout_ms() -> u64 {
    15_000
}

impl Settings {
    pub fn reconnect_backoff(&self) -> Vec<Duration> {
        self.reconnect_backoff_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn startup_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_connect_timeout_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the platform config directory, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load settings from an explicit path.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let settings_path = path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("EucWheelLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Decoder configuration for a new session.
    pub fn decoder_config(&self) -> DecoderConfig {
        self.settings.decoder
    }

    /// Remember the wheel for the next startup auto-connect.
    pub fn remember_wheel(&mut self, address: &str, wheel_type: WheelType) -> anyhow::Result<()> {
        let changed = self.settings.last_wheel_address.as_deref() != Some(address)
            || self.settings.last_wheel_type != Some(wheel_type);
        if changed {
            self.settings.last_wheel_address = Some(address.to_string());
            self.settings.last_wheel_type = Some(wheel_type);
            self.save()?;
        }
        Ok(())
    }
}
