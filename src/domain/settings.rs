use crate::domain::error::ConfigError;
use crate::domain::models::LockConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_DEVICE_NAME: &str = "ESP32Lock";
/// Nordic UART service, as exposed by the lock firmware.
pub const DEFAULT_SERVICE_UUID: &str = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";
/// Nordic UART RX characteristic; the phone writes commands here.
pub const DEFAULT_COMMAND_CHAR_UUID: &str = "6E400002-B5A3-F393-E0A9-E50E24DCCA9E";
pub const DEFAULT_PRESS_TIME: &str = "450";
pub const DEFAULT_RELEASE_TIME: &str = "300";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
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
    "doorlock".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// User-editable lock settings, kept as text until validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub command_char_uuid: String,
    #[serde(default = "default_press_time")]
    pub press_time: String,
    #[serde(default = "default_release_time")]
    pub release_time: String,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            service_uuid: default_service_uuid(),
            command_char_uuid: default_command_uuid(),
            press_time: default_press_time(),
            release_time: default_release_time(),
        }
    }
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}
fn default_service_uuid() -> String {
    DEFAULT_SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    DEFAULT_COMMAND_CHAR_UUID.to_string()
}
fn default_press_time() -> String {
    DEFAULT_PRESS_TIME.to_string()
}
fn default_release_time() -> String {
    DEFAULT_RELEASE_TIME.to_string()
}

impl LockSettings {
    /// Turn the raw text fields into a `LockConfig`, or say which field is wrong.
    pub fn validate(&self) -> Result<LockConfig, ConfigError> {
        let target_name = self.device_name.trim();
        if target_name.is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }

        Ok(LockConfig {
            target_name: target_name.to_string(),
            service_id: parse_uuid("service", &self.service_uuid)?,
            command_characteristic_id: parse_uuid("command characteristic", &self.command_char_uuid)?,
            press_duration_ms: parse_duration("press time", &self.press_time)?,
            release_duration_ms: parse_duration("release time", &self.release_time)?,
        })
    }
}

fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(value.trim()).map_err(|_| ConfigError::InvalidUuid {
        field,
        value: value.to_string(),
    })
}

fn parse_duration(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub lock: LockSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

/// Supplies the lock configuration at the start of every session.
pub trait SettingsProvider: Send + Sync {
    fn lock_config(&self) -> Result<LockConfig, ConfigError>;
}

impl SettingsProvider for LockConfig {
    fn lock_config(&self) -> Result<LockConfig, ConfigError> {
        Ok(self.clone())
    }
}

impl SettingsProvider for LockSettings {
    fn lock_config(&self) -> Result<LockConfig, ConfigError> {
        self.validate()
    }
}

impl<T: SettingsProvider> SettingsProvider for Mutex<T> {
    fn lock_config(&self) -> Result<LockConfig, ConfigError> {
        self.lock()
            .map_err(|_| ConfigError::Unavailable("settings lock poisoned".to_string()))?
            .lock_config()
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    /// Directory holding every file this application persists.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("DoorLock");
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = Self::config_dir()?;
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

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    /// Replace the lock settings. Nothing is written unless they validate.
    pub fn update_lock(&mut self, lock: LockSettings) -> anyhow::Result<LockConfig> {
        let config = lock.validate()?;
        self.settings.lock = lock;
        self.save()?;
        Ok(config)
    }

    pub fn reset_lock_to_defaults(&mut self) -> anyhow::Result<()> {
        self.settings.lock = LockSettings::default();
        self.save()
    }
}

impl SettingsProvider for SettingsService {
    fn lock_config(&self) -> Result<LockConfig, ConfigError> {
        self.settings.lock.validate()
    }
}
