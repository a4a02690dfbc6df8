//! Error types shared across the crate.

use thiserror::Error;

/// Terminal failure of an unlock request.
///
/// The `Display` text is what the user sees, so every kind reads differently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnlockError {
    #[error("lock settings are invalid: {0}")]
    ConfigInvalid(String),
    #[error("an unlock is already in progress")]
    AlreadyInProgress,
    #[error("lock not found, check that the device is powered and in range")]
    NotFound,
    #[error("scanning for the lock failed: {0}")]
    ScanFailed(String),
    #[error("could not connect to the lock")]
    ConnectFailed,
    #[error("timed out talking to the lock, check that the device is switched on")]
    Timeout,
    #[error("service not found, check the service UUID")]
    ServiceNotFound,
    #[error("characteristic not found, check the command characteristic UUID")]
    CharacteristicNotFound,
    #[error("the lock rejected the unlock command")]
    WriteFailed,
    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),
    #[error("bluetooth is unavailable: {0}")]
    RadioUnavailable(String),
    #[error("unlock cancelled by shutdown")]
    Cancelled,
}

/// Why a `LockSettings` value could not become a `LockConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("device name must not be empty")]
    EmptyDeviceName,
    #[error("invalid {field} UUID: {value}")]
    InvalidUuid { field: &'static str, value: String },
    #[error("invalid {field}: {value} is not a non-negative whole number of milliseconds")]
    InvalidDuration { field: &'static str, value: String },
    #[error("settings unavailable: {0}")]
    Unavailable(String),
}

impl From<ConfigError> for UnlockError {
    fn from(err: ConfigError) -> Self {
        UnlockError::ConfigInvalid(err.to_string())
    }
}
