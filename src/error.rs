use thiserror::Error;

/// Main error type for the warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Process-related errors
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to launch process: {0}")]
    SpawnError(String),

    #[error("Failed to kill process {0}: {1}")]
    KillError(String, String),

    // Configuration errors
    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Settings store errors
    #[error("Failed to load settings: {0}")]
    SettingsLoadError(String),

    #[error("Failed to save settings: {0}")]
    SettingsSaveError(String),

    // Host-level errors
    #[error("Host restart failed: {0}")]
    HostRestartError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
