use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Short error code string, stable across releases (used by the CLI's JSON output).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::InvalidTrigger(_) => "INVALID_TRIGGER",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
