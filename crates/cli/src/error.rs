//! Error types for escctl

use esc_config_engine::EngineError;
use esc_config_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Unknown dialect: {0}")]
    DialectNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] EngineError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::DialectNotFound(_) => 2,
            CliError::Protocol(_) => 3,
            CliError::InvalidInput(_) | CliError::JsonError(_) | CliError::YamlError(_) => 4,
            CliError::Transfer(_) => 5,
            CliError::IoError(_) => 1,
        }
    }
}
