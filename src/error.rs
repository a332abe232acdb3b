//! Error types for ChainSync

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid chain: {0}")]
    InvalidChain(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Connect failed to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },
    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: u32, limit: u32 },
    #[error("Unsupported wire version {0}")]
    UnsupportedWireVersion(u16),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
}

impl ChainError {
    /// Errors that mean the byte stream itself can no longer be trusted.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ChainError::IoError(_)
                | ChainError::NetworkError(_)
                | ChainError::FrameTooLarge { .. }
                | ChainError::Timeout(_)
        )
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
