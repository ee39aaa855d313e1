//! Bridge-level errors

use crate::config::ConfigError;
use crate::publisher::PublishError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Moonraker error: {0}")]
    Client(#[from] moonwire_core::Error),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Failed to connect to Moonraker: {0}")]
    Connect(moonwire_core::Error),

    #[error("Too many object publication failures ({failed}/{total})")]
    ObjectPublish { failed: usize, total: usize },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Unexpected response to {method}: {reason}")]
    UnexpectedResponse { method: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
