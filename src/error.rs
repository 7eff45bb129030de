//! Error types for the hook delivery service
//!
//! Each fallible component returns its own `thiserror` type below; the binary
//! wraps them in `anyhow` at startup. Publish failures never reach the HTTP
//! caller, they are only logged and counted by the delivery pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Broker configuration and command-line option errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Config file is not valid JSON for the expected shape
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was parsed
        path: PathBuf,
        /// Underlying parse error
        source: serde_json::Error,
    },

    /// No entry of the address list is a usable `ip:port`
    #[error("invalid mq address: {0:?}")]
    NoValidAddress(String),

    /// The target topic was not given
    #[error("please set topic")]
    MissingTopic,
}

/// HMAC secret file errors
#[derive(Error, Debug)]
pub enum SecretError {
    /// Secret file could not be read
    #[error("Failed to read secret file {path}: {source}")]
    Read {
        /// Path of the secret file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Secret file holds nothing but whitespace
    #[error("Secret file {path} is empty")]
    Empty {
        /// Path of the secret file
        path: PathBuf,
    },
}

/// Errors returned by a [`Publisher`](crate::publisher::Publisher)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker rejected or failed to acknowledge the message
    #[error("Broker error: {0}")]
    Broker(String),
}

impl PublishError {
    /// Create a broker error from anything displayable
    pub fn broker<S: Into<String>>(msg: S) -> Self {
        PublishError::Broker(msg.into())
    }
}
