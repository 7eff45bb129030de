//! Command-line options

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Verifies GitHub webhooks and forwards them to a Kafka topic
#[derive(Parser, Debug, Clone)]
#[command(name = "github-hook-delivery")]
#[command(version)]
#[command(about = "Verifies GitHub webhooks and forwards them to a Kafka topic")]
pub struct Options {
    /// Port to listen on
    #[arg(long, default_value = "8888")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Path to the broker config file
    #[arg(long, default_value = "/etc/config/config.json")]
    pub config_file: PathBuf,

    /// Seconds to wait for in-flight publishes at shutdown
    #[arg(long, default_value = "180")]
    pub grace_period: u64,

    /// Path to the file containing the HMAC secret
    #[arg(long, default_value = "/etc/webhook/hmac")]
    pub hmac_secret_file: PathBuf,

    /// How often the HMAC secret file is re-read, in seconds
    #[arg(long, default_value = "60")]
    pub secret_refresh: u64,

    /// The topic to which github webhook messages need to be published
    #[arg(long, default_value = "")]
    pub topic: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Options {
    /// Check the options that clap cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        Ok(())
    }

    /// Bind address as `host:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Shutdown grace period
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }

    /// Secret refresh interval, at least one second
    pub fn secret_refresh(&self) -> Duration {
        Duration::from_secs(self.secret_refresh.max(1))
    }
}
