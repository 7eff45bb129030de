//! Broker configuration
//!
//! Loaded from a JSON file given on the command line:
//!
//! ```json
//! {
//!   "address": "10.0.0.1:9092,10.0.0.2:9092",
//!   "tls": { "ca_file": "/etc/kafka/ca.pem" }
//! }
//! ```
//!
//! Entries of `address` that are not an IPv4 `ip:port` pair are skipped.
//! Loading fails when none are left.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

fn ip_port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^((25[0-5]|(2[0-4]|1\d|[1-9]|)\d)\.?\b){4}:[1-9][0-9]*$")
            .expect("ip:port pattern is valid")
    })
}

/// Kafka connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Comma separated list of `ip:port` broker addresses
    pub address: String,

    /// TLS settings. Plaintext when absent.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Client-side TLS files for the broker connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    /// CA bundle used to verify the brokers
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Client certificate, for mutual TLS
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Client private key, for mutual TLS
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl BrokerConfig {
    /// Read and validate the config file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BrokerConfig =
            serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Fail unless at least one usable address is configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses().is_empty() {
            return Err(ConfigError::NoValidAddress(self.address.clone()));
        }
        Ok(())
    }

    /// The usable broker addresses, in configured order
    pub fn addresses(&self) -> Vec<&str> {
        self.address
            .split(',')
            .filter(|addr| ip_port_pattern().is_match(addr))
            .collect()
    }
}
