//! GitHub Hook Delivery - webhook to Kafka relay
//!
//! Accepts GitHub webhook deliveries over HTTP, verifies their HMAC
//! signature against a shared secret, and forwards the payload to a Kafka
//! topic for downstream consumers.
//!
//! # Architecture
//!
//! ```text
//! GitHub ──▶ axum router ──▶ Delivery::handle ──▶ Verifier
//!                                  │                 │
//!                                  │            SecretProvider
//!                                  ▼
//!                        InFlightTracker::spawn ──▶ Publisher ──▶ Kafka
//!                                  │
//!                      drain() at shutdown
//! ```
//!
//! The sender is acknowledged as soon as the signature checks out. The
//! publish runs in the background; its outcome is only logged. At shutdown
//! the server stops accepting connections and waits for outstanding
//! publishes before the process exits.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use github_hook_delivery::config::BrokerConfig;
//! use github_hook_delivery::publisher::KafkaPublisher;
//! use github_hook_delivery::secret::SecretAgent;
//! use github_hook_delivery::server::{serve, shutdown_signal};
//! use github_hook_delivery::{Delivery, GitHubVerifier};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = BrokerConfig::load("/etc/config/config.json".as_ref())?;
//!     let secret = SecretAgent::start("/etc/webhook/hmac", Duration::from_secs(60))?;
//!     let publisher = KafkaPublisher::new(&broker, "hook-delivery")?;
//!
//!     let delivery = Arc::new(Delivery::new(
//!         "github-events",
//!         Arc::new(GitHubVerifier::new()),
//!         Arc::new(secret),
//!         Arc::new(publisher),
//!     ));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8888").await?;
//!     serve(listener, delivery, shutdown_signal(), Duration::from_secs(180)).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod delivery;
pub mod error;
pub mod options;
pub mod publisher;
pub mod secret;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod verifier;

// Re-exports for convenience
pub use delivery::Delivery;
pub use error::{ConfigError, PublishError, SecretError};
pub use publisher::{OutboundMessage, Publisher};
pub use secret::SecretProvider;
pub use shutdown::InFlightTracker;
pub use verifier::{GitHubVerifier, Verifier};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
