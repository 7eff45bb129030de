//! GitHub Hook Delivery
//!
//! Verifies GitHub webhooks and forwards them onto a Kafka topic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use github_hook_delivery::config::BrokerConfig;
use github_hook_delivery::options::Options;
use github_hook_delivery::publisher::{KafkaPublisher, Publisher};
use github_hook_delivery::secret::SecretAgent;
use github_hook_delivery::server::{self, DrainOutcome};
use github_hook_delivery::telemetry::{self, COMPONENT};
use github_hook_delivery::{Delivery, GitHubVerifier};
use tracing::{info, warn};

/// Upper bound for pushing out producer buffers after the drain
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Options::parse();
    telemetry::init(opts.verbose, opts.log_format);

    opts.validate().context("Invalid options")?;

    info!(
        component = COMPONENT,
        version = github_hook_delivery::VERSION,
        "Starting on {}",
        opts.bind_addr()
    );

    let broker = BrokerConfig::load(&opts.config_file).context("Error loading broker config")?;

    let secret = SecretAgent::start(&opts.hmac_secret_file, opts.secret_refresh())
        .context("Error starting secret agent")?;

    let publisher = Arc::new(
        KafkaPublisher::new(&broker, COMPONENT).context("Error init broker")?,
    );

    let listener = tokio::net::TcpListener::bind(opts.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", opts.bind_addr()))?;

    let delivery = Arc::new(Delivery::new(
        opts.topic.clone(),
        Arc::new(GitHubVerifier::new()),
        Arc::new(secret),
        publisher.clone(),
    ));

    let outcome = server::serve(
        listener,
        delivery,
        server::shutdown_signal(),
        opts.grace_period(),
    )
    .await
    .context("HTTP server failed")?;

    if let DrainOutcome::TimedOut { abandoned } = outcome {
        warn!(abandoned, "Exiting with publishes still in flight");
    }

    if let Err(e) = publisher.flush(FLUSH_TIMEOUT).await {
        warn!(error = %e, "Failed to flush producer");
    }

    info!("Shutdown complete");
    Ok(())
}
