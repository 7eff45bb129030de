//! Broker publishing
//!
//! [`Publisher`] is the seam between the delivery pipeline and the message
//! broker. The production implementation is [`KafkaPublisher`], built on an
//! rdkafka `FutureProducer`; tests substitute their own.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PublishError;

/// A message ready to be handed to the broker.
///
/// Built once per verified event and consumed by a single publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl OutboundMessage {
    /// Create a message from its headers and raw body
    pub fn new(headers: BTreeMap<String, String>, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Message headers
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Value of header `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Raw body, byte-identical to the webhook payload
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Best-effort send of a message to a broker topic
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Send `message` to `topic`. One attempt, no retries.
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), PublishError>;

    /// Push out anything still buffered. Called once at shutdown.
    async fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub use kafka::KafkaPublisher;

#[cfg(feature = "kafka")]
mod kafka {
    use std::time::Duration;

    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::message::{Header, OwnedHeaders};
    use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
    use rdkafka::util::Timeout;
    use tracing::{debug, info};

    use super::{OutboundMessage, Publisher};
    use crate::config::BrokerConfig;
    use crate::error::PublishError;

    /// How long a single send may wait for the broker before failing
    const SEND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Kafka-backed [`Publisher`]
    #[derive(Clone)]
    pub struct KafkaPublisher {
        producer: FutureProducer,
    }

    impl std::fmt::Debug for KafkaPublisher {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("KafkaPublisher").finish_non_exhaustive()
        }
    }

    impl KafkaPublisher {
        /// Create a producer for the brokers in `config`
        pub fn new(config: &BrokerConfig, client_id: &str) -> Result<Self, PublishError> {
            let mut client_config = ClientConfig::new();
            client_config
                .set("bootstrap.servers", config.addresses().join(","))
                .set("client.id", client_id)
                .set(
                    "message.timeout.ms",
                    SEND_TIMEOUT.as_millis().to_string(),
                );

            if let Some(tls) = &config.tls {
                client_config.set("security.protocol", "ssl");
                if let Some(ca) = &tls.ca_file {
                    client_config.set("ssl.ca.location", ca.display().to_string());
                }
                if let Some(cert) = &tls.cert_file {
                    client_config.set("ssl.certificate.location", cert.display().to_string());
                }
                if let Some(key) = &tls.key_file {
                    client_config.set("ssl.key.location", key.display().to_string());
                }
            }

            let producer: FutureProducer = client_config.create().map_err(|e| {
                PublishError::broker(format!("Failed to create producer: {}", e))
            })?;

            info!(
                brokers = %config.addresses().join(","),
                tls = config.tls.is_some(),
                "Kafka producer created"
            );
            Ok(Self { producer })
        }
    }

    #[async_trait]
    impl Publisher for KafkaPublisher {
        async fn publish(
            &self,
            topic: &str,
            message: OutboundMessage,
        ) -> Result<(), PublishError> {
            let headers = message
                .headers()
                .iter()
                .fold(OwnedHeaders::new(), |headers, (key, value)| {
                    headers.insert(Header {
                        key: key.as_str(),
                        value: Some(value.as_str()),
                    })
                });

            let record = FutureRecord::<(), [u8]>::to(topic)
                .payload(message.body().as_ref())
                .headers(headers);

            let (partition, offset) = self
                .producer
                .send(record, Timeout::After(SEND_TIMEOUT))
                .await
                .map_err(|(e, _)| PublishError::broker(e.to_string()))?;

            debug!(topic, partition, offset, "Message delivered");
            Ok(())
        }

        async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
            let producer = self.producer.clone();
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| PublishError::broker(e.to_string()))?
                .map_err(|e| PublishError::broker(e.to_string()))
        }
    }
}
