//! Webhook delivery pipeline
//!
//! Verify the request, build the outbound message, hand the publish off to a
//! tracked background task, and acknowledge the sender without waiting.
//!
//! ```text
//! InboundRequest ──▶ Verifier ──reject──▶ 4xx (nothing published)
//!                       │
//!                       ▼
//!                 VerifiedEvent ──▶ OutboundMessage ──▶ InFlightTracker::spawn
//!                       │                                      │
//!                       ▼                                      ▼
//!                 200 to sender                      Publisher::publish(topic)
//! ```
//!
//! Exactly one publish attempt is made per accepted request. Failures are
//! logged and counted, never retried and never reported to the sender.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use tracing::{error, info, Instrument};

use crate::publisher::{OutboundMessage, Publisher};
use crate::secret::SecretProvider;
use crate::shutdown::InFlightTracker;
use crate::verifier::{
    InboundRequest, VerifiedEvent, Verifier, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_256_HEADER,
    SIGNATURE_HEADER,
};

/// `User-Agent` stamped on every forwarded message
pub const USER_AGENT: &str = "Robot-Github-Access";

/// Where a forwarded header takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSource {
    /// Copied from the inbound request header of this name
    Request(&'static str),
    /// `X-Hub-Signature`, falling back to `X-Hub-Signature-256`
    Signature,
    /// Always this fixed value
    Fixed(&'static str),
}

/// Headers carried over to the broker message, keyed by outbound name.
///
/// Anything not listed here is dropped.
pub const FORWARDED_HEADERS: &[(&str, HeaderSource)] = &[
    ("content-type", HeaderSource::Request("content-type")),
    (EVENT_HEADER, HeaderSource::Request(EVENT_HEADER)),
    (DELIVERY_HEADER, HeaderSource::Request(DELIVERY_HEADER)),
    (SIGNATURE_HEADER, HeaderSource::Signature),
    ("User-Agent", HeaderSource::Fixed(USER_AGENT)),
];

/// Build the broker message for a verified request.
///
/// Request headers in [`FORWARDED_HEADERS`] that are missing are forwarded as
/// empty strings. Bytes that are not valid UTF-8 are replaced. The body is
/// passed through untouched.
pub fn build_message(request: &InboundRequest, event: &VerifiedEvent) -> OutboundMessage {
    let headers: BTreeMap<String, String> = FORWARDED_HEADERS
        .iter()
        .map(|(name, source)| {
            let value = match *source {
                HeaderSource::Request(from) => request.header_lossy(from),
                HeaderSource::Signature => request
                    .header_lossy(SIGNATURE_HEADER)
                    .or_else(|| request.header_lossy(SIGNATURE_256_HEADER)),
                HeaderSource::Fixed(value) => Some(Cow::Borrowed(value)),
            };
            (name.to_string(), value.unwrap_or_default().into_owned())
        })
        .collect();

    OutboundMessage::new(headers, event.payload().clone())
}

/// Everything a single delivery needs. Shared across requests.
pub struct Delivery {
    topic: String,
    verifier: Arc<dyn Verifier>,
    secret: Arc<dyn SecretProvider>,
    publisher: Arc<dyn Publisher>,
    tracker: InFlightTracker,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("in_flight", &self.tracker.in_flight())
            .finish_non_exhaustive()
    }
}

impl Delivery {
    /// Create a pipeline publishing to `topic`
    pub fn new(
        topic: impl Into<String>,
        verifier: Arc<dyn Verifier>,
        secret: Arc<dyn SecretProvider>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            topic: topic.into(),
            verifier,
            secret,
            publisher,
            tracker: InFlightTracker::new(),
        }
    }

    /// Topic every accepted event is published to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Tracker for the publish tasks started by this pipeline
    pub fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    /// Handle one webhook request.
    ///
    /// Returns the response for the sender. The publish, if any, continues in
    /// the background after this returns.
    pub fn handle(&self, request: InboundRequest) -> Response {
        metrics::counter!("hook_delivery_received_total").increment(1);

        let event = match self.verifier.validate(&request, self.secret.as_ref()) {
            Ok(event) => event,
            Err(rejection) => {
                metrics::counter!("hook_delivery_rejected_total").increment(1);
                return rejection.into_response();
            }
        };

        let message = build_message(&request, &event);
        self.dispatch(&event, message);
        self.verifier.accepted(&event)
    }

    fn dispatch(&self, event: &VerifiedEvent, message: OutboundMessage) {
        let span = tracing::info_span!(
            "publish",
            component = crate::telemetry::COMPONENT,
            event_type = %event.event_type(),
            delivery_id = %event.delivery_id(),
            topic = %self.topic,
        );
        let publisher = Arc::clone(&self.publisher);
        let topic = self.topic.clone();

        self.tracker.spawn(
            async move {
                match publisher.publish(&topic, message).await {
                    Ok(()) => {
                        metrics::counter!("hook_delivery_publish_total", "outcome" => "success")
                            .increment(1);
                        info!("Published message to {} topic", topic);
                    }
                    Err(e) => {
                        metrics::counter!("hook_delivery_publish_total", "outcome" => "failure")
                            .increment(1);
                        error!(error = %e, "Failed to publish message");
                    }
                }
            }
            .instrument(span),
        );
    }
}
