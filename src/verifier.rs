//! GitHub webhook verification
//!
//! Checks the request shape the way GitHub documents it and validates the
//! HMAC signature against the current shared secret.
//!
//! # Request checks, in order
//!
//! ```text
//! POST? ──no──▶ 405
//!   │
//! X-GitHub-Event? ──no──▶ 400
//!   │
//! X-GitHub-Delivery? ──no──▶ 400
//!   │
//! X-Hub-Signature(-256)? ──no──▶ 403
//!   │
//! content-type: application/json? ──no──▶ 400
//!   │
//! HMAC matches? ──no──▶ 403
//!   │
//!   ▼
//! VerifiedEvent
//! ```

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::http::header::ToStrError;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::secret::SecretProvider;

/// Header carrying the GitHub event type
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Header carrying the unique delivery id
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// Legacy HMAC-SHA1 signature header
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// HMAC-SHA256 signature header
pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";

/// Body returned to GitHub once a delivery has been accepted
pub const ACCEPTED_BODY: &str = "Event received. Have a nice day.";

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// A webhook request as received over HTTP. Lives for one call only.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP method
    pub method: Method,
    /// Request headers
    pub headers: HeaderMap,
    /// Raw request body
    pub body: Bytes,
    /// Peer address, when the transport knows it
    pub remote_addr: Option<SocketAddr>,
}

impl InboundRequest {
    /// A `POST` request with the given headers and body
    pub fn post(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            headers,
            body: body.into(),
            remote_addr: None,
        }
    }

    /// Value of header `name`, or `None` when absent or not visible ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of header `name`.
    ///
    /// `Ok(None)` when absent, `Err` when present but not visible ASCII.
    pub fn try_header(&self, name: &str) -> Result<Option<&str>, ToStrError> {
        self.headers.get(name).map(HeaderValue::to_str).transpose()
    }

    /// Value of header `name` with invalid UTF-8 replaced, or `None` when absent
    pub fn header_lossy(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
    }
}

/// An authenticated webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEvent {
    event_type: String,
    delivery_id: String,
    payload: Bytes,
}

impl VerifiedEvent {
    /// Build a verified event. Only verifiers should need this.
    pub fn new(event_type: impl Into<String>, delivery_id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            event_type: event_type.into(),
            delivery_id: delivery_id.into(),
            payload,
        }
    }

    /// GitHub event type, e.g. `push`
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Unique id of this delivery
    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    /// Raw payload, exactly as received
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Why a request was turned away. Converts into the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status code returned to the sender
    pub status: StatusCode,
    /// Human readable reason, sent as the body
    pub message: String,
}

impl Rejection {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Authenticates inbound webhook requests
pub trait Verifier: Send + Sync + 'static {
    /// Check `request` against the current secret from `secret`.
    ///
    /// `Err` carries the response the caller must send back.
    fn validate(
        &self,
        request: &InboundRequest,
        secret: &dyn SecretProvider,
    ) -> Result<VerifiedEvent, Rejection>;

    /// Response sent once a request has been accepted
    fn accepted(&self, _event: &VerifiedEvent) -> Response {
        (StatusCode::OK, ACCEPTED_BODY).into_response()
    }
}

/// Verifies requests using GitHub's `X-Hub-Signature` scheme.
///
/// `X-Hub-Signature-256` is checked when present, otherwise the SHA1
/// `X-Hub-Signature` is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubVerifier;

impl GitHubVerifier {
    /// Create a verifier
    pub fn new() -> Self {
        Self
    }
}

impl Verifier for GitHubVerifier {
    fn validate(
        &self,
        request: &InboundRequest,
        secret: &dyn SecretProvider,
    ) -> Result<VerifiedEvent, Rejection> {
        if request.method != Method::POST {
            return Err(Rejection::new(
                StatusCode::METHOD_NOT_ALLOWED,
                "405 Method not allowed",
            ));
        }

        let event_type = required_header(request, EVENT_HEADER)?;
        let delivery_id = required_header(request, DELIVERY_HEADER)?;

        let signature = match (
            request.try_header(SIGNATURE_256_HEADER),
            request.try_header(SIGNATURE_HEADER),
        ) {
            (Ok(Some(sig)), _) => Signature::Sha256(sig),
            (Ok(None), Ok(Some(sig))) => Signature::Sha1(sig),
            (Ok(None), Ok(None)) => {
                return Err(Rejection::new(
                    StatusCode::FORBIDDEN,
                    "403 Forbidden: Missing X-Hub-Signature",
                ))
            }
            _ => return Err(invalid_signature()),
        };

        if !is_json(request.header("content-type")) {
            return Err(Rejection::new(
                StatusCode::BAD_REQUEST,
                "400 Bad Request: Hook only accepts content-type: application/json - please reconfigure this hook on GitHub",
            ));
        }

        if !signature.verify(&secret.secret(), &request.body) {
            warn!(
                event_type,
                delivery_id,
                remote = ?request.remote_addr,
                "Rejected webhook with invalid signature"
            );
            return Err(invalid_signature());
        }

        debug!(event_type, delivery_id, "Webhook signature verified");
        Ok(VerifiedEvent::new(
            event_type,
            delivery_id,
            request.body.clone(),
        ))
    }
}

fn required_header<'a>(request: &'a InboundRequest, name: &str) -> Result<&'a str, Rejection> {
    match request.try_header(name) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            format!("400 Bad Request: Missing {name} Header"),
        )),
        Err(_) => Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            format!("400 Bad Request: Malformed {name} Header"),
        )),
    }
}

fn invalid_signature() -> Rejection {
    Rejection::new(
        StatusCode::FORBIDDEN,
        "403 Forbidden: Invalid X-Hub-Signature",
    )
}

enum Signature<'a> {
    Sha1(&'a str),
    Sha256(&'a str),
}

impl Signature<'_> {
    fn verify(&self, secret: &[u8], payload: &[u8]) -> bool {
        match self {
            Signature::Sha1(header) => {
                let Some(expected) = decode(header, "sha1=") else {
                    return false;
                };
                let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
                    return false;
                };
                mac.update(payload);
                mac.verify_slice(&expected).is_ok()
            }
            Signature::Sha256(header) => {
                let Some(expected) = decode(header, "sha256=") else {
                    return false;
                };
                let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                    return false;
                };
                mac.update(payload);
                mac.verify_slice(&expected).is_ok()
            }
        }
    }
}

fn decode(header: &str, prefix: &str) -> Option<Vec<u8>> {
    header
        .strip_prefix(prefix)
        .and_then(|hex_part| hex::decode(hex_part).ok())
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

/// Compute the `X-Hub-Signature` value (`sha1=<hex>`) for `payload`
pub fn sign_sha1(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Compute the `X-Hub-Signature-256` value (`sha256=<hex>`) for `payload`
pub fn sign_sha256(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
