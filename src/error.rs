// ABOUTME: Connection/channel-level error taxonomy plus the `$jsError` wire envelope
// ABOUTME: Framing/body errors live in `frame::CodecError`; this layer wraps them for callers

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::CodecError;
use crate::reader::ReaderError;

/// Boxed catch-all for library-boundary ergonomics, mirroring the teacher's
/// `Error`/`Result` pair.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Connection- and channel-level failures. Framing/body decode failures
/// bubble up wrapped in [`Self::Codec`]; by the propagation policy in
/// §7, any decode error reaching this layer is fatal to the connection.
#[derive(Debug, Error)]
pub enum TChannelError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("duplicate init request on a connection that already has a remote name")]
    DuplicateInitRequest,
    #[error("duplicate init response on a connection that already has a remote name")]
    DuplicateInitResponse,
    #[error("call request received before the init handshake completed")]
    CallRequestBeforeInit,
    #[error("call response received before the init handshake completed")]
    CallResponseBeforeInit,
    #[error("operation {id} timed out after {timeout_ms}ms")]
    Timeout { id: u32, timeout_ms: u32 },
    #[error("no connection to peer {0:?}")]
    NoSuchPeer(String),
    #[error("endpoint {0:?} is already registered")]
    EndpointAlreadyDefined(String),
    #[error("ttl must be nonzero")]
    ZeroTtl,
    #[error(transparent)]
    Socket(#[from] std::io::Error),
    #[error("connection is closing")]
    Closing,
    #[error("connection reset: {0}")]
    Reset(String),
    #[error("remote responded with code {code:#04x}: {detail}")]
    RemoteError { code: u8, detail: String },
    #[error("application exception: {name}: {message}")]
    ApplicationException { name: String, message: String },
}

/// The `$jsError` shape: `name`, `message`, and any other own-properties
/// the originating error carried. `extra` uses an order-preserving map so
/// round-tripping an envelope with several extra properties reproduces
/// the same key order, matching the "bit-exact" wire requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JsError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// The decoded shape of an AppException `arg1` payload: either the
/// structured `$jsError` envelope, or a bare string passed through as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum AppErrorPayload {
    JsError(JsError),
    PlainString(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("invalid JSON in app error payload: {0}")]
    InvalidJson(String),
    #[error("$jsError envelope is missing a name or message field")]
    MalformedJsError,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "$jsError")]
    js_error: JsError,
}

impl AppErrorPayload {
    /// Encode symmetrically: strings pass through unchanged, error-shaped
    /// values emit `{"$jsError": {...}}`.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            AppErrorPayload::JsError(err) => {
                let envelope = Envelope {
                    js_error: err.clone(),
                };
                serde_json::to_vec(&envelope).expect("JsError always serializes")
            }
            AppErrorPayload::PlainString(s) => {
                serde_json::to_vec(s).expect("String always serializes")
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, EnvelopeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        match value {
            serde_json::Value::String(s) => Ok(AppErrorPayload::PlainString(s)),
            serde_json::Value::Object(ref map) if map.len() == 1 && map.contains_key("$jsError") => {
                let envelope: Envelope = serde_json::from_value(value.clone())
                    .map_err(|_| EnvelopeError::MalformedJsError)?;
                Ok(AppErrorPayload::JsError(envelope.js_error))
            }
            other => Ok(AppErrorPayload::PlainString(other.to_string())),
        }
    }
}

/// Build the `no such operation` envelope synthesized for an unresolved
/// endpoint (§4.4, scenario 3).
pub fn no_such_operation(endpoint: &str) -> JsError {
    let mut err = JsError::new("Error", "no such operation");
    err.extra
        .insert("op".into(), serde_json::Value::String(endpoint.to_string()));
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_round_trips() {
        let payload = AppErrorPayload::PlainString("boom".into());
        let encoded = payload.encode();
        assert_eq!(encoded, br#""boom""#);
        let decoded = AppErrorPayload::decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn js_error_round_trips_with_extra_props() {
        let mut err = JsError::new("Error", "no such operation");
        err.extra
            .insert("op".into(), serde_json::Value::String("missing".into()));
        let payload = AppErrorPayload::JsError(err.clone());
        let encoded = payload.encode();

        let as_json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(as_json["$jsError"]["name"], "Error");
        assert_eq!(as_json["$jsError"]["message"], "no such operation");
        assert_eq!(as_json["$jsError"]["op"], "missing");

        let decoded = AppErrorPayload::decode(&encoded).unwrap();
        assert_eq!(decoded, AppErrorPayload::JsError(err));
    }

    #[test]
    fn no_such_operation_envelope_matches_scenario_shape() {
        let err = no_such_operation("missing");
        assert_eq!(err.name, "Error");
        assert_eq!(err.message, "no such operation");
        assert_eq!(
            err.extra.get("op"),
            Some(&serde_json::Value::String("missing".into()))
        );
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let err = AppErrorPayload::decode(b"{not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidJson(_)));
    }
}
