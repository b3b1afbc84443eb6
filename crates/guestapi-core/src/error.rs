//! Error types for the guest API client.

use std::path::PathBuf;

use thiserror::Error;

use crate::event::EventType;

/// An event type name outside the closed [`EventType`] set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid event type '{0}' (expected one of: config, device)")]
pub struct InvalidEventType(pub String);

/// Errors that can occur while decoding a single event frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a JSON object.
    #[error("Malformed event envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// A mandatory envelope field is absent.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// A mandatory envelope field is present but has the wrong JSON shape.
    #[error("Invalid field '{field}': {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The `type` discriminator is a string outside the known set.
    #[error("Unknown event type: {value}")]
    UnknownEventType { value: String },

    /// `metadata` is present but does not match the payload shape for its type.
    #[error("Invalid {event_type} metadata: {source}")]
    InvalidMetadata {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Returns `true` if the frame carried a discriminator this client does not know.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownEventType { .. })
    }

    /// Returns `true` if the envelope was fine but its metadata payload was not.
    pub fn is_malformed_metadata(&self) -> bool {
        matches!(self, Self::InvalidMetadata { .. })
    }
}

impl From<InvalidEventType> for DecodeError {
    fn from(err: InvalidEventType) -> Self {
        Self::UnknownEventType { value: err.0 }
    }
}

/// Errors returned by guest API operations.
///
/// Each variant names the stage that failed: dialing the socket, sending the
/// request, reading the body, checking the status, or decoding.
#[derive(Debug, Error)]
pub enum GuestError {
    /// The guest socket could not be opened.
    #[error("socket error ({}): {source}", path.display())]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP exchange failed after the socket was opened.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The response body could not be read.
    #[error("reader error: {0}")]
    Read(String),

    /// The host answered with a status other than the ones the call accepts.
    #[error("unexpected status code: {status}")]
    UnexpectedStatus { status: u16 },

    /// A response body could not be deserialized.
    #[error("unmarshal error: {0}")]
    Json(#[from] serde_json::Error),

    /// An event frame could not be decoded.
    #[error("event decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The event stream failed to open, failed mid-read, or was closed by the host.
    #[error("event stream error: {0}")]
    Stream(String),

    /// A value outside the closed event type set was supplied.
    #[error(transparent)]
    Validation(#[from] InvalidEventType),

    /// A required config key is absent or blank.
    #[error("config key '{key}' is missing or blank")]
    MissingConfig { key: String },

    /// An endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl GuestError {
    /// Returns `true` if the host could not be reached at all.
    pub fn is_socket_error(&self) -> bool {
        matches!(self, Self::Socket { .. })
    }

    /// Returns the HTTP status for [`GuestError::UnexpectedStatus`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<url::ParseError> for GuestError {
    fn from(err: url::ParseError) -> Self {
        Self::Endpoint(err.to_string())
    }
}
