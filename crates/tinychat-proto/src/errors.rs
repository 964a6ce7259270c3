//! Protocol error types

use thiserror::Error;

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from parsing or building wire types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Participant id is empty or contains a separator
    #[error("invalid participant id {id:?}: {reason}")]
    InvalidParticipant {
        /// The rejected id
        id: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// `from` field is empty or lists a participant twice
    #[error("invalid relative address {address:?}: {reason}")]
    InvalidAddress {
        /// The rejected address
        address: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Unknown numeric event value
    #[error("unknown {kind} event value {value}")]
    UnknownEvent {
        /// Which enumeration was being decoded
        kind: &'static str,
        /// The value on the wire
        value: u8,
    },

    /// Handshake body does not have the shape its event requires
    #[error("malformed {event} body: {reason}")]
    MalformedBody {
        /// Event whose body failed to parse
        event: &'static str,
        /// Parser detail
        reason: String,
    },

    /// JSON encoding failed
    #[error("JSON encode error: {0}")]
    JsonEncode(String),

    /// JSON decoding failed
    #[error("JSON decode error: {0}")]
    JsonDecode(String),

    /// Base64 decoding failed
    #[error("base64 decode error: {0}")]
    Base64(String),
}
