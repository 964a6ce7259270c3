//! The wire envelope and handshake bodies.
//!
//! One [`Envelope`] per transport frame, serialized as JSON:
//!
//! ```text
//! { "from": "alice,carol", "body": <string | array>, "event": 0 }
//! ```
//!
//! `event` is present only for handshake messages. Handshake bodies are
//! decoded into [`Handshake`]; content bodies stay opaque base64 until the
//! session layer decrypts them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    address::RelativeAddress,
    errors::{ProtocolError, Result},
};

/// Largest envelope accepted from the wire (16 MiB).
///
/// Attachments are inlined as base64, so this bounds file size too.
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Key-exchange event carried on the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HandshakeEvent {
    /// Initiator's RSA public key
    RsaKeyShare,
    /// Responder's RSA public key and wrapped ECDH public key
    DhKeyShare,
    /// Initiator's wrapped ECDH public key and wrapped mixed session key
    AesKeyShare,
    /// Key holder asking a group member for its RSA public key
    GroupRsaKeyRequest,
    /// Group member's RSA public key in answer to a request
    GroupRsaKeyShare,
}

impl HandshakeEvent {
    /// Name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::RsaKeyShare => "RSAKeyShare",
            Self::DhKeyShare => "DHKeyShare",
            Self::AesKeyShare => "AESKeyShare",
            Self::GroupRsaKeyRequest => "GroupRSAKeyRequest",
            Self::GroupRsaKeyShare => "GroupRSAKeyShare",
        }
    }
}

impl TryFrom<u8> for HandshakeEvent {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::RsaKeyShare),
            1 => Ok(Self::DhKeyShare),
            2 => Ok(Self::AesKeyShare),
            3 => Ok(Self::GroupRsaKeyRequest),
            4 => Ok(Self::GroupRsaKeyShare),
            _ => Err(ProtocolError::UnknownEvent { kind: "handshake", value }),
        }
    }
}

impl From<HandshakeEvent> for u8 {
    fn from(event: HandshakeEvent) -> Self {
        match event {
            HandshakeEvent::RsaKeyShare => 0,
            HandshakeEvent::DhKeyShare => 1,
            HandshakeEvent::AesKeyShare => 2,
            HandshakeEvent::GroupRsaKeyRequest => 3,
            HandshakeEvent::GroupRsaKeyShare => 4,
        }
    }
}

/// Decoded handshake body.
///
/// Byte vectors are RSA-OAEP ciphertexts addressed to the recipient; they are
/// serialized as JSON arrays of numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// Start of a pairwise handshake
    RsaKeyShare {
        /// Sender's base64 SPKI public key
        public_key: String,
    },
    /// Responder's reply to [`Handshake::RsaKeyShare`]
    DhKeyShare {
        /// Responder's base64 SPKI public key
        public_key: String,
        /// Responder's ECDH public key, encrypted to the initiator
        wrapped_ephemeral: Vec<u8>,
    },
    /// Initiator's final message carrying the mixed session key
    AesKeyShare {
        /// Initiator's ECDH public key, encrypted to the responder
        wrapped_ephemeral: Vec<u8>,
        /// `iv || (session key XOR shared secret)`, encrypted to the responder
        wrapped_key: Vec<u8>,
    },
    /// Key holder asks a group member to identify itself
    GroupRsaKeyRequest,
    /// Group member answers with its RSA public key
    GroupRsaKeyShare {
        /// Member's base64 SPKI public key
        public_key: String,
    },
}

impl Handshake {
    /// Envelope-level event tag for this body.
    pub fn event(&self) -> HandshakeEvent {
        match self {
            Self::RsaKeyShare { .. } => HandshakeEvent::RsaKeyShare,
            Self::DhKeyShare { .. } => HandshakeEvent::DhKeyShare,
            Self::AesKeyShare { .. } => HandshakeEvent::AesKeyShare,
            Self::GroupRsaKeyRequest => HandshakeEvent::GroupRsaKeyRequest,
            Self::GroupRsaKeyShare { .. } => HandshakeEvent::GroupRsaKeyShare,
        }
    }

    fn into_body(self) -> Value {
        match self {
            Self::RsaKeyShare { public_key } | Self::GroupRsaKeyShare { public_key } => {
                Value::String(public_key)
            },
            Self::DhKeyShare { public_key, wrapped_ephemeral } => {
                Value::Array(vec![Value::String(public_key), bytes_value(wrapped_ephemeral)])
            },
            Self::AesKeyShare { wrapped_ephemeral, wrapped_key } => {
                Value::Array(vec![bytes_value(wrapped_ephemeral), bytes_value(wrapped_key)])
            },
            Self::GroupRsaKeyRequest => Value::String(String::new()),
        }
    }

    fn from_body(event: HandshakeEvent, body: &Value) -> Result<Self> {
        let malformed =
            |reason: String| ProtocolError::MalformedBody { event: event.name(), reason };

        match event {
            HandshakeEvent::RsaKeyShare | HandshakeEvent::GroupRsaKeyShare => {
                let public_key = body
                    .as_str()
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| malformed("expected public key string".to_string()))?
                    .to_string();

                Ok(if event == HandshakeEvent::RsaKeyShare {
                    Self::RsaKeyShare { public_key }
                } else {
                    Self::GroupRsaKeyShare { public_key }
                })
            },
            HandshakeEvent::DhKeyShare => {
                let (public_key, wrapped_ephemeral): (String, Vec<u8>) =
                    serde_json::from_value(body.clone()).map_err(|e| malformed(e.to_string()))?;
                Ok(Self::DhKeyShare { public_key, wrapped_ephemeral })
            },
            HandshakeEvent::AesKeyShare => {
                let (wrapped_ephemeral, wrapped_key): (Vec<u8>, Vec<u8>) =
                    serde_json::from_value(body.clone()).map_err(|e| malformed(e.to_string()))?;
                Ok(Self::AesKeyShare { wrapped_ephemeral, wrapped_key })
            },
            HandshakeEvent::GroupRsaKeyRequest => Ok(Self::GroupRsaKeyRequest),
        }
    }
}

fn bytes_value(bytes: Vec<u8>) -> Value {
    Value::Array(bytes.into_iter().map(Value::from).collect())
}

/// Decoded meaning of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Key-exchange step
    Handshake(Handshake),
    /// Base64 AES-CBC ciphertext of an encrypted payload
    Content(String),
}

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Relative address, sender first
    pub from: RelativeAddress,

    /// Event-specific body
    pub body: Value,

    /// Handshake event; absent for content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<HandshakeEvent>,
}

impl Envelope {
    /// Build a handshake envelope.
    pub fn handshake(from: RelativeAddress, handshake: Handshake) -> Self {
        let event = handshake.event();
        Self { from, body: handshake.into_body(), event: Some(event) }
    }

    /// Build a content envelope around base64 ciphertext.
    pub fn content(from: RelativeAddress, ciphertext: String) -> Self {
        Self { from, body: Value::String(ciphertext), event: None }
    }

    /// Classify and decode the body.
    pub fn message(&self) -> Result<WireMessage> {
        match self.event {
            Some(event) => Handshake::from_body(event, &self.body).map(WireMessage::Handshake),
            None => self
                .body
                .as_str()
                .map(|body| WireMessage::Content(body.to_string()))
                .ok_or_else(|| ProtocolError::MalformedBody {
                    event: "content",
                    reason: "expected ciphertext string".to_string(),
                }),
        }
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }

    /// Parse JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::JsonDecode(format!(
                "envelope of {} bytes exceeds {MAX_ENVELOPE_SIZE}",
                bytes.len()
            )));
        }
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
    }
}
