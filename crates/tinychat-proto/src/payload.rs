//! Decrypted message payloads.
//!
//! These are what the session key protects. The JSON form of
//! [`EncryptedPayload`] is AES-encrypted and base64-encoded into the body of a
//! content envelope.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Message identifier (a UUID string chosen by the author).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Content event carried inside an encrypted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ContentEvent {
    /// Sender is composing; body is the typing text shown to peers
    Typing,
    /// Sender stopped composing
    StopTyping,
    /// Replace the body of message `id`
    Edit,
    /// Remove message `id`
    Unsend,
    /// Acknowledge receipt of message `id`
    Delivered,
    /// Body is a JSON [`Attachment`]
    File,
    /// Body is a JSON [`Location`]
    Location,
}

impl ContentEvent {
    /// Whether the receiver answers this event with `Delivered`.
    ///
    /// Plain text has no event and is always acknowledged.
    pub fn is_acknowledged(self) -> bool {
        matches!(self, Self::Edit | Self::File | Self::Location)
    }
}

impl TryFrom<u8> for ContentEvent {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Typing),
            1 => Ok(Self::StopTyping),
            2 => Ok(Self::Edit),
            3 => Ok(Self::Unsend),
            4 => Ok(Self::Delivered),
            5 => Ok(Self::File),
            6 => Ok(Self::Location),
            _ => Err(ProtocolError::UnknownEvent { kind: "content", value }),
        }
    }
}

impl From<ContentEvent> for u8 {
    fn from(event: ContentEvent) -> Self {
        match event {
            ContentEvent::Typing => 0,
            ContentEvent::StopTyping => 1,
            ContentEvent::Edit => 2,
            ContentEvent::Unsend => 3,
            ContentEvent::Delivered => 4,
            ContentEvent::File => 5,
            ContentEvent::Location => 6,
        }
    }
}

/// Logical message in decrypted form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Text, or JSON for `File`/`Location`; empty for control events
    pub body: String,

    /// Author's wall-clock time, `HH:MM:SS`
    pub time: String,

    /// Message id; for `Edit`/`Unsend`/`Delivered` the id being referenced
    pub id: MessageId,

    /// Content event; absent for plain text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<ContentEvent>,

    /// Id of the message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<MessageId>,

    /// Presentation effect, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

impl EncryptedPayload {
    /// Plain text message.
    pub fn text(id: MessageId, body: impl Into<String>, time: impl Into<String>) -> Self {
        Self { body: body.into(), time: time.into(), id, event: None, prev: None, effect: None }
    }

    /// Control or content event referencing `id`.
    pub fn event(
        event: ContentEvent,
        id: MessageId,
        body: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            time: time.into(),
            id,
            event: Some(event),
            prev: None,
            effect: None,
        }
    }

    /// Set the replied-to message.
    #[must_use]
    pub fn with_prev(mut self, prev: Option<MessageId>) -> Self {
        self.prev = prev;
        self
    }

    /// Serialize to JSON bytes (the plaintext that gets encrypted).
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }

    /// Parse decrypted JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
    }
}

/// File attachment inlined into a `File` payload body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Original file name
    pub name: String,

    /// MIME type, e.g. `image/png`
    pub mime_type: String,

    /// Base64 file contents
    pub data: String,
}

impl Attachment {
    /// Wrap raw file bytes.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self { name: name.into(), mime_type: mime_type.into(), data: STANDARD.encode(bytes) }
    }

    /// Decoded file contents.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        STANDARD.decode(&self.data).map_err(|e| ProtocolError::Base64(e.to_string()))
    }

    /// JSON form stored in the payload body.
    pub fn to_body(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }

    /// Parse a payload body.
    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
    }
}

/// Shared location inlined into a `Location` payload body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Degrees north
    pub latitude: f64,

    /// Degrees east
    pub longitude: f64,
}

impl Location {
    /// Map link for renderers.
    pub fn map_link(&self) -> String {
        format!(
            "https://www.openstreetmap.org/?mlat={lat}&mlon={lon}#map=15/{lat}/{lon}",
            lat = self.latitude,
            lon = self.longitude
        )
    }

    /// JSON form stored in the payload body.
    pub fn to_body(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }

    /// Parse a payload body. Rejects coordinates outside the valid range.
    pub fn from_body(body: &str) -> Result<Self> {
        let location: Self =
            serde_json::from_str(body).map_err(|e| ProtocolError::JsonDecode(e.to_string()))?;

        if !(-90.0..=90.0).contains(&location.latitude)
            || !(-180.0..=180.0).contains(&location.longitude)
        {
            return Err(ProtocolError::JsonDecode("coordinates out of range".to_string()));
        }
        Ok(location)
    }
}
