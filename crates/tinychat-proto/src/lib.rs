//! TinyChat Wire Protocol
//!
//! Types that cross the wire between peers. Everything is JSON: a peer sends
//! one [`Envelope`] per transport frame, and content envelopes carry an
//! AES-encrypted, JSON-serialized [`EncryptedPayload`].
//!
//! # Two event enumerations
//!
//! Handshake events ([`HandshakeEvent`]) live on the envelope; content events
//! ([`ContentEvent`]) live inside the encrypted payload. They never share a
//! field, so a numeric value from one can never be mistaken for the other.
//!
//! ```text
//! Envelope { from, body, event?: HandshakeEvent }
//!   ├─ event present → Handshake (RSA / DH / AES / group fan-out)
//!   └─ event absent  → body = base64(AES-CBC(JSON(EncryptedPayload)))
//!        EncryptedPayload { body, time, id, event?: ContentEvent, prev?, effect? }
//! ```
//!
//! # Relative addressing
//!
//! There is no server, so every envelope names the conversation from the
//! sender's point of view: `from[0]` is the immediate sender, the rest are the
//! other participants except the recipient. See [`RelativeAddress`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod address;
pub mod envelope;
pub mod errors;
pub mod payload;

pub use address::{ConversationId, ParticipantId, RelativeAddress, fan_out, rotate_from};
pub use envelope::{Envelope, Handshake, HandshakeEvent, WireMessage};
pub use errors::{ProtocolError, Result};
pub use payload::{Attachment, ContentEvent, EncryptedPayload, Location, MessageId};
