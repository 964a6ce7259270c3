//! Error types for the session layer.
//!
//! Every variant is recovered at the boundary of a single envelope or user
//! action. None of them poisons a conversation.

use std::time::Duration;

use thiserror::Error;
use tinychat_crypto::CryptoError;
use tinychat_proto::{ConversationId, MessageId, ParticipantId, ProtocolError};

/// Errors from key exchange and per-message processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Key material malformed or decryption failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Payload or handshake body could not be parsed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handshake message arrived in a state that does not expect it
    #[error("unexpected {event} from {peer}: {reason}")]
    Handshake {
        /// Handshake event name
        event: &'static str,
        /// Immediate sender
        peer: ParticipantId,
        /// Why it was dropped
        reason: String,
    },

    /// Edit or unsend from a party without rights over the message
    #[error("{peer} may not modify message {message}")]
    Authorization {
        /// Targeted message
        message: MessageId,
        /// Party that attempted the change
        peer: ParticipantId,
    },

    /// Referenced message id is not known locally
    #[error("unknown message reference {message}")]
    UnknownReference {
        /// Missing message id
        message: MessageId,
    },

    /// Handshake step abandoned after the configured timeout
    #[error("handshake with {peer} in {conversation} timed out after {elapsed:?}")]
    HandshakeTimeout {
        /// Conversation whose handshake stalled
        conversation: ConversationId,
        /// Peer that never answered
        peer: ParticipantId,
        /// How long we waited
        elapsed: Duration,
    },

    /// Key rotation in progress; content sends are held back
    #[error("sending disabled for {conversation} while the key rotates")]
    SendingDisabled {
        /// Rotating conversation
        conversation: ConversationId,
    },

    /// No session key established yet
    #[error("no session key for {conversation}")]
    NoSessionKey {
        /// Conversation without a key
        conversation: ConversationId,
    },

    /// Participant list does not form a valid conversation
    #[error("invalid conversation: {reason}")]
    InvalidConversation {
        /// What was wrong
        reason: String,
    },
}

impl SessionError {
    /// Returns true if the operation may succeed once a handshake completes.
    ///
    /// Crypto, protocol and authorization failures are never transient: the
    /// same input will fail the same way.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoSessionKey { .. } | Self::SendingDisabled { .. } | Self::HandshakeTimeout { .. }
        )
    }
}
