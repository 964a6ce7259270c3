//! Client error types

use thiserror::Error;
use tinychat_core::SessionError;
use tinychat_crypto::CryptoError;
use tinychat_proto::{ConversationId, MessageId, ProtocolError};

/// Client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Key exchange or message processing failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Wire data could not be parsed or built
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Conversation is not known locally
    #[error("conversation not found: {conversation}")]
    ConversationNotFound {
        /// Requested conversation
        conversation: ConversationId,
    },

    /// Message is not in the conversation log
    #[error("message {message} not found in {conversation}")]
    MessageNotFound {
        /// Conversation searched
        conversation: ConversationId,
        /// Missing message
        message: MessageId,
    },

    /// Only acknowledged messages may be edited
    #[error("message {message} has not been delivered yet")]
    NotDelivered {
        /// Message awaiting acknowledgement
        message: MessageId,
    },

    /// Envelope bytes could not be decoded
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope {
        /// Decoder detail
        reason: String,
    },
}

impl From<CryptoError> for ClientError {
    fn from(err: CryptoError) -> Self {
        Self::Session(SessionError::Crypto(err))
    }
}

impl ClientError {
    /// Returns true if the operation may succeed once a handshake completes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Session(e) if e.is_transient())
    }
}
