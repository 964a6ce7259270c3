//! Client events and actions.
//!
//! The client is a pure state machine: events in, actions out.

use std::time::Duration;

use tinychat_core::{LogLevel, SessionAction};
use tinychat_proto::{
    Attachment, ConversationId, Envelope, Location, MessageId, ParticipantId,
};

use crate::error::ClientError;

/// Events that drive the client state machine.
#[derive(Debug, Clone)]
pub enum ClientEvent<I> {
    /// Create (or reopen) a conversation and start its handshake.
    CreateConversation {
        /// Remote participants; the local peer is added automatically.
        participants: Vec<ParticipantId>,
    },

    /// Send a text message.
    SendMessage {
        /// Target conversation.
        conversation: ConversationId,
        /// Message text.
        body: String,
        /// Message being replied to.
        reply_to: Option<MessageId>,
    },

    /// Send a file.
    SendFile {
        /// Target conversation.
        conversation: ConversationId,
        /// File contents and metadata.
        attachment: Attachment,
        /// Message being replied to.
        reply_to: Option<MessageId>,
    },

    /// Share a location.
    SendLocation {
        /// Target conversation.
        conversation: ConversationId,
        /// Coordinates.
        location: Location,
        /// Message being replied to.
        reply_to: Option<MessageId>,
    },

    /// Replace the body of a message we sent.
    EditMessage {
        /// Conversation holding the message.
        conversation: ConversationId,
        /// Message to edit.
        message: MessageId,
        /// New text.
        body: String,
    },

    /// Retract a message we sent.
    UnsendMessage {
        /// Conversation holding the message.
        conversation: ConversationId,
        /// Message to retract.
        message: MessageId,
    },

    /// Local user started or stopped composing.
    SetTyping {
        /// Conversation being typed in.
        conversation: ConversationId,
        /// Whether the user is typing.
        typing: bool,
    },

    /// Enable or disable outbound typing indicators for one conversation.
    SetTypingIndicators {
        /// Conversation to configure.
        conversation: ConversationId,
        /// Whether to send indicators.
        enabled: bool,
    },

    /// Generate a new session key and redistribute it.
    RotateKey {
        /// Conversation to re-key.
        conversation: ConversationId,
    },

    /// Clear the message log.
    ClearConversation {
        /// Conversation to clear.
        conversation: ConversationId,
        /// Local only, or retract our messages everywhere.
        scope: ClearScope,
    },

    /// Raw envelope bytes from the transport.
    EnvelopeReceived(Vec<u8>),

    /// Periodic tick for handshake timeouts.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// How far a clear reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    /// Drop the local log only.
    Local,
    /// Unsend every message we authored, then drop the local log.
    Global,
}

/// Actions produced by the client state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Transmit an envelope to a peer.
    Send {
        /// Recipient.
        to: ParticipantId,
        /// Envelope to encode and send.
        envelope: Envelope,
    },

    /// A session key is now installed for the conversation.
    KeyEstablished {
        /// Conversation that can now send.
        conversation: ConversationId,
    },

    /// A handshake step was abandoned.
    HandshakeTimedOut {
        /// Conversation whose handshake stalled.
        conversation: ConversationId,
        /// Peer that never answered.
        peer: ParticipantId,
        /// How long we waited.
        elapsed: Duration,
    },

    /// A conversation was added to the registry.
    ConversationCreated {
        /// New conversation.
        conversation: ConversationId,
    },

    /// A message was added to a conversation log.
    MessageStored {
        /// Conversation holding the message.
        conversation: ConversationId,
        /// New message.
        message: MessageId,
    },

    /// A conversation's visible state changed (edit, unsend, receipt, typing).
    ConversationUpdated {
        /// Changed conversation.
        conversation: ConversationId,
    },

    /// An inbound envelope was dropped.
    Rejected {
        /// Conversation it belonged to, if it could be determined.
        conversation: Option<ConversationId>,
        /// Why it was dropped.
        error: ClientError,
    },

    /// Log message for debugging.
    Log {
        /// Severity.
        level: LogLevel,
        /// Log message.
        message: String,
    },
}

impl From<SessionAction> for ClientAction {
    fn from(action: SessionAction) -> Self {
        match action {
            SessionAction::Send { to, envelope } => Self::Send { to, envelope },
            SessionAction::KeyEstablished { conversation } => Self::KeyEstablished { conversation },
            SessionAction::HandshakeTimedOut { conversation, peer, elapsed } => {
                Self::HandshakeTimedOut { conversation, peer, elapsed }
            },
            SessionAction::Log { level, message } => Self::Log { level, message },
        }
    }
}
