//! Per-conversation view model.
//!
//! The log is what a renderer draws: messages in arrival order plus the
//! typing indicators currently showing. The [`MessageEngine`] is the only
//! thing that mutates it for inbound events.
//!
//! [`MessageEngine`]: crate::MessageEngine

use std::collections::BTreeSet;

use tinychat_proto::{Attachment, Location, MessageId, ParticipantId, ProtocolError};

/// Who authored a message relative to the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Authored locally
    Sent,
    /// Authored by a remote participant
    Received,
}

/// What a message body holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text
    Text,
    /// JSON [`Attachment`]
    File,
    /// JSON [`Location`]
    Location,
}

/// One message in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Message id, unique within the conversation
    pub id: MessageId,
    /// Sent or received
    pub direction: Direction,
    /// Originating participant (`from[0]` of the envelope that carried it)
    pub author: ParticipantId,
    /// Body interpretation
    pub kind: MessageKind,
    /// Text, or JSON for files and locations
    pub body: String,
    /// Author's timestamp, prefixed with `edited at ` after an edit
    pub time: String,
    /// Whether the body has been replaced
    pub edited: bool,
    /// Whether at least one recipient acknowledged the message
    pub acknowledged: bool,
    /// Recipients that acknowledged the message
    pub delivered_to: BTreeSet<ParticipantId>,
    /// Message this one replies to, if it is still in the log
    pub reply_to: Option<MessageId>,
    /// Presentation effect requested by the author
    pub effect: Option<String>,
}

impl MessageRecord {
    /// Decoded attachment for [`MessageKind::File`] messages.
    pub fn attachment(&self) -> Option<Result<Attachment, ProtocolError>> {
        (self.kind == MessageKind::File).then(|| Attachment::from_body(&self.body))
    }

    /// Decoded coordinates for [`MessageKind::Location`] messages.
    pub fn location(&self) -> Option<Result<Location, ProtocolError>> {
        (self.kind == MessageKind::Location).then(|| Location::from_body(&self.body))
    }
}

/// A remote participant's visible typing indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    /// Who is typing
    pub author: ParticipantId,
    /// Indicator content
    pub body: String,
}

/// Messages and typing indicators of one conversation.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    messages: Vec<MessageRecord>,
    typing: Vec<TypingIndicator>,
    send_typing_indicators: bool,
}

impl ConversationLog {
    /// Empty log.
    pub fn new(send_typing_indicators: bool) -> Self {
        Self { messages: Vec::new(), typing: Vec::new(), send_typing_indicators }
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    /// Typing indicators, most recent last.
    pub fn typing(&self) -> &[TypingIndicator] {
        &self.typing
    }

    /// Indicator currently shown for `author`.
    pub fn typing_from(&self, author: &ParticipantId) -> Option<&TypingIndicator> {
        self.typing.iter().rev().find(|t| t.author == *author)
    }

    /// Whether outbound typing indicators are sent for this conversation.
    pub fn sends_typing_indicators(&self) -> bool {
        self.send_typing_indicators
    }

    /// Enable or disable outbound typing indicators.
    pub fn set_send_typing_indicators(&mut self, enabled: bool) {
        self.send_typing_indicators = enabled;
    }

    /// Message by id.
    pub fn get(&self, id: &MessageId) -> Option<&MessageRecord> {
        self.messages.iter().find(|m| m.id == *id)
    }

    pub(crate) fn get_mut(&mut self, id: &MessageId) -> Option<&mut MessageRecord> {
        self.messages.iter_mut().find(|m| m.id == *id)
    }

    /// Whether a message with `id` exists.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn push(&mut self, record: MessageRecord) {
        self.messages.push(record);
    }

    /// Remove a message and every reply link pointing at it.
    pub(crate) fn remove(&mut self, id: &MessageId) -> Option<MessageRecord> {
        let index = self.messages.iter().position(|m| m.id == *id)?;
        let removed = self.messages.remove(index);

        for message in &mut self.messages {
            if message.reply_to.as_ref() == Some(id) {
                message.reply_to = None;
            }
        }
        Some(removed)
    }

    /// Show `body` as `author`'s indicator. Returns false if already showing.
    pub(crate) fn set_typing(&mut self, author: &ParticipantId, body: &str) -> bool {
        if self.typing_from(author).is_some_and(|t| t.body == body) {
            return false;
        }
        self.typing.retain(|t| t.author != *author);
        self.typing.push(TypingIndicator { author: author.clone(), body: body.to_string() });
        true
    }

    /// Clear `author`'s indicator. Returns false if none was showing.
    pub(crate) fn clear_typing(&mut self, author: &ParticipantId) -> bool {
        let before = self.typing.len();
        self.typing.retain(|t| t.author != *author);
        self.typing.len() != before
    }

    /// Drop every message and indicator; settings are kept.
    pub(crate) fn clear(&mut self) {
        self.messages.clear();
        self.typing.clear();
    }

    /// Ids of messages authored locally.
    pub fn sent_ids(&self) -> Vec<MessageId> {
        self.messages
            .iter()
            .filter(|m| m.direction == Direction::Sent)
            .map(|m| m.id.clone())
            .collect()
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(true)
    }
}
