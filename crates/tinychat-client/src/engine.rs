//! Message event application.
//!
//! Classifies decrypted payloads and applies them to a [`ConversationLog`].
//! Stateless with respect to crypto: the caller decrypts before calling
//! [`MessageEngine::apply`] and encrypts whatever it builds here.
//!
//! # Rules
//!
//! | Event        | Effect                                                | Acked |
//! |--------------|-------------------------------------------------------|-------|
//! | `Typing`     | show indicator; identical repeat is a no-op           | no    |
//! | `StopTyping` | clear indicator                                       | no    |
//! | `Delivered`  | mark our message acknowledged by the sender           | no    |
//! | `Edit`       | replace body if the sender authored the original      | yes   |
//! | `Unsend`     | remove message if the sender authored the original    | no    |
//! | `File`, `Location`, plain | record once, resolve `prev`              | yes   |
//!
//! Every event other than `Typing` clears the sender's typing indicator.

use std::collections::BTreeSet;

use tinychat_core::SessionError;
use tinychat_proto::{
    Attachment, ContentEvent, EncryptedPayload, Location, MessageId, ParticipantId,
};

use crate::conversation::{ConversationLog, Direction, MessageKind, MessageRecord};

/// Observable effect of applying one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// New message recorded
    Added(MessageId),
    /// Existing message body replaced
    Edited(MessageId),
    /// Message removed
    Removed(MessageId),
    /// Our message gained an acknowledgement
    Acknowledged(MessageId),
    /// A typing indicator appeared, changed or disappeared
    TypingChanged,
    /// Nothing visible changed
    Unchanged,
}

/// Result of [`MessageEngine::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// What changed
    pub outcome: Outcome,
    /// Whether the receiver owes the sender a `Delivered`
    pub ack: bool,
    /// Referenced id that was not found; the event was applied without it
    pub unresolved: Option<MessageId>,
}

impl Applied {
    fn new(outcome: Outcome) -> Self {
        Self { outcome, ack: false, unresolved: None }
    }

    fn unresolved(mut self, id: Option<MessageId>) -> Self {
        self.unresolved = id;
        self
    }
}

/// Applies content events to conversation logs and builds outbound payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageEngine;

impl MessageEngine {
    /// Apply a payload received from `author`.
    ///
    /// Fails with [`SessionError::Authorization`] or
    /// [`SessionError::UnknownReference`] for edits and unsends that may not
    /// be applied, and with [`SessionError::Protocol`] for malformed file or
    /// location bodies. The log is unchanged on error.
    pub fn apply(
        log: &mut ConversationLog,
        author: &ParticipantId,
        payload: EncryptedPayload,
    ) -> Result<Applied, SessionError> {
        let ack = payload.event.is_none_or(ContentEvent::is_acknowledged);
        let applied = match payload.event {
            Some(ContentEvent::Typing) => {
                Applied::new(typing_outcome(log.set_typing(author, &payload.body)))
            },
            Some(ContentEvent::StopTyping) => {
                Applied::new(typing_outcome(log.clear_typing(author)))
            },
            Some(ContentEvent::Delivered) => Self::apply_delivered(log, author, payload.id),
            Some(ContentEvent::Edit) => Self::apply_edit(log, author, payload)?,
            Some(ContentEvent::Unsend) => Self::apply_unsend(log, author, &payload.id)?,
            Some(ContentEvent::File | ContentEvent::Location) | None => {
                Self::apply_content(log, author, payload)?
            },
        };
        Ok(Applied { ack, ..applied })
    }

    /// Check that `author` may modify message `id`.
    ///
    /// The original must exist, have been authored in `direction` relative to
    /// the local peer, and come from `author`.
    pub fn authorize<'a>(
        log: &'a ConversationLog,
        id: &MessageId,
        author: &ParticipantId,
        direction: Direction,
    ) -> Result<&'a MessageRecord, SessionError> {
        let original =
            log.get(id).ok_or_else(|| SessionError::UnknownReference { message: id.clone() })?;

        if original.direction != direction || original.author != *author {
            return Err(SessionError::Authorization { message: id.clone(), peer: author.clone() });
        }
        Ok(original)
    }

    fn apply_delivered(
        log: &mut ConversationLog,
        author: &ParticipantId,
        id: MessageId,
    ) -> Applied {
        let typing = log.clear_typing(author);

        let Some(message) = log.get_mut(&id).filter(|m| m.direction == Direction::Sent) else {
            return Applied::new(typing_outcome(typing)).unresolved(Some(id));
        };

        let newly = message.delivered_to.insert(author.clone());
        let first = !message.acknowledged;
        message.acknowledged = true;

        let outcome =
            if newly || first { Outcome::Acknowledged(id) } else { typing_outcome(typing) };
        Applied::new(outcome)
    }

    fn apply_edit(
        log: &mut ConversationLog,
        author: &ParticipantId,
        payload: EncryptedPayload,
    ) -> Result<Applied, SessionError> {
        Self::authorize(log, &payload.id, author, Direction::Received)?;
        log.clear_typing(author);

        let Some(message) = log.get_mut(&payload.id) else {
            return Err(SessionError::UnknownReference { message: payload.id });
        };

        let changed =
            !message.edited || message.body != payload.body || message.time != payload.time;
        message.body = payload.body;
        message.time = payload.time;
        message.edited = true;

        let outcome = if changed { Outcome::Edited(payload.id) } else { Outcome::Unchanged };
        Ok(Applied::new(outcome))
    }

    fn apply_unsend(
        log: &mut ConversationLog,
        author: &ParticipantId,
        id: &MessageId,
    ) -> Result<Applied, SessionError> {
        // Already gone: replays are no-ops
        if !log.contains(id) {
            return Ok(Applied::new(typing_outcome(log.clear_typing(author))));
        }

        Self::authorize(log, id, author, Direction::Received)?;
        log.clear_typing(author);
        log.remove(id);
        Ok(Applied::new(Outcome::Removed(id.clone())))
    }

    fn apply_content(
        log: &mut ConversationLog,
        author: &ParticipantId,
        payload: EncryptedPayload,
    ) -> Result<Applied, SessionError> {
        let kind = match payload.event {
            Some(ContentEvent::File) => {
                Attachment::from_body(&payload.body)?;
                MessageKind::File
            },
            Some(ContentEvent::Location) => {
                Location::from_body(&payload.body)?;
                MessageKind::Location
            },
            _ => MessageKind::Text,
        };

        // Duplicate delivery: re-ack, never re-record
        if log.contains(&payload.id) {
            Self::authorize(log, &payload.id, author, Direction::Received)?;
            let typing = log.clear_typing(author);
            return Ok(Applied::new(typing_outcome(typing)));
        }

        log.clear_typing(author);

        let (reply_to, unresolved) = match payload.prev {
            Some(prev) if log.contains(&prev) => (Some(prev), None),
            Some(prev) => (None, Some(prev)),
            None => (None, None),
        };

        let id = payload.id;
        log.push(MessageRecord {
            id: id.clone(),
            direction: Direction::Received,
            author: author.clone(),
            kind,
            body: payload.body,
            time: payload.time,
            edited: false,
            acknowledged: false,
            delivered_to: BTreeSet::new(),
            reply_to,
            effect: payload.effect,
        });

        Ok(Applied::new(Outcome::Added(id)).unresolved(unresolved))
    }

    /// Payload for a new text, file or location message.
    pub fn content(
        kind: MessageKind,
        id: MessageId,
        body: String,
        time: String,
        reply_to: Option<MessageId>,
    ) -> EncryptedPayload {
        let payload = match kind {
            MessageKind::Text => EncryptedPayload::text(id, body, time),
            MessageKind::File => EncryptedPayload::event(ContentEvent::File, id, body, time),
            MessageKind::Location => {
                EncryptedPayload::event(ContentEvent::Location, id, body, time)
            },
        };
        payload.with_prev(reply_to)
    }

    /// Payload replacing the body of message `id`.
    pub fn edit(id: MessageId, body: String, time: String) -> EncryptedPayload {
        EncryptedPayload::event(ContentEvent::Edit, id, body, time)
    }

    /// Payload retracting message `id`.
    pub fn unsend(id: MessageId) -> EncryptedPayload {
        EncryptedPayload::event(ContentEvent::Unsend, id, "", "")
    }

    /// Acknowledgement of message `id`.
    pub fn delivered(id: MessageId, time: String) -> EncryptedPayload {
        EncryptedPayload::event(ContentEvent::Delivered, id, "", time)
    }

    /// Typing or stop-typing indicator.
    pub fn typing(typing: bool) -> EncryptedPayload {
        let event = if typing { ContentEvent::Typing } else { ContentEvent::StopTyping };
        EncryptedPayload::event(event, MessageId::new(""), "", "")
    }
}

fn typing_outcome(changed: bool) -> Outcome {
    if changed { Outcome::TypingChanged } else { Outcome::Unchanged }
}
