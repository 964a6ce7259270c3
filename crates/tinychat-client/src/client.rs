//! Client state machine.
//!
//! The `Client` ties the conversation registry, the session manager and one
//! [`ConversationLog`] per conversation together. Local user actions come in
//! as method calls (or [`ClientEvent`]s); envelopes from the wire come in
//! through [`Client::on_envelope`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use tinychat_core::{
    ConversationRecord, ConversationRegistry, EnvRng, Environment, LogLevel, SessionError,
    SessionManager,
};
use tinychat_crypto::{RsaIdentity, random_uuid};
use tinychat_proto::{
    Attachment, ContentEvent, ConversationId, EncryptedPayload, Envelope, Location, MessageId,
    ParticipantId, RelativeAddress, WireMessage, fan_out,
};

use crate::{
    config::ClientConfig,
    conversation::{ConversationLog, Direction, MessageKind, MessageRecord},
    engine::{MessageEngine, Outcome},
    error::ClientError,
    event::{ClearScope, ClientAction, ClientEvent},
};

/// Prefix stamped on the time of an edited message.
const EDITED_PREFIX: &str = "edited at ";

/// One local peer: every conversation it takes part in.
pub struct Client<E: Environment> {
    env: E,
    config: ClientConfig,
    registry: ConversationRegistry,
    session: SessionManager<E>,
    logs: BTreeMap<ConversationId, ConversationLog>,
}

impl<E: Environment> Client<E> {
    /// Create a client around an existing RSA identity.
    pub fn new(
        env: E,
        local: ParticipantId,
        identity: RsaIdentity,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let session =
            SessionManager::new(env.clone(), local.clone(), identity, config.session.clone())?;
        Ok(Self {
            env,
            config,
            registry: ConversationRegistry::new(local),
            session,
            logs: BTreeMap::new(),
        })
    }

    /// Create a client with a freshly generated RSA identity.
    pub fn generate(
        env: E,
        local: ParticipantId,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let session = SessionManager::generate(env.clone(), local.clone(), config.session.clone())?;
        Ok(Self {
            env,
            config,
            registry: ConversationRegistry::new(local),
            session,
            logs: BTreeMap::new(),
        })
    }

    /// The local participant.
    pub fn local(&self) -> &ParticipantId {
        self.registry.local()
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Key-exchange state, for inspection.
    pub fn session(&self) -> &SessionManager<E> {
        &self.session
    }

    /// Known conversations.
    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    /// Message log of `conversation`.
    pub fn conversation(&self, conversation: &ConversationId) -> Option<&ConversationLog> {
        self.logs.get(conversation)
    }

    /// Whether content can be sent to `conversation` right now.
    pub fn can_send(&self, conversation: &ConversationId) -> bool {
        self.session.can_send(conversation)
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::CreateConversation { participants } => {
                self.create_conversation(&participants).map(|(_, actions)| actions)
            },
            ClientEvent::SendMessage { conversation, body, reply_to } => {
                self.send_message(&conversation, body, reply_to).map(|(_, actions)| actions)
            },
            ClientEvent::SendFile { conversation, attachment, reply_to } => {
                self.send_file(&conversation, &attachment, reply_to).map(|(_, actions)| actions)
            },
            ClientEvent::SendLocation { conversation, location, reply_to } => {
                self.send_location(&conversation, &location, reply_to).map(|(_, actions)| actions)
            },
            ClientEvent::EditMessage { conversation, message, body } => {
                self.edit_message(&conversation, &message, body)
            },
            ClientEvent::UnsendMessage { conversation, message } => {
                self.unsend_message(&conversation, &message)
            },
            ClientEvent::SetTyping { conversation, typing } => {
                self.set_typing(&conversation, typing)
            },
            ClientEvent::SetTypingIndicators { conversation, enabled } => {
                self.set_typing_indicators(&conversation, enabled)
            },
            ClientEvent::RotateKey { conversation } => self.rotate_key(&conversation),
            ClientEvent::ClearConversation { conversation, scope } => {
                self.clear_conversation(&conversation, scope)
            },
            ClientEvent::EnvelopeReceived(bytes) => Ok(self.on_envelope(&bytes)),
            ClientEvent::Tick { now } => Ok(self.tick(now)),
        }
    }

    /// Open the conversation with `participants` and start its handshake.
    ///
    /// The local peer is added to the participant set. Reopening an existing
    /// conversation is allowed; the handshake is only started if no key is
    /// installed and none is in flight.
    pub fn create_conversation(
        &mut self,
        participants: &[ParticipantId],
    ) -> Result<(ConversationId, Vec<ClientAction>), ClientError> {
        let (record, created) = self.registry.get_or_create(participants)?;
        let record = record.clone();
        let conversation = record.id().clone();

        let mut actions = Vec::new();
        if created {
            actions.push(ClientAction::ConversationCreated { conversation: conversation.clone() });
        }
        self.log_mut(&conversation);

        actions.extend(self.session.initiate(&record)?.into_iter().map(ClientAction::from));
        Ok((conversation, actions))
    }

    /// Send a text message.
    pub fn send_message(
        &mut self,
        conversation: &ConversationId,
        body: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> Result<(MessageId, Vec<ClientAction>), ClientError> {
        self.send_content(conversation, MessageKind::Text, body.into(), reply_to)
    }

    /// Send a file.
    pub fn send_file(
        &mut self,
        conversation: &ConversationId,
        attachment: &Attachment,
        reply_to: Option<MessageId>,
    ) -> Result<(MessageId, Vec<ClientAction>), ClientError> {
        self.send_content(conversation, MessageKind::File, attachment.to_body()?, reply_to)
    }

    /// Share a location.
    pub fn send_location(
        &mut self,
        conversation: &ConversationId,
        location: &Location,
        reply_to: Option<MessageId>,
    ) -> Result<(MessageId, Vec<ClientAction>), ClientError> {
        self.send_content(conversation, MessageKind::Location, location.to_body()?, reply_to)
    }

    fn send_content(
        &mut self,
        conversation: &ConversationId,
        kind: MessageKind,
        body: String,
        reply_to: Option<MessageId>,
    ) -> Result<(MessageId, Vec<ClientAction>), ClientError> {
        let record = self.record(conversation)?;
        let known =
            |prev: &MessageId| self.logs.get(conversation).is_some_and(|log| log.contains(prev));
        if let Some(prev) = reply_to.as_ref().filter(|prev| !known(prev)) {
            return Err(ClientError::MessageNotFound {
                conversation: conversation.clone(),
                message: prev.clone(),
            });
        }

        let id = MessageId::new(random_uuid(&mut EnvRng::new(&self.env)));
        let time = self.timestamp();
        let payload =
            MessageEngine::content(kind, id.clone(), body.clone(), time.clone(), reply_to.clone());
        let mut actions = self.broadcast(&record, &payload)?;

        let author = self.local().clone();
        self.log_mut(conversation).push(MessageRecord {
            id: id.clone(),
            direction: Direction::Sent,
            author,
            kind,
            body,
            time,
            edited: false,
            acknowledged: false,
            delivered_to: BTreeSet::new(),
            reply_to,
            effect: None,
        });

        actions.push(ClientAction::MessageStored {
            conversation: conversation.clone(),
            message: id.clone(),
        });
        Ok((id, actions))
    }

    /// Replace the body of a message we sent.
    ///
    /// Only messages at least one recipient has acknowledged can be edited.
    pub fn edit_message(
        &mut self,
        conversation: &ConversationId,
        message: &MessageId,
        body: impl Into<String>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let record = self.record(conversation)?;
        let original = self.own_message(conversation, message)?;
        if !original.acknowledged {
            return Err(ClientError::NotDelivered { message: message.clone() });
        }

        let body = body.into();
        let time = format!("{EDITED_PREFIX}{}", self.timestamp());
        let payload = MessageEngine::edit(message.clone(), body.clone(), time.clone());
        let mut actions = self.broadcast(&record, &payload)?;

        if let Some(edited) = self.log_mut(conversation).get_mut(message) {
            edited.body = body;
            edited.time = time;
            edited.edited = true;
        }

        actions.push(ClientAction::ConversationUpdated { conversation: conversation.clone() });
        Ok(actions)
    }

    /// Retract a message we sent, locally and at every recipient.
    pub fn unsend_message(
        &mut self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let record = self.record(conversation)?;
        self.own_message(conversation, message)?;

        let mut actions = self.broadcast(&record, &MessageEngine::unsend(message.clone()))?;
        self.log_mut(conversation).remove(message);

        actions.push(ClientAction::ConversationUpdated { conversation: conversation.clone() });
        Ok(actions)
    }

    /// Tell the other participants we started or stopped typing.
    ///
    /// Does nothing if indicators are disabled for the conversation.
    pub fn set_typing(
        &mut self,
        conversation: &ConversationId,
        typing: bool,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let record = self.record(conversation)?;
        if !self.log_mut(conversation).sends_typing_indicators() {
            return Ok(Vec::new());
        }
        self.broadcast(&record, &MessageEngine::typing(typing))
    }

    /// Enable or disable outbound typing indicators for one conversation.
    pub fn set_typing_indicators(
        &mut self,
        conversation: &ConversationId,
        enabled: bool,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.record(conversation)?;
        self.log_mut(conversation).set_send_typing_indicators(enabled);
        Ok(Vec::new())
    }

    /// Discard the conversation key and establish a new one.
    pub fn rotate_key(
        &mut self,
        conversation: &ConversationId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let record = self.record(conversation)?;
        Ok(self.session.rotate(&record)?.into_iter().map(ClientAction::from).collect())
    }

    /// Clear the message log.
    ///
    /// [`ClearScope::Global`] first unsends every message we authored, which
    /// needs a usable key; on failure nothing is cleared.
    pub fn clear_conversation(
        &mut self,
        conversation: &ConversationId,
        scope: ClearScope,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let record = self.record(conversation)?;

        let mut actions = Vec::new();
        if scope == ClearScope::Global {
            let sent =
                self.logs.get(conversation).map(ConversationLog::sent_ids).unwrap_or_default();
            for id in sent {
                actions.extend(self.broadcast(&record, &MessageEngine::unsend(id))?);
            }
        }

        self.log_mut(conversation).clear();
        actions.push(ClientAction::ConversationUpdated { conversation: conversation.clone() });
        Ok(actions)
    }

    /// Apply one envelope received from the transport.
    ///
    /// Never fails: envelopes that cannot be applied produce a
    /// [`ClientAction::Rejected`] and leave all state unchanged.
    pub fn on_envelope(&mut self, bytes: &[u8]) -> Vec<ClientAction> {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                return rejected(None, ClientError::InvalidEnvelope { reason: e.to_string() });
            },
        };

        let conversation = envelope.from.conversation_id(self.local());
        match self.apply_envelope(&envelope) {
            Ok(actions) => actions,
            Err(error) => rejected(Some(conversation), error),
        }
    }

    /// Expire stalled handshakes.
    pub fn tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        self.session.tick(now).into_iter().map(ClientAction::from).collect()
    }

    fn apply_envelope(&mut self, envelope: &Envelope) -> Result<Vec<ClientAction>, ClientError> {
        match envelope.message()? {
            WireMessage::Handshake(handshake) => {
                let (record, created) = self.registry.resolve(&envelope.from)?;
                let record = record.clone();

                let mut actions = Vec::new();
                if created {
                    actions.push(ClientAction::ConversationCreated {
                        conversation: record.id().clone(),
                    });
                }
                self.log_mut(record.id());

                actions.extend(
                    self.session
                        .handle(&record, &envelope.from, handshake)?
                        .into_iter()
                        .map(ClientAction::from),
                );
                Ok(actions)
            },
            WireMessage::Content(ciphertext) => self.apply_content(&envelope.from, &ciphertext),
        }
    }

    fn apply_content(
        &mut self,
        from: &RelativeAddress,
        ciphertext: &str,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let local = self.local().clone();
        if from.contains(&local) {
            return Err(ClientError::InvalidEnvelope {
                reason: format!("address {from} already names the local peer"),
            });
        }

        let conversation = from.conversation_id(&local);
        self.record(&conversation)?;
        let payload = self.session.decrypt(&conversation, ciphertext)?;

        let author = from.origin().clone();
        let is_edit = payload.event == Some(ContentEvent::Edit);
        let id = payload.id.clone();
        let applied = MessageEngine::apply(self.log_mut(&conversation), &author, payload)?;

        let mut actions = Vec::new();
        match applied.outcome {
            Outcome::Added(message) => {
                actions.push(ClientAction::MessageStored {
                    conversation: conversation.clone(),
                    message,
                });
            },
            Outcome::Edited(_)
            | Outcome::Removed(_)
            | Outcome::Acknowledged(_)
            | Outcome::TypingChanged => {
                actions
                    .push(ClientAction::ConversationUpdated { conversation: conversation.clone() });
            },
            Outcome::Unchanged => {},
        }

        if let Some(missing) = applied.unresolved {
            actions.push(ClientAction::Log {
                level: LogLevel::Debug,
                message: format!("{author} referenced unknown message {missing} in {conversation}"),
            });
        }

        if applied.ack && (!is_edit || self.config.ack_edits) {
            let receipt = MessageEngine::delivered(id, self.timestamp());
            match self.session.encrypt(&conversation, &receipt) {
                Ok(ciphertext) => actions.push(ClientAction::Send {
                    to: author,
                    envelope: Envelope::content(from.reply_from(&local), ciphertext),
                }),
                Err(e) => actions.push(ClientAction::Log {
                    level: LogLevel::Warn,
                    message: format!("could not acknowledge {author} in {conversation}: {e}"),
                }),
            }
        }

        Ok(actions)
    }

    /// Encrypt once and address a copy to every other participant.
    fn broadcast(
        &self,
        record: &ConversationRecord,
        payload: &EncryptedPayload,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let ciphertext = self.session.encrypt(record.id(), payload)?;
        Ok(fan_out(self.local(), &record.others())
            .into_iter()
            .map(|(to, from)| ClientAction::Send {
                to,
                envelope: Envelope::content(from, ciphertext.clone()),
            })
            .collect())
    }

    fn record(&self, conversation: &ConversationId) -> Result<ConversationRecord, ClientError> {
        self.registry
            .get(conversation)
            .cloned()
            .ok_or_else(|| ClientError::ConversationNotFound { conversation: conversation.clone() })
    }

    /// A message we authored, or why it cannot be modified.
    fn own_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> Result<&MessageRecord, ClientError> {
        let log = self.logs.get(conversation).ok_or_else(|| ClientError::MessageNotFound {
            conversation: conversation.clone(),
            message: message.clone(),
        })?;

        match MessageEngine::authorize(log, message, self.local(), Direction::Sent) {
            Ok(record) => Ok(record),
            Err(SessionError::UnknownReference { .. }) => Err(ClientError::MessageNotFound {
                conversation: conversation.clone(),
                message: message.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn log_mut(&mut self, conversation: &ConversationId) -> &mut ConversationLog {
        let send_typing = self.config.send_typing_indicators;
        self.logs.entry(conversation.clone()).or_insert_with(|| ConversationLog::new(send_typing))
    }

    /// Wall-clock `HH:MM:SS` in UTC.
    fn timestamp(&self) -> String {
        format_time(self.env.wall_clock_millis())
    }
}

fn format_time(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn rejected(conversation: Option<ConversationId>, error: ClientError) -> Vec<ClientAction> {
    vec![
        ClientAction::Log { level: LogLevel::Warn, message: format!("dropped envelope: {error}") },
        ClientAction::Rejected { conversation, error },
    ]
}

impl<E: Environment> std::fmt::Debug for Client<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("local", self.local())
            .field("conversations", &self.registry.len())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
