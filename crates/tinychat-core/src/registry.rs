//! Conversation registry.
//!
//! Maps a canonical [`ConversationId`] to its participant list. Conversations
//! are created on the first local or remote event that names them and live for
//! the lifetime of the process.

use std::collections::BTreeMap;

use tinychat_proto::{ConversationId, ParticipantId, RelativeAddress};

use crate::error::SessionError;

/// One conversation as seen by the local peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    id: ConversationId,
    local: ParticipantId,
    /// Sorted, includes `local`
    participants: Vec<ParticipantId>,
}

impl ConversationRecord {
    /// Canonical identity.
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Every member including the local peer, in canonical order.
    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    /// Every member except the local peer, in canonical order.
    pub fn others(&self) -> Vec<ParticipantId> {
        self.participants.iter().filter(|id| **id != self.local).cloned().collect()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.binary_search(id).is_ok()
    }

    /// More than two members.
    pub fn is_group(&self) -> bool {
        self.participants.len() > 2
    }
}

/// All conversations known to the local peer.
#[derive(Debug, Clone)]
pub struct ConversationRegistry {
    local: ParticipantId,
    conversations: BTreeMap<ConversationId, ConversationRecord>,
}

impl ConversationRegistry {
    /// Empty registry for `local`.
    pub fn new(local: ParticipantId) -> Self {
        Self { local, conversations: BTreeMap::new() }
    }

    /// The local participant.
    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    /// Find or create the conversation over `participants` plus the local peer.
    ///
    /// Returns the record and whether it was created by this call. Fails if no
    /// participant other than the local peer is named.
    pub fn get_or_create<'a, I>(
        &mut self,
        participants: I,
    ) -> Result<(&ConversationRecord, bool), SessionError>
    where
        I: IntoIterator<Item = &'a ParticipantId>,
    {
        let mut members: Vec<ParticipantId> = participants
            .into_iter()
            .cloned()
            .chain(std::iter::once(self.local.clone()))
            .collect();
        members.sort_unstable();
        members.dedup();

        if members.len() < 2 {
            return Err(SessionError::InvalidConversation {
                reason: "a conversation needs at least one other participant".to_string(),
            });
        }

        let id = ConversationId::canonicalize(&members);
        let created = !self.conversations.contains_key(&id);
        let local = self.local.clone();
        let record = self.conversations.entry(id.clone()).or_insert_with(|| ConversationRecord {
            id,
            local,
            participants: members,
        });
        Ok((record, created))
    }

    /// Find or create the conversation an inbound envelope belongs to.
    ///
    /// An address that already names the local peer was not meant for us.
    pub fn resolve(
        &mut self,
        from: &RelativeAddress,
    ) -> Result<(&ConversationRecord, bool), SessionError> {
        if from.contains(&self.local) {
            return Err(SessionError::InvalidConversation {
                reason: format!("address {from} already names the local peer"),
            });
        }
        self.get_or_create(from.participants())
    }

    /// Look up an existing conversation.
    pub fn get(&self, id: &ConversationId) -> Option<&ConversationRecord> {
        self.conversations.get(id)
    }

    /// Iterate conversations in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationRecord> {
        self.conversations.values()
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// No conversations yet.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
