//! Participant identities, conversation identities and relative addressing.
//!
//! A conversation is identified by its participant set, never by who created
//! it. On the wire each envelope carries a [`RelativeAddress`]: the sender
//! first, then everyone else except the recipient. The recipient rebuilds the
//! full set by adding itself, so the same [`ConversationId`] falls out on every
//! peer regardless of hop.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

const SEPARATOR: char = ',';

/// Globally unique peer identifier assigned by the signaling layer.
///
/// Never empty and never contains `,`, which separates ids on the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validate and wrap an id. Surrounding whitespace is trimmed.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();

        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidParticipant { id, reason: "empty" });
        }
        if trimmed.contains(SEPARATOR) {
            return Err(ProtocolError::InvalidParticipant { id, reason: "contains ','" });
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ParticipantId {
    type Error = ProtocolError;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

/// Canonical conversation identity: sorted, deduplicated, comma-joined ids.
///
/// Any permutation of the same participant set yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Canonicalize a participant set.
    pub fn canonicalize<'a, I>(participants: I) -> Self
    where
        I: IntoIterator<Item = &'a ParticipantId>,
    {
        let mut ids: Vec<&str> = participants.into_iter().map(ParticipantId::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids.join(","))
    }

    /// Parse any comma-separated participant list and canonicalize it.
    pub fn parse(s: &str) -> Result<Self> {
        let ids = s.split(SEPARATOR).map(ParticipantId::new).collect::<Result<Vec<_>>>()?;
        Ok(Self::canonicalize(&ids))
    }

    /// Participants in canonical order.
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.0.split(SEPARATOR).map(|id| ParticipantId(id.to_string())).collect()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.0.split(SEPARATOR).any(|member| member == id.as_str())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConversationId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

/// The `from` field of an envelope.
///
/// Position 0 is the immediate sender; positions 1.. are the remaining
/// participants other than the recipient. Never empty, never repeats an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativeAddress(Vec<ParticipantId>);

impl RelativeAddress {
    /// Build from an ordered list, sender first.
    pub fn new(participants: Vec<ParticipantId>) -> Result<Self> {
        if participants.is_empty() {
            return Err(ProtocolError::InvalidAddress {
                address: String::new(),
                reason: "no sender",
            });
        }

        for (i, id) in participants.iter().enumerate() {
            if participants[..i].contains(id) {
                return Err(ProtocolError::InvalidAddress {
                    address: join(&participants),
                    reason: "duplicate participant",
                });
            }
        }

        Ok(Self(participants))
    }

    /// Parse the comma-separated wire form.
    pub fn parse(s: &str) -> Result<Self> {
        let ids = s.split(SEPARATOR).map(ParticipantId::new).collect::<Result<Vec<_>>>()?;
        Self::new(ids)
    }

    /// The immediate sender (`from[0]`).
    pub fn origin(&self) -> &ParticipantId {
        // Non-empty by construction
        &self.0[0]
    }

    /// Everyone after the sender.
    pub fn others(&self) -> &[ParticipantId] {
        &self.0[1..]
    }

    /// All listed participants in wire order.
    pub fn participants(&self) -> &[ParticipantId] {
        &self.0
    }

    /// Whether `id` is listed.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.0.contains(id)
    }

    /// Conversation this address belongs to, as seen by recipient `local`.
    pub fn conversation_id(&self, local: &ParticipantId) -> ConversationId {
        ConversationId::canonicalize(self.0.iter().chain(std::iter::once(local)))
    }

    /// Address for a reply from `local` back to [`Self::origin`].
    ///
    /// The sender slot is overwritten with `local`; the remaining positions
    /// already exclude both hops, so the reply names the same conversation.
    pub fn reply_from(&self, local: &ParticipantId) -> Self {
        let mut ids = self.0.clone();
        ids[0] = local.clone();
        Self(ids)
    }

    /// Number of participants excluding the recipient.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RelativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.0))
    }
}

impl FromStr for RelativeAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RelativeAddress {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<RelativeAddress> for String {
    fn from(address: RelativeAddress) -> Self {
        join(&address.0)
    }
}

fn join(ids: &[ParticipantId]) -> String {
    ids.iter().map(ParticipantId::as_str).collect::<Vec<_>>().join(",")
}

/// Address the `hop_index`-th member of `others` from `local`.
///
/// Returns the recipient and the `from` list to put on its envelope: `local`
/// first, then `others` with the recipient removed. `None` if `hop_index` is
/// out of range or the list names `local` itself.
pub fn rotate_from(
    local: &ParticipantId,
    others: &[ParticipantId],
    hop_index: usize,
) -> Option<(ParticipantId, RelativeAddress)> {
    let recipient = others.get(hop_index)?.clone();
    if &recipient == local {
        return None;
    }

    let mut ids = Vec::with_capacity(others.len());
    ids.push(local.clone());
    ids.extend(others.iter().filter(|id| **id != recipient && *id != local).cloned());

    RelativeAddress::new(ids).ok().map(|address| (recipient, address))
}

/// One `(recipient, from)` pair per member of `others`.
pub fn fan_out(
    local: &ParticipantId,
    others: &[ParticipantId],
) -> Vec<(ParticipantId, RelativeAddress)> {
    (0..others.len()).filter_map(|hop| rotate_from(local, others, hop)).collect()
}
