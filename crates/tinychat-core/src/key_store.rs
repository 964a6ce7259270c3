//! Per-conversation key material.
//!
//! Holds the active [`SessionKeyMaterial`] for each conversation and the
//! ephemeral ECDH keypairs of handshakes still waiting for the peer's
//! `AESKeyShare`. Owned by the [`SessionManager`](crate::SessionManager); no
//! other component mutates it.

use std::{collections::HashMap, fmt, ops::Sub, time::Duration};

use tinychat_crypto::{EphemeralKeypair, SessionKeyMaterial};
use tinychat_proto::{ConversationId, ParticipantId};

/// Ephemeral keypair waiting for a counterparty's contribution.
struct EphemeralExchange<I> {
    keypair: EphemeralKeypair,
    created_at: I,
}

/// Session keys and in-flight ephemeral state.
pub struct KeyStore<I> {
    keys: HashMap<ConversationId, SessionKeyMaterial>,
    ephemerals: HashMap<(ConversationId, ParticipantId), EphemeralExchange<I>>,
}

impl<I> KeyStore<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Empty store.
    pub fn new() -> Self {
        Self { keys: HashMap::new(), ephemerals: HashMap::new() }
    }

    /// Active key for `conversation`.
    pub fn session_key(&self, conversation: &ConversationId) -> Option<&SessionKeyMaterial> {
        self.keys.get(conversation)
    }

    /// Install a key, atomically replacing any previous one.
    pub fn set_session_key(
        &mut self,
        conversation: ConversationId,
        material: SessionKeyMaterial,
    ) -> Option<SessionKeyMaterial> {
        self.keys.insert(conversation, material)
    }

    /// Discard the key for `conversation`.
    pub fn remove_session_key(
        &mut self,
        conversation: &ConversationId,
    ) -> Option<SessionKeyMaterial> {
        self.keys.remove(conversation)
    }

    /// Ephemeral keypair in flight with `peer`.
    pub fn ephemeral(
        &self,
        conversation: &ConversationId,
        peer: &ParticipantId,
    ) -> Option<&EphemeralKeypair> {
        self.ephemerals.get(&(conversation.clone(), peer.clone())).map(|e| &e.keypair)
    }

    /// Existing ephemeral keypair with `peer`, or a new one from `generate`.
    pub fn ephemeral_or_insert_with(
        &mut self,
        conversation: &ConversationId,
        peer: &ParticipantId,
        now: I,
        generate: impl FnOnce() -> EphemeralKeypair,
    ) -> &EphemeralKeypair {
        &self
            .ephemerals
            .entry((conversation.clone(), peer.clone()))
            .or_insert_with(|| EphemeralExchange { keypair: generate(), created_at: now })
            .keypair
    }

    /// Remove and return the ephemeral keypair with `peer`.
    pub fn take_ephemeral(
        &mut self,
        conversation: &ConversationId,
        peer: &ParticipantId,
    ) -> Option<EphemeralKeypair> {
        self.ephemerals.remove(&(conversation.clone(), peer.clone())).map(|e| e.keypair)
    }

    /// Whether any handshake with `conversation` is holding an ephemeral.
    pub fn has_ephemerals(&self, conversation: &ConversationId) -> bool {
        self.ephemerals.keys().any(|(c, _)| c == conversation)
    }

    /// Drop ephemerals older than `timeout`, returning whose they were.
    pub fn expire_ephemerals(
        &mut self,
        now: I,
        timeout: Duration,
    ) -> Vec<(ConversationId, ParticipantId, Duration)> {
        let mut expired: Vec<_> = self
            .ephemerals
            .iter()
            .filter(|(_, e)| now - e.created_at >= timeout)
            .map(|((c, p), e)| (c.clone(), p.clone(), now - e.created_at))
            .collect();
        expired.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        for (conversation, peer, _) in &expired {
            self.ephemerals.remove(&(conversation.clone(), peer.clone()));
        }
        expired
    }

    /// Drop every ephemeral for `conversation`.
    pub fn clear_ephemerals(&mut self, conversation: &ConversationId) {
        self.ephemerals.retain(|(c, _), _| c != conversation);
    }

    /// Number of conversations with an active key.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Number of handshakes holding an ephemeral keypair.
    pub fn ephemeral_count(&self) -> usize {
        self.ephemerals.len()
    }
}

impl<I> Default for KeyStore<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I> fmt::Debug for KeyStore<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("keys", &self.keys.len())
            .field("ephemerals", &self.ephemerals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;
    use tinychat_crypto::generate_symmetric_key;

    use super::*;

    fn conversation() -> ConversationId {
        ConversationId::parse("alice,bob").unwrap()
    }

    fn bob() -> ParticipantId {
        ParticipantId::new("bob").unwrap()
    }

    #[test]
    fn set_key_replaces_previous() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let mut store = KeyStore::<Duration>::new();
        let first = generate_symmetric_key(&mut rng);
        let second = generate_symmetric_key(&mut rng);

        assert!(store.set_session_key(conversation(), first.clone()).is_none());
        assert_eq!(store.set_session_key(conversation(), second.clone()), Some(first));
        assert_eq!(store.session_key(&conversation()), Some(&second));
        assert_eq!(store.key_count(), 1);
    }

    #[test]
    fn ephemeral_is_reused_until_taken() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let mut store = KeyStore::<Duration>::new();

        let first = store
            .ephemeral_or_insert_with(&conversation(), &bob(), Duration::ZERO, || {
                EphemeralKeypair::generate(&mut rng)
            })
            .public_key_bytes();
        let again = store
            .ephemeral_or_insert_with(&conversation(), &bob(), Duration::from_secs(1), || {
                EphemeralKeypair::generate(&mut rng)
            })
            .public_key_bytes();
        assert_eq!(first, again);

        let taken = store.take_ephemeral(&conversation(), &bob()).unwrap();
        assert_eq!(taken.public_key_bytes(), first);
        assert!(store.ephemeral(&conversation(), &bob()).is_none());
    }

    #[test]
    fn expire_drops_only_old_ephemerals() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let mut store = KeyStore::<Duration>::new();
        let carol = ParticipantId::new("carol").unwrap();

        store.ephemeral_or_insert_with(&conversation(), &bob(), Duration::ZERO, || {
            EphemeralKeypair::generate(&mut rng)
        });
        store.ephemeral_or_insert_with(&conversation(), &carol, Duration::from_secs(20), || {
            EphemeralKeypair::generate(&mut rng)
        });

        let expired = store.expire_ephemerals(Duration::from_secs(30), Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1, bob());
        assert_eq!(store.ephemeral_count(), 1);
        assert!(store.has_ephemerals(&conversation()));
    }
}
