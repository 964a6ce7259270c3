//! Session key-exchange state machine.
//!
//! Establishes one shared AES key per conversation without a server. Uses the
//! action pattern: methods take decoded handshake messages and return
//! [`SessionAction`]s for the driver to execute.
//!
//! # Pairwise handshake
//!
//! ```text
//! Initiator (key holder)                      Responder
//!   │ RSAKeyShare(rsa_pub_I)                      │
//!   │────────────────────────────────────────────>│ gen ephemeral e_R
//!   │        DHKeyShare(rsa_pub_R, RSA_I(e_R.pub))│
//!   │<────────────────────────────────────────────│
//!   │ gen key K (if none), gen ephemeral e_I      │
//!   │ S = ECDH(e_I, e_R.pub)                      │
//!   │ AESKeyShare(RSA_R(e_I.pub), RSA_R(iv‖K⊕S))  │
//!   │────────────────────────────────────────────>│ S = ECDH(e_R, e_I.pub)
//!   │                                             │ K = (K⊕S)⊕S
//! ```
//!
//! # Group fan-out
//!
//! Once the initiator generates a fresh key with its first peer, it sends
//! `GroupRSAKeyRequest` to every other member. Each answers with
//! `GroupRSAKeyShare`, and the key holder runs the pairwise handshake with it,
//! mixing in the *existing* key so every member converges on the same one.
//!
//! # Phases
//!
//! ```text
//! NoKey ──initiate──> RsaHandshakeSent ──DHKeyShare──> KeyEstablished
//!   │                                                      ^
//!   └──RSAKeyShare──> DhHandshakeSent ───AESKeyShare───────┘
//! ```
//!
//! Any step still waiting after `handshake_timeout` is abandoned by
//! [`SessionManager::tick`], which resets the phase and reports
//! [`SessionAction::HandshakeTimedOut`].

use std::{collections::BTreeMap, fmt, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tinychat_crypto::{
    EphemeralKeypair, EphemeralPublicKey, PeerPublicKey, RsaIdentity, SessionKeyMaterial,
    derive_shared_key, generate_symmetric_key, xor_keys,
};
use tinychat_proto::{
    ConversationId, EncryptedPayload, Envelope, Handshake, ParticipantId, ProtocolError,
    RelativeAddress, fan_out, rotate_from,
};

use crate::{
    config::SessionConfig, env::Environment, error::SessionError, key_store::KeyStore,
    log::LogLevel, registry::ConversationRecord, rng::EnvRng,
};

/// Key-exchange phase of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No key and no handshake in flight
    #[default]
    NoKey,
    /// We sent `RSAKeyShare` and wait for `DHKeyShare`
    RsaHandshakeSent,
    /// We answered with `DHKeyShare` and wait for `AESKeyShare`
    DhHandshakeSent,
    /// A session key is installed
    KeyEstablished,
}

/// Actions returned by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this envelope to `to`
    Send {
        /// Recipient
        to: ParticipantId,
        /// Envelope to transmit
        envelope: Envelope,
    },

    /// A session key was installed for `conversation`
    KeyEstablished {
        /// Conversation now able to send
        conversation: ConversationId,
    },

    /// A handshake step with `peer` was abandoned
    HandshakeTimedOut {
        /// Conversation whose handshake stalled
        conversation: ConversationId,
        /// Peer that never answered
        peer: ParticipantId,
        /// How long we waited
        elapsed: Duration,
    },

    /// Diagnostic message
    Log {
        /// Severity
        level: LogLevel,
        /// Message text
        message: String,
    },
}

fn log(level: LogLevel, message: String) -> SessionAction {
    SessionAction::Log { level, message }
}

/// What we are waiting for from a given peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStep {
    /// Sent `RSAKeyShare`, expecting `DHKeyShare`
    AwaitingDh,
    /// Sent `GroupRSAKeyRequest`, expecting `GroupRSAKeyShare`
    AwaitingGroupShare,
}

#[derive(Debug, Clone, Copy)]
struct PendingHandshake<I> {
    step: PendingStep,
    since: I,
}

#[derive(Debug)]
struct ConversationSession<I> {
    phase: SessionPhase,
    rotating: bool,
    pending: BTreeMap<ParticipantId, PendingHandshake<I>>,
}

impl<I> Default for ConversationSession<I> {
    fn default() -> Self {
        Self { phase: SessionPhase::NoKey, rotating: false, pending: BTreeMap::new() }
    }
}

impl<I> ConversationSession<I> {
    fn awaiting(&self, peer: &ParticipantId, step: PendingStep) -> bool {
        self.pending.get(peer).is_some_and(|p| p.step == step)
    }
}

/// Key-exchange state machine for every conversation of the local peer.
///
/// Owns the [`KeyStore`] and the local RSA identity. Pure: no I/O, all
/// randomness and time come from the [`Environment`].
pub struct SessionManager<E: Environment> {
    env: E,
    local: ParticipantId,
    identity: RsaIdentity,
    /// Cached base64 SPKI of `identity`
    public_key: String,
    config: SessionConfig,
    store: KeyStore<E::Instant>,
    sessions: BTreeMap<ConversationId, ConversationSession<E::Instant>>,
}

impl<E: Environment> SessionManager<E> {
    /// Create a manager around an existing identity.
    pub fn new(
        env: E,
        local: ParticipantId,
        identity: RsaIdentity,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let public_key = identity.export_public_key()?;
        Ok(Self {
            env,
            local,
            identity,
            public_key,
            config,
            store: KeyStore::new(),
            sessions: BTreeMap::new(),
        })
    }

    /// Create a manager with a freshly generated identity.
    ///
    /// Uses `config.rsa_modulus_bits`. At 4096 bits this takes noticeable time.
    pub fn generate(
        env: E,
        local: ParticipantId,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let identity = RsaIdentity::generate(&mut EnvRng::new(&env), config.rsa_modulus_bits)?;
        Self::new(env, local, identity, config)
    }

    /// The local participant.
    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    /// Base64 SPKI of the local RSA public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current phase of `conversation`.
    pub fn phase(&self, conversation: &ConversationId) -> SessionPhase {
        self.sessions.get(conversation).map_or(SessionPhase::NoKey, |s| s.phase)
    }

    /// Active session key of `conversation`.
    pub fn session_key(&self, conversation: &ConversationId) -> Option<&SessionKeyMaterial> {
        self.store.session_key(conversation)
    }

    /// Key store, for inspection.
    pub fn key_store(&self) -> &KeyStore<E::Instant> {
        &self.store
    }

    /// Whether a key rotation started locally is still in progress.
    pub fn is_rotating(&self, conversation: &ConversationId) -> bool {
        self.sessions.get(conversation).is_some_and(|s| s.rotating)
    }

    /// Whether content can be encrypted for `conversation` right now.
    pub fn can_send(&self, conversation: &ConversationId) -> bool {
        !self.is_rotating(conversation) && self.store.session_key(conversation).is_some()
    }

    /// Start a handshake as key holder with the first other participant.
    ///
    /// No-op if the conversation already has a key or a handshake with that
    /// participant is in flight.
    pub fn initiate(
        &mut self,
        record: &ConversationRecord,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let others = record.others();
        let Some((peer, from)) = rotate_from(&self.local, &others, 0) else {
            return Err(SessionError::InvalidConversation {
                reason: format!("{} has no remote participants", record.id()),
            });
        };

        let conversation = record.id().clone();
        if self.store.session_key(&conversation).is_some() {
            return Ok(vec![log(LogLevel::Debug, format!("{conversation} already has a key"))]);
        }

        let now = self.env.now();
        let session = self.sessions.entry(conversation.clone()).or_default();
        if session.awaiting(&peer, PendingStep::AwaitingDh) {
            return Ok(vec![log(
                LogLevel::Debug,
                format!("handshake with {peer} in {conversation} already in flight"),
            )]);
        }

        session
            .pending
            .insert(peer.clone(), PendingHandshake { step: PendingStep::AwaitingDh, since: now });
        session.phase = SessionPhase::RsaHandshakeSent;

        Ok(vec![
            log(LogLevel::Info, format!("starting handshake with {peer} in {conversation}")),
            SessionAction::Send {
                to: peer,
                envelope: Envelope::handshake(
                    from,
                    Handshake::RsaKeyShare { public_key: self.public_key.clone() },
                ),
            },
        ])
    }

    /// Discard the current key and restart the handshake as key holder.
    ///
    /// Content sends fail with [`SessionError::SendingDisabled`] until the new
    /// key is established or the handshake times out.
    pub fn rotate(
        &mut self,
        record: &ConversationRecord,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let conversation = record.id().clone();
        self.store.remove_session_key(&conversation);
        self.store.clear_ephemerals(&conversation);

        let session = self.sessions.entry(conversation.clone()).or_default();
        session.pending.clear();
        session.rotating = true;
        session.phase = SessionPhase::NoKey;

        let mut actions = vec![log(LogLevel::Info, format!("rotating key for {conversation}"))];
        actions.extend(self.initiate(record)?);
        Ok(actions)
    }

    /// Apply one inbound handshake message.
    ///
    /// `record` must be the conversation `from` resolves to. On error nothing
    /// has changed; the caller drops the envelope.
    pub fn handle(
        &mut self,
        record: &ConversationRecord,
        from: &RelativeAddress,
        handshake: Handshake,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let sender = from.origin().clone();
        let event = handshake.event().name();

        if from.contains(&self.local) || !record.contains(&sender) {
            return Err(SessionError::Handshake {
                event,
                peer: sender,
                reason: format!("address {from} does not match {}", record.id()),
            });
        }

        match handshake {
            Handshake::RsaKeyShare { public_key } => {
                self.on_rsa_key_share(record, from, &sender, &public_key)
            },
            Handshake::DhKeyShare { public_key, wrapped_ephemeral } => {
                self.on_dh_key_share(record, from, &sender, &public_key, &wrapped_ephemeral)
            },
            Handshake::AesKeyShare { wrapped_ephemeral, wrapped_key } => {
                self.on_aes_key_share(record, &sender, &wrapped_ephemeral, &wrapped_key)
            },
            Handshake::GroupRsaKeyRequest => Ok(self.on_group_key_request(record, from, &sender)),
            Handshake::GroupRsaKeyShare { public_key } => {
                self.on_group_key_share(record, from, &sender, &public_key)
            },
        }
    }

    fn on_rsa_key_share(
        &mut self,
        record: &ConversationRecord,
        from: &RelativeAddress,
        sender: &ParticipantId,
        public_key: &str,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let peer_key = PeerPublicKey::import(public_key)?;
        let conversation = record.id().clone();
        let now = self.env.now();
        let session = self.sessions.entry(conversation.clone()).or_default();

        // Simultaneous open: both sides sent RSAKeyShare. The lower id stays
        // initiator; the higher id answers.
        if session.awaiting(sender, PendingStep::AwaitingDh) && self.local < *sender {
            return Ok(vec![log(
                LogLevel::Debug,
                format!("simultaneous open with {sender} in {conversation}, keeping ours"),
            )]);
        }

        // Duplicated RSAKeyShare must reuse the keypair already announced
        let mut rng = EnvRng::new(&self.env);
        let ephemeral = self
            .store
            .ephemeral_or_insert_with(&conversation, sender, now, || {
                EphemeralKeypair::generate(&mut rng)
            })
            .public_key_bytes();
        let wrapped_ephemeral = peer_key.encrypt(&mut rng, &ephemeral)?;

        session.pending.remove(sender);
        if session.phase != SessionPhase::KeyEstablished {
            session.phase = SessionPhase::DhHandshakeSent;
        }

        Ok(vec![
            log(LogLevel::Debug, format!("answering RSAKeyShare from {sender} in {conversation}")),
            SessionAction::Send {
                to: sender.clone(),
                envelope: Envelope::handshake(
                    from.reply_from(&self.local),
                    Handshake::DhKeyShare {
                        public_key: self.public_key.clone(),
                        wrapped_ephemeral,
                    },
                ),
            },
        ])
    }

    fn on_dh_key_share(
        &mut self,
        record: &ConversationRecord,
        from: &RelativeAddress,
        sender: &ParticipantId,
        public_key: &str,
        wrapped_ephemeral: &[u8],
    ) -> Result<Vec<SessionAction>, SessionError> {
        let conversation = record.id().clone();
        let expected = self
            .sessions
            .get(&conversation)
            .is_some_and(|s| s.awaiting(sender, PendingStep::AwaitingDh));
        if !expected {
            return Err(SessionError::Handshake {
                event: "DHKeyShare",
                peer: sender.clone(),
                reason: "no RSAKeyShare outstanding".to_string(),
            });
        }

        let peer_key = PeerPublicKey::import(public_key)?;
        let peer_ephemeral =
            EphemeralPublicKey::import(&self.identity.decrypt(wrapped_ephemeral)?)?;

        let mut rng = EnvRng::new(&self.env);
        let (material, fresh) = match self.store.session_key(&conversation) {
            Some(existing) => (existing.clone(), false),
            None => (generate_symmetric_key(&mut rng), true),
        };

        let ephemeral = EphemeralKeypair::generate(&mut rng);
        let shared = derive_shared_key(&ephemeral, &peer_ephemeral);
        let mixed = material.with_key(xor_keys(material.key(), &shared));
        let wrapped_ephemeral = peer_key.encrypt(&mut rng, &ephemeral.public_key_bytes())?;
        let wrapped_key = peer_key.encrypt(&mut rng, &mixed.export())?;

        if fresh {
            self.store.set_session_key(conversation.clone(), material);
        }

        let now = self.env.now();
        let session = self.sessions.entry(conversation.clone()).or_default();
        session.pending.remove(sender);
        session.phase = SessionPhase::KeyEstablished;
        session.rotating = false;

        let mut actions = vec![
            SessionAction::Send {
                to: sender.clone(),
                envelope: Envelope::handshake(
                    from.reply_from(&self.local),
                    Handshake::AesKeyShare { wrapped_ephemeral, wrapped_key },
                ),
            },
            SessionAction::KeyEstablished { conversation: conversation.clone() },
            log(
                LogLevel::Info,
                format!(
                    "{} key for {conversation} sent to {sender}",
                    if fresh { "new" } else { "existing" }
                ),
            ),
        ];

        if fresh && record.is_group() && self.config.group_fanout {
            for (to, address) in fan_out(&self.local, &record.others()) {
                if to == *sender || session.pending.contains_key(&to) {
                    continue;
                }
                session.pending.insert(
                    to.clone(),
                    PendingHandshake { step: PendingStep::AwaitingGroupShare, since: now },
                );
                actions.push(SessionAction::Send {
                    to,
                    envelope: Envelope::handshake(address, Handshake::GroupRsaKeyRequest),
                });
            }
        }

        Ok(actions)
    }

    fn on_aes_key_share(
        &mut self,
        record: &ConversationRecord,
        sender: &ParticipantId,
        wrapped_ephemeral: &[u8],
        wrapped_key: &[u8],
    ) -> Result<Vec<SessionAction>, SessionError> {
        let conversation = record.id().clone();

        // Replays find no ephemeral and leave the installed key alone
        let Some(ephemeral) = self.store.ephemeral(&conversation, sender) else {
            return Err(SessionError::Handshake {
                event: "AESKeyShare",
                peer: sender.clone(),
                reason: "no ephemeral exchange in flight".to_string(),
            });
        };

        let peer_ephemeral =
            EphemeralPublicKey::import(&self.identity.decrypt(wrapped_ephemeral)?)?;
        let mixed = SessionKeyMaterial::import(&self.identity.decrypt(wrapped_key)?)?;
        let shared = derive_shared_key(ephemeral, &peer_ephemeral);
        let material = mixed.with_key(xor_keys(mixed.key(), &shared));

        self.store.take_ephemeral(&conversation, sender);
        let replaced = self.store.set_session_key(conversation.clone(), material).is_some();

        let session = self.sessions.entry(conversation.clone()).or_default();
        session.pending.remove(sender);
        session.phase = SessionPhase::KeyEstablished;
        session.rotating = false;

        Ok(vec![
            SessionAction::KeyEstablished { conversation: conversation.clone() },
            log(
                LogLevel::Info,
                format!(
                    "{} key for {conversation} from {sender}",
                    if replaced { "replaced" } else { "installed" }
                ),
            ),
        ])
    }

    fn on_group_key_request(
        &mut self,
        record: &ConversationRecord,
        from: &RelativeAddress,
        sender: &ParticipantId,
    ) -> Vec<SessionAction> {
        self.sessions.entry(record.id().clone()).or_default();

        vec![SessionAction::Send {
            to: sender.clone(),
            envelope: Envelope::handshake(
                from.reply_from(&self.local),
                Handshake::GroupRsaKeyShare { public_key: self.public_key.clone() },
            ),
        }]
    }

    fn on_group_key_share(
        &mut self,
        record: &ConversationRecord,
        from: &RelativeAddress,
        sender: &ParticipantId,
        public_key: &str,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let conversation = record.id().clone();
        let expected = self
            .sessions
            .get(&conversation)
            .is_some_and(|s| s.awaiting(sender, PendingStep::AwaitingGroupShare));
        if !expected {
            return Err(SessionError::Handshake {
                event: "GroupRSAKeyShare",
                peer: sender.clone(),
                reason: "no GroupRSAKeyRequest outstanding".to_string(),
            });
        }

        PeerPublicKey::import(public_key)?;

        let now = self.env.now();
        let session = self.sessions.entry(conversation.clone()).or_default();
        session
            .pending
            .insert(sender.clone(), PendingHandshake { step: PendingStep::AwaitingDh, since: now });

        Ok(vec![
            log(LogLevel::Debug, format!("distributing {conversation} key to {sender}")),
            SessionAction::Send {
                to: sender.clone(),
                envelope: Envelope::handshake(
                    from.reply_from(&self.local),
                    Handshake::RsaKeyShare { public_key: self.public_key.clone() },
                ),
            },
        ])
    }

    /// Abandon handshake steps older than `handshake_timeout`.
    ///
    /// Conversations left with nothing in flight fall back to
    /// [`SessionPhase::NoKey`] (or stay established if a key exists), and any
    /// stalled rotation re-enables sending.
    pub fn tick(&mut self, now: E::Instant) -> Vec<SessionAction> {
        let timeout = self.config.handshake_timeout;
        let mut actions = Vec::new();

        for (conversation, session) in &mut self.sessions {
            let expired: Vec<(ParticipantId, Duration)> = session
                .pending
                .iter()
                .filter(|(_, p)| now - p.since >= timeout)
                .map(|(peer, p)| (peer.clone(), now - p.since))
                .collect();

            for (peer, elapsed) in expired {
                session.pending.remove(&peer);
                actions.push(log(
                    LogLevel::Warn,
                    format!("handshake with {peer} in {conversation} timed out after {elapsed:?}"),
                ));
                actions.push(SessionAction::HandshakeTimedOut {
                    conversation: conversation.clone(),
                    peer,
                    elapsed,
                });
            }
        }

        for (conversation, peer, elapsed) in self.store.expire_ephemerals(now, timeout) {
            actions.push(log(
                LogLevel::Warn,
                format!("{peer} never completed the handshake in {conversation}"),
            ));
            actions.push(SessionAction::HandshakeTimedOut { conversation, peer, elapsed });
        }

        for (conversation, session) in &mut self.sessions {
            if !session.pending.is_empty() || self.store.has_ephemerals(conversation) {
                continue;
            }
            session.rotating = false;
            session.phase = if self.store.session_key(conversation).is_some() {
                SessionPhase::KeyEstablished
            } else {
                SessionPhase::NoKey
            };
        }

        actions
    }

    /// Encrypt `payload` under the conversation key into a content body.
    pub fn encrypt(
        &self,
        conversation: &ConversationId,
        payload: &EncryptedPayload,
    ) -> Result<String, SessionError> {
        if self.is_rotating(conversation) {
            return Err(SessionError::SendingDisabled { conversation: conversation.clone() });
        }
        let material = self
            .store
            .session_key(conversation)
            .ok_or_else(|| SessionError::NoSessionKey { conversation: conversation.clone() })?;

        Ok(STANDARD.encode(material.encrypt(&payload.to_json()?)))
    }

    /// Decrypt a content body under the conversation key.
    pub fn decrypt(
        &self,
        conversation: &ConversationId,
        ciphertext: &str,
    ) -> Result<EncryptedPayload, SessionError> {
        let material = self
            .store
            .session_key(conversation)
            .ok_or_else(|| SessionError::NoSessionKey { conversation: conversation.clone() })?;

        let bytes = STANDARD.decode(ciphertext).map_err(|e| ProtocolError::Base64(e.to_string()))?;
        let plaintext = material.decrypt(&bytes)?;
        Ok(EncryptedPayload::from_json(&plaintext)?)
    }
}

impl<E: Environment> fmt::Debug for SessionManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("local", &self.local)
            .field("store", &self.store)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
