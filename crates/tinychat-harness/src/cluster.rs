//! In-memory peer cluster.
//!
//! Holds one [`Client`] per participant and a single delivery queue standing
//! in for the network. Every `Send` action is encoded to bytes and queued;
//! [`PeerCluster::deliver_all`] feeds the queue to the recipients until
//! nothing is left. With [`NetworkChaos`] the queue duplicates envelopes and
//! delivers them out of order, which is what the transport contract allows.

use std::{collections::VecDeque, time::Duration};

use rand::Rng;
use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use tinychat_client::{Client, ClientAction, ClientConfig, ClientError};
use tinychat_core::Environment;
use tinychat_crypto::SessionKeyMaterial;
use tinychat_proto::{ConversationId, MessageId, ParticipantId};

use crate::{identities::test_identity, sim_env::SimEnv};

/// Upper bound on deliveries per [`PeerCluster::deliver_all`] call.
const MAX_DELIVERIES: usize = 100_000;

/// Misbehaviour injected into the delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkChaos {
    /// Probability that an envelope is queued twice
    pub duplicate: f64,
    /// Deliver a random queued envelope instead of the oldest
    pub reorder: bool,
}

impl NetworkChaos {
    /// In-order, exactly-once delivery.
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    to: ParticipantId,
    bytes: Vec<u8>,
}

/// Simulated peers exchanging envelopes through one queue.
pub struct PeerCluster {
    env: SimEnv,
    peers: Vec<Client<SimEnv>>,
    queue: VecDeque<InFlight>,
    chaos: NetworkChaos,
    rng: ChaCha20Rng,
    /// Non-send actions, tagged with the peer that produced them
    observed: Vec<(ParticipantId, ClientAction)>,
    delivered: usize,
}

impl PeerCluster {
    /// Cluster of `names` with default configuration.
    pub fn new(seed: u64, names: &[&str]) -> Result<Self, String> {
        Self::with_config(seed, names, &ClientConfig::default())
    }

    /// Cluster of `names` sharing `config`.
    pub fn with_config(seed: u64, names: &[&str], config: &ClientConfig) -> Result<Self, String> {
        let env = SimEnv::with_seed(seed);
        let peers = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let id = ParticipantId::new(*name).map_err(|e| format!("bad name {name}: {e}"))?;
                Client::new(env.fork(i as u64), id, test_identity(i)?, config.clone())
                    .map_err(|e| format!("client {name} failed: {e}"))
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Self {
            rng: ChaCha20Rng::seed_from_u64(seed ^ 0xC4A0_5000),
            env,
            peers,
            queue: VecDeque::new(),
            chaos: NetworkChaos::none(),
            observed: Vec::new(),
            delivered: 0,
        })
    }

    /// Change delivery behaviour for subsequent sends.
    pub fn set_chaos(&mut self, chaos: NetworkChaos) {
        self.chaos = chaos;
    }

    /// Shared simulation environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Client of `name`.
    pub fn client(&self, name: &str) -> Option<&Client<SimEnv>> {
        self.peers.iter().find(|c| c.local().as_str() == name)
    }

    /// All clients.
    pub fn clients(&self) -> impl Iterator<Item = &Client<SimEnv>> {
        self.peers.iter()
    }

    /// Envelopes waiting for delivery.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Envelopes delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Non-send actions `name` produced, oldest first.
    pub fn observed(&self, name: &str) -> impl Iterator<Item = &ClientAction> {
        self.observed.iter().filter(move |(by, _)| by.as_str() == name).map(|(_, a)| a)
    }

    /// Envelopes `name` rejected.
    pub fn rejections(&self, name: &str) -> Vec<&ClientError> {
        self.observed(name)
            .filter_map(|action| match action {
                ClientAction::Rejected { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }

    /// Run a client operation on `name` and queue what it sends.
    pub fn act<R>(
        &mut self,
        name: &str,
        op: impl FnOnce(&mut Client<SimEnv>) -> Result<(R, Vec<ClientAction>), ClientError>,
    ) -> Result<R, String> {
        let index = self.index(name)?;
        let (result, actions) = op(&mut self.peers[index]).map_err(|e| format!("{name}: {e}"))?;
        self.enqueue(index, actions);
        Ok(result)
    }

    /// `creator` opens a conversation with `others`; nothing is delivered yet.
    pub fn create_conversation(
        &mut self,
        creator: &str,
        others: &[&str],
    ) -> Result<ConversationId, String> {
        let ids = others
            .iter()
            .map(|name| ParticipantId::new(*name).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, String>>()?;
        self.act(creator, |client| client.create_conversation(&ids))
    }

    /// Open a conversation and deliver until every handshake has finished.
    pub fn establish(&mut self, creator: &str, others: &[&str]) -> Result<ConversationId, String> {
        let conversation = self.create_conversation(creator, others)?;
        self.deliver_all()?;
        Ok(conversation)
    }

    /// `name` sends a text message; nothing is delivered yet.
    pub fn send_message(
        &mut self,
        name: &str,
        conversation: &ConversationId,
        body: &str,
    ) -> Result<MessageId, String> {
        self.act(name, |client| client.send_message(conversation, body, None))
    }

    /// Deliver queued envelopes, and whatever they trigger, until none remain.
    ///
    /// Returns the number delivered by this call.
    pub fn deliver_all(&mut self) -> Result<usize, String> {
        let mut count = 0;
        while self.deliver_one()? {
            count += 1;
            if count >= MAX_DELIVERIES {
                return Err(format!("network did not quiesce after {MAX_DELIVERIES} deliveries"));
            }
        }
        Ok(count)
    }

    /// Deliver one queued envelope. Returns false if the queue was empty.
    pub fn deliver_one(&mut self) -> Result<bool, String> {
        let next = if self.chaos.reorder && !self.queue.is_empty() {
            let pick = self.rng.gen_range(0..self.queue.len());
            self.queue.remove(pick)
        } else {
            self.queue.pop_front()
        };
        let Some(InFlight { to, bytes }) = next else {
            return Ok(false);
        };

        let index = self.index(to.as_str())?;
        tracing::trace!(%to, len = bytes.len(), "deliver");
        let actions = self.peers[index].on_envelope(&bytes);
        self.delivered += 1;
        self.enqueue(index, actions);
        Ok(true)
    }

    /// Drop everything in flight.
    pub fn drop_in_flight(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Advance the shared clock and tick every client.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        let now = self.env.now();
        for index in 0..self.peers.len() {
            let actions = self.peers[index].tick(now);
            self.enqueue(index, actions);
        }
    }

    /// Session key each participant of `conversation` holds.
    pub fn session_keys(&self, conversation: &ConversationId) -> Vec<Option<&SessionKeyMaterial>> {
        self.peers
            .iter()
            .filter(|c| conversation.contains(c.local()))
            .map(|c| c.session().session_key(conversation))
            .collect()
    }

    /// Whether every participant holds the same key for `conversation`.
    pub fn keys_agree(&self, conversation: &ConversationId) -> bool {
        let keys = self.session_keys(conversation);
        match keys.first() {
            Some(Some(first)) => keys.iter().all(|k| k.is_some_and(|k| k == *first)),
            _ => false,
        }
    }

    fn index(&self, name: &str) -> Result<usize, String> {
        self.peers
            .iter()
            .position(|c| c.local().as_str() == name)
            .ok_or_else(|| format!("no peer named {name}"))
    }

    fn enqueue(&mut self, index: usize, actions: Vec<ClientAction>) {
        let by = self.peers[index].local().clone();
        for action in actions {
            match action {
                ClientAction::Send { to, envelope } => match envelope.encode() {
                    Ok(bytes) => {
                        if self.rng.gen_bool(self.chaos.duplicate.clamp(0.0, 1.0)) {
                            self.queue.push_back(InFlight { to: to.clone(), bytes: bytes.clone() });
                        }
                        self.queue.push_back(InFlight { to, bytes });
                    },
                    Err(e) => tracing::error!(%by, "encode failed: {e}"),
                },
                other => self.observed.push((by.clone(), other)),
            }
        }
    }
}

impl std::fmt::Debug for PeerCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerCluster")
            .field("seed", &self.env.seed())
            .field("peers", &self.peers.len())
            .field("in_flight", &self.queue.len())
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}
