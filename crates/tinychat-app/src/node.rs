//! Async node driving one client.
//!
//! The node serializes all access to the [`Client`] through an async mutex.
//! Outbound envelopes go to a per-peer outbox drained by its own task, so a
//! slow or full peer never blocks inbound processing or sends to others.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as SyncMutex, PoisonError},
};

use tinychat_client::{Client, ClientAction, ClientError, ClientEvent};
use tinychat_core::{Environment, LogLevel, SessionError};
use tinychat_crypto::RsaIdentity;
use tinychat_proto::{Attachment, ConversationId, Location, MessageId, ParticipantId};
use tokio::sync::{Mutex, mpsc, watch};

use crate::{config::NodeConfig, error::NodeError, transport::Transport};

/// One participant: a [`Client`] plus the I/O it needs.
///
/// Share it behind an `Arc` to run [`Node::run`] on one task while other
/// tasks submit user actions. Must be used inside a tokio runtime: the first
/// envelope to a peer spawns that peer's delivery task.
pub struct Node<E: Environment, T: Transport> {
    env: E,
    local: ParticipantId,
    config: NodeConfig,
    client: Mutex<Client<E>>,
    transport: Arc<T>,
    outboxes: SyncMutex<HashMap<ParticipantId, mpsc::UnboundedSender<Vec<u8>>>>,
    /// Handshakes abandoned since the conversation last had a key
    timeouts: SyncMutex<HashMap<ConversationId, SessionError>>,
    /// Bumped on every `KeyEstablished` and `HandshakeTimedOut`
    progress: watch::Sender<u64>,
}

impl<E: Environment, T: Transport> Node<E, T> {
    /// Create a node around an existing identity.
    pub fn new(
        env: E,
        local: ParticipantId,
        identity: RsaIdentity,
        transport: T,
        config: NodeConfig,
    ) -> Result<Self, NodeError> {
        let client = Client::new(env.clone(), local.clone(), identity, config.client.clone())?;
        let (progress, _) = watch::channel(0);
        Ok(Self {
            env,
            local,
            config,
            client: Mutex::new(client),
            transport: Arc::new(transport),
            outboxes: SyncMutex::new(HashMap::new()),
            timeouts: SyncMutex::new(HashMap::new()),
            progress,
        })
    }

    /// The local participant.
    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    /// Configuration in use.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Run `f` against the client state.
    pub async fn inspect<R>(&self, f: impl FnOnce(&Client<E>) -> R) -> R {
        f(&*self.client.lock().await)
    }

    /// Feed one event to the client and execute the resulting actions.
    pub async fn submit(&self, event: ClientEvent<E::Instant>) -> Result<(), NodeError> {
        let actions = self.client.lock().await.handle(event)?;
        self.execute(actions);
        Ok(())
    }

    /// Open a conversation and start its handshake.
    pub async fn create_conversation(
        &self,
        participants: &[ParticipantId],
    ) -> Result<ConversationId, NodeError> {
        let (conversation, actions) =
            self.client.lock().await.create_conversation(participants)?;
        self.timeouts().remove(&conversation);
        self.execute(actions);
        Ok(conversation)
    }

    /// Wait for the conversation key, then send a text message.
    pub async fn send_message(
        &self,
        conversation: &ConversationId,
        body: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, NodeError> {
        let body = body.into();
        self.send_when_keyed(conversation, |client| {
            client.send_message(conversation, body, reply_to)
        })
        .await
    }

    /// Wait for the conversation key, then send a file.
    pub async fn send_file(
        &self,
        conversation: &ConversationId,
        attachment: &Attachment,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, NodeError> {
        self.send_when_keyed(conversation, |client| {
            client.send_file(conversation, attachment, reply_to)
        })
        .await
    }

    /// Wait for the conversation key, then share a location.
    pub async fn send_location(
        &self,
        conversation: &ConversationId,
        location: &Location,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, NodeError> {
        self.send_when_keyed(conversation, |client| {
            client.send_location(conversation, location, reply_to)
        })
        .await
    }

    async fn send_when_keyed<F>(
        &self,
        conversation: &ConversationId,
        send: F,
    ) -> Result<MessageId, NodeError>
    where
        F: FnOnce(&mut Client<E>) -> Result<(MessageId, Vec<ClientAction>), ClientError>,
    {
        self.wait_for_key(conversation).await?;
        let (id, actions) = send(&mut *self.client.lock().await)?;
        self.execute(actions);
        Ok(id)
    }

    /// Wait until `conversation` can send content.
    ///
    /// Re-checks on every handshake notification and every
    /// `key_poll_interval`, giving up after `key_wait_timeout`. Fails early
    /// with [`SessionError::HandshakeTimeout`] once the handshake has been
    /// abandoned. Dropping the future cancels the wait.
    pub async fn wait_for_key(&self, conversation: &ConversationId) -> Result<(), NodeError> {
        let waited = self.config.key_wait_timeout;
        let poll = self.config.key_poll_interval;
        let mut progress = self.progress.subscribe();

        let wait = async {
            loop {
                if self.client.lock().await.can_send(conversation) {
                    return Ok(());
                }
                let abandoned = self.timeouts().get(conversation).cloned();
                if let Some(error) = abandoned {
                    return Err(NodeError::Client(ClientError::Session(error)));
                }
                tokio::select! {
                    _ = progress.changed() => {},
                    () = self.env.sleep(poll) => {},
                }
            }
        };

        match tokio::time::timeout(waited, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%conversation, ?waited, "gave up waiting for session key");
                Err(NodeError::KeyWaitTimeout { conversation: conversation.clone(), waited })
            },
        }
    }

    /// Apply one inbound envelope.
    pub async fn on_envelope(&self, bytes: &[u8]) {
        let actions = self.client.lock().await.on_envelope(bytes);
        self.execute(actions);
    }

    /// Expire stalled handshakes.
    pub async fn tick(&self) {
        let now = self.env.now();
        let actions = self.client.lock().await.tick(now);
        self.execute(actions);
    }

    /// Process inbound envelopes and timers until `inbox` closes.
    pub async fn run(&self, mut inbox: mpsc::Receiver<Vec<u8>>) {
        tracing::info!(local = %self.local, "node started");
        let mut ticks = tokio::time::interval(self.config.tick_interval);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                bytes = inbox.recv() => match bytes {
                    Some(bytes) => self.on_envelope(&bytes).await,
                    None => break,
                },
                _ = ticks.tick() => self.tick().await,
            }
        }
        tracing::info!(local = %self.local, "node stopped");
    }

    /// Execute client actions without waiting on the transport.
    fn execute(&self, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Send { to, envelope } => match envelope.encode() {
                    Ok(bytes) => self.enqueue(to, bytes),
                    Err(e) => tracing::error!(local = %self.local, "encode failed: {e}"),
                },
                ClientAction::KeyEstablished { conversation } => {
                    tracing::info!(local = %self.local, %conversation, "session key established");
                    self.timeouts().remove(&conversation);
                    self.progress.send_modify(|generation| *generation += 1);
                },
                ClientAction::HandshakeTimedOut { conversation, peer, elapsed } => {
                    tracing::warn!(
                        local = %self.local,
                        %conversation,
                        %peer,
                        ?elapsed,
                        "handshake timed out"
                    );
                    let error = SessionError::HandshakeTimeout {
                        conversation: conversation.clone(),
                        peer,
                        elapsed,
                    };
                    self.timeouts().insert(conversation, error);
                    self.progress.send_modify(|generation| *generation += 1);
                },
                ClientAction::ConversationCreated { conversation } => {
                    tracing::debug!(local = %self.local, %conversation, "conversation created");
                },
                ClientAction::MessageStored { conversation, message } => {
                    tracing::debug!(local = %self.local, %conversation, %message, "message stored");
                },
                ClientAction::ConversationUpdated { conversation } => {
                    tracing::trace!(local = %self.local, %conversation, "conversation updated");
                },
                ClientAction::Rejected { conversation, error } => {
                    tracing::debug!(
                        local = %self.local,
                        ?conversation,
                        "envelope rejected: {error}"
                    );
                },
                ClientAction::Log { level, message } => log(&self.local, level, &message),
            }
        }
    }

    /// Queue `bytes` for `to`, spawning its delivery task on first use.
    fn enqueue(&self, to: ParticipantId, bytes: Vec<u8>) {
        let mut outboxes = self.outboxes.lock().unwrap_or_else(PoisonError::into_inner);
        let outbox = outboxes.entry(to.clone()).or_insert_with(|| self.spawn_delivery(to.clone()));
        if outbox.send(bytes).is_err() {
            tracing::warn!(local = %self.local, peer = %to, "delivery task gone, envelope dropped");
            outboxes.remove(&to);
        }
    }

    /// Drain one peer's outbox in order.
    ///
    /// Delivery failures are logged, not returned: the handshake timers and
    /// the key wait cover a lost envelope. The task ends once the node is
    /// dropped and the outbox is empty.
    fn spawn_delivery(&self, peer: ParticipantId) -> mpsc::UnboundedSender<Vec<u8>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let transport = Arc::clone(&self.transport);
        let local = self.local.clone();

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = transport.send(&peer, bytes).await {
                    tracing::warn!(%local, %peer, "send failed: {e}");
                }
            }
        });
        tx
    }

    fn timeouts(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationId, SessionError>> {
        self.timeouts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log(local: &ParticipantId, level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(%local, "{message}"),
        LogLevel::Info => tracing::info!(%local, "{message}"),
        LogLevel::Warn => tracing::warn!(%local, "{message}"),
        LogLevel::Error => tracing::error!(%local, "{message}"),
    }
}

impl<E: Environment, T: Transport> std::fmt::Debug for Node<E, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("local", &self.local).finish_non_exhaustive()
    }
}
