//! In-process transport.
//!
//! Every participant registered on a [`MemoryNetwork`] gets a bounded inbox;
//! sending looks the recipient up and pushes onto its inbox.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tinychat_proto::ParticipantId;
use tokio::sync::mpsc;

use crate::transport::{Transport, TransportError};

/// Inbox depth per participant.
const INBOX_CAPACITY: usize = 256;

type Routes = Arc<RwLock<HashMap<ParticipantId, mpsc::Sender<Vec<u8>>>>>;

/// Shared routing table of an in-process network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    routes: Routes,
}

impl MemoryNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return its transport and inbox.
    ///
    /// Registering an id again replaces its inbox; the old receiver sees the
    /// channel close.
    pub fn register(
        &self,
        id: ParticipantId,
    ) -> Result<(MemoryTransport, mpsc::Receiver<Vec<u8>>), TransportError> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.routes
            .write()
            .map_err(|_| TransportError::Io("routing table poisoned".to_string()))?
            .insert(id.clone(), tx);

        Ok((MemoryTransport { local: id, routes: Arc::clone(&self.routes) }, rx))
    }

    /// Remove `id`; later sends to it fail with [`TransportError::UnknownPeer`].
    pub fn unregister(&self, id: &ParticipantId) -> Result<(), TransportError> {
        self.routes
            .write()
            .map_err(|_| TransportError::Io("routing table poisoned".to_string()))?
            .remove(id);
        Ok(())
    }
}

/// One participant's handle on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    local: ParticipantId,
    routes: Routes,
}

impl MemoryTransport {
    /// Participant this transport sends as.
    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    fn route(&self, to: &ParticipantId) -> Result<mpsc::Sender<Vec<u8>>, TransportError> {
        let routes = self
            .routes
            .read()
            .map_err(|_| TransportError::Io("routing table poisoned".to_string()))?;
        routes.get(to).cloned().ok_or_else(|| TransportError::UnknownPeer { peer: to.clone() })
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, to: &ParticipantId, bytes: Vec<u8>) -> Result<(), TransportError> {
        // Lock is released before awaiting
        let tx = self.route(to)?;
        tx.send(bytes).await.map_err(|_| TransportError::Closed { peer: to.clone() })
    }
}
