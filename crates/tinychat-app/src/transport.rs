//! Transport capability.
//!
//! The protocol only needs "deliver these bytes to that participant". How a
//! participant is reached (socket, relay, in-process channel) is the
//! transport's business. Inbound bytes arrive on whatever receiver the
//! transport hands out and are fed to [`Node::run`].
//!
//! [`Node::run`]: crate::Node::run

use std::future::Future;

use thiserror::Error;
use tinychat_proto::ParticipantId;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nobody is registered under this id
    #[error("unknown peer: {peer}")]
    UnknownPeer {
        /// Addressed participant
        peer: ParticipantId,
    },

    /// The peer's inbox was closed
    #[error("connection to {peer} closed")]
    Closed {
        /// Addressed participant
        peer: ParticipantId,
    },

    /// Any other delivery failure
    #[error("transport failure: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns true if the peer may become reachable later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UnknownPeer { .. } | Self::Io(_))
    }
}

/// Delivers encoded envelopes to participants.
pub trait Transport: Send + Sync + 'static {
    /// Send `bytes` to `to`.
    ///
    /// Completion means the transport accepted the bytes, not that the peer
    /// processed them.
    fn send(
        &self,
        to: &ParticipantId,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
