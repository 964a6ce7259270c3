//! Runtime errors

use std::time::Duration;

use thiserror::Error;
use tinychat_client::ClientError;
use tinychat_proto::ConversationId;

use crate::transport::TransportError;

/// Runtime errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The client refused the operation
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The transport failed to deliver
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No key was established in time
    #[error("no session key for {conversation} after {waited:?}")]
    KeyWaitTimeout {
        /// Conversation waited on
        conversation: ConversationId,
        /// How long we waited
        waited: Duration,
    },
}

impl NodeError {
    /// Returns true if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Client(e) => e.is_transient(),
            Self::Transport(e) => e.is_transient(),
            Self::KeyWaitTimeout { .. } => true,
        }
    }
}
