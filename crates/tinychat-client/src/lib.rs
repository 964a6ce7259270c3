//! TinyChat Client
//!
//! Action-based client state machine. Pure logic with no I/O: the runtime
//! feeds [`ClientEvent`]s (user actions, received envelopes, ticks) and
//! executes the returned [`ClientAction`]s.
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                     Client                      │
//! │  ┌──────────────────────┐  ┌─────────────────┐  │
//! │  │ ConversationRegistry │  │ SessionManager  │  │
//! │  └──────────────────────┘  │  (KeyStore)     │  │
//! │  ┌──────────────────────┐  └─────────────────┘  │
//! │  │ ConversationLog ×N   │<── MessageEngine      │
//! │  └──────────────────────┘                       │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Handshake envelopes go to the session manager. Content envelopes are
//! decrypted with the conversation key and applied to the conversation log by
//! the [`MessageEngine`]. Nothing that arrives from the wire can make
//! [`Client::on_envelope`] fail; bad input becomes a
//! [`ClientAction::Rejected`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod config;
mod conversation;
mod engine;
mod error;
mod event;

pub use client::Client;
pub use config::ClientConfig;
pub use conversation::{ConversationLog, Direction, MessageKind, MessageRecord, TypingIndicator};
pub use engine::{Applied, MessageEngine, Outcome};
pub use error::ClientError;
pub use event::{ClearScope, ClientAction, ClientEvent};
