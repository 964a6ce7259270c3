//! TinyChat application runtime
//!
//! Executes the actions of the Sans-IO [`Client`] against a real transport.
//! The [`Node`] owns one client behind an async mutex and feeds inbound bytes
//! back in. Outbound envelopes are queued per peer and a spawned task drains
//! each queue through the [`Transport`], so processing never waits on a send.
//! The node also ticks the handshake timers and turns `Log` actions into
//! `tracing` events.
//!
//! ```text
//!             ┌───────────────── Node ─────────────────┐
//!  inbox ───> │ on_envelope ─┐                         │
//!  interval ─>│ tick ────────┼──> Client ──> actions ──┼──> outbox per peer
//!  user ─────>│ submit ──────┘                 │       │      └─> Transport::send
//!             │                key watch <─────┘       │
//!             └────────────────────────────────────────┘
//! ```
//!
//! [`MemoryNetwork`] connects nodes inside one process; [`SystemEnv`] supplies
//! real time and OS randomness.
//!
//! [`Client`]: tinychat_client::Client

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod memory;
mod node;
mod system_env;
mod transport;

pub use config::NodeConfig;
pub use error::NodeError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use node::Node;
pub use system_env::SystemEnv;
pub use transport::{Transport, TransportError};
