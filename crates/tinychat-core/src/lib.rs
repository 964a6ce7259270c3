//! TinyChat Protocol Core
//!
//! Sans-IO building blocks shared by every TinyChat peer:
//!
//! - [`Environment`]: time and randomness, swapped for a virtual clock and
//!   seeded RNG in simulation
//! - [`KeyStore`]: per-conversation session keys and in-flight ECDH state
//! - [`SessionManager`]: the RSA → ECDH → AES key-exchange state machine,
//!   including group key fan-out
//! - [`ConversationRegistry`]: canonical conversation identity to participants
//!
//! Nothing in this crate performs I/O. The session manager consumes decoded
//! handshake messages and returns [`SessionAction`]s for the caller to
//! execute.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod key_store;
pub mod log;
pub mod registry;
pub mod rng;
pub mod session;

pub use config::SessionConfig;
pub use env::Environment;
pub use error::SessionError;
pub use key_store::KeyStore;
pub use log::LogLevel;
pub use registry::{ConversationRecord, ConversationRegistry};
pub use rng::EnvRng;
pub use session::{SessionAction, SessionManager, SessionPhase};
