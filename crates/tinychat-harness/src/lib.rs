//! Deterministic simulation harness for TinyChat protocol testing.
//!
//! - [`SimEnv`]: virtual clock and seeded ChaCha randomness, so every run of
//!   a seed produces the same keys, ids and timings
//! - [`test_identity`]: RSA identities generated once per process
//! - [`PeerCluster`]: in-memory clients that exchange envelopes synchronously
//!   until the network is quiet, optionally duplicating and reordering them

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod identities;
pub mod sim_env;

pub use cluster::{NetworkChaos, PeerCluster};
pub use identities::{TEST_IDENTITY_BITS, test_identity};
pub use sim_env::{SimEnv, SimInstant};
