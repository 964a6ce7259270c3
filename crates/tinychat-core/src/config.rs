//! Session configuration

use std::time::Duration;

use tinychat_crypto::RSA_MODULUS_BITS;

/// Time allowed for a pairwise handshake step before it is abandoned.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Key-exchange configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Modulus size for the local RSA identity
    pub rsa_modulus_bits: usize,
    /// How long a pending handshake step may wait for the peer
    pub handshake_timeout: Duration,
    /// Whether the key holder distributes the key to the rest of a group
    pub group_fanout: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rsa_modulus_bits: RSA_MODULUS_BITS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            group_fanout: true,
        }
    }
}
