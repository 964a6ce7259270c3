//! Cached RSA identities.
//!
//! Key generation dominates test time, so a fixed set of identities is
//! generated once per process from a constant seed and handed out by index.

use std::sync::OnceLock;

use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use tinychat_crypto::{CryptoError, RsaIdentity};

/// Modulus size of test identities; the smallest that fits a handshake.
pub const TEST_IDENTITY_BITS: usize = 2048;

const IDENTITY_COUNT: usize = 8;
const IDENTITY_SEED: u64 = 0x7E57_1D;

/// Identity number `index`.
///
/// The same index always yields the same key pair.
pub fn test_identity(index: usize) -> Result<RsaIdentity, String> {
    static IDENTITIES: OnceLock<Result<Vec<RsaIdentity>, CryptoError>> = OnceLock::new();

    let identities = IDENTITIES
        .get_or_init(|| {
            let mut rng = ChaCha20Rng::seed_from_u64(IDENTITY_SEED);
            (0..IDENTITY_COUNT)
                .map(|_| RsaIdentity::generate(&mut rng, TEST_IDENTITY_BITS))
                .collect()
        })
        .as_ref()
        .map_err(|e| format!("identity generation failed: {e}"))?;

    identities
        .get(index)
        .cloned()
        .ok_or_else(|| {
            format!("only {IDENTITY_COUNT} test identities available, asked for {index}")
        })
}
