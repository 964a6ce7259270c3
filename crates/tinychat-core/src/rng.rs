//! `rand_core` adapter over an [`Environment`].

use rand_core::{CryptoRng, RngCore};

use crate::env::Environment;

/// Borrows an environment as a cryptographic RNG.
///
/// Lets the crypto primitives draw from the environment's entropy, so a
/// seeded simulation environment makes key generation reproducible.
#[derive(Debug)]
pub struct EnvRng<'a, E>(&'a E);

impl<'a, E: Environment> EnvRng<'a, E> {
    /// Wrap `env`.
    pub fn new(env: &'a E) -> Self {
        Self(env)
    }
}

impl<E: Environment> RngCore for EnvRng<'_, E> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.0.random_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.0.random_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.0.random_bytes(dest);
        Ok(())
    }
}

// Production environments draw from the OS CSPRNG; simulation environments
// are seeded ChaCha. Both qualify.
impl<E: Environment> CryptoRng for EnvRng<'_, E> {}
