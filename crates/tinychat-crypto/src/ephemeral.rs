//! Ephemeral ECDH key agreement on P-256
//!
//! Each handshake leg generates a fresh [`EphemeralKeypair`]. Public points
//! travel as uncompressed SEC1 (65 bytes) inside an RSA-OAEP envelope, and the
//! raw 32-byte x-coordinate of the shared point becomes a [`SymmetricKey`].

use std::fmt;

use p256::{PublicKey, ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint};
use rand_core::CryptoRngCore;

use crate::{
    error::CryptoError,
    symmetric::{KEY_SIZE, SymmetricKey},
};

/// A peer's ephemeral P-256 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralPublicKey(PublicKey);

impl EphemeralPublicKey {
    /// Parse a SEC1-encoded point (compressed or uncompressed).
    pub fn import(bytes: &[u8]) -> Result<Self, CryptoError> {
        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::malformed("not a valid P-256 point"))
    }

    /// Uncompressed SEC1 encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }
}

impl fmt::Debug for EphemeralPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EphemeralPublicKey").field(&self.to_bytes().len()).finish()
    }
}

/// Ephemeral P-256 keypair for one handshake.
///
/// The secret scalar is zeroized on drop by `p256`.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: EphemeralPublicKey,
}

impl EphemeralKeypair {
    /// Generate a fresh keypair.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let secret = EphemeralSecret::random(rng);
        let public = EphemeralPublicKey(secret.public_key());
        Self { secret, public }
    }

    /// Public half.
    pub fn public_key(&self) -> &EphemeralPublicKey {
        &self.public
    }

    /// Uncompressed SEC1 encoding of the public half.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_bytes()
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair").field("public", &self.public).finish_non_exhaustive()
    }
}

/// Derive the 256-bit shared key between `local` and `peer`.
///
/// Both sides of an exchange derive the same key.
pub fn derive_shared_key(local: &EphemeralKeypair, peer: &EphemeralPublicKey) -> SymmetricKey {
    let shared = local.secret.diffie_hellman(&peer.0);
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
    SymmetricKey::from_array(bytes)
}

#[cfg(test)]
mod tests {
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    use super::*;

    #[test]
    fn both_sides_derive_same_key() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let alice = EphemeralKeypair::generate(&mut rng);
        let bob = EphemeralKeypair::generate(&mut rng);

        let a = derive_shared_key(&alice, bob.public_key());
        let b = derive_shared_key(&bob, alice.public_key());
        assert_eq!(a, b);
    }

    #[test]
    fn public_key_is_uncompressed_sec1() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let pair = EphemeralKeypair::generate(&mut rng);
        let bytes = pair.public_key_bytes();

        assert_eq!(bytes.len(), 65);
        assert_eq!(bytes[0], 0x04);
        assert_eq!(&EphemeralPublicKey::import(&bytes).unwrap(), pair.public_key());
    }

    #[test]
    fn distinct_peers_give_distinct_keys() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let alice = EphemeralKeypair::generate(&mut rng);
        let bob = EphemeralKeypair::generate(&mut rng);
        let carol = EphemeralKeypair::generate(&mut rng);

        assert_ne!(
            derive_shared_key(&alice, bob.public_key()),
            derive_shared_key(&alice, carol.public_key())
        );
    }

    #[test]
    fn import_rejects_invalid_point() {
        assert!(EphemeralPublicKey::import(&[0x04; 65]).is_err());
        assert!(EphemeralPublicKey::import(&[]).is_err());
    }
}
