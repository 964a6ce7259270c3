//! RSA-OAEP identity keys
//!
//! Each peer holds one [`RsaIdentity`] for its whole lifetime. Public halves
//! travel as base64-encoded SubjectPublicKeyInfo DER, and every RSA ciphertext
//! uses OAEP with SHA-256 for both the label hash and MGF1.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand_core::CryptoRngCore;
use rsa::{
    Oaep, RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePublicKey},
    traits::PublicKeyParts,
};
use sha2::Sha256;

use crate::error::CryptoError;

/// Default modulus size for identity keys.
pub const RSA_MODULUS_BITS: usize = 4096;

/// Bytes of every RSA block consumed by OAEP-SHA256 padding.
pub const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// A peer's RSA public key, imported from the wire or derived from an identity.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerPublicKey(RsaPublicKey);

impl PeerPublicKey {
    /// Parse a base64 SPKI DER public key as sent in key-share messages.
    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        let der = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::malformed(format!("public key is not base64: {e}")))?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::malformed(format!("public key is not SPKI: {e}")))?;
        Ok(Self(key))
    }

    /// Encode as base64 SPKI DER.
    pub fn export(&self) -> Result<String, CryptoError> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::malformed(format!("SPKI encoding failed: {e}")))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    /// Encrypt `plaintext` with OAEP-SHA256.
    ///
    /// Fails if `plaintext` exceeds [`Self::max_plaintext_len`].
    pub fn encrypt<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.0
            .encrypt(rng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed { reason: e.to_string() })
    }

    /// Modulus size in bytes.
    pub fn modulus_len(&self) -> usize {
        self.0.size()
    }

    /// Largest plaintext a single OAEP block can carry.
    pub fn max_plaintext_len(&self) -> usize {
        self.modulus_len().saturating_sub(OAEP_OVERHEAD)
    }
}

impl fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerPublicKey").field("bits", &(self.modulus_len() * 8)).finish()
    }
}

/// Long-lived RSA keypair identifying the local peer.
#[derive(Clone)]
pub struct RsaIdentity {
    private: RsaPrivateKey,
    public: PeerPublicKey,
}

impl RsaIdentity {
    /// Generate a fresh identity with a modulus of `bits` bits.
    ///
    /// Production peers use [`RSA_MODULUS_BITS`]. Smaller moduli are only
    /// useful for tests, and anything under 1024 bits is rejected.
    pub fn generate<R: CryptoRngCore>(rng: &mut R, bits: usize) -> Result<Self, CryptoError> {
        if bits < 1024 {
            return Err(CryptoError::KeyGeneration {
                reason: format!("modulus of {bits} bits is too small"),
            });
        }

        let private = RsaPrivateKey::new(rng, bits)
            .map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?;
        let public = PeerPublicKey(private.to_public_key());
        Ok(Self { private, public })
    }

    /// Public half of this identity.
    pub fn public_key(&self) -> &PeerPublicKey {
        &self.public
    }

    /// Base64 SPKI encoding of the public half.
    pub fn export_public_key(&self) -> Result<String, CryptoError> {
        self.public.export()
    }

    /// Decrypt an OAEP-SHA256 ciphertext addressed to this identity.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed { reason: e.to_string() })
    }
}

impl fmt::Debug for RsaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaIdentity").field("public", &self.public).finish_non_exhaustive()
    }
}
