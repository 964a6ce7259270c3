//! AES-256-CBC conversation keys
//!
//! A conversation key is a 256-bit AES key plus a 128-bit IV, generated once
//! per key epoch and shared by every participant. The IV is fixed for the
//! lifetime of the key; ciphertexts are PKCS#7-padded CBC with no tag.

use std::fmt;

use aes::{
    Aes256,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
};
use rand_core::CryptoRngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// CBC initialization vector size in bytes.
pub const IV_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// 256-bit symmetric key, zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generate a random key.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw key bytes.
    pub fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Import a key from a slice of exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::malformed(format!("key must be {KEY_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// CBC initialization vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    /// Generate a random IV.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; IV_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw IV bytes.
    pub fn from_array(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw IV bytes.
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }
}

/// A conversation key: AES-256 key plus its fixed IV.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeyMaterial {
    iv: Iv,
    key: SymmetricKey,
}

impl SessionKeyMaterial {
    /// Exported length: IV followed by key.
    pub const EXPORTED_LEN: usize = IV_SIZE + KEY_SIZE;

    /// Combine an IV and key.
    pub fn new(iv: Iv, key: SymmetricKey) -> Self {
        Self { iv, key }
    }

    /// Initialization vector.
    pub fn iv(&self) -> &Iv {
        &self.iv
    }

    /// AES key.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Same IV with a different key. Used to mix and unmix the wire form.
    pub fn with_key(&self, key: SymmetricKey) -> Self {
        Self { iv: self.iv, key }
    }

    /// Serialize as `iv || key` (48 bytes).
    pub fn export(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::EXPORTED_LEN);
        out.extend_from_slice(self.iv.as_bytes());
        out.extend_from_slice(self.key.as_bytes());
        out
    }

    /// Parse `iv || key`.
    pub fn import(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != Self::EXPORTED_LEN {
            return Err(CryptoError::malformed(format!(
                "key material must be {} bytes, got {}",
                Self::EXPORTED_LEN,
                bytes.len()
            )));
        }

        let (iv, key) = bytes.split_at(IV_SIZE);
        let mut iv_bytes = [0u8; IV_SIZE];
        iv_bytes.copy_from_slice(iv);
        Ok(Self { iv: Iv(iv_bytes), key: SymmetricKey::from_slice(key)? })
    }

    /// Encrypt with PKCS#7 padding. Output is always a non-empty multiple of 16.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.0.into(), &self.iv.0.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt and strip PKCS#7 padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % IV_SIZE != 0 {
            return Err(CryptoError::DecryptionFailed {
                reason: format!("ciphertext length {} is not a block multiple", ciphertext.len()),
            });
        }

        Aes256CbcDec::new(&self.key.0.into(), &self.iv.0.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed { reason: "invalid padding".to_string() })
    }
}

impl fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyMaterial").field("iv", &self.iv).finish_non_exhaustive()
    }
}

/// Generate a fresh conversation key and IV.
pub fn generate_symmetric_key<R: CryptoRngCore>(rng: &mut R) -> SessionKeyMaterial {
    SessionKeyMaterial { iv: Iv::generate(rng), key: SymmetricKey::generate(rng) }
}

/// Encrypt `plaintext` under `material`.
pub fn encrypt_symmetric(material: &SessionKeyMaterial, plaintext: &[u8]) -> Vec<u8> {
    material.encrypt(plaintext)
}

/// Decrypt `ciphertext` under `material`.
pub fn decrypt_symmetric(
    material: &SessionKeyMaterial,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    material.decrypt(ciphertext)
}

/// Bytewise XOR of two keys. Self-inverse: `xor(xor(a, b), b) == a`.
pub fn xor_keys(a: &SymmetricKey, b: &SymmetricKey) -> SymmetricKey {
    let mut out = [0u8; KEY_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.0.iter().zip(b.0.iter())) {
        *o = x ^ y;
    }
    SymmetricKey(out)
}
