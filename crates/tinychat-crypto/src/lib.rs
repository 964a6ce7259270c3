//! TinyChat Cryptographic Primitives
//!
//! Cryptographic building blocks for the TinyChat session protocol. Pure
//! functions over caller-provided randomness: nothing here touches global
//! state, so simulation can drive every primitive from a seeded RNG.
//!
//! # Key Lifecycle
//!
//! Each peer owns one long-lived RSA-OAEP identity. RSA only bootstraps the
//! transport of ephemeral ECDH public keys; the conversation key itself never
//! crosses the wire under RSA alone.
//!
//! ```text
//! RSA-OAEP identity (4096-bit, SHA-256)
//!        │  wraps
//!        ▼
//! ECDH P-256 ephemeral public keys
//!        │  derive
//!        ▼
//! Shared secret ──XOR── Conversation key (AES-256-CBC + IV)
//!        │
//!        ▼
//! Mixed key on the wire, unmixed by the receiver
//! ```
//!
//! # Security
//!
//! The XOR combiner ([`xor_keys`]) is a placeholder construction: an attacker
//! needs both the RSA private key and the ECDH shared secret to recover the
//! conversation key, but the combiner itself has not been analysed the way an
//! HKDF-based combiner would be. AES-CBC with a per-conversation IV provides
//! confidentiality only; it carries no authentication tag.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod asymmetric;
mod ephemeral;
mod error;
mod random;
mod symmetric;

pub use asymmetric::{OAEP_OVERHEAD, PeerPublicKey, RSA_MODULUS_BITS, RsaIdentity};
pub use ephemeral::{EphemeralKeypair, EphemeralPublicKey, derive_shared_key};
pub use error::CryptoError;
pub use random::{random_bytes, random_uuid};
pub use symmetric::{
    IV_SIZE, Iv, KEY_SIZE, SessionKeyMaterial, SymmetricKey, decrypt_symmetric, encrypt_symmetric,
    generate_symmetric_key, xor_keys,
};
