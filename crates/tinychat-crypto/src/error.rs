//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from cryptographic primitives.
///
/// Always fatal to the single message or handshake step that produced it,
/// never to the conversation as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material could not be parsed or has the wrong length
    #[error("malformed key material: {reason}")]
    MalformedKey {
        /// What was wrong with the key
        reason: String,
    },

    /// Decryption failed (wrong key, bad padding, or OAEP check failure)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// Encryption failed (plaintext too long for the RSA modulus)
    #[error("encryption failed: {reason}")]
    EncryptionFailed {
        /// Reason for encryption failure
        reason: String,
    },

    /// Key generation failed
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Reason for generation failure
        reason: String,
    },
}

impl CryptoError {
    /// Human-readable reason carried by every variant.
    pub fn reason(&self) -> &str {
        match self {
            Self::MalformedKey { reason }
            | Self::DecryptionFailed { reason }
            | Self::EncryptionFailed { reason }
            | Self::KeyGeneration { reason } => reason,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedKey { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_is_exposed_for_every_variant() {
        let errors = [
            CryptoError::MalformedKey { reason: "a".to_string() },
            CryptoError::DecryptionFailed { reason: "b".to_string() },
            CryptoError::EncryptionFailed { reason: "c".to_string() },
            CryptoError::KeyGeneration { reason: "d".to_string() },
        ];

        let reasons: Vec<&str> = errors.iter().map(CryptoError::reason).collect();
        assert_eq!(reasons, ["a", "b", "c", "d"]);
    }

    #[test]
    fn display_includes_reason() {
        let err = CryptoError::DecryptionFailed { reason: "invalid padding".to_string() };
        assert_eq!(err.to_string(), "decryption failed: invalid padding");
    }
}
