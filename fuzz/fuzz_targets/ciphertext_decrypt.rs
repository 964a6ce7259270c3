//! Fuzz target for symmetric decryption
//!
//! Attacker-chosen ciphertext under a fixed session key must fail cleanly:
//! bad lengths and bad padding return errors, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tinychat_crypto::{Iv, SessionKeyMaterial, SymmetricKey, decrypt_symmetric};

fuzz_target!(|data: &[u8]| {
    let material =
        SessionKeyMaterial::new(Iv::from_array([7; 16]), SymmetricKey::from_array([9; 32]));
    let _ = decrypt_symmetric(&material, data);
});
