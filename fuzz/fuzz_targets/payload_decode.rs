//! Fuzz target for decrypted payload parsing
//!
//! Covers the plaintext a peer controls after decryption: the payload JSON
//! and the structured bodies of file and location messages. None of these
//! may panic, and a parsed location is always within range.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tinychat_proto::{Attachment, EncryptedPayload, Location};

fuzz_target!(|data: &[u8]| {
    if let Ok(payload) = EncryptedPayload::from_json(data) {
        let _ = Attachment::from_body(&payload.body).map(|a| a.bytes());
        if let Ok(location) = Location::from_body(&payload.body) {
            assert!((-90.0..=90.0).contains(&location.latitude));
            assert!((-180.0..=180.0).contains(&location.longitude));
        }
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Attachment::from_body(text);
        let _ = Location::from_body(text);
    }
});
