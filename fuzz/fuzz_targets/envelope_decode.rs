//! Fuzz target for Envelope::decode
//!
//! Arbitrary bytes off the wire must never panic the decoder. Anything that
//! decodes must also classify (handshake or content) without panicking, and
//! re-encoding a decoded envelope must decode to the same envelope.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tinychat_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = Envelope::decode(data) else {
        return;
    };
    let _ = envelope.message();

    let bytes = envelope.encode().expect("decoded envelope re-encodes");
    let again = Envelope::decode(&bytes).expect("re-encoded envelope decodes");
    assert_eq!(envelope, again);
});
