//! Fuzz target for relative address parsing
//!
//! # Invariants
//!
//! - Parsing never panics
//! - A parsed address is non-empty and survives a Display round trip
//! - The conversation a recipient derives contains the recipient and the origin
//! - A reply names the same conversation from the origin's side

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tinychat_proto::{ParticipantId, RelativeAddress};

#[derive(Debug, Arbitrary)]
struct Input {
    address: String,
    local: String,
}

fuzz_target!(|input: Input| {
    let Ok(from) = RelativeAddress::parse(&input.address) else {
        return;
    };
    assert!(!from.is_empty());

    let reparsed = RelativeAddress::parse(&from.to_string()).expect("display form parses");
    assert_eq!(from, reparsed);

    let Ok(local) = ParticipantId::new(input.local) else {
        return;
    };
    if from.contains(&local) {
        return;
    }

    let conversation = from.conversation_id(&local);
    assert!(conversation.contains(&local));
    assert!(conversation.contains(from.origin()));

    let reply = from.reply_from(&local);
    assert_eq!(reply.conversation_id(from.origin()), conversation);
});
