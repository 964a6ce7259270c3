//! Property-based tests for conversation identity and relative addressing
//!
//! 1. **Canonicalization**: every permutation of a participant set yields the
//!    same conversation id as the sorted set
//! 2. **Routing**: every hop of a fan-out excludes its recipient, starts with
//!    the sender, and resolves to the sender's conversation id
//! 3. **Replies**: a reply address resolves to the same conversation at the
//!    original sender
//! 4. **Wire form**: envelopes survive encode/decode for arbitrary bodies

use proptest::prelude::*;
use tinychat_proto::{
    ConversationId, Envelope, Handshake, ParticipantId, RelativeAddress, WireMessage, fan_out,
    rotate_from,
};

/// Strategy for a set of 2..8 distinct participant ids
fn participant_set() -> impl Strategy<Value = Vec<ParticipantId>> {
    prop::collection::btree_set("[a-z0-9]{1,8}", 2..8).prop_map(|ids| {
        ids.into_iter().map(|id| ParticipantId::new(id).unwrap()).collect::<Vec<_>>()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn canonicalize_ignores_order(
        (ids, shuffled) in participant_set()
            .prop_flat_map(|ids| (Just(ids.clone()), Just(ids).prop_shuffle()))
    ) {
        let mut sorted = ids.clone();
        sorted.sort();

        let canonical = ConversationId::canonicalize(&shuffled);
        prop_assert_eq!(&canonical, &ConversationId::canonicalize(&sorted));
        prop_assert_eq!(ConversationId::parse(canonical.as_str()).unwrap().participants(), sorted);
    }

    #[test]
    fn fan_out_routes_every_member(ids in participant_set()) {
        let local = ids[0].clone();
        let others = &ids[1..];
        let expected = ConversationId::canonicalize(&ids);

        let hops = fan_out(&local, others);
        prop_assert_eq!(hops.len(), others.len());

        for (hop, (to, from)) in hops.iter().enumerate() {
            prop_assert_eq!(to, &others[hop]);
            prop_assert_eq!(from.origin(), &local);
            prop_assert!(!from.contains(to));
            prop_assert_eq!(from.len(), others.len());
            prop_assert_eq!(from.conversation_id(to), expected.clone());

            // The recipient's reply resolves to the same conversation at the sender
            let reply = from.reply_from(to);
            prop_assert_eq!(reply.origin(), to);
            prop_assert_eq!(reply.conversation_id(&local), expected.clone());
        }
    }

    #[test]
    fn rotate_from_matches_fan_out(ids in participant_set(), hop in any::<prop::sample::Index>()) {
        let local = ids[0].clone();
        let others = &ids[1..];
        let hop = hop.index(others.len());

        let single = rotate_from(&local, others, hop).unwrap();
        let all = fan_out(&local, others);
        prop_assert_eq!(&all[hop], &single);
    }

    #[test]
    fn envelope_survives_wire(
        ids in participant_set(),
        key in "[A-Za-z0-9+/]{1,64}",
        wrapped in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let from = RelativeAddress::new(ids).unwrap();
        let handshake = Handshake::DhKeyShare { public_key: key, wrapped_ephemeral: wrapped };
        let envelope = Envelope::handshake(from, handshake.clone());

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        prop_assert_eq!(&decoded, &envelope);
        prop_assert_eq!(decoded.message().unwrap(), WireMessage::Handshake(handshake));
    }
}
