//! End-to-end scenarios over the simulated cluster.

use tinychat_client::{ClientAction, ClientError, Direction, MessageEngine};
use tinychat_core::{SessionError, SessionPhase};
use tinychat_harness::PeerCluster;
use tinychat_proto::{Envelope, ParticipantId, fan_out};

fn pid(s: &str) -> ParticipantId {
    ParticipantId::new(s).unwrap()
}

#[test]
fn one_to_one_handshake_yields_identical_keys() {
    let mut cluster = PeerCluster::new(1, &["x", "y"]).unwrap();
    let conversation = cluster.establish("x", &["y"]).unwrap();

    assert_eq!(conversation.as_str(), "x,y");
    assert!(cluster.keys_agree(&conversation));
    for name in ["x", "y"] {
        let client = cluster.client(name).unwrap();
        assert_eq!(client.session().phase(&conversation), SessionPhase::KeyEstablished);
        assert_eq!(client.session().key_store().ephemeral_count(), 0);
    }
}

#[test]
fn plain_message_is_acknowledged() {
    let mut cluster = PeerCluster::new(2, &["x", "y"]).unwrap();
    let conversation = cluster.establish("x", &["y"]).unwrap();

    let id = cluster.send_message("x", &conversation, "hi").unwrap();
    cluster.deliver_all().unwrap();

    let received = cluster.client("y").unwrap().conversation(&conversation).unwrap();
    let message = received.get(&id).unwrap();
    assert_eq!(message.body, "hi");
    assert_eq!(message.direction, Direction::Received);

    let sent = cluster.client("x").unwrap().conversation(&conversation).unwrap();
    assert!(sent.get(&id).unwrap().acknowledged);
}

#[test]
fn edit_is_seen_everywhere_and_forgery_is_rejected() {
    let mut cluster = PeerCluster::new(3, &["x", "y", "z"]).unwrap();
    let conversation = cluster.establish("x", &["y", "z"]).unwrap();

    let id = cluster.send_message("x", &conversation, "v1").unwrap();
    cluster.deliver_all().unwrap();
    cluster.act("x", |c| c.edit_message(&conversation, &id, "v2").map(|a| ((), a))).unwrap();
    cluster.deliver_all().unwrap();

    for name in ["x", "y", "z"] {
        let log = cluster.client(name).unwrap().conversation(&conversation).unwrap();
        assert_eq!(log.get(&id).unwrap().body, "v2", "{name} shows a stale body");
    }

    // z forges an edit of x's message and sends it to y
    let z = cluster.client("z").unwrap();
    let forged = MessageEngine::edit(id.clone(), "forged".to_string(), String::new());
    let ciphertext = z.session().encrypt(&conversation, &forged).unwrap();
    let (_, from) = fan_out(&pid("z"), &[pid("x"), pid("y")])
        .into_iter()
        .find(|(to, _)| *to == pid("y"))
        .unwrap();
    let bytes = Envelope::content(from, ciphertext).encode().unwrap();

    cluster.act("y", |c| Ok::<_, ClientError>(((), c.on_envelope(&bytes)))).unwrap();

    let log = cluster.client("y").unwrap().conversation(&conversation).unwrap();
    assert_eq!(log.get(&id).unwrap().body, "v2");
    assert!(cluster.rejections("y").iter().any(|e| matches!(
        e,
        ClientError::Session(SessionError::Authorization { .. })
    )));
}

#[test]
fn group_message_reaches_all_with_true_author() {
    let mut cluster = PeerCluster::new(4, &["a", "b", "c"]).unwrap();
    let conversation = cluster.establish("a", &["b", "c"]).unwrap();
    assert!(cluster.keys_agree(&conversation));

    let id = cluster.send_message("a", &conversation, "to the group").unwrap();
    cluster.deliver_all().unwrap();

    for name in ["b", "c"] {
        let log = cluster.client(name).unwrap().conversation(&conversation).unwrap();
        let message = log.get(&id).unwrap();
        assert_eq!(message.author, pid("a"));
        assert_eq!(message.body, "to the group");
    }

    let sent = cluster.client("a").unwrap().conversation(&conversation).unwrap();
    assert_eq!(sent.get(&id).unwrap().delivered_to.len(), 2);
}

#[test]
fn larger_group_converges_on_one_key() {
    let names = ["p0", "p1", "p2", "p3", "p4"];
    let mut cluster = PeerCluster::new(5, &names).unwrap();
    let conversation = cluster.establish("p2", &["p0", "p1", "p3", "p4"]).unwrap();

    assert!(cluster.keys_agree(&conversation));
    assert_eq!(cluster.session_keys(&conversation).len(), names.len());
}

#[test]
fn reply_from_group_member_links_to_original() {
    let mut cluster = PeerCluster::new(6, &["a", "b", "c"]).unwrap();
    let conversation = cluster.establish("a", &["b", "c"]).unwrap();

    let question = cluster.send_message("a", &conversation, "lunch?").unwrap();
    cluster.deliver_all().unwrap();
    let answer = cluster
        .act("c", |client| client.send_message(&conversation, "yes", Some(question.clone())))
        .unwrap();
    cluster.deliver_all().unwrap();

    for name in ["a", "b"] {
        let log = cluster.client(name).unwrap().conversation(&conversation).unwrap();
        assert_eq!(log.get(&answer).unwrap().reply_to.as_ref(), Some(&question));
    }
}

#[test]
fn typing_and_unsend_propagate() {
    let mut cluster = PeerCluster::new(7, &["a", "b"]).unwrap();
    let conversation = cluster.establish("a", &["b"]).unwrap();

    cluster.act("a", |c| c.set_typing(&conversation, true).map(|x| ((), x))).unwrap();
    cluster.deliver_all().unwrap();
    let log = cluster.client("b").unwrap().conversation(&conversation).unwrap();
    assert_eq!(log.typing().len(), 1);

    cluster.act("a", |c| c.set_typing(&conversation, false).map(|x| ((), x))).unwrap();
    cluster.deliver_all().unwrap();
    let log = cluster.client("b").unwrap().conversation(&conversation).unwrap();
    assert!(log.typing().is_empty());

    let id = cluster.send_message("a", &conversation, "regret").unwrap();
    cluster.deliver_all().unwrap();
    cluster.act("a", |c| c.unsend_message(&conversation, &id).map(|x| ((), x))).unwrap();
    cluster.deliver_all().unwrap();

    for name in ["a", "b"] {
        let log = cluster.client(name).unwrap().conversation(&conversation).unwrap();
        assert!(!log.contains(&id));
    }
}

#[test]
fn same_seed_replays_identically() {
    let run = |seed| {
        let mut cluster = PeerCluster::new(seed, &["a", "b"]).unwrap();
        let conversation = cluster.establish("a", &["b"]).unwrap();
        let id = cluster.send_message("a", &conversation, "deterministic").unwrap();
        let key = cluster.client("a").unwrap().session().session_key(&conversation).cloned();
        (id, key)
    };

    let (first_id, first_key) = run(42);
    let (second_id, second_key) = run(42);
    assert_eq!(first_id, second_id);
    assert_eq!(first_key, second_key);
    assert_ne!(first_id, run(43).0);
}

#[test]
fn receiver_never_reports_protocol_errors_on_clean_network() {
    let mut cluster = PeerCluster::new(8, &["a", "b", "c"]).unwrap();
    let conversation = cluster.establish("a", &["b", "c"]).unwrap();
    cluster.send_message("b", &conversation, "clean").unwrap();
    cluster.deliver_all().unwrap();

    for name in ["a", "b", "c"] {
        assert!(cluster.rejections(name).is_empty(), "{name}: {:?}", cluster.rejections(name));
        assert!(
            !cluster.observed(name).any(|a| matches!(a, ClientAction::HandshakeTimedOut { .. })),
            "{name} saw a timeout"
        );
    }
    assert_eq!(cluster.in_flight(), 0);
}
