//! Client integration tests
//!
//! Wires several `Client`s together through an in-test delivery queue and
//! checks what each participant ends up seeing.

use std::{collections::VecDeque, time::Duration};

use tinychat_client::{
    ClearScope, Client, ClientAction, ClientConfig, ClientError, ClientEvent, Direction,
    MessageEngine, MessageKind,
};
use tinychat_core::{Environment, SessionError};
use tinychat_crypto::RsaIdentity;
use tinychat_harness::{SimEnv, test_identity};
use tinychat_proto::{
    Attachment, ConversationId, Envelope, Location, MessageId, ParticipantId, fan_out,
};

fn identity(index: usize) -> RsaIdentity {
    test_identity(index).unwrap()
}

fn pid(s: &str) -> ParticipantId {
    ParticipantId::new(s).unwrap()
}

struct Peer {
    env: SimEnv,
    client: Client<SimEnv>,
}

fn peer(name: &str, index: usize, config: ClientConfig) -> Peer {
    let env = SimEnv::with_seed(index as u64 + 10);
    let client = Client::new(env.clone(), pid(name), identity(index), config).unwrap();
    Peer { env, client }
}

struct Net {
    peers: Vec<Peer>,
    /// Non-send actions observed, tagged with the peer that produced them
    observed: Vec<(ParticipantId, ClientAction)>,
}

impl Net {
    fn new(names: &[&str]) -> Self {
        Self::with_config(names, ClientConfig::default())
    }

    fn with_config(names: &[&str], config: ClientConfig) -> Self {
        let peers =
            names.iter().enumerate().map(|(i, name)| peer(name, i, config.clone())).collect();
        Self { peers, observed: Vec::new() }
    }

    fn client(&self, name: &str) -> &Client<SimEnv> {
        &self.peers.iter().find(|p| p.client.local().as_str() == name).unwrap().client
    }

    fn client_mut(&mut self, name: &str) -> &mut Client<SimEnv> {
        &mut self.peers.iter_mut().find(|p| p.client.local().as_str() == name).unwrap().client
    }

    /// Deliver `actions` and everything they trigger.
    fn run(&mut self, actions: Vec<ClientAction>) {
        let mut queue: VecDeque<(ParticipantId, Vec<u8>)> = VecDeque::new();
        self.collect(&mut queue, None, actions);

        while let Some((to, bytes)) = queue.pop_front() {
            let actions = self.client_mut(to.as_str()).on_envelope(&bytes);
            self.collect(&mut queue, Some(to), actions);
        }
    }

    fn collect(
        &mut self,
        queue: &mut VecDeque<(ParticipantId, Vec<u8>)>,
        by: Option<ParticipantId>,
        actions: Vec<ClientAction>,
    ) {
        for action in actions {
            match action {
                ClientAction::Send { to, envelope } => {
                    queue.push_back((to, envelope.encode().unwrap()));
                },
                other => {
                    if let Some(by) = &by {
                        self.observed.push((by.clone(), other));
                    }
                },
            }
        }
    }

    fn open(&mut self, creator: &str, others: &[&str]) -> ConversationId {
        let ids: Vec<ParticipantId> = others.iter().map(|s| pid(s)).collect();
        let (conversation, actions) = self.client_mut(creator).create_conversation(&ids).unwrap();
        self.run(actions);
        conversation
    }

    fn send(&mut self, from: &str, conversation: &ConversationId, body: &str) -> MessageId {
        let (id, actions) =
            self.client_mut(from).send_message(conversation, body, None).unwrap();
        self.run(actions);
        id
    }
}

#[test]
fn handshake_then_message_is_delivered_and_acknowledged() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);

    assert!(net.client("alice").can_send(&conversation));
    assert!(net.client("bob").can_send(&conversation));
    assert!(net.observed.iter().any(|(by, action)| {
        *by == pid("bob") && matches!(action, ClientAction::ConversationCreated { .. })
    }));

    let id = net.send("alice", &conversation, "hello bob");

    let received = net.client("bob").conversation(&conversation).unwrap().get(&id).unwrap();
    assert_eq!(received.body, "hello bob");
    assert_eq!(received.author, pid("alice"));
    assert_eq!(received.direction, Direction::Received);
    // Sim clock starts at 2024-01-01T00:00:00Z
    assert_eq!(received.time, "00:00:00");

    let sent = net.client("alice").conversation(&conversation).unwrap().get(&id).unwrap();
    assert!(sent.acknowledged);
    assert!(sent.delivered_to.contains(&pid("bob")));
}

#[test]
fn sending_before_key_is_transient_error() {
    let mut alice = peer("alice", 0, ClientConfig::default());
    let (conversation, _) = alice.client.create_conversation(&[pid("bob")]).unwrap();

    let err = alice.client.send_message(&conversation, "too early", None).unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, ClientError::Session(SessionError::NoSessionKey { .. })));
}

#[test]
fn unknown_conversation_is_rejected() {
    let mut alice = peer("alice", 0, ClientConfig::default());
    let conversation = ConversationId::parse("alice,zed").unwrap();

    let err = alice.client.send_message(&conversation, "hi", None).unwrap_err();
    assert!(matches!(err, ClientError::ConversationNotFound { .. }));
}

#[test]
fn group_message_reaches_every_member() {
    let mut net = Net::new(&["alice", "bob", "carol"]);
    let conversation = net.open("alice", &["bob", "carol"]);

    for name in ["alice", "bob", "carol"] {
        assert!(net.client(name).can_send(&conversation), "{name} has no key");
    }

    let id = net.send("bob", &conversation, "hi all");
    for name in ["alice", "carol"] {
        let log = net.client(name).conversation(&conversation).unwrap();
        assert_eq!(log.get(&id).unwrap().author, pid("bob"));
    }

    let sent = net.client("bob").conversation(&conversation).unwrap().get(&id).unwrap();
    assert_eq!(sent.delivered_to.len(), 2);
}

#[test]
fn reply_links_resolve_at_receiver() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);
    let first = net.send("alice", &conversation, "question");

    let (reply, actions) = net
        .client_mut("bob")
        .send_message(&conversation, "answer", Some(first.clone()))
        .unwrap();
    net.run(actions);

    let log = net.client("alice").conversation(&conversation).unwrap();
    assert_eq!(log.get(&reply).unwrap().reply_to, Some(first));
}

#[test]
fn reply_to_unknown_message_is_refused_locally() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);

    let err = net
        .client_mut("alice")
        .send_message(&conversation, "re: ?", Some(MessageId::from("missing")))
        .unwrap_err();
    assert!(matches!(err, ClientError::MessageNotFound { .. }));
}

#[test]
fn edit_requires_acknowledgement() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);

    // Send but do not deliver
    let (id, _) = net.client_mut("alice").send_message(&conversation, "draft", None).unwrap();
    let err = net.client_mut("alice").edit_message(&conversation, &id, "final").unwrap_err();
    assert!(matches!(err, ClientError::NotDelivered { .. }));
}

#[test]
fn edit_replaces_body_everywhere() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);
    let id = net.send("alice", &conversation, "teh typo");

    net.peers[0].env.advance(Duration::from_secs(61));
    let actions = net.client_mut("alice").edit_message(&conversation, &id, "the typo").unwrap();
    net.run(actions);

    for name in ["alice", "bob"] {
        let log = net.client(name).conversation(&conversation).unwrap();
        let message = log.get(&id).unwrap();
        assert_eq!(message.body, "the typo");
        assert!(message.edited);
        assert_eq!(message.time, "edited at 12:01:01");
    }
}

#[test]
fn only_author_can_edit_or_unsend() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);
    let id = net.send("alice", &conversation, "mine");

    let err = net.client_mut("bob").edit_message(&conversation, &id, "yours").unwrap_err();
    assert!(matches!(err, ClientError::Session(SessionError::Authorization { .. })));

    let err = net.client_mut("bob").unsend_message(&conversation, &id).unwrap_err();
    assert!(matches!(err, ClientError::Session(SessionError::Authorization { .. })));
}

#[test]
fn forged_edit_from_other_member_is_rejected() {
    let mut net = Net::new(&["alice", "bob", "carol"]);
    let conversation = net.open("alice", &["bob", "carol"]);
    let id = net.send("alice", &conversation, "original");

    // Carol holds the group key and encrypts an edit of Alice's message
    let carol = net.client("carol");
    let forged = MessageEngine::edit(id.clone(), "forged".to_string(), String::new());
    let ciphertext = carol.session().encrypt(&conversation, &forged).unwrap();
    let routes = fan_out(&pid("carol"), &[pid("alice"), pid("bob")]);
    let (to, from) = routes.into_iter().find(|(to, _)| *to == pid("bob")).unwrap();

    let bytes = Envelope::content(from, ciphertext).encode().unwrap();
    let actions = net.client_mut(to.as_str()).on_envelope(&bytes);

    assert!(actions.iter().any(|a| matches!(
        a,
        ClientAction::Rejected {
            error: ClientError::Session(SessionError::Authorization { .. }),
            ..
        }
    )));
    let message = net.client("bob").conversation(&conversation).unwrap().get(&id).unwrap().clone();
    assert_eq!(message.body, "original");
}

#[test]
fn unsend_removes_message_everywhere() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);
    let id = net.send("alice", &conversation, "oops");

    let actions = net.client_mut("alice").unsend_message(&conversation, &id).unwrap();
    net.run(actions);

    for name in ["alice", "bob"] {
        assert!(!net.client(name).conversation(&conversation).unwrap().contains(&id));
    }
}

#[test]
fn replayed_content_is_idempotent() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);

    let (id, actions) = net.client_mut("alice").send_message(&conversation, "once", None).unwrap();
    let bytes = actions
        .iter()
        .find_map(|a| match a {
            ClientAction::Send { envelope, .. } => Some(envelope.encode().unwrap()),
            _ => None,
        })
        .unwrap();

    let first = net.client_mut("bob").on_envelope(&bytes);
    let second = net.client_mut("bob").on_envelope(&bytes);

    assert!(first.iter().any(|a| matches!(a, ClientAction::MessageStored { .. })));
    assert!(!second.iter().any(|a| matches!(a, ClientAction::MessageStored { .. })));
    // Both deliveries are acknowledged so a lost receipt is recovered
    assert!(second.iter().any(|a| matches!(a, ClientAction::Send { .. })));
    assert_eq!(net.client("bob").conversation(&conversation).unwrap().messages().len(), 1);
    assert!(net.client("bob").conversation(&conversation).unwrap().contains(&id));
}

#[test]
fn typing_indicator_shows_and_clears() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);

    let actions = net.client_mut("alice").set_typing(&conversation, true).unwrap();
    net.run(actions);
    let log = net.client("bob").conversation(&conversation).unwrap();
    assert!(log.typing_from(&pid("alice")).is_some());

    net.send("alice", &conversation, "done typing");
    let log = net.client("bob").conversation(&conversation).unwrap();
    assert!(log.typing_from(&pid("alice")).is_none());
}

#[test]
fn typing_indicators_can_be_disabled_per_conversation() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);

    net.client_mut("alice").handle(ClientEvent::SetTypingIndicators {
        conversation: conversation.clone(),
        enabled: false,
    })
    .unwrap();

    let actions = net.client_mut("alice").set_typing(&conversation, true).unwrap();
    assert!(actions.is_empty());
}

#[test]
fn edits_are_not_acknowledged_when_disabled() {
    let config = ClientConfig { ack_edits: false, ..ClientConfig::default() };
    let mut net = Net::with_config(&["alice", "bob"], config);
    let conversation = net.open("alice", &["bob"]);
    let id = net.send("alice", &conversation, "v1");

    let actions = net.client_mut("alice").edit_message(&conversation, &id, "v2").unwrap();
    let bytes = actions
        .iter()
        .find_map(|a| match a {
            ClientAction::Send { envelope, .. } => Some(envelope.encode().unwrap()),
            _ => None,
        })
        .unwrap();

    let reply = net.client_mut("bob").on_envelope(&bytes);
    assert!(!reply.iter().any(|a| matches!(a, ClientAction::Send { .. })));
}

#[test]
fn rotation_pauses_sending_then_resumes() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);
    let old = net.client("alice").session().session_key(&conversation).unwrap().clone();

    let actions = net.client_mut("alice").rotate_key(&conversation).unwrap();
    let err = net.client_mut("alice").send_message(&conversation, "during", None).unwrap_err();
    assert!(matches!(err, ClientError::Session(SessionError::SendingDisabled { .. })));

    net.run(actions);
    let new = net.client("alice").session().session_key(&conversation).unwrap().clone();
    assert_ne!(old, new);
    assert_eq!(Some(&new), net.client("bob").session().session_key(&conversation));

    let id = net.send("alice", &conversation, "after");
    assert!(net.client("bob").conversation(&conversation).unwrap().contains(&id));
}

#[test]
fn global_clear_unsends_own_messages() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);
    let mine = net.send("alice", &conversation, "from alice");
    let theirs = net.send("bob", &conversation, "from bob");

    let actions =
        net.client_mut("alice").clear_conversation(&conversation, ClearScope::Global).unwrap();
    net.run(actions);

    assert!(net.client("alice").conversation(&conversation).unwrap().messages().is_empty());
    let bob = net.client("bob").conversation(&conversation).unwrap();
    assert!(!bob.contains(&mine));
    assert!(bob.contains(&theirs));
}

#[test]
fn local_clear_keeps_remote_copies() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);
    let id = net.send("alice", &conversation, "kept remotely");

    let actions =
        net.client_mut("alice").clear_conversation(&conversation, ClearScope::Local).unwrap();
    net.run(actions);

    assert!(net.client("alice").conversation(&conversation).unwrap().messages().is_empty());
    assert!(net.client("bob").conversation(&conversation).unwrap().contains(&id));
}

#[test]
fn file_and_location_messages_roundtrip() {
    let mut net = Net::new(&["alice", "bob"]);
    let conversation = net.open("alice", &["bob"]);

    let attachment = Attachment::new("notes.txt", "text/plain", b"remember the milk");
    let (file, actions) =
        net.client_mut("alice").send_file(&conversation, &attachment, None).unwrap();
    net.run(actions);

    let here = Location { latitude: 52.52, longitude: 13.405 };
    let (place, actions) =
        net.client_mut("alice").send_location(&conversation, &here, None).unwrap();
    net.run(actions);

    let log = net.client("bob").conversation(&conversation).unwrap();
    let file = log.get(&file).unwrap();
    assert_eq!(file.kind, MessageKind::File);
    assert_eq!(file.attachment().unwrap().unwrap().bytes().unwrap(), b"remember the milk");

    let place = log.get(&place).unwrap();
    assert_eq!(place.kind, MessageKind::Location);
    assert_eq!(place.location().unwrap().unwrap(), here);
}

#[test]
fn garbage_envelope_is_rejected_without_conversation() {
    let mut alice = peer("alice", 0, ClientConfig::default());
    let actions = alice.client.on_envelope(b"{not json");

    assert!(actions.iter().any(|a| matches!(
        a,
        ClientAction::Rejected { conversation: None, error: ClientError::InvalidEnvelope { .. } }
    )));
}

#[test]
fn content_for_unknown_conversation_is_rejected() {
    let mut net = Net::new(&["alice", "bob", "carol"]);
    let conversation = net.open("alice", &["bob"]);
    let ciphertext = net
        .client("alice")
        .session()
        .encrypt(&conversation, &MessageEngine::typing(true))
        .unwrap();

    // Carol never joined alice,bob
    let (_, from) = fan_out(&pid("alice"), &[pid("carol")]).remove(0);
    let actions =
        net.client_mut("carol").on_envelope(&Envelope::content(from, ciphertext).encode().unwrap());

    assert!(actions.iter().any(|a| matches!(
        a,
        ClientAction::Rejected { error: ClientError::ConversationNotFound { .. }, .. }
    )));
}

#[test]
fn stalled_handshake_times_out_on_tick() {
    let mut alice = peer("alice", 0, ClientConfig::default());
    alice.client.create_conversation(&[pid("bob")]).unwrap();

    alice.env.advance(Duration::from_secs(31));
    let now = alice.env.now();
    let actions = alice.client.handle(ClientEvent::Tick { now }).unwrap();

    assert!(actions.iter().any(|a| matches!(
        a,
        ClientAction::HandshakeTimedOut { peer, .. } if *peer == pid("bob")
    )));
}
