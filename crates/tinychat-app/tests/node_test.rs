//! Node runtime tests
//!
//! Runs nodes over the in-process network on a tokio runtime.

use std::{sync::Arc, time::Duration};

use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use tinychat_app::{MemoryNetwork, MemoryTransport, Node, NodeConfig, NodeError, SystemEnv};
use tinychat_client::{ClientConfig, ClientError};
use tinychat_core::{SessionConfig, SessionError};
use tinychat_crypto::RsaIdentity;
use tinychat_proto::{ConversationId, ParticipantId};

type TestNode = Node<SystemEnv, MemoryTransport>;

fn pid(s: &str) -> ParticipantId {
    ParticipantId::new(s).unwrap()
}

fn identity(seed: u64) -> RsaIdentity {
    RsaIdentity::generate(&mut ChaCha20Rng::seed_from_u64(seed), 2048).unwrap()
}

fn spawn_node(network: &MemoryNetwork, name: &str, seed: u64) -> Arc<TestNode> {
    spawn_node_with(network, name, seed, NodeConfig::default())
}

fn spawn_node_with(
    network: &MemoryNetwork,
    name: &str,
    seed: u64,
    config: NodeConfig,
) -> Arc<TestNode> {
    let (transport, inbox) = network.register(pid(name)).unwrap();
    let node = Node::new(SystemEnv::new(), pid(name), identity(seed), transport, config).unwrap();
    let node = Arc::new(node);

    let runner = Arc::clone(&node);
    tokio::spawn(async move { runner.run(inbox).await });
    node
}

#[tokio::test]
async fn nodes_exchange_messages_after_key_wait() {
    let network = MemoryNetwork::new();
    let alice = spawn_node(&network, "alice", 1);
    let bob = spawn_node(&network, "bob", 2);

    let conversation = alice.create_conversation(&[pid("bob")]).await.unwrap();
    let id = alice.send_message(&conversation, "hello over tokio", None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let delivered = bob
                .inspect(|c| c.conversation(&conversation).is_some_and(|log| log.contains(&id)))
                .await;
            if delivered {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    bob.wait_for_key(&conversation).await.unwrap();
    let body = bob
        .inspect(|c| {
            c.conversation(&conversation).and_then(|log| log.get(&id)).map(|m| m.body.clone())
        })
        .await;
    assert_eq!(body.as_deref(), Some("hello over tokio"));
}

#[tokio::test(start_paused = true)]
async fn key_wait_times_out_when_peer_is_silent() {
    let network = MemoryNetwork::new();
    let alice = spawn_node(&network, "alice", 3);
    // Registered but never processes its inbox
    let (_bob, _bob_inbox) = network.register(pid("bob")).unwrap();

    let conversation = alice.create_conversation(&[pid("bob")]).await.unwrap();
    let err = alice.send_message(&conversation, "anyone?", None).await.unwrap_err();

    assert!(matches!(
        err,
        NodeError::KeyWaitTimeout { waited, .. } if waited == Duration::from_secs(10)
    ));
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn key_wait_reports_abandoned_handshake() {
    let config = NodeConfig {
        client: ClientConfig {
            session: SessionConfig {
                handshake_timeout: Duration::from_secs(2),
                ..SessionConfig::default()
            },
            ..ClientConfig::default()
        },
        ..NodeConfig::default()
    };
    let network = MemoryNetwork::new();
    let alice = spawn_node_with(&network, "alice", 7, config);
    let (_bob, _bob_inbox) = network.register(pid("bob")).unwrap();

    let conversation = alice.create_conversation(&[pid("bob")]).await.unwrap();
    let err = alice.wait_for_key(&conversation).await.unwrap_err();

    match &err {
        NodeError::Client(ClientError::Session(SessionError::HandshakeTimeout {
            conversation: stalled,
            peer,
            elapsed,
        })) => {
            assert_eq!(stalled, &conversation);
            assert_eq!(peer, &pid("bob"));
            assert!(*elapsed >= Duration::from_secs(2));
        },
        other => panic!("expected handshake timeout, got {other:?}"),
    }
    assert!(err.is_transient());
}

/// Messages in `conversation` on `node`, and whether all of its own are acked.
async fn settled(node: &TestNode, conversation: &ConversationId) -> (usize, bool) {
    node.inspect(|c| {
        c.conversation(conversation).map_or((0, false), |log| {
            let acked = log
                .messages()
                .iter()
                .filter(|m| m.author == *c.local())
                .all(|m| m.acknowledged);
            (log.messages().len(), acked)
        })
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_bulk_sends_do_not_stall() {
    // Several times the inbox depth in each direction
    const COUNT: usize = 1000;

    let network = MemoryNetwork::new();
    let alice = spawn_node(&network, "alice", 5);
    let bob = spawn_node(&network, "bob", 6);

    let conversation = alice.create_conversation(&[pid("bob")]).await.unwrap();
    alice.wait_for_key(&conversation).await.unwrap();
    bob.wait_for_key(&conversation).await.unwrap();

    let senders: Vec<_> = [Arc::clone(&alice), Arc::clone(&bob)]
        .into_iter()
        .map(|node| {
            let conversation = conversation.clone();
            tokio::spawn(async move {
                for i in 0..COUNT {
                    let body = format!("{} #{i}", node.local());
                    node.send_message(&conversation, body, None).await.unwrap();
                }
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(60), async {
        for sender in senders {
            sender.await.unwrap();
        }
        loop {
            let (alice_count, alice_acked) = settled(&alice, &conversation).await;
            let (bob_count, bob_acked) = settled(&bob, &conversation).await;
            if alice_count == 2 * COUNT && bob_count == 2 * COUNT && alice_acked && bob_acked {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unreachable_peer_does_not_fail_create() {
    let network = MemoryNetwork::new();
    let alice = spawn_node(&network, "alice", 4);

    let conversation = alice.create_conversation(&[pid("ghost")]).await.unwrap();
    let can_send = alice.inspect(|c| c.can_send(&conversation)).await;
    assert!(!can_send);
}
