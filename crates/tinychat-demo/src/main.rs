//! TinyChat demo entry point.
//!
//! Starts N peers on an in-process network, opens one group conversation,
//! lets every peer send a few messages and logs what each peer ends up with.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tinychat_app::{MemoryNetwork, Node, NodeConfig, SystemEnv};
use tinychat_client::ClientConfig;
use tinychat_core::{EnvRng, SessionConfig};
use tinychat_crypto::RsaIdentity;
use tinychat_proto::ParticipantId;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// In-process TinyChat group demo
#[derive(Parser, Debug)]
#[command(name = "tinychat-demo")]
#[command(about = "Run a group of TinyChat peers over an in-process network")]
#[command(version)]
struct Args {
    /// Number of peers in the group
    #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u8).range(2..=16))]
    peers: u8,

    /// Messages each peer sends
    #[arg(short, long, default_value = "2")]
    messages: usize,

    /// RSA modulus size for peer identities
    #[arg(long, default_value = "2048")]
    rsa_bits: usize,

    /// Seconds to wait for a session key before giving up
    #[arg(long, default_value = "10")]
    key_wait_secs: u64,

    /// Disable group key fan-out (only the first pair gets a key)
    #[arg(long)]
    no_group_fanout: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            client: ClientConfig {
                session: SessionConfig {
                    rsa_modulus_bits: self.rsa_bits,
                    group_fanout: !self.no_group_fanout,
                    ..SessionConfig::default()
                },
                ..ClientConfig::default()
            },
            key_wait_timeout: Duration::from_secs(self.key_wait_secs),
            ..NodeConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.node_config();
    let env = SystemEnv::new();
    let network = MemoryNetwork::new();

    let ids = (0..args.peers)
        .map(|i| ParticipantId::new(format!("peer{i}")))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(peers = ids.len(), bits = args.rsa_bits, "generating identities");
    let mut nodes = Vec::with_capacity(ids.len());
    let mut tasks = Vec::with_capacity(ids.len());
    for id in &ids {
        let (transport, inbox) = network.register(id.clone())?;
        let identity = RsaIdentity::generate(&mut EnvRng::new(&env), args.rsa_bits)?;
        let node = Arc::new(Node::new(env, id.clone(), identity, transport, config.clone())?);

        let runner = Arc::clone(&node);
        tasks.push(tokio::spawn(async move { runner.run(inbox).await }));
        nodes.push(node);
    }

    let Some((creator, _)) = nodes.split_first() else {
        return Err("no peers".into());
    };
    let conversation = creator.create_conversation(&ids[1..]).await?;
    for node in &nodes {
        node.wait_for_key(&conversation).await?;
    }
    tracing::info!(%conversation, "every peer holds the session key");

    for round in 0..args.messages {
        for node in &nodes {
            let body = format!("hello #{round} from {}", node.local());
            node.send_message(&conversation, body, None).await?;
        }
    }

    let expected = nodes.len() * args.messages;
    tokio::time::timeout(config.key_wait_timeout, async {
        loop {
            let mut complete = true;
            for node in &nodes {
                complete &= node
                    .inspect(|c| {
                        c.conversation(&conversation).is_some_and(|log| {
                            let own_acked = log
                                .messages()
                                .iter()
                                .all(|m| m.acknowledged || m.author != *c.local());
                            log.messages().len() == expected && own_acked
                        })
                    })
                    .await;
            }
            if complete {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;

    for node in &nodes {
        node.inspect(|c| {
            let messages =
                c.conversation(&conversation).map(|log| log.messages()).unwrap_or_default();
            for message in messages {
                tracing::info!(
                    peer = %c.local(),
                    author = %message.author,
                    time = %message.time,
                    acked_by = message.delivered_to.len(),
                    "{}",
                    message.body
                );
            }
        })
        .await;
    }

    for id in &ids {
        network.unregister(id)?;
    }
    for task in tasks {
        task.await?;
    }
    tracing::info!("all peers stopped");
    Ok(())
}
