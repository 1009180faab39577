//! Standalone gossip node binary: binds a UDP transport, starts the gossip
//! protocol against a set of seeds, and optionally layers a recipe on top.

mod cli;
mod config;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gossip_core::{start, start_timers, GossipMessage, NullParticipant};
use gossip_recipes::{KeyChanged, KeyValueStoreParticipant, LeaderElected, LeaderElectionParticipant};
use gossip_transport::{Transport, UdpTransport};

use cli::{Commands, GossipNodeCli, Recipe};
use config::GossipConfig;
use logging::LogFormat;

struct LoggingLeaderCallback;

impl LeaderElected for LoggingLeaderCallback {
    fn leader_elected(&mut self, is_leader: bool, leader: String) {
        tracing::info!(%leader, is_leader, "leader election settled");
    }
}

struct LoggingKeyCallback;

impl KeyChanged for LoggingKeyCallback {
    fn key_changed(&mut self, peer: &str, key: &str, value: &serde_json::Value) {
        tracing::info!(%peer, %key, %value, "key changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GossipNodeCli::parse();

    match cli.command {
        Commands::Version => {
            println!("gossip-node {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(args) => {
            let log_level = args.log_level.clone();
            let log_format = LogFormat::from_str_lossy(&args.log_format);
            logging::init_logging(&log_level, log_format);
            run(GossipConfig::from_args(args)?).await
        }
    }
}

async fn run(config: GossipConfig) -> Result<()> {
    let transport = Arc::new(UdpTransport::bind(&config.bind).await?);
    let name = transport.local_name().to_string();
    tracing::info!(%name, seeds = ?config.seeds, "starting gossip node");

    let scheduler: Arc<dyn gossip_core::Scheduler> = Arc::new(gossip_core::TokioClock::new());

    let handle = match config.recipe {
        Recipe::None => start(name.clone(), config.phi_threshold, Box::new(NullParticipant), scheduler.clone())?,
        Recipe::LeaderElection => {
            let (participant, cell) = LeaderElectionParticipant::new(LoggingLeaderCallback);
            let handle = start(name.clone(), config.phi_threshold, Box::new(participant), scheduler.clone())?;
            cell.set(handle.clone()).ok();
            LeaderElectionParticipant::<LoggingLeaderCallback>::announce(&handle, config.priority);
            handle
        }
        Recipe::KeyValueStore => {
            let participant = KeyValueStoreParticipant::new(LoggingKeyCallback);
            start(name.clone(), config.phi_threshold, Box::new(participant), scheduler.clone())?
        }
    };

    for (key, value) in config.attrs {
        handle.set(key, value);
    }

    handle.seed(&config.seeds);

    let send_transport = transport.clone();
    let transport_send: Arc<dyn Fn(String, GossipMessage) + Send + Sync> = Arc::new(move |peer, message| {
        let transport = send_transport.clone();
        tokio::spawn(async move {
            if let Err(err) = transport.send(&peer, message).await {
                tracing::warn!(%peer, %err, "gossip send failed");
            }
        });
    });
    let (heartbeat_timer, gossip_timer) = start_timers(&handle, transport_send.clone());

    let initial_digest = handle.digest();
    for seed in &config.seeds {
        let request = GossipMessage::Request { digest: initial_digest.clone() };
        if let Err(err) = transport.send(seed, request).await {
            tracing::warn!(seed = %seed, %err, "failed to contact seed");
        }
    }

    let receive_handle = handle.clone();
    let receive_transport = transport.clone();
    let send_for_replies = transport_send.clone();
    let receive_loop = tokio::spawn(async move {
        loop {
            match receive_transport.receive().await {
                Ok(messages) => {
                    for (peer, message) in messages {
                        if let Some(reply) = receive_handle.handle_message(message) {
                            send_for_replies(peer, reply);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "transport receive failed");
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    heartbeat_timer.cancel();
    gossip_timer.cancel();
    receive_loop.abort();
    Ok(())
}
