//! presence-node: Presence demo over an in-process bus.
//!
//! Joins a channel alongside a handful of simulated peers that come and go
//! without saying goodbye. Lines typed on stdin are sent as chat messages.

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use presence_core::transport::PubSub;
use presence_core::{MemberName, PresenceConfig, PresenceEvent};
use presence_node::{LocalBus, Session};

#[derive(Parser, Debug)]
#[command(name = "presence-node")]
#[command(about = "Presence demo over an in-process pub/sub bus")]
struct Args {
    /// Display name (generated if not provided)
    #[arg(short, long)]
    name: Option<String>,

    /// Channel to join
    #[arg(short, long, default_value = "lobby")]
    channel: String,

    /// Number of simulated peers
    #[arg(short, long, default_value_t = 3)]
    peers: usize,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = 3000)]
    heartbeat_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// A simulated peer: joins after `delay`, greets the channel, then vanishes
/// after `lifetime` without any leave signal.
async fn run_simulated_peer(
    bus: LocalBus,
    name: MemberName,
    channel: String,
    config: PresenceConfig,
    delay: Duration,
    lifetime: Duration,
) {
    tokio::time::sleep(delay).await;

    let transport: Arc<dyn PubSub> = Arc::new(bus.connect());
    let (mut session, _events) = match Session::new(name.clone(), transport, config) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create simulated peer {}: {}", name, e);
            return;
        }
    };

    if let Err(e) = session.join(&channel).await {
        error!("Simulated peer {} failed to join: {}", name, e);
        return;
    }
    if let Err(e) = session.send(format!("hello from {}", name)).await {
        warn!("Simulated peer {} failed to greet: {}", name, e);
    }

    tokio::time::sleep(lifetime).await;
    debug!("Simulated peer {} vanishing after {:?}", name, lifetime);
}

fn render(event: PresenceEvent) {
    match event {
        PresenceEvent::Joined { name } => info!("* {} joined", name),
        PresenceEvent::Left { name } => info!("* {} left", name),
        PresenceEvent::Message { name, payload } => info!("<{}> {}", name, payload),
        PresenceEvent::Error { description } => warn!("! {}", description),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,presence_node=debug,presence_core=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let name = match args.name {
        Some(name) => name.parse::<MemberName>()?,
        None => {
            let name = MemberName::generate();
            info!("Generated name: {}", name);
            name
        }
    };

    let config = PresenceConfig::with_heartbeat_interval(Duration::from_millis(args.heartbeat_ms));
    config.validate()?;

    let bus = LocalBus::new();
    let transport: Arc<dyn PubSub> = Arc::new(bus.connect());
    let (mut session, mut events) = Session::new(name, transport, config.clone())?;
    session.join(&args.channel).await?;

    for i in 0..args.peers {
        let heartbeats_alive: u32 = rand::rng().random_range(3..=10);
        let peer_name = MemberName::generate();
        tokio::spawn(run_simulated_peer(
            bus.clone(),
            peer_name,
            args.channel.clone(),
            config.clone(),
            config.heartbeat_interval * (i as u32 + 1),
            config.heartbeat_interval * heartbeats_alive,
        ));
    }

    info!("Running. Type a line to send it, Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                render(event);
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            if let Err(e) = session.send(line).await {
                                warn!("Send failed: {}", e);
                            }
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    session.disconnect();
    info!("Shutting down");
    Ok(())
}
