#![forbid(unsafe_code)]
//! ChainSync node: listen for (or dial) one peer, mine and keep the chains in step.

use chainsync::config::load_config;
use chainsync::network::{parse_port, PeerLink};
use chainsync::node::Node;
use chainsync::ChainEvent;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chainsync-node", about = "Mine and sync a proof-of-work chain with one peer")]
struct Args {
    /// Port of a peer node on the configured host; without it, wait for a peer to dial in.
    #[arg(long, value_parser = parse_port_arg)]
    connect: Option<u16>,
}

fn parse_port_arg(raw: &str) -> Result<u16, String> {
    parse_port(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = load_config()?;

    let mut node = Node::new(config);
    let link = match args.connect {
        Some(port) => node.outbound_link(port),
        None => {
            let (port, listener) = node.listen().await?;
            println!("ONLINE: {}", port);
            println!("Server started. Waiting for client to connect...");
            PeerLink::Inbound(listener)
        }
    };

    let events = node.subscribe();
    std::thread::spawn(move || {
        for event in events {
            match event {
                ChainEvent::Block { block, status } => println!("[{:?}] {}", status, block),
                ChainEvent::Replaced { length } => println!("Adopted peer chain of {} blocks", length),
            }
        }
    });

    let tasks = node.start(link);

    tokio::signal::ctrl_c().await?;
    node.shutdown();

    let (miner, sync) = tasks.join().await;
    if let Some(stats) = miner {
        info!(
            "Mined {} blocks ({} rejected)",
            stats.blocks_accepted, stats.blocks_rejected
        );
    }
    match sync {
        Some(Ok(stats)) => info!("Sync: {:?}", stats),
        Some(Err(e)) => warn!("Sync ended with error: {}", e),
        None => warn!("Sync task did not finish cleanly"),
    }
    println!("Final chain length: {}", node.chain().read().len());
    Ok(())
}
