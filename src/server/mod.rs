// src/server/mod.rs

//! Node process wiring: binds both listeners, spawns the gossip task and a
//! connection task per accepted socket, and drives graceful shutdown.

mod listener;

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection;
use crate::core::cluster::gossip;
use crate::core::cluster::state::{ClusterState, NodeIdentity, NodeState};
use crate::core::error::NodeError;

pub use listener::bind_reusable;

/// Runs a node until `shutdown` fires, accepting on both the client and
/// cluster ports and driving one gossip round per `gossip::PING_INTERVAL`.
pub async fn run(config: Config, mut shutdown: broadcast::Receiver<()>) -> Result<(), NodeError> {
    let myself = NodeIdentity {
        name: config.name.clone(),
        ip: config.ip.clone(),
        cluster_port: config.cluster_port,
        client_port: config.client_port,
    };

    let mut cluster = ClusterState::new(myself);
    if config.serve_all_slots {
        cluster.claim_all_slots();
        info!(node = %config.name, "seeded single-node cluster owning all slots");
    }
    let node = Arc::new(Mutex::new(NodeState {
        cluster,
        store: Default::default(),
    }));

    let client_listener = bind_reusable(&config.client_addr())?;
    let cluster_listener = bind_reusable(&config.cluster_addr())?;
    info!(
        client_addr = %config.client_addr(),
        cluster_addr = %config.cluster_addr(),
        "node listening"
    );

    let mut connections = JoinSet::new();
    connections.spawn(gossip::run(node.clone(), shutdown.resubscribe()));

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("node shutting down, waiting for connections to drain");
                break;
            }
            accepted = client_listener.accept() => {
                spawn_connection(accepted, &node, "client", &shutdown, &mut connections);
            }
            accepted = cluster_listener.accept() => {
                spawn_connection(accepted, &node, "cluster", &shutdown, &mut connections);
            }
        }
    }

    connections.abort_all();
    while connections.join_next().await.is_some() {}
    Ok(())
}

fn spawn_connection(
    accepted: std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)>,
    node: &Arc<Mutex<NodeState>>,
    label: &'static str,
    shutdown: &broadcast::Receiver<()>,
    connections: &mut JoinSet<()>,
) {
    match accepted {
        Ok((stream, peer)) => {
            let node = node.clone();
            let shutdown = shutdown.resubscribe();
            connections.spawn(connection::run(stream, peer, node, label, shutdown));
        }
        Err(e) => warn!(channel = label, error = %e, "failed to accept connection"),
    }
}
