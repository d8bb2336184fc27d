//! strata integration test harness.
//!
//! Every test boots a real cluster — one rendezvous server plus peer
//! nodes — inside this process on 127.0.0.1 ephemeral ports, so the
//! full wire protocol is exercised without any external setup.

use std::time::Duration;

use strata_core::config::StrataConfig;
use strata_services::{PeerNode, RendezvousServer};

mod column;
mod directory;
mod shutdown;
mod store;

// ── Harness ──────────────────────────────────────────────────────────────────

/// Config for one in-process peer pointed at a running rendezvous server.
pub fn peer_config(rendezvous_addr: &str, node_index: u32) -> StrataConfig {
    let mut config = StrataConfig::default();
    config.node.bind_addr = "127.0.0.1:0".into();
    config.node.node_index = node_index;
    config.cluster.rendezvous_addr = rendezvous_addr.to_string();
    config
}

pub async fn start_peer(rendezvous_addr: &str, node_index: u32) -> PeerNode {
    PeerNode::start(&peer_config(rendezvous_addr, node_index))
        .await
        .expect("peer should start")
}

/// Boot a rendezvous server and `n` peers, indexed 0..n, and wait until
/// every peer's directory view contains all `n` members.
pub async fn start_cluster(n: u32) -> (RendezvousServer, Vec<PeerNode>) {
    let server = RendezvousServer::start("127.0.0.1:0")
        .await
        .expect("rendezvous should start");

    let mut peers = Vec::new();
    for index in 0..n {
        peers.push(start_peer(server.addr(), index).await);
    }
    wait_for_membership(&peers, n as usize).await;
    (server, peers)
}

/// Poll until every peer sees `expected` members, or panic after ~5s.
/// Directory propagation is eventual, not atomic.
pub async fn wait_for_membership(peers: &[PeerNode], expected: usize) {
    for _ in 0..500 {
        if peers
            .iter()
            .all(|p| p.store().directory().snapshot().len() == expected)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let views: Vec<usize> = peers
        .iter()
        .map(|p| p.store().directory().snapshot().len())
        .collect();
    panic!("directories never converged to {expected} members: saw {views:?}");
}
