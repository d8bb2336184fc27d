//! Membership propagation through the rendezvous server.

use std::collections::HashSet;
use std::time::Duration;

use crate::*;

#[tokio::test]
async fn every_peer_converges_on_the_full_membership() {
    let (server, peers) = start_cluster(3).await;

    let expected: HashSet<String> = peers.iter().map(|p| p.local_addr().to_string()).collect();
    for peer in &peers {
        let snapshot = peer.store().directory().snapshot();
        let seen: HashSet<String> = snapshot.addresses.iter().cloned().collect();
        assert_eq!(seen, expected, "peer {} has a stale view", peer.node_index());
        assert_eq!(snapshot.node_indexes.len(), 3);
    }

    server.shutdown();
}

#[tokio::test]
async fn a_departed_peer_is_dropped_from_every_view() {
    let (server, mut peers) = start_cluster(3).await;

    let departed = peers.pop().unwrap();
    let departed_addr = departed.local_addr().to_string();
    // Dropping the node closes its control connection; the server
    // prunes it and pushes the shrunken directory to the survivors.
    drop(departed);

    wait_for_membership(&peers, 2).await;
    for peer in &peers {
        let snapshot = peer.store().directory().snapshot();
        assert!(!snapshot.addresses.contains(&departed_addr));
    }

    server.shutdown();
}

#[tokio::test]
async fn directory_views_can_resolve_peer_addresses() {
    let (server, peers) = start_cluster(2).await;

    let view = peers[0].store().directory();
    assert_eq!(
        view.addr_of(1).as_deref(),
        Some(peers[1].local_addr()),
        "node 1's address should resolve through node 0's view"
    );
    assert_eq!(view.addr_of(7), None);
    assert_eq!(peers[0].store().get_num_other_nodes(), 1);

    server.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
}
