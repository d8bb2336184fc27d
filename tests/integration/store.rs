//! Cross-node store operations over the real wire protocol.

use std::time::Duration;

use bytes::Bytes;
use strata_core::error::Error;
use strata_core::key::Key;
use strata_services::PeerNode;

use crate::*;

#[tokio::test]
async fn put_routed_to_a_remote_home_is_readable_everywhere() {
    let (server, peers) = start_cluster(2).await;

    // Key homed on node 1, written from node 0.
    let key = Key::new("shared", 1);
    peers[0]
        .store()
        .put(&key, Bytes::from_static(b"payload"))
        .await
        .unwrap();

    // The home node sees it in its local map, the writer reads it back
    // over the wire.
    assert_eq!(
        peers[1].store().get_local("shared"),
        Some(Bytes::from_static(b"payload"))
    );
    assert_eq!(
        peers[0].store().get(&key).await.unwrap(),
        Bytes::from_static(b"payload")
    );

    server.shutdown();
}

#[tokio::test]
async fn remote_get_on_an_absent_key_reports_key_not_found() {
    let (server, peers) = start_cluster(2).await;

    let key = Key::new("nowhere", 1);
    let err = peers[0].store().get(&key).await.unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(k) if k.name == "nowhere" && k.home == 1));

    server.shutdown();
}

#[tokio::test]
async fn wait_and_get_suspends_until_the_producer_puts() {
    let (server, peers) = start_cluster(2).await;

    let key = Key::new("answer", 1);
    let consumer = {
        let store = peers[0].store().clone();
        let key = key.clone();
        tokio::spawn(async move { store.wait_and_get(&key).await })
    };
    // Give the consumer time to register as a held request on node 1.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!consumer.is_finished(), "consumer returned before the put");

    peers[1]
        .store()
        .put(&key, Bytes::from_static(b"42"))
        .await
        .unwrap();

    assert_eq!(consumer.await.unwrap().unwrap(), Bytes::from_static(b"42"));

    server.shutdown();
}

#[tokio::test]
async fn wait_and_get_past_the_deadline_reports_timeout() {
    let server = strata_services::RendezvousServer::start("127.0.0.1:0")
        .await
        .unwrap();

    // A requester with a one-second deadline, so the test stays quick.
    let mut config = peer_config(server.addr(), 0);
    config.store.op_timeout_secs = 1;
    let impatient = PeerNode::start(&config).await.unwrap();
    let other = start_peer(server.addr(), 1).await;
    let peers = vec![impatient, other];
    wait_for_membership(&peers, 2).await;

    let key = Key::new("never-put", 1);
    let err = peers[0].store().wait_and_get(&key).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { operation: "wait_and_get", .. }));

    server.shutdown();
}

#[tokio::test]
async fn a_second_put_overwrites_the_stored_blob() {
    let (server, peers) = start_cluster(2).await;

    let key = Key::new("versioned", 1);
    peers[0].store().put(&key, Bytes::from_static(b"v1")).await.unwrap();
    peers[0].store().put(&key, Bytes::from_static(b"v2")).await.unwrap();

    assert_eq!(
        peers[1].store().get(&key).await.unwrap(),
        Bytes::from_static(b"v2")
    );

    server.shutdown();
}
