//! Cluster teardown: the Kill broadcast and the completion barrier.

use std::time::Duration;

use strata_core::message::{Message, Payload};
use strata_services::frame;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::*;

/// Poll until connections to `addr` are refused, or panic after ~5s.
async fn wait_until_refused(addr: &str) {
    for _ in 0..500 {
        if TcpStream::connect(addr).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener at {addr} still accepting connections");
}

#[tokio::test]
async fn server_shutdown_kills_every_peer() {
    let (server, peers) = start_cluster(3).await;

    server.shutdown();

    for peer in &peers {
        timeout(Duration::from_secs(5), peer.wait_shutdown())
            .await
            .expect("peer never received the kill");
        assert!(peer.is_shutdown());
    }
}

#[tokio::test]
async fn cluster_stops_once_every_peer_reports_complete() {
    let (_server, peers) = start_cluster(2).await;

    peers[0].complete().unwrap();
    // One report is not the barrier; nobody shuts down yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!peers[0].is_shutdown());
    assert!(!peers[1].is_shutdown());

    peers[1].complete().unwrap();
    for peer in &peers {
        timeout(Duration::from_secs(5), peer.wait_shutdown())
            .await
            .expect("barrier release never arrived");
    }
}

#[tokio::test]
async fn shutdown_closes_the_store_listener() {
    let (server, peers) = start_cluster(2).await;
    let addr = peers[0].local_addr().to_string();

    peers[0].shutdown();
    // The accept loop observes the trip even though it fired outside an
    // active select arm, and drops the listener with it.
    wait_until_refused(&addr).await;

    server.shutdown();
}

#[tokio::test]
async fn dropping_a_node_releases_its_listener_and_tasks() {
    let (server, mut peers) = start_cluster(2).await;

    let departed = peers.pop().unwrap();
    let addr = departed.local_addr().to_string();
    drop(departed);

    wait_until_refused(&addr).await;

    server.shutdown();
}

#[tokio::test]
async fn a_held_wait_dies_with_the_node() {
    let (server, peers) = start_cluster(2).await;
    let addr = peers[1].local_addr().to_string();

    // Park a wait for a key nobody will put, straight over the wire.
    let mut conn = TcpStream::connect(&addr).await.unwrap();
    let request = Message::new(
        "127.0.0.1:1",
        addr.clone(),
        Payload::WaitGet { key_name: "never-produced".into() },
    );
    frame::write_message(&mut conn, &request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    peers[1].shutdown();

    // The connection closes promptly instead of riding out the full
    // thirty-second hold deadline.
    let outcome = timeout(Duration::from_secs(2), frame::read_message(&mut conn, &addr))
        .await
        .expect("held wait outlived the node's shutdown");
    assert!(matches!(outcome, Ok(None) | Err(_)));

    server.shutdown();
}

#[tokio::test]
async fn local_shutdown_takes_effect_without_the_server() {
    let (server, peers) = start_cluster(2).await;

    peers[0].shutdown();
    timeout(Duration::from_secs(1), peers[0].wait_shutdown())
        .await
        .expect("local trip should resolve immediately");
    assert!(peers[0].is_shutdown());
    assert!(!peers[1].is_shutdown());

    server.shutdown();
}
