//! The rendezvous server — cluster membership and the completion barrier.
//!
//! Peers connect, send Register, and keep the connection open; the
//! server pushes a fresh, full Directory to every registered peer on
//! each membership change (registration or disconnect — simple, not
//! incremental, propagation). Complete messages feed a barrier: once
//! every registered peer has reported, the server broadcasts Kill and
//! stops. An external Kill (or `shutdown()`) does the same.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::net::{tcp::OwnedWriteHalf, TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};

use strata_core::error::Result;
use strata_core::message::{Message, Payload};

use crate::directory::Directory;
use crate::frame;

struct PeerRecord {
    index: u32,
    addr: String,
    outbox: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Roster {
    peers: Vec<PeerRecord>,
    completed: HashSet<u32>,
}

impl Roster {
    fn directory(&self) -> Directory {
        Directory {
            addresses: self.peers.iter().map(|p| p.addr.clone()).collect(),
            node_indexes: self.peers.iter().map(|p| p.index).collect(),
        }
    }
}

/// Handle to a running rendezvous server.
pub struct RendezvousServer {
    local_addr: String,
    shutdown_tx: broadcast::Sender<()>,
}

impl RendezvousServer {
    /// Bind and start serving. Port 0 gets an OS-assigned port;
    /// `addr()` reports the real one.
    pub async fn start(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?.to_string();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let roster = Arc::new(Mutex::new(Roster::default()));

        tracing::info!(addr = %local_addr, "rendezvous server up");
        tokio::spawn(accept_loop(
            listener,
            local_addr.clone(),
            roster,
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        Ok(Self { local_addr, shutdown_tx })
    }

    pub fn addr(&self) -> &str {
        &self.local_addr
    }

    /// Kill the cluster and stop serving.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn accept_loop(
    listener: TcpListener,
    server_addr: String,
    roster: Arc<Mutex<Roster>>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("rendezvous shutting down, killing cluster");
                kill_all(&*roster.lock().await, &server_addr);
                return;
            }

            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::debug!(peer = %peer, "control connection accepted");
                tokio::spawn(handle_control_conn(
                    stream,
                    peer.to_string(),
                    server_addr.clone(),
                    roster.clone(),
                    shutdown_tx.clone(),
                ));
            }
        }
    }
}

/// One registered-peer control connection: reader here, a writer task
/// fed by the roster's outbox channel.
async fn handle_control_conn(
    stream: TcpStream,
    peer_label: String,
    server_addr: String,
    roster: Arc<Mutex<Roster>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let (mut reader, writer) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(run_writer(writer, outbox_rx, peer_label.clone()));

    // Set once this connection sends Register.
    let mut registered: Option<u32> = None;

    loop {
        let msg = match frame::read_message(&mut reader, &peer_label).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %peer_label, error = %e, "control read failed");
                break;
            }
        };

        match msg.payload {
            Payload::Register { node_index } => {
                let peer_addr = msg.sender;
                tracing::info!(node = node_index, addr = %peer_addr, "peer registered");
                let mut roster = roster.lock().await;
                // A re-register for the same index replaces the old record.
                roster.peers.retain(|p| p.index != node_index);
                roster.peers.push(PeerRecord {
                    index: node_index,
                    addr: peer_addr,
                    outbox: outbox_tx.clone(),
                });
                registered = Some(node_index);
                broadcast_directory(&roster, &server_addr);
            }

            Payload::Complete => {
                let Some(index) = registered else {
                    tracing::warn!(peer = %peer_label, "Complete from unregistered connection");
                    continue;
                };
                let mut roster = roster.lock().await;
                roster.completed.insert(index);
                tracing::info!(
                    node = index,
                    completed = roster.completed.len(),
                    registered = roster.peers.len(),
                    "completion reported"
                );
                let all_done = !roster.peers.is_empty()
                    && roster.peers.iter().all(|p| roster.completed.contains(&p.index));
                if all_done {
                    tracing::info!("every registered node complete, killing cluster");
                    kill_all(&roster, &server_addr);
                    let _ = shutdown_tx.send(());
                }
            }

            // An external Kill asks the server to take the cluster down.
            Payload::Kill => {
                tracing::info!(peer = %peer_label, "kill requested");
                kill_all(&*roster.lock().await, &server_addr);
                let _ = shutdown_tx.send(());
                break;
            }

            Payload::Ack => {}

            other => {
                tracing::warn!(
                    peer = %peer_label,
                    kind = ?other.kind(),
                    "message not accepted at the rendezvous role"
                );
            }
        }
    }

    // Disconnect: prune the roster and tell everyone who is left. Only a
    // record this connection still owns is pruned; a re-registration has
    // already replaced the record, and the fresh one must survive the
    // superseded connection's death.
    if let Some(index) = registered {
        let mut roster = roster.lock().await;
        let before = roster.peers.len();
        roster
            .peers
            .retain(|p| !(p.index == index && p.outbox.same_channel(&outbox_tx)));
        if roster.peers.len() != before {
            tracing::info!(node = index, "peer disconnected, removed from roster");
            broadcast_directory(&roster, &server_addr);
        }
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Message>,
    peer_label: String,
) {
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = frame::write_message(&mut writer, &msg).await {
            tracing::debug!(peer = %peer_label, error = %e, "control write failed");
            return;
        }
    }
}

/// Push the current full membership snapshot to every registered peer.
fn broadcast_directory(roster: &Roster, server_addr: &str) {
    let directory = roster.directory();
    tracing::debug!(nodes = directory.len(), "broadcasting directory");
    for peer in &roster.peers {
        let msg = Message::new(server_addr, peer.addr.clone(), directory.to_payload());
        let _ = peer.outbox.send(msg);
    }
}

fn kill_all(roster: &Roster, server_addr: &str) {
    for peer in &roster.peers {
        let msg = Message::new(server_addr, peer.addr.clone(), Payload::Kill);
        let _ = peer.outbox.send(msg);
    }
}
