//! Peer endpoint — one process in the cluster.
//!
//! A peer binds its store listener first (its bound address is its
//! identity), registers with the rendezvous server over a persistent
//! control connection, and then serves two kinds of traffic:
//!
//!   control: Directory pushes replace the whole membership view;
//!            Kill trips local shutdown.
//!   store:   Put / Get / WaitGet requests from other peers, one
//!            request-reply pair at a time per connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{tcp::OwnedReadHalf, tcp::OwnedWriteHalf, TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};

use strata_core::config::StrataConfig;
use strata_core::error::{Error, Result};
use strata_core::message::{Message, Payload};

use crate::directory::{self, Directory};
use crate::frame;
use crate::kvstore::{KvStore, StoreSettings};

/// A running peer node.
pub struct PeerNode {
    store: KvStore,
    control_tx: mpsc::UnboundedSender<Message>,
    rendezvous_addr: String,
    shutdown: ShutdownFlag,
}

impl PeerNode {
    /// Bind, register, and start serving.
    pub async fn start(config: &StrataConfig) -> Result<Self> {
        let settings = StoreSettings::from_config(config);
        let index = config.node.node_index;

        let listener = TcpListener::bind(&config.node.bind_addr).await?;
        let local_addr = listener.local_addr()?.to_string();

        let (dir_tx, view) = directory::channel(index);
        let store = KvStore::new(local_addr.clone(), view, settings);
        let shutdown = ShutdownFlag::new();

        // Control connection to the rendezvous server, with retry: the
        // server may come up after its peers.
        let rendezvous_addr = config.cluster.rendezvous_addr.clone();
        let control = frame::connect_with_retries(
            &rendezvous_addr,
            config.cluster.connect_retries,
            config.cluster.retry_backoff(),
        )
        .await?;
        let (control_reader, control_writer) = control.into_split();
        let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(run_control_writer(
            control_writer,
            control_rx,
            rendezvous_addr.clone(),
        ));

        let register = Message::new(
            local_addr.clone(),
            rendezvous_addr.clone(),
            Payload::Register { node_index: index },
        );
        control_tx
            .send(register)
            .map_err(|_| Error::connection_lost(&rendezvous_addr))?;
        tracing::info!(node = index, addr = %local_addr, rendezvous = %rendezvous_addr, "peer registered");

        tokio::spawn(run_control_reader(
            control_reader,
            rendezvous_addr.clone(),
            dir_tx,
            shutdown.clone(),
        ));
        tokio::spawn(accept_loop(listener, store.clone(), shutdown.clone()));

        Ok(Self { store, control_tx, rendezvous_addr, shutdown })
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub fn node_index(&self) -> u32 {
        self.store.node_index()
    }

    pub fn local_addr(&self) -> &str {
        self.store.local_addr()
    }

    /// Report this node's work as finished (the completion barrier).
    pub fn complete(&self) -> Result<()> {
        let msg = Message::new(
            self.local_addr().to_string(),
            self.rendezvous_addr.clone(),
            Payload::Complete,
        );
        self.control_tx
            .send(msg)
            .map_err(|_| Error::connection_lost(&self.rendezvous_addr))
    }

    /// Trip local shutdown: the accept loop and connection tasks stop on
    /// their next iteration and the sockets close with them.
    pub fn shutdown(&self) {
        self.shutdown.trip();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_tripped()
    }

    /// Suspend until this node shuts down (local call or Kill from the
    /// rendezvous server).
    pub async fn wait_shutdown(&self) {
        self.shutdown.wait().await;
    }
}

impl Drop for PeerNode {
    /// The listener and connection tasks all watch the shutdown flag;
    /// tripping it here keeps them from outliving the handle.
    fn drop(&mut self) {
        self.shutdown.trip();
    }
}

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Broadcast shutdown with a level flag, so a late subscriber cannot
/// miss a trip that already happened.
#[derive(Clone)]
struct ShutdownFlag {
    tripped: Arc<AtomicBool>,
    tx: broadcast::Sender<()>,
}

impl ShutdownFlag {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tripped: Arc::new(AtomicBool::new(false)), tx }
    }

    fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if self.is_tripped() {
            return;
        }
        let _ = rx.recv().await;
    }
}

// ── Control connection tasks ─────────────────────────────────────────────────

async fn run_control_writer(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Message>,
    rendezvous: String,
) {
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = frame::write_message(&mut writer, &msg).await {
            tracing::warn!(rendezvous = %rendezvous, error = %e, "control write failed");
            return;
        }
    }
}

async fn run_control_reader(
    mut reader: OwnedReadHalf,
    rendezvous: String,
    dir_tx: watch::Sender<Directory>,
    shutdown: ShutdownFlag,
) {
    loop {
        let msg = match frame::read_message(&mut reader, &rendezvous).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::warn!(rendezvous = %rendezvous, "rendezvous connection closed");
                return;
            }
            Err(e) => {
                tracing::warn!(rendezvous = %rendezvous, error = %e, "control read failed");
                return;
            }
        };

        match msg.payload {
            Payload::Directory { addresses, node_indexes } => {
                tracing::info!(nodes = addresses.len(), "directory replaced");
                let _ = dir_tx.send(Directory { addresses, node_indexes });
            }
            Payload::Kill => {
                tracing::info!("kill received, shutting down");
                shutdown.trip();
                return;
            }
            Payload::Ack => {}
            other => {
                tracing::warn!(
                    kind = ?other.kind(),
                    "message not accepted on the control connection"
                );
            }
        }
    }
}

// ── Store listener ───────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, store: KvStore, shutdown: ShutdownFlag) {
    loop {
        tokio::select! {
            // Level-checked wait: a trip from before this task ran (or
            // between iterations) still terminates the loop.
            _ = shutdown.wait() => {
                tracing::info!(node = store.node_index(), "store listener stopped");
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
                tokio::spawn(handle_store_conn(
                    store.clone(),
                    stream,
                    peer.to_string(),
                    shutdown.clone(),
                ));
            }
        }
    }
}

/// Serve store requests on one inbound connection until the peer hangs
/// up or the node shuts down.
///
/// A held WaitGet dies with the connection: while the wait is parked it
/// races against shutdown and against the requester closing its end, so
/// abandonment is immediate rather than lasting out the hold deadline.
async fn handle_store_conn(
    store: KvStore,
    stream: TcpStream,
    peer: String,
    shutdown: ShutdownFlag,
) {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        let msg = tokio::select! {
            _ = shutdown.wait() => return,

            read = frame::read_message(&mut reader, &peer) => match read {
                Ok(Some(msg)) => msg,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "store read failed");
                    return;
                }
            },
        };

        let requester = msg.sender;
        let reply = match msg.payload {
            Payload::Put { key_name, blob } => {
                tracing::debug!(peer = %peer, key_name, bytes = blob.len(), "remote put");
                store.deliver_local(&key_name, blob).await;
                Payload::Ack
            }

            Payload::Get { key_name } => match store.get_local(&key_name) {
                Some(blob) => Payload::Value { blob },
                // Miss: a bare Ack; the requester reports KeyNotFound.
                None => {
                    tracing::debug!(peer = %peer, key_name, "get miss");
                    Payload::Ack
                }
            },

            Payload::WaitGet { key_name } => {
                let held = tokio::select! {
                    result = store.wait_local(&key_name) => result,

                    _ = shutdown.wait() => {
                        tracing::debug!(peer = %peer, key_name, "held wait dropped at shutdown");
                        return;
                    }

                    // The requester hanging up abandons the held wait.
                    // Nothing legitimate arrives on this connection while
                    // a reply is owed.
                    read = frame::read_message(&mut reader, &peer) => {
                        if let Ok(Some(unexpected)) = read {
                            tracing::warn!(
                                peer = %peer,
                                kind = ?unexpected.kind(),
                                "message received while a wait was held"
                            );
                        }
                        return;
                    }
                };
                match held {
                    Ok(blob) => Payload::Value { blob },
                    // Held past the hold deadline: answer Ack and move on.
                    Err(Error::Timeout { .. }) => {
                        tracing::debug!(peer = %peer, key_name, "held wait abandoned");
                        Payload::Ack
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer, key_name, error = %e, "held wait failed");
                        return;
                    }
                }
            }

            other => {
                tracing::warn!(
                    peer = %peer,
                    kind = ?other.kind(),
                    "message not accepted at the store role"
                );
                return;
            }
        };

        let reply = Message::new(store.local_addr().to_string(), requester, reply);
        if let Err(e) = frame::write_message(&mut writer, &reply).await {
            tracing::debug!(peer = %peer, error = %e, "reply write failed");
            return;
        }
    }
}
