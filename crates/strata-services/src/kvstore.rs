//! The key-value store.
//!
//! Each key has one home node. Operations on keys homed here touch the
//! local blob map directly; operations on keys homed elsewhere become
//! RPCs to the home node (one short-lived connection per request, so a
//! held WaitGet can never swallow the reply to a later call).
//!
//! Waiting semantics: a `wait_and_get` on an absent local key registers
//! a oneshot waiter under the waiter-table lock, re-checking the map
//! inside that lock — a concurrent `put` either lands before the check
//! (the waiter returns immediately) or drains the table afterwards, so
//! no wakeup is ever lost. Every blocking path carries a deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use strata_core::error::{Error, Result};
use strata_core::key::Key;
use strata_core::message::{Message, Payload};

use crate::directory::DirectoryView;
use crate::frame;

/// Tunables the store needs from config.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Deadline for every blocking operation, client and server side.
    pub op_timeout: Duration,
    /// Connection attempts before ConnectionLost.
    pub connect_retries: u32,
    /// Backoff between connection attempts.
    pub retry_backoff: Duration,
    /// Elements per flushed column chunk.
    pub chunk_size: usize,
}

impl StoreSettings {
    pub fn from_config(config: &strata_core::config::StrataConfig) -> Self {
        Self {
            op_timeout: config.store.op_timeout(),
            connect_retries: config.cluster.connect_retries,
            retry_backoff: config.cluster.retry_backoff(),
            chunk_size: config.store.chunk_size,
        }
    }
}

/// Cheaply cloneable store handle; all clones share state.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<Inner>,
}

struct Inner {
    local_addr: String,
    directory: DirectoryView,
    settings: StoreSettings,
    /// Blobs for keys homed on this node, by key name.
    local: DashMap<String, Bytes>,
    /// Pending waiters by key name; drained (cleared) when the key is produced.
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Bytes>>>>,
}

impl KvStore {
    pub fn new(local_addr: impl Into<String>, directory: DirectoryView, settings: StoreSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                local_addr: local_addr.into(),
                directory,
                settings,
                local: DashMap::new(),
                waiters: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn node_index(&self) -> u32 {
        self.inner.directory.self_index()
    }

    pub fn local_addr(&self) -> &str {
        &self.inner.local_addr
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.settings.chunk_size
    }

    pub fn directory(&self) -> &DirectoryView {
        &self.inner.directory
    }

    /// Uniformly random known node index, for placing fresh chunk keys.
    pub fn get_random_node_index(&self) -> u32 {
        self.inner.directory.random_node_index()
    }

    pub fn get_num_other_nodes(&self) -> usize {
        self.inner.directory.num_other_nodes()
    }

    // ── Store operations ─────────────────────────────────────────────────────

    /// Store a blob under a key, routing to the key's home node.
    pub async fn put(&self, key: &Key, blob: Bytes) -> Result<()> {
        if key.home == self.node_index() {
            self.deliver_local(&key.name, blob).await;
            return Ok(());
        }

        tracing::debug!(key = %key, bytes = blob.len(), "put routed to remote home");
        let reply = self
            .rpc(key.home, Payload::Put { key_name: key.name.clone(), blob }, "put")
            .await?;
        match reply.payload {
            Payload::Ack => Ok(()),
            other => Err(Error::protocol(format!(
                "expected Ack for put, got {:?}",
                other.kind()
            ))),
        }
    }

    /// Fetch a blob without waiting: the value must already exist.
    pub async fn get(&self, key: &Key) -> Result<Bytes> {
        if key.home == self.node_index() {
            return self
                .get_local(&key.name)
                .ok_or_else(|| Error::KeyNotFound(key.clone()));
        }

        tracing::debug!(key = %key, "get routed to remote home");
        let reply = self
            .rpc(key.home, Payload::Get { key_name: key.name.clone() }, "get")
            .await?;
        match reply.payload {
            Payload::Value { blob } => Ok(blob),
            // The home node answers a miss with Ack (see DESIGN.md).
            Payload::Ack => Err(Error::KeyNotFound(key.clone())),
            other => Err(Error::protocol(format!(
                "expected Value for get, got {:?}",
                other.kind()
            ))),
        }
    }

    /// Fetch a blob, suspending until it exists (bounded by the op timeout).
    pub async fn wait_and_get(&self, key: &Key) -> Result<Bytes> {
        if key.home == self.node_index() {
            return self.wait_local(&key.name).await;
        }

        tracing::debug!(key = %key, "wait_and_get routed to remote home");
        let reply = self
            .rpc(key.home, Payload::WaitGet { key_name: key.name.clone() }, "wait_and_get")
            .await?;
        match reply.payload {
            Payload::Value { blob } => Ok(blob),
            // The home node abandoned the held request at its own deadline.
            Payload::Ack => Err(Error::Timeout {
                operation: "wait_and_get",
                seconds: self.inner.settings.op_timeout.as_secs(),
            }),
            other => Err(Error::protocol(format!(
                "expected Value for wait_and_get, got {:?}",
                other.kind()
            ))),
        }
    }

    // ── Local half, also used by the peer's request handlers ─────────────────

    /// Current local blob, if present. Touches only this node's map.
    pub fn get_local(&self, name: &str) -> Option<Bytes> {
        self.inner.local.get(name).map(|v| v.clone())
    }

    /// Store a blob locally and wake every waiter registered for the name.
    pub async fn deliver_local(&self, name: &str, blob: Bytes) {
        self.inner.local.insert(name.to_string(), blob.clone());

        let pending = {
            let mut waiters = self.inner.waiters.lock().await;
            waiters.remove(name)
        };
        if let Some(senders) = pending {
            tracing::debug!(key_name = name, waiters = senders.len(), "waking waiters");
            for tx in senders {
                // A receiver that timed out and went away is fine to miss.
                let _ = tx.send(blob.clone());
            }
        }
    }

    /// Block until the named key exists locally, bounded by the op timeout.
    pub async fn wait_local(&self, name: &str) -> Result<Bytes> {
        let rx = {
            let mut waiters = self.inner.waiters.lock().await;
            // Re-check under the lock: a put that raced us has either
            // already inserted (we see it here) or will drain the table
            // after we register.
            if let Some(blob) = self.get_local(name) {
                return Ok(blob);
            }
            let (tx, rx) = oneshot::channel();
            waiters.entry(name.to_string()).or_default().push(tx);
            rx
        };

        let deadline = self.inner.settings.op_timeout;
        match timeout(deadline, rx).await {
            Ok(Ok(blob)) => Ok(blob),
            Ok(Err(_)) => Err(Error::protocol("store dropped while waiting")),
            Err(_) => Err(Error::Timeout {
                operation: "wait_and_get",
                seconds: deadline.as_secs(),
            }),
        }
    }

    // ── RPC plumbing ─────────────────────────────────────────────────────────

    /// One request, one reply, one short-lived connection.
    async fn rpc(&self, home: u32, payload: Payload, operation: &'static str) -> Result<Message> {
        let deadline = self.inner.settings.op_timeout;
        match timeout(deadline, self.rpc_inner(home, payload)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout { operation, seconds: deadline.as_secs() }),
        }
    }

    async fn rpc_inner(&self, home: u32, payload: Payload) -> Result<Message> {
        let addr = self
            .inner
            .directory
            .addr_of(home)
            .ok_or_else(|| Error::protocol(format!("no address known for node {home}")))?;

        let mut stream = frame::connect_with_retries(
            &addr,
            self.inner.settings.connect_retries,
            self.inner.settings.retry_backoff,
        )
        .await?;
        let request = Message::new(self.inner.local_addr.clone(), addr.clone(), payload);
        frame::write_message(&mut stream, &request).await?;

        match frame::read_message(&mut stream, &addr).await? {
            Some(reply) => Ok(reply),
            None => Err(Error::connection_lost(addr)),
        }
    }
}
