//! Cluster membership snapshots.
//!
//! The rendezvous server is the single producer of directories; every
//! peer replaces its whole view on each broadcast — there is no
//! incremental merge. Views are published through a `watch` channel so
//! readers always see one coherent, owned snapshot and can await the
//! next replacement.

use rand::Rng;
use tokio::sync::watch;

use strata_core::message::Payload;

/// One full membership snapshot: parallel address / node-index lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub addresses: Vec<String>,
    pub node_indexes: Vec<u32>,
}

impl Directory {
    pub fn len(&self) -> usize {
        self.node_indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_indexes.is_empty()
    }

    /// Address registered for a node index, if known.
    pub fn addr_of(&self, index: u32) -> Option<&str> {
        self.node_indexes
            .iter()
            .position(|&i| i == index)
            .map(|pos| self.addresses[pos].as_str())
    }

    pub fn to_payload(&self) -> Payload {
        Payload::Directory {
            addresses: self.addresses.clone(),
            node_indexes: self.node_indexes.clone(),
        }
    }
}

/// Create a directory channel for one node.
/// The sender side belongs to whoever receives broadcasts (the peer's
/// control task); views are handed to the store and application code.
pub fn channel(self_index: u32) -> (watch::Sender<Directory>, DirectoryView) {
    let (tx, rx) = watch::channel(Directory::default());
    (tx, DirectoryView { rx, self_index })
}

/// Read side of the membership view.
#[derive(Debug, Clone)]
pub struct DirectoryView {
    rx: watch::Receiver<Directory>,
    self_index: u32,
}

impl DirectoryView {
    pub fn self_index(&self) -> u32 {
        self.self_index
    }

    /// Owned copy of the current snapshot.
    pub fn snapshot(&self) -> Directory {
        self.rx.borrow().clone()
    }

    /// Number of known nodes excluding this one.
    pub fn num_other_nodes(&self) -> usize {
        let dir = self.rx.borrow();
        dir.node_indexes
            .iter()
            .filter(|&&i| i != self.self_index)
            .count()
    }

    pub fn addr_of(&self, index: u32) -> Option<String> {
        self.rx.borrow().addr_of(index).map(str::to_owned)
    }

    /// Uniformly random known node index; this node when no peers are known.
    /// Used to choose home nodes for freshly generated chunk keys.
    pub fn random_node_index(&self) -> u32 {
        let dir = self.rx.borrow();
        if dir.node_indexes.is_empty() {
            return self.self_index;
        }
        let pos = rand::thread_rng().gen_range(0..dir.node_indexes.len());
        dir.node_indexes[pos]
    }

    /// Await the next snapshot replacement.
    /// Returns false once the sender side is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
