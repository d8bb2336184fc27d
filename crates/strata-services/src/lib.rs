//! strata-services — networking, key-value store, and chunked columns.
//!
//! Layering, leaf to root: `frame` (length-prefixed message I/O) →
//! `directory` (membership snapshots) → `rendezvous` / `node` (the two
//! endpoint roles) → `kvstore` (put / get / wait-and-get) → `column`
//! (chunked columns spilled into the store).

pub mod column;
pub mod directory;
pub mod frame;
pub mod kvstore;
pub mod node;
pub mod rendezvous;

pub use column::ChunkedColumn;
pub use directory::{Directory, DirectoryView};
pub use kvstore::KvStore;
pub use node::PeerNode;
pub use rendezvous::RendezvousServer;
