//! Shared ring topology, key store, shift protocol and routing engine.
//!
//! Composed by the `master`, `worker` and `client` binaries into the
//! three role behaviors of the ring protocol: a master that assigns
//! worker ids and drives rebalancing, workers that own contiguous key
//! ranges and forward requests along the ring, and clients that insert
//! and look up `(key, chunk, subchunk)` tuples.

pub mod config;
pub mod do_list;
pub mod error;
pub mod key;
pub mod key_store;
pub mod neighbor;
pub mod router;
pub mod udp_server;
pub mod wire;
pub mod worker_list;

pub use error::Error;
pub use key::{CompositeKey, KeyRange};
pub use key_store::KeyStore;
pub use wire::{from_wire_range, to_wire_range};
pub use worker_list::{NetworkAddress, WorkerEntry, WorkerId, WorkerList};
