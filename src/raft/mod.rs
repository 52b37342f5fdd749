//! The consensus layer: a replicated log with leader election, modeled on
//! the MIT 6.824 Raft lab's `Make`/`GetState`/`Start`/`Kill`/`Snapshot`
//! interface. The KV service in [`crate::kv`] is the only consumer.

pub mod log;
pub mod persister;
pub mod progress;
mod replica;
pub mod rpc;
pub mod transport;

pub use replica::{ApplyMsg, Raft};
pub use rpc::RaftServer;
