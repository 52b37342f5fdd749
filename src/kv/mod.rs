//! A linearizable key-value store replicated over [`crate::raft`].

pub mod client;
pub mod rpc;
pub mod server;

use serde::{Deserialize, Serialize};

/// The operation a [`Command`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Get,
    Put,
    Append,
}

/// What gets serialized and handed to `Raft::start` as the opaque command
/// bytes. `client_id`/`sequence_number` give the apply loop everything it
/// needs to dedup a command that a client retried after a timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub client_id: u64,
    pub sequence_number: u64,
    pub op: Op,
    pub key: String,
    pub value: Vec<u8>,
}

/// The result of applying a [`Command`], handed back to whoever is
/// waiting on its commit.
#[derive(Debug, Clone)]
pub enum KvOutcome {
    Value(Option<Vec<u8>>),
    Ok,
    /// The waiter's entry was overwritten before it committed, because a
    /// different server became leader in the meantime.
    Invalidated,
}

pub use server::KvServer;
