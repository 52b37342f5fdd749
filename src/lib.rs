pub mod config;
pub mod error;
pub mod kv;
pub mod proto;
pub mod raft;

pub use error::{Error, Result};
