use serde::Deserialize;

use crate::error::Result;

/// A single peer entry as it appears in a cluster configuration file:
/// `id = 0` and `address = "127.0.0.1:7000"`.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub id: u64,
    pub address: String,
}

/// Configuration for a `raftkv` server binary.
///
/// Loaded from a TOML file (path given on the command line) layered under
/// environment variables prefixed `RAFTKV_`, e.g. `RAFTKV_LISTEN=...`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// This server's id. Must match one entry in `peers`.
    pub id: u64,
    /// Address this server's gRPC endpoint binds to.
    pub listen: String,
    /// The full cluster membership, including this server.
    pub peers: Vec<PeerConfig>,
    /// Directory used for the write-ahead persistence file and snapshots.
    pub data_dir: String,
    /// Election timeout lower bound, in milliseconds.
    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    /// Election timeout upper bound, in milliseconds.
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
    /// Heartbeat interval, in milliseconds. Must be well below the
    /// election timeout lower bound.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

fn default_election_timeout_min_ms() -> u64 {
    150
}

fn default_election_timeout_max_ms() -> u64 {
    300
}

fn default_heartbeat_ms() -> u64 {
    50
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RAFTKV").separator("__"))
            .build()?;
        Ok(raw.try_deserialize()?)
    }
}

/// Configuration for the `raftkv` clerk CLI binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub servers: Vec<PeerConfig>,
}

impl ClientConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RAFTKV").separator("__"))
            .build()?;
        Ok(raw.try_deserialize()?)
    }
}
