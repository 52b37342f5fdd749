use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tonic::transport::Server;

use raftkv::config::ServerConfig;
use raftkv::kv::rpc::KvRpcServer;
use raftkv::kv::server::KvServer;
use raftkv::proto::kv::kv_service_server::KvServiceServer;
use raftkv::proto::raft::raft_service_server::RaftServiceServer;
use raftkv::raft::persister::FilePersister;
use raftkv::raft::transport::GrpcTransport;
use raftkv::raft::{Raft, RaftServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "server".to_string());
    let config = ServerConfig::load(&config_path)?;

    let peer_ids: Vec<u64> = config.peers.iter().filter(|p| p.id != config.id).map(|p| p.id).collect();
    let peer_addrs: Vec<(u64, String)> =
        config.peers.iter().filter(|p| p.id != config.id).map(|p| (p.id, p.address.clone())).collect();

    let transport = Arc::new(GrpcTransport::new(&peer_addrs)?);
    let persister = FilePersister::new(&config.data_dir)?;
    let (apply_tx, apply_rx) = mpsc::unbounded_channel();

    let raft = Raft::new(
        config.id,
        peer_ids,
        transport,
        persister,
        apply_tx,
        Duration::from_millis(config.election_timeout_min_ms),
        Duration::from_millis(config.election_timeout_max_ms),
        Duration::from_millis(config.heartbeat_ms),
    );

    let kv_server = KvServer::new(raft.clone(), apply_rx);

    let addr: std::net::SocketAddr = config.listen.parse()?;
    log::info!("raftkv server {} listening on {addr}", config.id);

    Server::builder()
        .add_service(RaftServiceServer::new(RaftServer::new(raft)))
        .add_service(KvServiceServer::new(KvRpcServer::new(kv_server)))
        .serve(addr)
        .await?;

    Ok(())
}
