use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tonic::transport::Channel;

use crate::error::{Error, Result};
use crate::proto::raft::raft_service_client::RaftServiceClient;
use crate::proto::raft::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};

const RPC_TIMEOUT: Duration = Duration::from_millis(1000);

/// Everything a `Raft` replica needs from the network: send one RPC to one
/// peer and either get a reply or an error. Kept peer-addressed rather
/// than connection-addressed so tests can swap in a simulated network
/// without touching replica logic at all.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(&self, peer: u64, args: RequestVoteArgs) -> Result<RequestVoteReply>;
    async fn append_entries(&self, peer: u64, args: AppendEntriesArgs) -> Result<AppendEntriesReply>;
}

/// Production transport: one lazily-connected tonic channel per peer.
pub struct GrpcTransport {
    clients: HashMap<u64, RaftServiceClient<Channel>>,
}

impl GrpcTransport {
    /// Builds lazy channels for every peer address. Lazy connection means
    /// this never blocks on an unreachable peer at startup, which matters
    /// because peers are routinely started out of order.
    pub fn new(peers: &[(u64, String)]) -> Result<Self> {
        let mut clients = HashMap::new();
        for (id, addr) in peers {
            let endpoint = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
                .map_err(|e| Error::Config(e.to_string()))?;
            let channel = endpoint.connect_lazy();
            clients.insert(*id, RaftServiceClient::new(channel));
        }
        Ok(GrpcTransport { clients })
    }

    fn client(&self, peer: u64) -> Result<RaftServiceClient<Channel>> {
        self.clients
            .get(&peer)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no channel configured for peer {peer}")))
    }
}

#[async_trait]
impl RaftTransport for GrpcTransport {
    async fn request_vote(&self, peer: u64, args: RequestVoteArgs) -> Result<RequestVoteReply> {
        let mut client = self.client(peer)?;
        let reply = tokio::time::timeout(RPC_TIMEOUT, client.request_vote(args))
            .await
            .map_err(|_| Error::Rpc("request_vote timed out".into()))??;
        Ok(reply.into_inner())
    }

    async fn append_entries(&self, peer: u64, args: AppendEntriesArgs) -> Result<AppendEntriesReply> {
        let mut client = self.client(peer)?;
        let reply = tokio::time::timeout(RPC_TIMEOUT, client.append_entries(args))
            .await
            .map_err(|_| Error::Rpc("append_entries timed out".into()))??;
        Ok(reply.into_inner())
    }
}

type VoteHandler = Box<dyn Fn(RequestVoteArgs) -> RequestVoteReply + Send + Sync>;
type AppendHandler = Box<dyn Fn(AppendEntriesArgs) -> AppendEntriesReply + Send + Sync>;

struct LoopbackPeer {
    vote: VoteHandler,
    append: AppendHandler,
}

/// An in-process simulated network, the analogue of the lab's `labrpc`:
/// servers register themselves with handler closures, and tests control
/// connectivity directly instead of going through sockets. Used only by
/// integration tests.
pub struct LoopbackNetwork {
    peers: Mutex<HashMap<u64, LoopbackPeer>>,
    /// Peer ids currently reachable from every other peer. A peer missing
    /// from this set is partitioned away: every RPC to or from it fails.
    connected: Mutex<std::collections::HashSet<u64>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(LoopbackNetwork {
            peers: Mutex::new(HashMap::new()),
            connected: Mutex::new(std::collections::HashSet::new()),
        })
    }

    pub fn register(
        &self,
        id: u64,
        vote: impl Fn(RequestVoteArgs) -> RequestVoteReply + Send + Sync + 'static,
        append: impl Fn(AppendEntriesArgs) -> AppendEntriesReply + Send + Sync + 'static,
    ) {
        self.peers.lock().insert(id, LoopbackPeer { vote: Box::new(vote), append: Box::new(append) });
        self.connected.lock().insert(id);
    }

    pub fn connect(&self, id: u64) {
        self.connected.lock().insert(id);
    }

    pub fn disconnect(&self, id: u64) {
        self.connected.lock().remove(&id);
    }

    fn reachable(&self, from: u64, to: u64) -> bool {
        let connected = self.connected.lock();
        connected.contains(&from) && connected.contains(&to)
    }

    /// A transport handle scoped to a single server's view of the network.
    pub fn transport_for(self: &Arc<Self>, me: u64) -> LoopbackTransport {
        LoopbackTransport { net: self.clone(), me }
    }
}

#[derive(Clone)]
pub struct LoopbackTransport {
    net: Arc<LoopbackNetwork>,
    me: u64,
}

#[async_trait]
impl RaftTransport for LoopbackTransport {
    async fn request_vote(&self, peer: u64, args: RequestVoteArgs) -> Result<RequestVoteReply> {
        if !self.net.reachable(self.me, peer) {
            return Err(Error::Rpc(format!("{peer} unreachable")));
        }
        // Yield once so a disconnect issued concurrently with this call has
        // a chance to land before the handler runs, same as a real RPC.
        tokio::task::yield_now().await;
        let peers = self.net.peers.lock();
        let peer_entry = peers.get(&peer).ok_or_else(|| Error::Rpc(format!("no such peer {peer}")))?;
        Ok((peer_entry.vote)(args))
    }

    async fn append_entries(&self, peer: u64, args: AppendEntriesArgs) -> Result<AppendEntriesReply> {
        if !self.net.reachable(self.me, peer) {
            return Err(Error::Rpc(format!("{peer} unreachable")));
        }
        tokio::task::yield_now().await;
        let peers = self.net.peers.lock();
        let peer_entry = peers.get(&peer).ok_or_else(|| Error::Rpc(format!("no such peer {peer}")))?;
        Ok((peer_entry.append)(args))
    }
}
