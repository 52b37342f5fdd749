use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::proto::raft::raft_service_server::RaftService;
use crate::proto::raft::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use crate::raft::Raft;

/// The gRPC-facing wrapper around a [`Raft`] handle. Everything here is
/// synchronous bookkeeping under the replica's own lock; the actual
/// consensus logic lives in `Raft` so it can be driven the same way by
/// both real RPCs and the loopback network in tests.
pub struct RaftServer {
    raft: Arc<Raft>,
}

impl RaftServer {
    pub fn new(raft: Arc<Raft>) -> Self {
        RaftServer { raft }
    }
}

#[tonic::async_trait]
impl RaftService for RaftServer {
    async fn request_vote(
        &self,
        request: Request<RequestVoteArgs>,
    ) -> std::result::Result<Response<RequestVoteReply>, Status> {
        let reply = self.raft.handle_request_vote(request.into_inner());
        Ok(Response::new(reply))
    }

    async fn append_entries(
        &self,
        request: Request<AppendEntriesArgs>,
    ) -> std::result::Result<Response<AppendEntriesReply>, Status> {
        let reply = self.raft.handle_append_entries(request.into_inner());
        Ok(Response::new(reply))
    }
}
