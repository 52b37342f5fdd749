use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::kv::server::KvServer;
use crate::kv::{Command, KvOutcome, Op};
use crate::proto::kv::kv_service_server::KvService;
use crate::proto::kv::{self, Reply, Request as KvRequest};

/// The gRPC-facing wrapper around a [`KvServer`].
pub struct KvRpcServer {
    server: Arc<KvServer>,
}

impl KvRpcServer {
    pub fn new(server: Arc<KvServer>) -> Self {
        KvRpcServer { server }
    }
}

#[tonic::async_trait]
impl KvService for KvRpcServer {
    async fn execute(&self, request: Request<KvRequest>) -> std::result::Result<Response<Reply>, Status> {
        let req = request.into_inner();
        let op = match kv::OpType::try_from(req.op) {
            Ok(kv::OpType::Get) => Op::Get,
            Ok(kv::OpType::Put) => Op::Put,
            Ok(kv::OpType::Append) => Op::Append,
            Err(_) => return Ok(Response::new(Reply { status: kv::Status::NoKey as i32, value: vec![], leader_hint: 0 })),
        };
        let cmd = Command { client_id: req.client_id, sequence_number: req.sequence_number, op, key: req.key, value: req.value };

        match self.server.execute(cmd).await {
            Ok(KvOutcome::Value(Some(value))) => {
                Ok(Response::new(Reply { status: kv::Status::Ok as i32, value, leader_hint: 0 }))
            }
            Ok(KvOutcome::Value(None)) => {
                Ok(Response::new(Reply { status: kv::Status::NoKey as i32, value: vec![], leader_hint: 0 }))
            }
            Ok(KvOutcome::Ok) => Ok(Response::new(Reply { status: kv::Status::Ok as i32, value: vec![], leader_hint: 0 })),
            Ok(KvOutcome::Invalidated) => {
                Ok(Response::new(Reply { status: kv::Status::NotLeader as i32, value: vec![], leader_hint: 0 }))
            }
            Err(crate::error::Error::NotLeader { leader_hint }) => Ok(Response::new(Reply {
                status: kv::Status::NotLeader as i32,
                value: vec![],
                leader_hint: leader_hint.unwrap_or(0),
            })),
            Err(crate::error::Error::SessionExpired) => {
                Ok(Response::new(Reply { status: kv::Status::SessionExpired as i32, value: vec![], leader_hint: 0 }))
            }
            Err(e) => Err(Status::internal(e.to_string())),
        }
    }
}
