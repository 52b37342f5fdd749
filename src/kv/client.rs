use std::time::Duration;

use rand::Rng;
use tonic::transport::{Channel, Endpoint};

use crate::error::{Error, Result};
use crate::kv::Op;
use crate::proto::kv::kv_service_client::KvServiceClient;
use crate::proto::kv::{self, Request as KvRequest};

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

fn op_type(op: Op) -> kv::OpType {
    match op {
        Op::Get => kv::OpType::Get,
        Op::Put => kv::OpType::Put,
        Op::Append => kv::OpType::Append,
    }
}

/// The client library for talking to a `raftkv` cluster. Tracks which
/// server most recently turned out to be the leader so a long session of
/// requests doesn't have to rediscover it every time, and stamps every
/// request with a strictly increasing sequence number so the cluster can
/// dedup a request this clerk retried after a timeout.
pub struct Clerk {
    servers: Vec<KvServiceClient<Channel>>,
    client_id: u64,
    sequence_number: u64,
    last_leader: usize,
}

impl Clerk {
    pub fn new(addresses: &[String]) -> Result<Self> {
        let servers = addresses
            .iter()
            .map(|addr| -> Result<KvServiceClient<Channel>> {
                let endpoint = Endpoint::from_shared(format!("http://{addr}"))?;
                Ok(KvServiceClient::new(endpoint.connect_lazy()))
            })
            .collect::<Result<Vec<_>>>()?;
        if servers.is_empty() {
            return Err(Error::Config("clerk needs at least one server address".into()));
        }
        Ok(Clerk { servers, client_id: rand::thread_rng().gen(), sequence_number: 0, last_leader: 0 })
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.execute(Op::Get, key, Vec::new()).await
    }

    pub async fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.execute(Op::Put, key, value).await?;
        Ok(())
    }

    pub async fn append(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.execute(Op::Append, key, value).await?;
        Ok(())
    }

    /// Sends `op` to whichever server we think is leader, and failing
    /// that, round-robins the rest of the cluster until one accepts it.
    /// Mirrors the lab clerk's "retry against the next server on
    /// ErrWrongLeader" loop.
    async fn execute(&mut self, op: Op, key: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        self.sequence_number += 1;
        let request = KvRequest {
            op: op_type(op) as i32,
            key: key.to_string(),
            value,
            client_id: self.client_id,
            sequence_number: self.sequence_number,
        };

        loop {
            for offset in 0..self.servers.len() {
                let index = (self.last_leader + offset) % self.servers.len();
                match self.servers[index].execute(request.clone()).await {
                    Ok(response) => {
                        let reply = response.into_inner();
                        match kv::Status::try_from(reply.status) {
                            Ok(kv::Status::Ok) => {
                                self.last_leader = index;
                                return Ok(Some(reply.value));
                            }
                            Ok(kv::Status::NoKey) => {
                                self.last_leader = index;
                                return Ok(None);
                            }
                            Ok(kv::Status::SessionExpired) => return Err(Error::SessionExpired),
                            Ok(kv::Status::NotLeader) | Err(_) => continue,
                        }
                    }
                    Err(_) => continue,
                }
            }
            // A full lap found no leader; the cluster is probably mid
            // election. Wait out roughly one election round before
            // hammering it again.
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
}
