pub mod raft {
    tonic::include_proto!("raftkv.raft");
}

pub mod kv {
    tonic::include_proto!("raftkv.kv");
}
