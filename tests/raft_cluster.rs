use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use raftkv::raft::persister::MemoryPersister;
use raftkv::raft::transport::LoopbackNetwork;
use raftkv::raft::{ApplyMsg, Raft};

const ELECTION_MIN: Duration = Duration::from_millis(50);
const ELECTION_MAX: Duration = Duration::from_millis(100);
const HEARTBEAT: Duration = Duration::from_millis(15);

struct Cluster {
    rafts: Vec<Arc<Raft>>,
    applied: Vec<Arc<Mutex<Vec<ApplyMsg>>>>,
    network: Arc<LoopbackNetwork>,
}

fn build_cluster(n: usize) -> Cluster {
    let network = LoopbackNetwork::new();
    let mut rafts = Vec::new();
    let mut applied = Vec::new();

    for id in 0..n as u64 {
        let peers: Vec<u64> = (0..n as u64).filter(|&x| x != id).collect();
        let transport = Arc::new(network.transport_for(id));
        let persister = MemoryPersister::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let raft = Raft::new(id, peers, transport, persister, tx, ELECTION_MIN, ELECTION_MAX, HEARTBEAT);

        let vote_target = raft.clone();
        let append_target = raft.clone();
        network.register(
            id,
            move |args| vote_target.handle_request_vote(args),
            move |args| append_target.handle_append_entries(args),
        );

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_writer = log.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                log_writer.lock().unwrap().push(msg);
            }
        });

        rafts.push(raft);
        applied.push(log);
    }

    Cluster { rafts, applied, network }
}

/// Polls every replica until exactly one reports itself leader, returning
/// its index. Panics after `Cluster::ELECTION_WAIT` if no leader emerges.
async fn await_leader(cluster: &Cluster) -> usize {
    timeout(Duration::from_secs(5), async {
        loop {
            let leaders: Vec<usize> = cluster
                .rafts
                .iter()
                .enumerate()
                .filter(|(_, r)| r.get_state().1)
                .map(|(i, _)| i)
                .collect();
            if leaders.len() == 1 {
                return leaders[0];
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("a leader should have been elected")
}

#[tokio::test]
async fn elects_a_single_leader() {
    let cluster = build_cluster(3);
    let leader = await_leader(&cluster).await;
    let (term, _) = cluster.rafts[leader].get_state();
    assert!(term >= 1);
    for (i, raft) in cluster.rafts.iter().enumerate() {
        if i != leader {
            assert!(!raft.get_state().1);
        }
    }
}

#[tokio::test]
async fn replicates_and_commits_a_proposed_command() {
    let cluster = build_cluster(3);
    let leader = await_leader(&cluster).await;

    let (index, term, is_leader) = cluster.rafts[leader].start(b"hello".to_vec());
    assert!(is_leader);
    assert_eq!(index, 1);

    timeout(Duration::from_secs(5), async {
        loop {
            let all_applied = cluster.applied.iter().all(|log| {
                log.lock().unwrap().iter().any(|msg| matches!(
                    msg,
                    ApplyMsg::Command { index: i, data, .. } if *i == index && data == b"hello"
                ))
            });
            if all_applied {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("command should commit on every replica");

    for log in &cluster.applied {
        let entries = log.lock().unwrap();
        let entry = entries.iter().find(|m| matches!(m, ApplyMsg::Command { index: i, .. } if *i == index));
        match entry {
            Some(ApplyMsg::Command { term: applied_term, .. }) => assert_eq!(*applied_term, term),
            _ => panic!("expected command to be applied"),
        }
    }
}

#[tokio::test]
async fn elects_new_leader_after_partitioning_old_one() {
    let cluster = build_cluster(3);
    let first_leader = await_leader(&cluster).await;

    cluster.network.disconnect(first_leader as u64);

    timeout(Duration::from_secs(5), async {
        loop {
            let leaders: Vec<usize> = cluster
                .rafts
                .iter()
                .enumerate()
                .filter(|(i, r)| *i != first_leader && r.get_state().1)
                .map(|(i, _)| i)
                .collect();
            if leaders.len() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("remaining majority should elect a new leader");
}
