use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::kv::{Command, KvOutcome, Op};
use crate::raft::{ApplyMsg, Raft};

/// How long `execute` waits for a proposed command to commit before
/// giving up and telling the caller to try another server. Generous
/// relative to the heartbeat interval so a single lost packet doesn't
/// trip it.
const PROPOSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// How often the leadership watcher checks for a term change that should
/// invalidate outstanding waiters.
const LEADER_WATCH_INTERVAL: Duration = Duration::from_millis(50);

struct PendingWaiter {
    term: u64,
    sender: oneshot::Sender<KvOutcome>,
}

/// The replicated state machine sitting on top of a [`Raft`] instance.
/// Owns the actual key-value map; every mutation reaches it only after
/// going through consensus and coming back out the apply channel.
pub struct KvServer {
    raft: Arc<Raft>,
    store: DashMap<String, Vec<u8>>,
    /// Highest sequence number applied per client, for request dedup.
    last_seq: DashMap<u64, u64>,
    waiters: Mutex<HashMap<u64, PendingWaiter>>,
}

impl KvServer {
    /// Builds the service and spawns its apply loop and leadership
    /// watcher. `apply_rx` must be the receiving half of the channel
    /// passed to the paired `Raft::new`.
    pub fn new(raft: Arc<Raft>, apply_rx: mpsc::UnboundedReceiver<ApplyMsg>) -> Arc<Self> {
        let server = Arc::new(KvServer {
            raft,
            store: DashMap::new(),
            last_seq: DashMap::new(),
            waiters: Mutex::new(HashMap::new()),
        });
        tokio::spawn(server.clone().run_apply_loop(apply_rx));
        tokio::spawn(server.clone().run_leader_watch());
        server
    }

    /// Proposes `cmd` to Raft and waits for it to commit and apply,
    /// returning the outcome. Errs with `NotLeader` if this server isn't
    /// (or stops being) the leader before the command commits.
    pub async fn execute(self: &Arc<Self>, cmd: Command) -> Result<KvOutcome> {
        let encoded = bincode::serialize(&cmd).map_err(|e| Error::Encode(e.to_string()))?;
        let (index, term, is_leader) = self.raft.start(encoded);
        if !is_leader {
            return Err(Error::NotLeader { leader_hint: self.raft.leader_hint() });
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(index, PendingWaiter { term, sender: tx });

        match tokio::time::timeout(PROPOSE_TIMEOUT, rx).await {
            Ok(Ok(KvOutcome::Invalidated)) => {
                Err(Error::NotLeader { leader_hint: self.raft.leader_hint() })
            }
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::Internal("apply loop dropped the waiter".into())),
            Err(_) => {
                self.waiters.lock().remove(&index);
                Err(Error::NotLeader { leader_hint: self.raft.leader_hint() })
            }
        }
    }

    async fn run_apply_loop(self: Arc<Self>, mut apply_rx: mpsc::UnboundedReceiver<ApplyMsg>) {
        while let Some(msg) = apply_rx.recv().await {
            match msg {
                ApplyMsg::Command { index, term, data } => {
                    let outcome = self.apply_command(&data);
                    if let Some(waiter) = self.waiters.lock().remove(&index) {
                        let reply = if waiter.term == term { outcome } else { KvOutcome::Invalidated };
                        let _ = waiter.sender.send(reply);
                    }
                }
                ApplyMsg::Snapshot { index, .. } => {
                    log::warn!("kv server received unexpected snapshot apply at index {index}; ignoring");
                }
            }
        }
    }

    fn apply_command(&self, data: &[u8]) -> KvOutcome {
        let cmd: Command = match bincode::deserialize(data) {
            Ok(c) => c,
            Err(e) => {
                log::error!("kv server: dropping malformed command: {e}");
                return KvOutcome::Ok;
            }
        };
        apply_to_store(&self.store, &self.last_seq, &cmd)
    }

    /// A command proposed while leader can be stranded in `waiters` if
    /// this server loses leadership before the entry ever commits (for
    /// example, a network partition heals the other way). The apply loop
    /// alone would never notice; this task watches for a term bump and
    /// fails anything still waiting on an older term.
    async fn run_leader_watch(self: Arc<Self>) {
        let mut last_known_term = self.raft.get_state().0;
        loop {
            tokio::time::sleep(LEADER_WATCH_INTERVAL).await;
            let (term, _) = self.raft.get_state();
            if term == last_known_term {
                continue;
            }
            last_known_term = term;
            let stale: Vec<u64> = {
                let waiters = self.waiters.lock();
                waiters.iter().filter(|(_, w)| w.term < term).map(|(&index, _)| index).collect()
            };
            for index in stale {
                if let Some(waiter) = self.waiters.lock().remove(&index) {
                    let _ = waiter.sender.send(KvOutcome::Invalidated);
                }
            }
        }
    }
}

/// The actual apply step, factored out of `KvServer` so it can be
/// exercised without a running `Raft` instance.
fn apply_to_store(store: &DashMap<String, Vec<u8>>, last_seq: &DashMap<u64, u64>, cmd: &Command) -> KvOutcome {
    let already_applied = last_seq.get(&cmd.client_id).map(|seq| *seq >= cmd.sequence_number).unwrap_or(false);
    match cmd.op {
        Op::Get => KvOutcome::Value(store.get(&cmd.key).map(|v| v.clone())),
        Op::Put => {
            if !already_applied {
                store.insert(cmd.key.clone(), cmd.value.clone());
                last_seq.insert(cmd.client_id, cmd.sequence_number);
            }
            KvOutcome::Ok
        }
        Op::Append => {
            if !already_applied {
                store.entry(cmd.key.clone()).or_default().extend_from_slice(&cmd.value);
                last_seq.insert(cmd.client_id, cmd.sequence_number);
            }
            KvOutcome::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(client_id: u64, seq: u64, op: Op, key: &str, value: &[u8]) -> Command {
        Command { client_id, sequence_number: seq, op, key: key.to_string(), value: value.to_vec() }
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = DashMap::new();
        let last_seq = DashMap::new();
        apply_to_store(&store, &last_seq, &command(1, 1, Op::Put, "k", b"v1"));
        let outcome = apply_to_store(&store, &last_seq, &command(1, 2, Op::Get, "k", b""));
        assert!(matches!(outcome, KvOutcome::Value(Some(v)) if v == b"v1"));
    }

    #[test]
    fn append_accumulates_and_get_returns_none_for_missing_key() {
        let store = DashMap::new();
        let last_seq = DashMap::new();
        apply_to_store(&store, &last_seq, &command(1, 1, Op::Append, "k", b"a"));
        apply_to_store(&store, &last_seq, &command(1, 2, Op::Append, "k", b"b"));
        let outcome = apply_to_store(&store, &last_seq, &command(1, 3, Op::Get, "k", b""));
        assert!(matches!(outcome, KvOutcome::Value(Some(v)) if v == b"ab"));

        let missing = apply_to_store(&store, &last_seq, &command(1, 4, Op::Get, "missing", b""));
        assert!(matches!(missing, KvOutcome::Value(None)));
    }

    #[test]
    fn replayed_sequence_number_is_a_no_op() {
        let store = DashMap::new();
        let last_seq = DashMap::new();
        apply_to_store(&store, &last_seq, &command(1, 5, Op::Put, "k", b"first"));
        // A retried request carries the same sequence number and must not
        // be applied twice, even though the client never saw the first reply.
        apply_to_store(&store, &last_seq, &command(1, 5, Op::Put, "k", b"second"));
        let outcome = apply_to_store(&store, &last_seq, &command(1, 6, Op::Get, "k", b""));
        assert!(matches!(outcome, KvOutcome::Value(Some(v)) if v == b"first"));
    }
}
